//! Core types shared across the Banter workspace: chat events and turns,
//! configuration, errors, and the lexical helpers used by the stats and
//! planning layers.

pub mod config;
pub mod error;
pub mod event;
pub mod text;

pub use config::BanterConfig;
pub use error::{BanterError, Result};
pub use event::{ChatEvent, ChatTurn, EnrichedEvent, QuoteTarget, Role};
