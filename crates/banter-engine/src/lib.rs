//! The conversation orchestration engine: everything between a platform
//! adapter's normalized event stream and the LLM.
//!
//! The engine decides, per incoming message, whether to reply, when, what
//! register to use, and how to deliver it — burst debouncing, cooldowns,
//! humanized typing latency, multi-segment sends, and mid-send
//! cancellation when the group moves on. See [`orchestrator::Orchestrator`]
//! for the entry point.

pub mod context;
pub mod debounce;
pub mod debug;
pub mod dice;
pub mod error;
pub mod guard;
pub mod orchestrator;
pub mod planner;
pub mod ports;
pub mod preprocess;
pub mod prompt;
pub mod reply;
pub mod send;
pub mod session;
pub mod style;
pub mod utterance;

pub use dice::{Dice, ScriptedDice, ThreadDice};
pub use error::{EngineError, Result};
pub use orchestrator::{Collaborators, Orchestrator, SessionDebugSnapshot};
pub use planner::{PlanResult, ReplyMode};
pub use ports::{ChatMessage, CommandDispatcher, LlmClient, MsgRole, Outbound};
pub use send::SendReport;
