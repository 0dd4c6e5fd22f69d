//! Turn-taking guard applied to debounced flushes before any planning.
//!
//! A flush is allowed through when the session owes an interrupted reply
//! (force-quote), when the bot has been quiet long enough, or when a
//! multi-message burst is clearly asking something. Everything else is
//! dropped silently — the conversation log already kept the messages.

use banter_core::text::is_question;

/// Minimum quiet time after a bot reply before an ordinary flush may pass.
const GUARD_COOLDOWN_MS: i64 = 5000;
/// Burst size at which a question overrides the cooldown.
const QUESTION_OVERRIDE_COUNT: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// Proceed; `force_quote` reports whether the force-quote bypass fired.
    Allow { force_quote: bool },
    Skip { reason: &'static str },
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardDecision::Allow { .. })
    }
}

/// Decide whether a flushed snapshot may enter the reply pipeline.
///
/// `since_last_bot_ms` is `None` when the bot has never spoken in this
/// session; `count` is the snapshot's event count; `merged_text` is the
/// joined burst text.
pub fn check_turn_taking(
    force_quote: bool,
    since_last_bot_ms: Option<i64>,
    count: usize,
    merged_text: &str,
) -> GuardDecision {
    if force_quote {
        return GuardDecision::Allow { force_quote: true };
    }
    match since_last_bot_ms {
        None => GuardDecision::Allow { force_quote: false },
        Some(since) if since >= GUARD_COOLDOWN_MS => GuardDecision::Allow { force_quote: false },
        Some(_) if count >= QUESTION_OVERRIDE_COUNT && is_question(merged_text) => {
            GuardDecision::Allow { force_quote: false }
        }
        Some(_) => GuardDecision::Skip {
            reason: "turn-taking-cooldown",
        },
    }
}
