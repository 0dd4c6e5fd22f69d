//! Event intake: validation, conversation-log append, bot/stale
//! short-circuits, and member-stats updates.
//!
//! Every event that reaches the orchestrator passes through here exactly
//! once, before any sequencing or planning.

use std::sync::Arc;

use tracing::debug;

use banter_core::{ChatEvent, ChatTurn, Role};
use banter_memory::ConversationLog;
use banter_stats::StatsRegistry;

use crate::error::{EngineError, Result};

/// Why intake stopped, when it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Conversational event; continue into planning.
    Continue,
    /// The bot's own message: logged for context only.
    FromBot,
    /// Backfill older than the lag cutoff: logged for context only.
    StaleBackfill,
}

#[derive(Debug, Clone, Copy)]
pub struct PreprocessOutcome {
    pub disposition: Disposition,
}

impl PreprocessOutcome {
    pub fn should_continue(&self) -> bool {
        self.disposition == Disposition::Continue
    }
}

/// Command/mention classification driving the orchestrator's branch
/// between immediate and debounced handling.
#[derive(Debug, Clone, Copy)]
pub struct Classification {
    pub is_command: bool,
    pub is_mention: bool,
}

pub fn classify(event: &ChatEvent) -> Classification {
    Classification {
        is_command: event.is_command(),
        is_mention: event.mentions_bot,
    }
}

pub struct Preprocessor {
    log: Arc<ConversationLog>,
    stats: Arc<StatsRegistry>,
    max_event_lag_ms: i64,
}

impl Preprocessor {
    pub fn new(log: Arc<ConversationLog>, stats: Arc<StatsRegistry>, max_event_lag_ms: i64) -> Self {
        Self {
            log,
            stats,
            max_event_lag_ms,
        }
    }

    /// Validate, log, and account for one event.
    ///
    /// The turn is appended for every valid event — even ones that stop
    /// processing — so later context windows still see them.
    pub fn ingest(&self, event: &ChatEvent) -> Result<PreprocessOutcome> {
        validate(event)?;

        let session_key = event.session_key();
        let ts = event.event_time();

        self.log.append_turn(
            &session_key,
            ChatTurn {
                role: if event.from_bot { Role::Bot } else { Role::User },
                content: event.raw_text.clone(),
                timestamp: ts,
                user_id: event.user_id.clone(),
                user_name: event.user_name.clone(),
                mentions_bot: event.mentions_bot,
                is_command: event.is_command(),
            },
        );

        if event.from_bot {
            return Ok(PreprocessOutcome {
                disposition: Disposition::FromBot,
            });
        }

        let ingest = event.ingest_time.unwrap_or(ts);
        let lag = ingest - event.timestamp;
        if event.timestamp > 0
            && lag > self.max_event_lag_ms
            && !event.mentions_bot
            && !event.is_command()
        {
            debug!(
                session = %session_key,
                lag_ms = lag,
                "stale backfill: stored for context, not processed"
            );
            return Ok(PreprocessOutcome {
                disposition: Disposition::StaleBackfill,
            });
        }

        self.stats.on_user_message(
            &event.member_key(),
            &session_key,
            &event.user_id,
            ts,
            &event.raw_text,
            event.mentions_bot,
        );

        Ok(PreprocessOutcome {
            disposition: Disposition::Continue,
        })
    }
}

fn validate(event: &ChatEvent) -> Result<()> {
    if event.platform.is_empty() || event.group_id.is_empty() || event.user_id.is_empty() {
        return Err(EngineError::Validation(
            "event missing platform/group/user identity".into(),
        ));
    }
    if event.raw_text.trim().is_empty() {
        return Err(EngineError::Validation("event has empty text".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn services() -> (Arc<ConversationLog>, Arc<StatsRegistry>, Preprocessor) {
        let log = Arc::new(ConversationLog::new(50));
        let stats = Arc::new(StatsRegistry::new());
        let pre = Preprocessor::new(log.clone(), stats.clone(), 30_000);
        (log, stats, pre)
    }

    fn event(text: &str, now: i64) -> ChatEvent {
        ChatEvent {
            platform: "qq".into(),
            group_id: "g1".into(),
            user_id: "u1".into(),
            message_id: "m1".into(),
            raw_text: text.into(),
            timestamp: now,
            ingest_time: Some(now),
            mentions_bot: false,
            from_bot: false,
            user_name: None,
            group_name: None,
            is_private: false,
        }
    }

    #[test]
    fn conversational_event_logs_and_counts() {
        let now = 1_000_000;
        let (log, stats, pre) = services();
        let out = pre.ingest(&event("你们在聊什么", now)).unwrap();
        assert!(out.should_continue());
        assert_eq!(log.len("qq:g1"), 1);
        assert!(stats.message_rate("qq:g1:u1", now) > 0.0);
    }

    #[test]
    fn bot_event_is_logged_but_terminal() {
        let now = 1_000_000;
        let (log, stats, pre) = services();
        let mut e = event("我来啦", now);
        e.from_bot = true;
        // Even a bot message that @s itself terminates intake.
        e.mentions_bot = true;
        let out = pre.ingest(&e).unwrap();
        assert_eq!(out.disposition, Disposition::FromBot);
        assert_eq!(log.len("qq:g1"), 1);
        assert_eq!(stats.message_rate("qq:g1:u1", now), 0.0);
    }

    #[test]
    fn stale_backfill_is_logged_but_not_counted() {
        let now = 1_000_000;
        let (log, stats, pre) = services();
        let mut e = event("一小时前的消息", now - 60_000);
        e.ingest_time = Some(now);
        let out = pre.ingest(&e).unwrap();
        assert_eq!(out.disposition, Disposition::StaleBackfill);
        assert_eq!(log.len("qq:g1"), 1);
        assert_eq!(stats.message_rate("qq:g1:u1", now), 0.0);
    }

    #[test]
    fn stale_mention_still_continues() {
        let now = 1_000_000;
        let (_, _, pre) = services();
        let mut e = event("@bot 在吗", now - 60_000);
        e.ingest_time = Some(now);
        e.mentions_bot = true;
        let out = pre.ingest(&e).unwrap();
        assert!(out.should_continue());
    }

    #[test]
    fn stale_command_still_continues() {
        let now = 1_000_000;
        let (_, _, pre) = services();
        let mut e = event("/status", now - 60_000);
        e.ingest_time = Some(now);
        assert!(pre.ingest(&e).unwrap().should_continue());
    }

    #[test]
    fn malformed_event_is_rejected() {
        let (_, _, pre) = services();
        let mut e = event("hi", 1000);
        e.group_id.clear();
        assert!(pre.ingest(&e).is_err());

        let mut e2 = event("   ", 1000);
        e2.raw_text = "   ".into();
        assert!(pre.ingest(&e2).is_err());
    }

    #[test]
    fn classify_flags_commands_and_mentions() {
        let c = classify(&event("/help", 0));
        assert!(c.is_command && !c.is_mention);

        let mut e = event("在吗", 0);
        e.mentions_bot = true;
        let c = classify(&e);
        assert!(!c.is_command && c.is_mention);
    }

    #[test]
    fn turn_derives_command_flag() {
        let (log, _, pre) = services();
        pre.ingest(&event("！签到", 1000)).unwrap();
        let turns = log.recent_turns("qq:g1", 1);
        assert!(turns[0].is_command);
        assert_eq!(turns[0].role, Role::User);
    }
}
