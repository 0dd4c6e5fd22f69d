//! Selects the history slices and topic hint that go into the prompt.
//!
//! The window pivots on the latest bot turn: if the bot spoke less than
//! two minutes ago, context is "five turns of runway before the bot turn,
//! plus everything after it"; otherwise just the last six turns. A
//! same-speaker run at the tail is merged into a single target turn so
//! rapid-fire fragments read as one message.

use std::sync::Arc;

use banter_core::text::{emoji_density, has_meme_tokens};
use banter_core::{ChatTurn, EnrichedEvent, Role};
use banter_memory::ConversationLog;

/// A bot turn older than this no longer anchors the window.
const SAME_TOPIC_WINDOW_MS: i64 = 120_000;
/// Same-speaker turns this close together merge into one target.
const RUN_MERGE_GAP_MS: i64 = 5000;
/// How many turns to fetch before slicing.
const FETCH_LIMIT: usize = 40;
/// Fallback window when the bot has been quiet.
const COLD_WINDOW: usize = 6;
/// Hard cap on turns handed to the prompt.
const MAX_CONTEXT_TURNS: usize = 12;

#[derive(Debug, Clone, Default)]
pub struct ContextMeta {
    pub since_last_bot_ms: Option<i64>,
    pub messages_in_window: usize,
    pub is_same_topic: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ReplyContext {
    /// Oldest-first slice ending at the target turn.
    pub recent_turns: Vec<ChatTurn>,
    /// The (possibly run-merged) turn the reply addresses.
    pub target_turn: Option<ChatTurn>,
    pub topic_summary: Option<&'static str>,
    pub meta: ContextMeta,
}

pub struct ContextBuilder {
    log: Arc<ConversationLog>,
}

impl ContextBuilder {
    pub fn new(log: Arc<ConversationLog>) -> Self {
        Self { log }
    }

    pub fn build(&self, ev: &EnrichedEvent, now: i64) -> ReplyContext {
        let key = ev.session_key();
        let turns = self.log.recent_turns(&key, FETCH_LIMIT);
        if turns.is_empty() {
            return ReplyContext::default();
        }

        let last_bot_idx = turns.iter().rposition(|t| t.role == Role::Bot);
        let since_last_bot_ms = last_bot_idx.map(|i| now - turns[i].timestamp);
        let messages_in_window = match last_bot_idx {
            Some(i) => turns.len() - 1 - i,
            None => turns.len(),
        };

        let candidate: Vec<ChatTurn> = match (last_bot_idx, since_last_bot_ms) {
            (Some(i), Some(s)) if s < SAME_TOPIC_WINDOW_MS => {
                turns[i.saturating_sub(5)..].to_vec()
            }
            _ => turns[turns.len().saturating_sub(COLD_WINDOW)..].to_vec(),
        };

        let target_turn = merge_trailing_run(&candidate);

        let skip = candidate.len().saturating_sub(MAX_CONTEXT_TURNS);
        let recent_turns = candidate[skip..].to_vec();

        let window_text: String = match last_bot_idx {
            Some(i) => turns[i + 1..]
                .iter()
                .map(|t| t.content.as_str())
                .collect::<Vec<_>>()
                .join(" "),
            None => turns
                .iter()
                .map(|t| t.content.as_str())
                .collect::<Vec<_>>()
                .join(" "),
        };
        let topic_summary = summarize_topic(&window_text);

        let is_same_topic =
            matches!(since_last_bot_ms, Some(s) if s < SAME_TOPIC_WINDOW_MS) && messages_in_window > 1;

        ReplyContext {
            recent_turns,
            target_turn,
            topic_summary,
            meta: ContextMeta {
                since_last_bot_ms,
                messages_in_window,
                is_same_topic,
            },
        }
    }
}

/// Walk backwards while the same user keeps talking within the merge gap;
/// the run collapses into one turn carrying the joined text and the last
/// turn's identity.
fn merge_trailing_run(candidate: &[ChatTurn]) -> Option<ChatTurn> {
    let last = candidate.last()?;
    let mut start = candidate.len() - 1;
    while start > 0 {
        let prior = &candidate[start - 1];
        if prior.role == Role::User
            && prior.user_id == last.user_id
            && last.timestamp - prior.timestamp <= RUN_MERGE_GAP_MS
        {
            start -= 1;
        } else {
            break;
        }
    }

    if start == candidate.len() - 1 {
        return Some(last.clone());
    }
    let content = candidate[start..]
        .iter()
        .map(|t| t.content.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let mut merged = last.clone();
    merged.content = content;
    merged.mentions_bot = candidate[start..].iter().any(|t| t.mentions_bot);
    Some(merged)
}

/// Cheap mood hint for the prompt's SUMMARY block; first match wins.
fn summarize_topic(window_text: &str) -> Option<&'static str> {
    if window_text.contains('?') || window_text.contains('？') {
        return Some("刚刚在问问题或讨论某个疑问");
    }
    if emoji_density(window_text) > 0.0 {
        return Some("在刷表情包玩梗");
    }
    if window_text.contains('@') {
        return Some("在互相@调侃");
    }
    if has_meme_tokens(window_text) {
        return Some("气氛很欢乐，大家在哈哈哈");
    }
    None
}
