use std::collections::VecDeque;
use std::sync::Mutex;

use dashmap::DashMap;
use serde::Serialize;

use banter_core::text::{clamp01, normalize};

use crate::group::GroupMessages;
use crate::spam::{self, SpamType};

/// Recent-message bound per member.
const RECENT_MAX: usize = 30;
/// Window for the message-rate score.
const RATE_WINDOW_MS: i64 = 300_000;
/// Messages per minute considered "very active" for a single user.
const RATE_NORMALIZER: f64 = 10.0;
/// Window for repetition, echo, and spam classification.
const REPEAT_WINDOW_MS: i64 = 120_000;
/// Tenure that saturates the intimacy tenure term.
const TENURE_FULL_DAYS: f64 = 14.0;

/// One buffered message from a member, kept for windowed scores.
#[derive(Debug, Clone)]
pub(crate) struct RecentMessage {
    pub at: i64,
    pub text: String,
    pub normalized: String,
}

#[derive(Debug)]
struct MemberRecord {
    total_messages: u64,
    total_replies_from_bot: u64,
    total_mentions_bot: u64,
    first_seen_at: i64,
    last_active_at: i64,
    last_replied_at: Option<i64>,
    recent: VecDeque<RecentMessage>,
}

impl MemberRecord {
    fn new(at: i64) -> Self {
        Self {
            total_messages: 0,
            total_replies_from_bot: 0,
            total_mentions_bot: 0,
            first_seen_at: at,
            last_active_at: at,
            last_replied_at: None,
            recent: VecDeque::with_capacity(RECENT_MAX),
        }
    }

    fn window(&self, now: i64) -> Vec<&RecentMessage> {
        let cutoff = now - REPEAT_WINDOW_MS;
        self.recent.iter().filter(|m| m.at > cutoff).collect()
    }
}

/// Everything the planner needs to know about the sender of one event,
/// computed in a single pass.
#[derive(Debug, Clone, Serialize)]
pub struct MemberProfile {
    pub intimacy: f64,
    pub message_rate: f64,
    pub repetition: f64,
    pub meme_score: f64,
    pub spam: SpamType,
    pub urgency: f64,
}

impl Default for MemberProfile {
    fn default() -> Self {
        Self {
            intimacy: 0.15,
            message_rate: 0.0,
            repetition: 0.0,
            meme_score: 0.0,
            spam: SpamType::Normal,
            urgency: 0.0,
        }
    }
}

/// Lazy-created per-member counters plus the per-group echo buffer.
///
/// Updated by the preprocessor (`on_user_message`) and the reply commit
/// path (`on_bot_reply`); read by the planner via [`Self::profile`].
pub struct StatsRegistry {
    members: DashMap<String, Mutex<MemberRecord>>,
    groups: GroupMessages,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self {
            members: DashMap::new(),
            groups: GroupMessages::new(),
        }
    }

    /// Record an incoming user message. `member_key` is
    /// `{platform}:{group_id}:{user_id}`, `group_key` is
    /// `{platform}:{group_id}`.
    pub fn on_user_message(
        &self,
        member_key: &str,
        group_key: &str,
        user_id: &str,
        at: i64,
        text: &str,
        mentions_bot: bool,
    ) {
        let normalized = normalize(text);
        {
            let entry = self
                .members
                .entry(member_key.to_string())
                .or_insert_with(|| Mutex::new(MemberRecord::new(at)));
            let mut rec = entry.lock().unwrap();
            rec.total_messages += 1;
            if mentions_bot {
                rec.total_mentions_bot += 1;
            }
            rec.last_active_at = at;
            if rec.recent.len() == RECENT_MAX {
                rec.recent.pop_front();
            }
            rec.recent.push_back(RecentMessage {
                at,
                text: text.to_string(),
                normalized: normalized.clone(),
            });
        }
        self.groups.record(group_key, user_id, at, &normalized);
    }

    /// Record a successful bot reply addressed at `member_key`.
    pub fn on_bot_reply(&self, member_key: &str, at: i64) {
        let entry = self
            .members
            .entry(member_key.to_string())
            .or_insert_with(|| Mutex::new(MemberRecord::new(at)));
        let mut rec = entry.lock().unwrap();
        rec.total_replies_from_bot += 1;
        rec.last_replied_at = Some(at);
    }

    /// How close the bot and this member are, in `[0,1]`.
    ///
    /// `0.15 + 0.4·(replies/msgs) + 0.2·(mentions/msgs) + 0.25·(tenure/14d)`,
    /// each ratio clamped before weighting.
    pub fn intimacy(&self, member_key: &str, now: i64) -> f64 {
        match self.members.get(member_key) {
            Some(entry) => {
                let rec = entry.lock().unwrap();
                let msgs = rec.total_messages.max(1) as f64;
                let reply_ratio = clamp01(rec.total_replies_from_bot as f64 / msgs);
                let mention_ratio = clamp01(rec.total_mentions_bot as f64 / msgs);
                let tenure_days = (now - rec.first_seen_at).max(0) as f64 / 86_400_000.0;
                let tenure = clamp01(tenure_days / TENURE_FULL_DAYS);
                clamp01(0.15 + 0.4 * reply_ratio + 0.2 * mention_ratio + 0.25 * tenure)
            }
            None => 0.15,
        }
    }

    /// Messages in the last 5 minutes against a 10 msg/min ceiling.
    pub fn message_rate(&self, member_key: &str, now: i64) -> f64 {
        match self.members.get(member_key) {
            Some(entry) => {
                let rec = entry.lock().unwrap();
                let cutoff = now - RATE_WINDOW_MS;
                let count = rec.recent.iter().filter(|m| m.at > cutoff).count();
                clamp01(count as f64 / (5.0 * RATE_NORMALIZER))
            }
            None => 0.0,
        }
    }

    /// Highest occurrence count of any normalized text within the last
    /// 2 minutes, mapped through `(max − 1) / 3`.
    pub fn repetition_score(&self, member_key: &str, now: i64) -> f64 {
        match self.members.get(member_key) {
            Some(entry) => {
                let rec = entry.lock().unwrap();
                repetition_of(&rec.window(now))
            }
            None => 0.0,
        }
    }

    /// How many distinct users echoed `text` in this group recently,
    /// mapped through `(distinct − 1) / 4`.
    pub fn meme_score(&self, group_key: &str, text: &str, now: i64) -> f64 {
        self.groups.meme_score(group_key, text, now)
    }

    /// When this member last spoke, if ever seen.
    pub fn last_active_at(&self, member_key: &str) -> Option<i64> {
        self.members
            .get(member_key)
            .map(|e| e.lock().unwrap().last_active_at)
    }

    /// When the bot last replied to this member, if ever.
    pub fn last_replied_at(&self, member_key: &str) -> Option<i64> {
        self.members
            .get(member_key)
            .and_then(|e| e.lock().unwrap().last_replied_at)
    }

    /// Compute the full planner-facing profile for one event in one pass.
    ///
    /// Holds the member lock exactly once; all derived scores come from the
    /// same snapshot.
    pub fn profile(&self, member_key: &str, group_key: &str, text: &str, now: i64) -> MemberProfile {
        let meme_score = self.groups.meme_score(group_key, text, now);
        match self.members.get(member_key) {
            Some(entry) => {
                let rec = entry.lock().unwrap();
                let msgs = rec.total_messages.max(1) as f64;
                let reply_ratio = clamp01(rec.total_replies_from_bot as f64 / msgs);
                let mention_ratio = clamp01(rec.total_mentions_bot as f64 / msgs);
                let tenure_days = (now - rec.first_seen_at).max(0) as f64 / 86_400_000.0;
                let intimacy = clamp01(
                    0.15 + 0.4 * reply_ratio
                        + 0.2 * mention_ratio
                        + 0.25 * clamp01(tenure_days / TENURE_FULL_DAYS),
                );

                let rate_cutoff = now - RATE_WINDOW_MS;
                let rate_count = rec.recent.iter().filter(|m| m.at > rate_cutoff).count();
                let message_rate = clamp01(rate_count as f64 / (5.0 * RATE_NORMALIZER));

                let window = rec.window(now);
                let repetition = repetition_of(&window);
                let spam_type = spam::classify(&window, meme_score);
                let urgency = if spam_type == SpamType::HelpSeeking {
                    clamp01(
                        0.6 * (window.len() as f64 / 5.0).min(1.0)
                            + 0.2 * intimacy
                            + 0.2 * reply_ratio,
                    )
                } else {
                    0.0
                };

                MemberProfile {
                    intimacy,
                    message_rate,
                    repetition,
                    meme_score,
                    spam: spam_type,
                    urgency,
                }
            }
            None => MemberProfile {
                meme_score,
                ..MemberProfile::default()
            },
        }
    }
}

impl Default for StatsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// `(max occurrences of any normalized text − 1) / 3`, clamped.
fn repetition_of(window: &[&RecentMessage]) -> f64 {
    let mut max_count = 0usize;
    for (i, m) in window.iter().enumerate() {
        if m.normalized.is_empty() {
            continue;
        }
        let count = window[i..]
            .iter()
            .filter(|o| o.normalized == m.normalized)
            .count();
        max_count = max_count.max(count);
    }
    clamp01((max_count.saturating_sub(1)) as f64 / 3.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MK: &str = "qq:g1:u1";
    const GK: &str = "qq:g1";

    fn seeded(now: i64) -> StatsRegistry {
        let stats = StatsRegistry::new();
        stats.on_user_message(MK, GK, "u1", now - 1000, "随便聊聊今天的事", false);
        stats
    }

    #[test]
    fn intimacy_baseline_for_unknown_member() {
        let stats = StatsRegistry::new();
        assert!((stats.intimacy("qq:g1:ghost", 0) - 0.15).abs() < 1e-9);
    }

    #[test]
    fn intimacy_grows_with_replies_and_mentions() {
        let now = 10_000_000;
        let stats = seeded(now);
        let base = stats.intimacy(MK, now);
        stats.on_bot_reply(MK, now);
        let after = stats.intimacy(MK, now);
        assert!(after > base, "reply ratio should raise intimacy");
        assert!(after <= 1.0);
    }

    #[test]
    fn intimacy_tenure_term_saturates() {
        let now = 30 * 86_400_000; // 30 days in
        let stats = StatsRegistry::new();
        stats.on_user_message(MK, GK, "u1", 0, "老群友了", false);
        // replies=0, mentions=0, tenure capped at 1.0 → 0.15 + 0.25
        let v = stats.intimacy(MK, now);
        assert!((v - 0.40).abs() < 1e-9);
    }

    #[test]
    fn message_rate_normalizes_against_fifty() {
        let now = 10_000_000;
        let stats = StatsRegistry::new();
        for i in 0..25 {
            stats.on_user_message(MK, GK, "u1", now - i * 1000, "msg", false);
        }
        let rate = stats.message_rate(MK, now);
        assert!((rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn recent_list_is_bounded_fifo() {
        let now = 10_000_000;
        let stats = StatsRegistry::new();
        for i in 0..40 {
            stats.on_user_message(MK, GK, "u1", now + i, &format!("m{i}"), false);
        }
        // Only the last 30 survive; rate window sees at most 30.
        let rate = stats.message_rate(MK, now + 40);
        assert!((rate - 30.0 / 50.0).abs() < 1e-9);
    }

    #[test]
    fn repetition_score_counts_normalized_echoes() {
        let now = 10_000_000;
        let stats = StatsRegistry::new();
        stats.on_user_message(MK, GK, "u1", now - 3000, "哈喽", false);
        stats.on_user_message(MK, GK, "u1", now - 2000, "哈 喽", false);
        stats.on_user_message(MK, GK, "u1", now - 1000, "哈喽", false);
        // max occurrences = 3 → (3-1)/3
        let score = stats.repetition_score(MK, now);
        assert!((score - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn repetition_ignores_messages_outside_window() {
        let now = 10_000_000;
        let stats = StatsRegistry::new();
        stats.on_user_message(MK, GK, "u1", now - 300_000, "旧的", false);
        stats.on_user_message(MK, GK, "u1", now - 1000, "旧的", false);
        assert_eq!(stats.repetition_score(MK, now), 0.0);
    }

    #[test]
    fn activity_and_reply_timestamps_track() {
        let now = 10_000_000;
        let stats = StatsRegistry::new();
        assert_eq!(stats.last_active_at(MK), None);
        stats.on_user_message(MK, GK, "u1", now - 500, "在的", false);
        assert_eq!(stats.last_active_at(MK), Some(now - 500));
        assert_eq!(stats.last_replied_at(MK), None);
        stats.on_bot_reply(MK, now);
        assert_eq!(stats.last_replied_at(MK), Some(now));
    }

    #[test]
    fn profile_for_unknown_member_is_default() {
        let stats = StatsRegistry::new();
        let p = stats.profile("qq:g1:ghost", GK, "hello", 0);
        assert_eq!(p.spam, SpamType::Normal);
        assert!((p.intimacy - 0.15).abs() < 1e-9);
    }

    #[test]
    fn urgency_only_set_for_help_seeking() {
        let now = 10_000_000;
        let stats = StatsRegistry::new();
        for i in 0..4 {
            stats.on_user_message(
                MK,
                GK,
                "u1",
                now - 1000 * (4 - i),
                "求助 这个报错怎么办?",
                false,
            );
        }
        let p = stats.profile(MK, GK, "求助 这个报错怎么办?", now);
        assert_eq!(p.spam, SpamType::HelpSeeking);
        assert!(p.urgency > 0.0);

        let calm = StatsRegistry::new();
        calm.on_user_message(MK, GK, "u1", now, "晚上吃什么", false);
        let p2 = calm.profile(MK, GK, "晚上吃什么", now);
        assert_eq!(p2.urgency, 0.0);
    }
}
