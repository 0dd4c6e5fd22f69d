//! The reply decision: whether to speak, in what register, after how long.
//!
//! Layered model: command/mention short-circuits, then cooldowns, then a
//! weighted probability assembled from text interest, social attention,
//! persona talkativeness, and energy, dampened by group heat and the spam
//! taxonomy, and finally settled by a dice roll. Deterministic given the
//! same inputs and dice.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use banter_core::config::CooldownConfig;
use banter_core::text::{
    char_len, clamp01, has_help_words, has_strong_emotion, has_topic_keywords, is_question,
};
use banter_core::EnrichedEvent;
use banter_stats::{EnergyMeter, GroupActivityTracker, SpamType, StatsRegistry};

use crate::dice::Dice;

/// Conversational register of a planned reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReplyMode {
    Ignore,
    Command,
    Smalltalk,
    Casual,
    Fragment,
    DirectAnswer,
    PassiveAcknowledge,
    PlayfulTease,
    EmpathySupport,
    Deflect,
}

/// The factors behind a decision, kept for the debug surface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlanMeta {
    pub probability: f64,
    pub base_interest: f64,
    pub social_attention: f64,
    pub energy: f64,
    pub group_activity: f64,
    pub intimacy: f64,
    pub repetition: f64,
    pub urgency: f64,
    pub spam: Option<SpamType>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanResult {
    pub should_reply: bool,
    pub mode: ReplyMode,
    pub delay_ms: u64,
    pub meta: PlanMeta,
    pub reason: &'static str,
}

impl PlanResult {
    fn ignore(reason: &'static str, meta: PlanMeta) -> Self {
        Self {
            should_reply: false,
            mode: ReplyMode::Ignore,
            delay_ms: 0,
            meta,
            reason,
        }
    }
}

/// Interest sum is capped then scaled to this ceiling.
const INTEREST_SCALE: f64 = 0.6;
/// Social attention ceiling.
const SOCIAL_SCALE: f64 = 0.7;
/// Fixed persona talkativeness term.
const PERSONA_TALKATIVENESS: f64 = 0.35;
/// Probability a read is silently "lurked" regardless of content.
const LURK_PROBABILITY: f64 = 0.10;
const LURK_INTEREST: f64 = 0.05;

const W_INTEREST: f64 = 0.20;
const W_SOCIAL: f64 = 0.25;
const W_PERSONA: f64 = 0.10;
const W_ENERGY: f64 = 0.25;

/// Mention replies get a short fixed think-time.
const MENTION_DELAY_MS: u64 = 600;
/// Conversational replies: 500 + U[0,300) ms.
const REPLY_DELAY_BASE_MS: u64 = 500;
const REPLY_DELAY_JITTER_MS: u64 = 300;

pub struct Planner {
    stats: Arc<StatsRegistry>,
    energy: Arc<EnergyMeter>,
    activity: Arc<GroupActivityTracker>,
    cooldown: CooldownConfig,
    dice: Arc<dyn Dice>,
}

impl Planner {
    pub fn new(
        stats: Arc<StatsRegistry>,
        energy: Arc<EnergyMeter>,
        activity: Arc<GroupActivityTracker>,
        cooldown: CooldownConfig,
        dice: Arc<dyn Dice>,
    ) -> Self {
        Self {
            stats,
            energy,
            activity,
            cooldown,
            dice,
        }
    }

    /// Decide for one (possibly merged) event.
    ///
    /// `since_last_bot_ms` is measured against the last successful send in
    /// this session; `None` means the bot has never spoken here.
    pub fn plan(
        &self,
        ev: &EnrichedEvent,
        since_last_bot_ms: Option<i64>,
        now: i64,
    ) -> PlanResult {
        let event = &ev.event;
        let text = &ev.merged_text;

        if event.is_command() {
            return PlanResult {
                should_reply: true,
                mode: ReplyMode::Command,
                delay_ms: 0,
                meta: PlanMeta::default(),
                reason: "command",
            };
        }
        let session_key = event.session_key();
        self.activity.record(&session_key, now);

        if event.mentions_bot {
            // Style blending downstream still wants live intimacy/energy.
            let meta = PlanMeta {
                energy: self.energy.read(now),
                intimacy: self.stats.intimacy(&event.member_key(), now),
                ..PlanMeta::default()
            };
            return PlanResult {
                should_reply: true,
                mode: ReplyMode::Smalltalk,
                delay_ms: MENTION_DELAY_MS,
                meta,
                reason: "mention",
            };
        }

        let question = is_question(text);
        let emotion = has_strong_emotion(text);
        let since = since_last_bot_ms.unwrap_or(i64::MAX);

        // Hard cooldown, then a probabilistic soft window. Questions and
        // strong emotion punch through both.
        if since < self.cooldown.hard_ms && !question && !emotion {
            return PlanResult::ignore("cooldown-hard", PlanMeta::default());
        }
        if since < self.cooldown.soft_ms
            && !question
            && !emotion
            && self.dice.roll() < self.cooldown.soft_skip_probability
        {
            return PlanResult::ignore("cooldown-soft", PlanMeta::default());
        }

        let profile = self
            .stats
            .profile(&event.member_key(), &session_key, text, now);
        let energy = self.energy.read(now);
        let group_activity = self.activity.snapshot(&session_key, now).score;

        let mut interest = 0.0;
        if question {
            interest += 0.25;
        }
        if has_help_words(text) {
            interest += 0.25;
        }
        interest += (char_len(text) as f64 / 100.0).min(0.2);
        if has_topic_keywords(text) {
            interest += 0.1;
        }
        if self.dice.roll() < LURK_PROBABILITY {
            interest = LURK_INTEREST;
        }
        let base_interest = interest.min(1.0) * INTEREST_SCALE;

        let social_attention = (0.5 * profile.intimacy) * SOCIAL_SCALE;

        let mut p = W_INTEREST * base_interest
            + W_SOCIAL * social_attention
            + W_PERSONA * PERSONA_TALKATIVENESS
            + W_ENERGY * energy;

        if group_activity > 0.7 {
            p *= 0.3;
        } else if group_activity > 0.5 {
            p *= 0.5;
        }

        match profile.spam {
            SpamType::HelpSeeking => {
                p *= 1.2;
                if profile.urgency > 0.65 {
                    p = p.max(0.5);
                }
            }
            SpamType::MemePlay => p *= 0.6,
            SpamType::Noise => p *= 0.2,
            SpamType::Normal => {}
        }
        if profile.repetition > 0.5 && profile.spam != SpamType::HelpSeeking {
            p *= 0.5;
        }
        if profile.meme_score > 0.4 {
            p += 0.05;
        }
        p = clamp01(p);

        let meta = PlanMeta {
            probability: p,
            base_interest,
            social_attention,
            energy,
            group_activity,
            intimacy: profile.intimacy,
            repetition: profile.repetition,
            urgency: profile.urgency,
            spam: Some(profile.spam),
        };

        let roll = self.dice.roll();
        if roll >= p {
            debug!(
                session = %session_key,
                probability = p,
                roll,
                "planner skipped by dice"
            );
            return PlanResult::ignore("dice-skip", meta);
        }

        let mode = self.pick_mode(&profile, emotion);
        let delay_ms = REPLY_DELAY_BASE_MS + self.dice.jitter(REPLY_DELAY_JITTER_MS);
        PlanResult {
            should_reply: true,
            mode,
            delay_ms,
            meta,
            reason: "reply",
        }
    }

    /// Register mix by intimacy band, with taxonomy overrides.
    fn pick_mode(&self, profile: &banter_stats::MemberProfile, emotion: bool) -> ReplyMode {
        if profile.spam == SpamType::HelpSeeking && profile.urgency > 0.7 {
            return ReplyMode::DirectAnswer;
        }
        if profile.spam == SpamType::Noise {
            return ReplyMode::Deflect;
        }
        if emotion {
            return ReplyMode::EmpathySupport;
        }
        if profile.intimacy < 0.3 {
            let r = self.dice.roll();
            return if r < 0.4 {
                ReplyMode::Fragment
            } else if r < 0.7 {
                ReplyMode::PassiveAcknowledge
            } else {
                ReplyMode::Casual
            };
        }
        if profile.intimacy > 0.7 && self.dice.roll() < 0.25 {
            return ReplyMode::PlayfulTease;
        }
        let r = self.dice.roll();
        if r < 0.7 {
            ReplyMode::Casual
        } else if r < 0.9 {
            ReplyMode::Fragment
        } else {
            ReplyMode::Smalltalk
        }
    }
}
