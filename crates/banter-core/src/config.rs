use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{BanterError, Result};

/// Top-level config (banter.toml + BANTER_* env overrides).
///
/// Every knob has a default, so embedders can run with no config file at
/// all: `BanterConfig::default()` is a complete, working configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BanterConfig {
    #[serde(default)]
    pub persona: PersonaConfig,
    #[serde(default)]
    pub debounce: DebounceConfig,
    #[serde(default)]
    pub cooldown: CooldownConfig,
    #[serde(default)]
    pub typing: TypingConfig,
    #[serde(default)]
    pub segment_delay: SegmentDelayConfig,
    #[serde(default)]
    pub ring_buffer: RingBufferConfig,
    #[serde(default)]
    pub activity: ActivityConfig,
    #[serde(default)]
    pub energy: EnergyConfig,
    #[serde(default)]
    pub interrupt: InterruptConfig,
    #[serde(default)]
    pub quote: QuoteConfig,
    #[serde(default)]
    pub stale: StaleConfig,
}

impl BanterConfig {
    /// Load from `config_path` (default `banter.toml`) overlaid with
    /// `BANTER_`-prefixed environment variables.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path.unwrap_or("banter.toml");

        let config: BanterConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("BANTER_").split("_"))
            .extract()
            .map_err(|e| BanterError::Config(e.to_string()))?;

        Ok(config)
    }
}

/// Who the bot is. Feeds the system prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    #[serde(default = "default_persona_name")]
    pub name: String,
    #[serde(default = "default_persona_description")]
    pub description: String,
    #[serde(default = "default_persona_tone")]
    pub tone: String,
    /// Baseline slang level in [0,1]; blended into the dynamic style.
    #[serde(default)]
    pub slang: Option<f64>,
    /// Extra constraint lines appended to the system prompt, one per entry.
    #[serde(default)]
    pub constraints: Vec<String>,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: default_persona_name(),
            description: default_persona_description(),
            tone: default_persona_tone(),
            slang: None,
            constraints: Vec::new(),
        }
    }
}

/// Per-sender burst coalescing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebounceConfig {
    #[serde(default = "default_debounce_delay_ms")]
    pub delay_ms: u64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_debounce_delay_ms(),
        }
    }
}

/// Reply cooldowns measured against the last successful bot send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownConfig {
    #[serde(default = "default_cooldown_hard_ms")]
    pub hard_ms: i64,
    #[serde(default = "default_cooldown_soft_ms")]
    pub soft_ms: i64,
    #[serde(default = "default_soft_skip_probability")]
    pub soft_skip_probability: f64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            hard_ms: default_cooldown_hard_ms(),
            soft_ms: default_cooldown_soft_ms(),
            soft_skip_probability: default_soft_skip_probability(),
        }
    }
}

/// Humanized typing latency before the first segment goes out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingConfig {
    #[serde(default = "default_typing_min_ms")]
    pub min_ms: u64,
    #[serde(default = "default_typing_max_ms")]
    pub max_ms: u64,
    #[serde(default = "default_typing_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_typing_per_char_ms")]
    pub per_char_ms: u64,
    #[serde(default = "default_typing_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            min_ms: default_typing_min_ms(),
            max_ms: default_typing_max_ms(),
            base_ms: default_typing_base_ms(),
            per_char_ms: default_typing_per_char_ms(),
            jitter_ms: default_typing_jitter_ms(),
        }
    }
}

/// Pause between consecutive segments of a multi-part reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentDelayConfig {
    #[serde(default = "default_segment_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_segment_per_char_ms")]
    pub per_char_ms: u64,
    #[serde(default = "default_segment_jitter_ms")]
    pub jitter_ms: u64,
    #[serde(default = "default_segment_cap_ms")]
    pub cap_ms: u64,
}

impl Default for SegmentDelayConfig {
    fn default() -> Self {
        Self {
            base_ms: default_segment_base_ms(),
            per_char_ms: default_segment_per_char_ms(),
            jitter_ms: default_segment_jitter_ms(),
            cap_ms: default_segment_cap_ms(),
        }
    }
}

/// Conversation-log bound per session key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingBufferConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

impl Default for RingBufferConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
        }
    }
}

/// Group-activity sliding window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityConfig {
    #[serde(default = "default_activity_window_ms")]
    pub window_ms: i64,
    /// Messages per minute considered "very active".
    #[serde(default = "default_activity_normalizer")]
    pub normalizer: f64,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            window_ms: default_activity_window_ms(),
            normalizer: default_activity_normalizer(),
        }
    }
}

/// Global bot-energy model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnergyConfig {
    #[serde(default = "default_energy_recovery_per_minute")]
    pub recovery_per_minute: f64,
    #[serde(default = "default_energy_cost_per_reply")]
    pub cost_per_reply: f64,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            recovery_per_minute: default_energy_recovery_per_minute(),
            cost_per_reply: default_energy_cost_per_reply(),
        }
    }
}

/// Typing-interruption threshold: how many fresh user messages cancel an
/// in-flight send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptConfig {
    #[serde(default = "default_interrupt_threshold")]
    pub threshold: u32,
}

impl Default for InterruptConfig {
    fn default() -> Self {
        Self {
            threshold: default_interrupt_threshold(),
        }
    }
}

/// When a reply carries an explicit quote reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteConfig {
    /// Minimum seq gap between the quoted event and the current one.
    #[serde(default = "default_quote_gap_threshold")]
    pub message_gap_threshold: u64,
}

impl Default for QuoteConfig {
    fn default() -> Self {
        Self {
            message_gap_threshold: default_quote_gap_threshold(),
        }
    }
}

/// Backfill detection: events older than this lag are stored for context
/// but never planned against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaleConfig {
    #[serde(default = "default_stale_max_lag_ms")]
    pub max_event_lag_ms: i64,
}

impl Default for StaleConfig {
    fn default() -> Self {
        Self {
            max_event_lag_ms: default_stale_max_lag_ms(),
        }
    }
}

fn default_persona_name() -> String {
    "小奏".to_string()
}
fn default_persona_description() -> String {
    "一个爱凑热闹的群友".to_string()
}
fn default_persona_tone() -> String {
    "随性、简短、口语化".to_string()
}
fn default_debounce_delay_ms() -> u64 {
    5000
}
fn default_cooldown_hard_ms() -> i64 {
    5000
}
fn default_cooldown_soft_ms() -> i64 {
    12_000
}
fn default_soft_skip_probability() -> f64 {
    0.65
}
fn default_typing_min_ms() -> u64 {
    2800
}
fn default_typing_max_ms() -> u64 {
    8000
}
fn default_typing_base_ms() -> u64 {
    1000
}
fn default_typing_per_char_ms() -> u64 {
    60
}
fn default_typing_jitter_ms() -> u64 {
    1500
}
fn default_segment_base_ms() -> u64 {
    500
}
fn default_segment_per_char_ms() -> u64 {
    40
}
fn default_segment_jitter_ms() -> u64 {
    700
}
fn default_segment_cap_ms() -> u64 {
    3000
}
fn default_max_turns() -> usize {
    50
}
fn default_activity_window_ms() -> i64 {
    300_000
}
fn default_activity_normalizer() -> f64 {
    10.0
}
fn default_energy_recovery_per_minute() -> f64 {
    0.05
}
fn default_energy_cost_per_reply() -> f64 {
    0.10
}
fn default_interrupt_threshold() -> u32 {
    3
}
fn default_quote_gap_threshold() -> u64 {
    3
}
fn default_stale_max_lag_ms() -> i64 {
    30_000
}
