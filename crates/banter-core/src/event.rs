use serde::{Deserialize, Serialize};

/// A normalized incoming chat message from a platform adapter.
///
/// Immutable after ingestion. Orchestration-time extras (sequence number,
/// merged text, quote target) live on [`EnrichedEvent`] so adapters never
/// see them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatEvent {
    pub platform: String,
    pub group_id: String,
    pub user_id: String,
    pub message_id: String,
    pub raw_text: String,
    /// Platform-side event timestamp, epoch milliseconds. `0` means unknown.
    pub timestamp: i64,
    /// Local arrival time, epoch milliseconds. Filled by the orchestrator
    /// when the adapter leaves it unset.
    #[serde(default)]
    pub ingest_time: Option<i64>,
    pub mentions_bot: bool,
    pub from_bot: bool,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub is_private: bool,
}

impl ChatEvent {
    /// Session scope: one conversation channel.
    ///
    /// Format: `{platform}:{group_id}`
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.platform, self.group_id)
    }

    /// Debounce scope: one sender within one channel.
    ///
    /// Format: `{platform}:{group_id}:{user_id}`
    pub fn user_key(&self) -> String {
        format!("{}:{}:{}", self.platform, self.group_id, self.user_id)
    }

    /// Stats scope for the sender. Same shape as [`Self::user_key`].
    pub fn member_key(&self) -> String {
        self.user_key()
    }

    /// Commands are slash- or full-width-exclamation-prefixed.
    pub fn is_command(&self) -> bool {
        let t = self.raw_text.trim_start();
        t.starts_with('/') || t.starts_with('！')
    }

    /// The best timestamp for log ordering: platform time when present,
    /// otherwise local ingest time.
    pub fn event_time(&self) -> i64 {
        if self.timestamp > 0 {
            self.timestamp
        } else {
            self.ingest_time.unwrap_or(0)
        }
    }
}

/// Who produced a conversation-log turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Bot,
}

/// One stored message in the per-session conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub user_id: String,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub mentions_bot: bool,
    #[serde(default)]
    pub is_command: bool,
}

impl ChatTurn {
    /// Display name for prompt rendering: explicit name, else the user id.
    pub fn display_name(&self) -> &str {
        match &self.user_name {
            Some(n) if !n.is_empty() => n,
            _ => &self.user_id,
        }
    }
}

/// The user turn a reply will reference via the platform's native quote
/// mechanism.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteTarget {
    pub message_id: String,
    /// Session sequence number of the quoted event.
    pub seq: u64,
    pub user_id: String,
    pub timestamp: i64,
}

/// A [`ChatEvent`] plus the fields the orchestrator attaches before
/// planning: the per-session sequence number, the merged text of a
/// debounced burst, and the chosen quote target.
#[derive(Debug, Clone)]
pub struct EnrichedEvent {
    pub event: ChatEvent,
    pub seq: u64,
    /// Text the planner and prompt target see. For a single event this is
    /// `raw_text`; for a flushed burst it is the space-joined tail.
    pub merged_text: String,
    pub quote_target: Option<QuoteTarget>,
}

impl EnrichedEvent {
    pub fn new(event: ChatEvent, seq: u64) -> Self {
        let merged_text = event.raw_text.clone();
        Self {
            event,
            seq,
            merged_text,
            quote_target: None,
        }
    }

    pub fn session_key(&self) -> String {
        self.event.session_key()
    }
}
