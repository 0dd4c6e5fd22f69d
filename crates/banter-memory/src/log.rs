use std::collections::VecDeque;
use std::sync::Mutex;

use dashmap::DashMap;
use tracing::debug;

use banter_core::ChatTurn;

/// Per-key bounded conversation history.
///
/// Each session key owns a FIFO ring of at most `max_turns` turns; the
/// oldest turn is evicted when a new one would exceed the bound. Reads
/// return snapshot copies, so callers never hold a lock across an await.
pub struct ConversationLog {
    turns: DashMap<String, Mutex<VecDeque<ChatTurn>>>,
    max_turns: usize,
}

impl ConversationLog {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: DashMap::new(),
            max_turns,
        }
    }

    /// Append a turn under `key`, evicting from the front when full.
    pub fn append_turn(&self, key: &str, turn: ChatTurn) {
        let entry = self
            .turns
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(VecDeque::with_capacity(self.max_turns)));
        let mut ring = entry.lock().unwrap();
        if ring.len() == self.max_turns {
            ring.pop_front();
        }
        ring.push_back(turn);
    }

    /// The last `limit` turns for `key`, oldest first.
    pub fn recent_turns(&self, key: &str, limit: usize) -> Vec<ChatTurn> {
        match self.turns.get(key) {
            Some(entry) => {
                let ring = entry.lock().unwrap();
                let skip = ring.len().saturating_sub(limit);
                ring.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// Number of stored turns for `key`.
    pub fn len(&self, key: &str) -> usize {
        self.turns
            .get(key)
            .map(|e| e.lock().unwrap().len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, key: &str) -> bool {
        self.len(key) == 0
    }

    /// Drop all history for `key`.
    pub fn clear(&self, key: &str) {
        if self.turns.remove(key).is_some() {
            debug!(key, "conversation log cleared");
        }
    }
}
