use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use dashmap::DashMap;

use banter_core::text::{clamp01, normalize};

/// Group-message bound for meme detection.
const GROUP_MAX: usize = 60;
/// Echo window.
const ECHO_WINDOW_MS: i64 = 120_000;

#[derive(Debug, Clone)]
struct GroupMessage {
    at: i64,
    user_id: String,
    normalized: String,
}

/// Per-group bounded buffer of recent normalized messages, used to detect
/// meme waves (several users sending the same thing).
pub(crate) struct GroupMessages {
    groups: DashMap<String, Mutex<VecDeque<GroupMessage>>>,
}

impl GroupMessages {
    pub fn new() -> Self {
        Self {
            groups: DashMap::new(),
        }
    }

    pub fn record(&self, group_key: &str, user_id: &str, at: i64, normalized: &str) {
        let entry = self
            .groups
            .entry(group_key.to_string())
            .or_insert_with(|| Mutex::new(VecDeque::with_capacity(GROUP_MAX)));
        let mut buf = entry.lock().unwrap();
        if buf.len() == GROUP_MAX {
            buf.pop_front();
        }
        buf.push_back(GroupMessage {
            at,
            user_id: user_id.to_string(),
            normalized: normalized.to_string(),
        });
    }

    /// `(distinct users who echoed `text` within 2 min − 1) / 4`, clamped.
    pub fn meme_score(&self, group_key: &str, text: &str, now: i64) -> f64 {
        let target = normalize(text);
        if target.is_empty() {
            return 0.0;
        }
        match self.groups.get(group_key) {
            Some(entry) => {
                let buf = entry.lock().unwrap();
                let cutoff = now - ECHO_WINDOW_MS;
                let users: HashSet<&str> = buf
                    .iter()
                    .filter(|m| m.at > cutoff && m.normalized == target)
                    .map(|m| m.user_id.as_str())
                    .collect();
                clamp01((users.len().saturating_sub(1)) as f64 / 4.0)
            }
            None => 0.0,
        }
    }
}
