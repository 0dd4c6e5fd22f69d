use std::collections::VecDeque;
use std::sync::Mutex;

use dashmap::DashMap;

use banter_core::text::clamp01;

/// Point-in-time view of one group's recent traffic.
#[derive(Debug, Clone, Copy)]
pub struct ActivitySnapshot {
    /// Messages inside the window.
    pub count: usize,
    /// Normalized heat in `[0,1]`.
    pub score: f64,
}

/// Per-group sliding window of message timestamps.
///
/// Bot-originated messages must never be recorded here — the bot would
/// talk itself into believing the group is busy.
pub struct GroupActivityTracker {
    windows: DashMap<String, Mutex<VecDeque<i64>>>,
    window_ms: i64,
    normalizer: f64,
}

impl GroupActivityTracker {
    pub fn new(window_ms: i64, normalizer: f64) -> Self {
        Self {
            windows: DashMap::new(),
            window_ms,
            normalizer,
        }
    }

    /// Record one user message at `at` (epoch ms).
    pub fn record(&self, group_key: &str, at: i64) {
        let entry = self
            .windows
            .entry(group_key.to_string())
            .or_insert_with(|| Mutex::new(VecDeque::new()));
        let mut win = entry.lock().unwrap();
        win.push_back(at);
    }

    /// Evict expired entries and report the current heat.
    pub fn snapshot(&self, group_key: &str, now: i64) -> ActivitySnapshot {
        match self.windows.get(group_key) {
            Some(entry) => {
                let mut win = entry.lock().unwrap();
                let cutoff = now - self.window_ms;
                while matches!(win.front(), Some(&ts) if ts <= cutoff) {
                    win.pop_front();
                }
                let count = win.len();
                let minutes = self.window_ms as f64 / 60_000.0;
                let score = clamp01(count as f64 / (minutes * self.normalizer));
                ActivitySnapshot { count, score }
            }
            None => ActivitySnapshot {
                count: 0,
                score: 0.0,
            },
        }
    }
}
