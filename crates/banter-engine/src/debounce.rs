//! Per-sender burst coalescing.
//!
//! Events are buffered under `{platform}:{group_id}:{user_id}`; each new
//! event cancels the pending timer and installs a fresh one, so a burst
//! flushes exactly once, `delay_ms` after its last message. Replacement is
//! guarded twice: the old timer task is aborted, and a generation stamp is
//! checked atomically at flush time, so an abort that loses the race is
//! still harmless.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use banter_core::{ChatEvent, EnrichedEvent};

/// The coalesced burst handed to the orchestrator when a window elapses.
pub struct DebounceSnapshot {
    pub user_key: String,
    pub events: Vec<EnrichedEvent>,
    pub first_at: i64,
    pub last_at: i64,
}

impl DebounceSnapshot {
    pub fn count(&self) -> usize {
        self.events.len()
    }

    pub fn last_event(&self) -> &EnrichedEvent {
        self.events.last().expect("snapshot is never empty")
    }

    pub fn last_chat_event(&self) -> &ChatEvent {
        &self.last_event().event
    }
}

type FlushFn = Box<dyn FnOnce(DebounceSnapshot) + Send>;

struct Pending {
    events: Vec<EnrichedEvent>,
    first_at: i64,
    last_at: i64,
    generation: u64,
    timer: Option<JoinHandle<()>>,
    on_flush: Mutex<Option<FlushFn>>,
}

/// Keyed debounce table with cancellable delayed flushes.
pub struct Debouncer {
    delay: Duration,
    table: Arc<DashMap<String, Pending>>,
    generations: AtomicU64,
}

impl Debouncer {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            table: Arc::new(DashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    /// Buffer `event` and (re)arm the flush timer for its sender.
    ///
    /// Returns immediately. When the window elapses with no further events
    /// from the same sender, the newest `on_flush` runs exactly once with
    /// the full buffer.
    pub fn debounce(
        &self,
        event: EnrichedEvent,
        on_flush: impl FnOnce(DebounceSnapshot) + Send + 'static,
    ) {
        let user_key = event.event.user_key();
        let at = event.event.event_time();
        let generation = self.generations.fetch_add(1, Ordering::AcqRel) + 1;

        {
            let mut entry = self
                .table
                .entry(user_key.clone())
                .or_insert_with(|| Pending {
                    events: Vec::new(),
                    first_at: at,
                    last_at: at,
                    generation,
                    timer: None,
                    on_flush: Mutex::new(Some(Box::new(|_| {}))),
                });
            if let Some(old) = entry.timer.take() {
                old.abort();
            }
            entry.events.push(event);
            entry.last_at = at;
            entry.generation = generation;
            *entry.on_flush.lock().unwrap() = Some(Box::new(on_flush));
            trace!(
                key = %user_key,
                buffered = entry.events.len(),
                "debounce window reset"
            );
        }

        let table = Arc::clone(&self.table);
        let delay = self.delay;
        let key = user_key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Atomic check-and-remove: only the owning generation flushes.
            let fired = table.remove_if(&key, |_, p| p.generation == generation);
            if let Some((_, pending)) = fired {
                let snapshot = DebounceSnapshot {
                    user_key: key.clone(),
                    events: pending.events,
                    first_at: pending.first_at,
                    last_at: pending.last_at,
                };
                debug!(key = %key, count = snapshot.count(), "debounce flush");
                if let Some(on_flush) = pending.on_flush.lock().unwrap().take() {
                    on_flush(snapshot);
                }
            }
        });

        // Park the handle so the next event (or shutdown) can abort it.
        // The window may already have fired for a zero delay; the
        // generation guard makes a missed abort harmless.
        if let Some(mut entry) = self.table.get_mut(&user_key) {
            if entry.generation == generation {
                entry.timer = Some(timer);
            }
        }
    }

    /// Number of senders with a pending window. Debug surface.
    pub fn pending_count(&self) -> usize {
        self.table.len()
    }

    /// Cancel all timers and drop all buffers. The conversation log has
    /// already retained every buffered event.
    pub fn shutdown(&self) {
        for entry in self.table.iter() {
            if let Some(timer) = entry.timer.as_ref() {
                timer.abort();
            }
        }
        self.table.clear();
        debug!("debouncer shut down");
    }
}
