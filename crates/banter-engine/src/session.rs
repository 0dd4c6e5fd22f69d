//! Per-session turn-taking state and the per-key FIFO work queues.
//!
//! A session is one conversation channel (`{platform}:{group_id}`). All
//! orchestration work for a session runs on that session's queue, in
//! submission order, with no overlap; different sessions run in parallel.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Cancellation flag held while the send pipeline is running.
///
/// The single cancellation primitive of the engine: the interruption path
/// sets `cancelled`, the sender polls it at every sleep boundary. The
/// incoming counter lives here too, so replacing the token resets it.
pub struct TypingToken {
    cancelled: AtomicBool,
    incoming: AtomicU32,
    started_at: i64,
}

impl TypingToken {
    fn new(started_at: i64) -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            incoming: AtomicU32::new(0),
            started_at,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Count one incoming user message; returns the new total.
    fn note_incoming(&self) -> u32 {
        self.incoming.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn incoming_while_typing(&self) -> u32 {
        self.incoming.load(Ordering::Acquire)
    }

    pub fn started_at(&self) -> i64 {
        self.started_at
    }
}

/// Turn-taking state for one session, created lazily on first reference.
pub struct SessionState {
    last_bot_reply_at: Mutex<Option<i64>>,
    typing: Mutex<Option<Arc<TypingToken>>>,
    force_quote_next_flush: AtomicBool,
    message_seq: AtomicU64,
    queue: mpsc::UnboundedSender<Job>,
}

impl SessionState {
    fn new(queue: mpsc::UnboundedSender<Job>) -> Self {
        Self {
            last_bot_reply_at: Mutex::new(None),
            typing: Mutex::new(None),
            force_quote_next_flush: AtomicBool::new(false),
            message_seq: AtomicU64::new(0),
            queue,
        }
    }
}

/// Keyed session registry plus the per-session worker queues.
pub struct SessionStore {
    sessions: DashMap<String, Arc<SessionState>>,
    interrupt_threshold: u32,
}

impl SessionStore {
    pub fn new(interrupt_threshold: u32) -> Self {
        Self {
            sessions: DashMap::new(),
            interrupt_threshold,
        }
    }

    /// Lazy-create the session and its worker task.
    ///
    /// Must be called from within a tokio runtime: creation spawns the
    /// queue worker.
    fn get(&self, key: &str) -> Arc<SessionState> {
        self.sessions
            .entry(key.to_string())
            .or_insert_with(|| {
                let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
                tokio::spawn(async move {
                    while let Some(job) = rx.recv().await {
                        job.await;
                    }
                });
                Arc::new(SessionState::new(tx))
            })
            .clone()
    }

    /// Strictly monotone per-session sequence number, starting at 1.
    pub fn next_message_seq(&self, key: &str) -> u64 {
        self.get(key).message_seq.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Submit work to the session's FIFO queue.
    ///
    /// Tasks for the same key run in submission order without overlap; a
    /// task that fails internally must swallow its own error — the queue
    /// keeps draining either way.
    pub fn run_queued(&self, key: &str, fut: impl Future<Output = ()> + Send + 'static) {
        let state = self.get(key);
        if state.queue.send(Box::pin(fut)).is_err() {
            debug!(key, "session queue closed; task dropped");
        }
    }

    /// Install a fresh typing token, replacing (without cancelling) any
    /// stale one. The incoming counter starts at zero.
    pub fn start_typing(&self, key: &str, now: i64) -> Arc<TypingToken> {
        let state = self.get(key);
        let token = Arc::new(TypingToken::new(now));
        *state.typing.lock().unwrap() = Some(token.clone());
        token
    }

    /// Clear the active token, but only if `token` still owns the slot.
    pub fn end_typing(&self, key: &str, token: &Arc<TypingToken>) {
        if let Some(state) = self.sessions.get(key) {
            let mut typing = state.typing.lock().unwrap();
            if typing.as_ref().is_some_and(|t| Arc::ptr_eq(t, token)) {
                *typing = None;
            }
        }
    }

    /// Count one incoming user message against the active typing token,
    /// cancelling it once the interruption threshold is reached. A
    /// cancellation also arms the force-quote flag, so the next flushed
    /// reply visibly acknowledges the newer traffic.
    ///
    /// Returns true when this call triggered the cancellation.
    pub fn notify_incoming(&self, key: &str) -> bool {
        let Some(state) = self.sessions.get(key) else {
            return false;
        };
        let token = state.typing.lock().unwrap().clone();
        if let Some(token) = token {
            let n = token.note_incoming();
            if n >= self.interrupt_threshold && !token.is_cancelled() {
                token.cancel();
                state.force_quote_next_flush.store(true, Ordering::Release);
                debug!(key, incoming = n, "typing interrupted by fresh traffic");
                return true;
            }
        }
        false
    }

    pub fn last_bot_reply_at(&self, key: &str) -> Option<i64> {
        self.sessions
            .get(key)
            .and_then(|s| *s.last_bot_reply_at.lock().unwrap())
    }

    pub fn set_last_bot_reply_at(&self, key: &str, ts: i64) {
        *self.get(key).last_bot_reply_at.lock().unwrap() = Some(ts);
    }

    pub fn force_quote_next_flush(&self, key: &str) -> bool {
        self.sessions
            .get(key)
            .map(|s| s.force_quote_next_flush.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    pub fn mark_force_quote_next_flush(&self, key: &str) {
        self.get(key)
            .force_quote_next_flush
            .store(true, Ordering::Release);
    }

    pub fn clear_force_quote_next_flush(&self, key: &str) {
        if let Some(state) = self.sessions.get(key) {
            state.force_quote_next_flush.store(false, Ordering::Release);
        }
    }

    /// Cancel every active typing token. Used at shutdown.
    pub fn cancel_all_typing(&self) {
        for entry in self.sessions.iter() {
            if let Some(token) = entry.typing.lock().unwrap().as_ref() {
                token.cancel();
            }
        }
    }
}
