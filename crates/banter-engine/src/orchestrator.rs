//! Wires the whole engine together and enforces the concurrency model:
//! parallel across sessions, strictly serialized within one.
//!
//! `handle_event` does the cheap synchronous work (validation, logging,
//! sequencing, interruption bookkeeping) inline, then routes the event
//! either straight onto the session queue (commands, mentions) or through
//! the debouncer. Everything that can block — planning delays, the model
//! call, typing simulation — runs on the session's queue.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use banter_core::text::{char_len, is_punctuation_only, is_question};
use banter_core::{BanterConfig, ChatEvent, ChatTurn, EnrichedEvent, QuoteTarget, Role};
use banter_memory::ConversationLog;
use banter_stats::{EnergyMeter, GroupActivityTracker, StatsRegistry};

use crate::context::ContextBuilder;
use crate::debounce::{Debouncer, DebounceSnapshot};
use crate::debug::DebugState;
use crate::dice::{Dice, ThreadDice};
use crate::guard::{self, GuardDecision};
use crate::planner::{Planner, PlanResult};
use crate::ports::{CommandDispatcher, LlmClient, Outbound};
use crate::preprocess::{classify, Preprocessor};
use crate::prompt::PromptBuilder;
use crate::reply::{PreparedReply, ReplyOutcome, ReplyPipeline};
use crate::send::SendPipeline;
use crate::session::SessionStore;

/// How many trailing burst texts merge into the planner's view.
const MERGE_TAIL: usize = 6;
/// Bursts at least this large get scored quote-target selection.
const QUOTE_SCORING_MIN: usize = 3;

/// Receipt sent on the conversational path when no model is wired up.
const FALLBACK_RECEIPT: &str = "我还没接上大脑，等配置好模型再来聊。";

/// Everything the embedder injects.
pub struct Collaborators {
    pub outbound: Arc<dyn Outbound>,
    pub llm: Option<Arc<dyn LlmClient>>,
    pub commands: Option<Arc<dyn CommandDispatcher>>,
    /// Randomness source; defaults to thread RNG via [`Self::with_defaults`].
    pub dice: Arc<dyn Dice>,
}

impl Collaborators {
    pub fn with_defaults(
        outbound: Arc<dyn Outbound>,
        llm: Option<Arc<dyn LlmClient>>,
        commands: Option<Arc<dyn CommandDispatcher>>,
    ) -> Self {
        Self {
            outbound,
            llm,
            commands,
            dice: Arc::new(ThreadDice),
        }
    }
}

/// Point-in-time operational view of one session, for diagnosis.
#[derive(Debug, Clone)]
pub struct SessionDebugSnapshot {
    pub energy: f64,
    pub intimacy: f64,
    pub last_bot_reply_at: Option<i64>,
}

pub struct Orchestrator {
    config: BanterConfig,
    log: Arc<ConversationLog>,
    stats: Arc<StatsRegistry>,
    energy: Arc<EnergyMeter>,
    sessions: Arc<SessionStore>,
    debouncer: Arc<Debouncer>,
    preprocessor: Preprocessor,
    planner: Planner,
    context: ContextBuilder,
    prompt: PromptBuilder,
    outbound: Arc<dyn Outbound>,
    llm: Option<Arc<dyn LlmClient>>,
    commands: Option<Arc<dyn CommandDispatcher>>,
    dice: Arc<dyn Dice>,
    debug: DebugState,
}

impl Orchestrator {
    pub fn new(config: BanterConfig, collaborators: Collaborators) -> Arc<Self> {
        let log = Arc::new(ConversationLog::new(config.ring_buffer.max_turns));
        let stats = Arc::new(StatsRegistry::new());
        let energy = Arc::new(EnergyMeter::new(
            config.energy.recovery_per_minute,
            config.energy.cost_per_reply,
        ));
        let activity = Arc::new(GroupActivityTracker::new(
            config.activity.window_ms,
            config.activity.normalizer,
        ));
        let sessions = Arc::new(SessionStore::new(config.interrupt.threshold));
        let debouncer = Arc::new(Debouncer::new(config.debounce.delay_ms));
        let preprocessor = Preprocessor::new(
            log.clone(),
            stats.clone(),
            config.stale.max_event_lag_ms,
        );
        let planner = Planner::new(
            stats.clone(),
            energy.clone(),
            activity,
            config.cooldown.clone(),
            collaborators.dice.clone(),
        );
        let context = ContextBuilder::new(log.clone());
        let prompt = PromptBuilder::new(config.persona.clone());

        Arc::new(Self {
            config,
            log,
            stats,
            energy,
            sessions,
            debouncer,
            preprocessor,
            planner,
            context,
            prompt,
            outbound: collaborators.outbound,
            llm: collaborators.llm,
            commands: collaborators.commands,
            dice: collaborators.dice,
            debug: DebugState::new(),
        })
    }

    /// Adapter entry point. Never fails: errors are logged and absorbed.
    ///
    /// Takes the orchestrator by `Arc` so queued work can outlive the
    /// caller: `orchestrator.clone().handle_event(event).await`.
    pub async fn handle_event(self: Arc<Self>, mut event: ChatEvent) {
        if event.ingest_time.is_none() {
            event.ingest_time = Some(Utc::now().timestamp_millis());
        }

        match self.preprocessor.ingest(&event) {
            Err(e) => {
                warn!(error = %e, "event dropped at preprocess");
                return;
            }
            Ok(outcome) if !outcome.should_continue() => return,
            Ok(_) => {}
        }

        let session_key = event.session_key();
        let seq = self.sessions.next_message_seq(&session_key);

        // Fresh traffic counts against any in-flight send in this session.
        self.sessions.notify_incoming(&session_key);

        let classification = classify(&event);
        let enriched = EnrichedEvent::new(event, seq);

        if classification.is_command || classification.is_mention {
            let me = Arc::clone(&self);
            self.sessions.run_queued(&session_key, async move {
                me.process_event(enriched).await;
            });
            return;
        }

        let me = Arc::clone(&self);
        self.debouncer.debounce(enriched, move |snapshot| {
            let session_key = snapshot.last_chat_event().session_key();
            let inner = Arc::clone(&me);
            me.sessions.run_queued(&session_key, async move {
                inner.handle_debounced(snapshot).await;
            });
        });
    }

    /// Runs on the session queue once a sender's burst window elapses.
    async fn handle_debounced(self: Arc<Self>, snapshot: DebounceSnapshot) {
        let now = Utc::now().timestamp_millis();
        let session_key = snapshot.last_chat_event().session_key();
        let merged = merge_snapshot(&snapshot);

        let since_last_bot = self
            .sessions
            .last_bot_reply_at(&session_key)
            .map(|t| now - t);
        let decision = guard::check_turn_taking(
            self.sessions.force_quote_next_flush(&session_key),
            since_last_bot,
            snapshot.count(),
            &merged.merged_text,
        );
        match decision {
            GuardDecision::Skip { reason } => {
                debug!(session = %session_key, reason, "flush held back");
            }
            GuardDecision::Allow { force_quote } => {
                if force_quote {
                    debug!(session = %session_key, "flush allowed to settle an interrupted reply");
                }
                self.process_event(merged).await;
            }
        }
    }

    /// Shared tail of the command and conversational paths. Runs on the
    /// session queue; every failure is absorbed here so the queue drains.
    async fn process_event(self: Arc<Self>, ev: EnrichedEvent) {
        let session_key = ev.session_key();
        let now = Utc::now().timestamp_millis();

        if ev.event.is_command() {
            match &self.commands {
                Some(dispatcher) => dispatcher.handle(&ev.event).await,
                None => debug!(session = %session_key, "command received but no dispatcher wired"),
            }
            return;
        }

        let reply_pipeline = ReplyPipeline {
            planner: &self.planner,
            context: &self.context,
            prompt: &self.prompt,
            llm: self.llm.as_ref(),
            persona: &self.config.persona,
            debug: &self.debug,
        };
        let since_last_bot = self
            .sessions
            .last_bot_reply_at(&session_key)
            .map(|t| now - t);

        let prepared = match reply_pipeline.run(&ev, since_last_bot, now).await {
            Err(e) => {
                warn!(session = %session_key, error = %e, "reply pipeline failed; turn skipped");
                return;
            }
            Ok(ReplyOutcome::Skip { reason }) => {
                debug!(session = %session_key, reason, "no reply this turn");
                return;
            }
            Ok(ReplyOutcome::NotConfigured) => {
                if let Err(e) = self
                    .outbound
                    .send_text(&ev.event.group_id, FALLBACK_RECEIPT, None)
                    .await
                {
                    warn!(session = %session_key, error = %e, "fallback receipt failed");
                }
                return;
            }
            Ok(ReplyOutcome::Reply(prepared)) => prepared,
        };

        let send_pipeline = SendPipeline {
            outbound: &self.outbound,
            sessions: &self.sessions,
            typing: &self.config.typing,
            segment: &self.config.segment_delay,
            quote: &self.config.quote,
            dice: &self.dice,
        };
        match send_pipeline
            .send(&ev, &prepared.text, &prepared.style, prepared.is_at_reply, now)
            .await
        {
            Err(e) => {
                warn!(session = %session_key, error = %e, "send failed mid-reply");
            }
            Ok(report) if !report.sent => {
                // Interrupted: the force-quote flag is already armed.
                debug!(session = %session_key, "send cancelled by fresh traffic");
            }
            Ok(_) => {
                let sent_at = Utc::now().timestamp_millis();
                self.sessions.clear_force_quote_next_flush(&session_key);
                self.commit_reply(&session_key, &ev, &prepared, sent_at);
                self.sessions.set_last_bot_reply_at(&session_key, sent_at);
            }
        }
    }

    /// Post-send bookkeeping: log the bot turn, bump reply stats, spend
    /// energy. Runs only after a fully successful send.
    fn commit_reply(&self, session_key: &str, ev: &EnrichedEvent, prepared: &PreparedReply, now: i64) {
        self.log.append_turn(
            session_key,
            ChatTurn {
                role: Role::Bot,
                content: prepared.text.clone(),
                timestamp: now,
                user_id: "bot".to_string(),
                user_name: Some(self.config.persona.name.clone()),
                mentions_bot: false,
                is_command: false,
            },
        );
        self.stats.on_bot_reply(&ev.event.member_key(), now);
        self.energy.on_reply_sent(now);
        info!(
            session = %session_key,
            mode = ?prepared.plan.mode,
            "reply committed"
        );
    }

    /// Cancel all debounce timers and typing tokens. Buffered events are
    /// dropped; the conversation log already kept them.
    pub fn shutdown(&self) {
        self.debouncer.shutdown();
        self.sessions.cancel_all_typing();
        info!("orchestrator shut down");
    }

    // ------------------------------------------------------------------
    // Debug surface
    // ------------------------------------------------------------------

    pub fn last_plan(&self, session_key: &str) -> Option<PlanResult> {
        self.debug.last_plan(session_key)
    }

    pub fn last_prompt(&self, session_key: &str) -> Option<String> {
        self.debug.last_prompt(session_key)
    }

    pub fn pending_debounces(&self) -> usize {
        self.debouncer.pending_count()
    }

    pub fn session_snapshot(&self, session_key: &str, user_id: &str) -> SessionDebugSnapshot {
        let now = Utc::now().timestamp_millis();
        let member_key = format!("{session_key}:{user_id}");
        SessionDebugSnapshot {
            energy: self.energy.read(now),
            intimacy: self.stats.intimacy(&member_key, now),
            last_bot_reply_at: self.sessions.last_bot_reply_at(session_key),
        }
    }

    /// Test/diagnostic access to the conversation log.
    pub fn conversation_log(&self) -> &Arc<ConversationLog> {
        &self.log
    }
}

/// Collapse a flushed burst into one plannable event: the last event's
/// identity, the joined tail of texts, and a scored quote target.
fn merge_snapshot(snapshot: &DebounceSnapshot) -> EnrichedEvent {
    let last = snapshot.last_event();
    let start = snapshot.events.len().saturating_sub(MERGE_TAIL);
    let merged_text = snapshot.events[start..]
        .iter()
        .map(|e| e.event.raw_text.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    let target = if snapshot.count() >= QUOTE_SCORING_MIN {
        pick_quote_target(&snapshot.events)
    } else {
        last
    };

    let mut merged = EnrichedEvent::new(last.event.clone(), last.seq);
    merged.merged_text = merged_text;
    merged.quote_target = Some(QuoteTarget {
        message_id: target.event.message_id.clone(),
        seq: target.seq,
        user_id: target.event.user_id.clone(),
        timestamp: target.event.event_time(),
    });
    merged
}

/// Score each burst event for quote-worthiness; later events win ties.
///
/// +3 question, +2 substantial length, +1 not punctuation-only, +1 in the
/// last two.
fn pick_quote_target(events: &[EnrichedEvent]) -> &EnrichedEvent {
    let n = events.len();
    let mut best = &events[n - 1];
    let mut best_score = i32::MIN;
    for (i, e) in events.iter().enumerate() {
        let text = &e.event.raw_text;
        let mut score = 0;
        if is_question(text) {
            score += 3;
        }
        if char_len(text) >= 12 {
            score += 2;
        }
        if !is_punctuation_only(text) {
            score += 1;
        }
        if i + 2 >= n {
            score += 1;
        }
        if score >= best_score {
            best = e;
            best_score = score;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enriched(text: &str, seq: u64, id: &str) -> EnrichedEvent {
        EnrichedEvent::new(
            ChatEvent {
                platform: "qq".into(),
                group_id: "g".into(),
                user_id: "u".into(),
                message_id: id.into(),
                raw_text: text.into(),
                timestamp: seq as i64 * 1000,
                ingest_time: Some(seq as i64 * 1000),
                mentions_bot: false,
                from_bot: false,
                user_name: None,
                group_name: None,
                is_private: false,
            },
            seq,
        )
    }

    fn snapshot(events: Vec<EnrichedEvent>) -> DebounceSnapshot {
        let first_at = events.first().map(|e| e.event.timestamp).unwrap_or(0);
        let last_at = events.last().map(|e| e.event.timestamp).unwrap_or(0);
        DebounceSnapshot {
            user_key: "qq:g:u".into(),
            events,
            first_at,
            last_at,
        }
    }

    #[test]
    fn merge_joins_trailing_texts_with_spaces() {
        let snap = snapshot(vec![
            enriched("hello", 1, "m1"),
            enriched("are you there", 2, "m2"),
            enriched("bot?", 3, "m3"),
        ]);
        let merged = merge_snapshot(&snap);
        assert_eq!(merged.merged_text, "hello are you there bot?");
        assert_eq!(merged.seq, 3);
        assert_eq!(merged.event.message_id, "m3");
    }

    #[test]
    fn merge_tail_is_capped_at_six() {
        let events: Vec<EnrichedEvent> = (1..=8)
            .map(|i| enriched(&format!("t{i}"), i, &format!("m{i}")))
            .collect();
        let merged = merge_snapshot(&snapshot(events));
        assert_eq!(merged.merged_text, "t3 t4 t5 t6 t7 t8");
    }

    #[test]
    fn question_wins_quote_scoring() {
        let snap = snapshot(vec![
            enriched("hello", 1, "m1"),
            enriched("are you there", 2, "m2"),
            enriched("bot?", 3, "m3"),
        ]);
        let merged = merge_snapshot(&snap);
        // "bot?": question +3, not punct +1, last-two +1 = 5.
        // "are you there": len≥12 +2, not punct +1, last-two +1 = 4.
        assert_eq!(merged.quote_target.unwrap().message_id, "m3");
    }

    #[test]
    fn long_substantial_message_beats_short_noise() {
        let snap = snapshot(vec![
            enriched("这个问题我描述得详细一点吧", 1, "m1"),
            enriched("。。。", 2, "m2"),
            enriched("嗯", 3, "m3"),
        ]);
        let merged = merge_snapshot(&snap);
        // m1: len +2, not punct +1 = 3. m2: last-two +1 = 1.
        // m3: not punct +1, last-two +1 = 2.
        assert_eq!(merged.quote_target.unwrap().message_id, "m1");
    }

    #[test]
    fn ties_go_to_the_later_event() {
        let snap = snapshot(vec![
            enriched("嗯呢", 1, "m1"),
            enriched("好的", 2, "m2"),
            enriched("行吧", 3, "m3"),
        ]);
        let merged = merge_snapshot(&snap);
        // m2 and m3 both score 2 (not punct + last-two); later wins.
        assert_eq!(merged.quote_target.unwrap().message_id, "m3");
    }

    #[test]
    fn small_burst_targets_last_event() {
        let snap = snapshot(vec![
            enriched("很长很长很长的一条提问消息吗?", 1, "m1"),
            enriched("嗯", 2, "m2"),
        ]);
        let merged = merge_snapshot(&snap);
        // Below the scoring threshold: last event wins regardless.
        assert_eq!(merged.quote_target.unwrap().message_id, "m2");
    }
}
