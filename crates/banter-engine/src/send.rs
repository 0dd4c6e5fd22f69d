//! The send pipeline: humanized typing latency, segment delivery, and
//! cooperative cancellation.
//!
//! The pipeline holds the session's typing token for its whole run and
//! polls it at every sleep boundary. Cancellation aborts cleanly — no
//! further segments go out, and the token is released on every exit path,
//! including adapter failures.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use banter_core::config::{QuoteConfig, SegmentDelayConfig, TypingConfig};
use banter_core::text::char_len;
use banter_core::EnrichedEvent;

use crate::dice::Dice;
use crate::error::Result;
use crate::ports::Outbound;
use crate::session::{SessionStore, TypingToken};
use crate::style::DynamicStyleParams;
use crate::utterance::{self, UtterancePlan};

/// Explicit multi-segment separator the model may emit.
const BRK: &str = "<brk>";
/// Hard cap on explicit segments.
const MAX_EXPLICIT_SEGMENTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    pub sent: bool,
    pub cancelled: bool,
}

impl SendReport {
    const SENT: Self = Self {
        sent: true,
        cancelled: false,
    };
    const CANCELLED: Self = Self {
        sent: false,
        cancelled: true,
    };
}

pub struct SendPipeline<'a> {
    pub outbound: &'a Arc<dyn Outbound>,
    pub sessions: &'a Arc<SessionStore>,
    pub typing: &'a TypingConfig,
    pub segment: &'a SegmentDelayConfig,
    pub quote: &'a QuoteConfig,
    pub dice: &'a Arc<dyn Dice>,
}

impl SendPipeline<'_> {
    /// Deliver `text` for `ev`, simulating a human typist.
    ///
    /// Returns `{sent:false, cancelled:true}` when the typing token was
    /// cancelled mid-flight; adapter errors propagate. Either way the
    /// typing token is released before returning.
    pub async fn send(
        &self,
        ev: &EnrichedEvent,
        text: &str,
        style: &DynamicStyleParams,
        is_at_reply: bool,
        now: i64,
    ) -> Result<SendReport> {
        let session_key = ev.session_key();
        let token = self.sessions.start_typing(&session_key, now);
        let result = self.send_inner(ev, text, style, is_at_reply, &token).await;
        self.sessions.end_typing(&session_key, &token);
        result
    }

    async fn send_inner(
        &self,
        ev: &EnrichedEvent,
        text: &str,
        style: &DynamicStyleParams,
        is_at_reply: bool,
        token: &Arc<TypingToken>,
    ) -> Result<SendReport> {
        let session_key = ev.session_key();
        let reply_to = self.choose_reply_to(ev, &session_key);

        // Plan segmentation up front; the typing delay covers the whole
        // reply, not just the first segment.
        let plan = utterance::plan_utterances(
            text,
            style.verbosity,
            style.multi_utterance_preference,
            is_at_reply,
            self.dice.as_ref(),
        );

        let typing_ms = (self.typing.base_ms
            + self.typing.per_char_ms * char_len(text) as u64
            + self.dice.jitter(self.typing.jitter_ms))
        .clamp(self.typing.min_ms, self.typing.max_ms);

        if token.is_cancelled() {
            return Ok(SendReport::CANCELLED);
        }
        tokio::time::sleep(Duration::from_millis(typing_ms)).await;
        if token.is_cancelled() {
            debug!(session = %session_key, "send cancelled during typing delay");
            return Ok(SendReport::CANCELLED);
        }

        if text.contains(BRK) || text.contains('\n') {
            self.send_explicit_segments(ev, text, reply_to.as_deref(), token)
                .await
        } else {
            self.send_planned_segments(ev, &plan, reply_to.as_deref(), token)
                .await
        }
    }

    /// The model asked for explicit breaks: split on `<brk>`, then on
    /// newlines; keep at most three non-empty segments.
    async fn send_explicit_segments(
        &self,
        ev: &EnrichedEvent,
        text: &str,
        reply_to: Option<&str>,
        token: &Arc<TypingToken>,
    ) -> Result<SendReport> {
        let segments: Vec<&str> = text
            .split(BRK)
            .flat_map(|part| part.split('\n'))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .take(MAX_EXPLICIT_SEGMENTS)
            .collect();

        for (i, segment) in segments.iter().enumerate() {
            if token.is_cancelled() {
                return Ok(SendReport::CANCELLED);
            }
            if i > 0 {
                let prev_len = char_len(segments[i - 1]) as u64;
                let pause = (self.segment.base_ms
                    + self.segment.per_char_ms * prev_len
                    + self.dice.jitter(self.segment.jitter_ms))
                .min(self.segment.cap_ms);
                tokio::time::sleep(Duration::from_millis(pause)).await;
                if token.is_cancelled() {
                    return Ok(SendReport::CANCELLED);
                }
            }
            self.dispatch(ev, segment, if i == 0 { reply_to } else { None })
                .await?;
        }
        Ok(SendReport::SENT)
    }

    /// No explicit breaks: follow the utterance plan's own pacing.
    async fn send_planned_segments(
        &self,
        ev: &EnrichedEvent,
        plan: &UtterancePlan,
        reply_to: Option<&str>,
        token: &Arc<TypingToken>,
    ) -> Result<SendReport> {
        for (i, segment) in plan.segments.iter().enumerate() {
            if token.is_cancelled() {
                return Ok(SendReport::CANCELLED);
            }
            if segment.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(segment.delay_ms)).await;
                if token.is_cancelled() {
                    return Ok(SendReport::CANCELLED);
                }
            }
            self.dispatch(ev, &segment.text, if i == 0 { reply_to } else { None })
                .await?;
        }
        Ok(SendReport::SENT)
    }

    async fn dispatch(&self, ev: &EnrichedEvent, text: &str, reply_to: Option<&str>) -> Result<()> {
        self.outbound
            .send_text(&ev.event.group_id, text, reply_to)
            .await
            .map_err(|e| {
                warn!(
                    group = %ev.event.group_id,
                    error = %e,
                    "adapter send failed; aborting remaining segments"
                );
                e
            })
    }

    /// Quote only when the session owes an acknowledgement (force-quote)
    /// or the quoted message has already scrolled far enough away.
    fn choose_reply_to(&self, ev: &EnrichedEvent, session_key: &str) -> Option<String> {
        let target = ev.quote_target.as_ref()?;
        if target.message_id.is_empty() || target.message_id == "0" {
            return None;
        }
        let force = self.sessions.force_quote_next_flush(session_key);
        let gap = ev.seq.saturating_sub(target.seq);
        if force || gap >= self.quote.message_gap_threshold {
            Some(target.message_id.clone())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use banter_core::{ChatEvent, QuoteTarget};

    use crate::dice::ScriptedDice;
    use crate::error::EngineError;
    use crate::style;
    use crate::planner::ReplyMode;

    struct RecordingOutbound {
        sent: Mutex<Vec<(String, Option<String>)>>,
        fail_after: Option<usize>,
    }

    impl RecordingOutbound {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail_after: None,
            }
        }

        fn sent(&self) -> Vec<(String, Option<String>)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Outbound for RecordingOutbound {
        async fn send_text(
            &self,
            _group_id: &str,
            text: &str,
            reply_to: Option<&str>,
        ) -> Result<()> {
            let mut sent = self.sent.lock().unwrap();
            if matches!(self.fail_after, Some(n) if sent.len() >= n) {
                return Err(EngineError::Send("adapter down".into()));
            }
            sent.push((text.to_string(), reply_to.map(String::from)));
            Ok(())
        }
    }

    const NOW: i64 = 100_000_000;

    fn event_with_quote(seq: u64, quote_seq: u64, quote_id: &str) -> EnrichedEvent {
        let mut ev = EnrichedEvent::new(
            ChatEvent {
                platform: "qq".into(),
                group_id: "g".into(),
                user_id: "u".into(),
                message_id: "m".into(),
                raw_text: "hi".into(),
                timestamp: NOW,
                ingest_time: Some(NOW),
                mentions_bot: false,
                from_bot: false,
                user_name: None,
                group_name: None,
                is_private: false,
            },
            seq,
        );
        ev.quote_target = Some(QuoteTarget {
            message_id: quote_id.into(),
            seq: quote_seq,
            user_id: "u".into(),
            timestamp: NOW,
        });
        ev
    }

    struct Harness {
        outbound: Arc<RecordingOutbound>,
        outbound_dyn: Arc<dyn Outbound>,
        sessions: Arc<SessionStore>,
        typing: TypingConfig,
        segment: SegmentDelayConfig,
        quote: QuoteConfig,
        dice: Arc<dyn Dice>,
    }

    impl Harness {
        fn new() -> Self {
            let outbound = Arc::new(RecordingOutbound::new());
            Self {
                outbound_dyn: outbound.clone(),
                outbound,
                sessions: Arc::new(SessionStore::new(3)),
                typing: TypingConfig::default(),
                segment: SegmentDelayConfig::default(),
                quote: QuoteConfig::default(),
                dice: Arc::new(ScriptedDice::constant(0.0)),
            }
        }

        fn pipeline(&self) -> SendPipeline<'_> {
            SendPipeline {
                outbound: &self.outbound_dyn,
                sessions: &self.sessions,
                typing: &self.typing,
                segment: &self.segment,
                quote: &self.quote,
                dice: &self.dice,
            }
        }

        async fn send(&self, ev: &EnrichedEvent, text: &str) -> Result<SendReport> {
            let style = style::style_for(ReplyMode::Casual, 0.5, 1.0, None);
            self.pipeline().send(ev, text, &style, false, NOW).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn plain_reply_is_one_message() {
        let h = Harness::new();
        let ev = event_with_quote(1, 1, "q1");
        let report = h.send(&ev, "好啊好啊").await.unwrap();
        assert_eq!(report, SendReport::SENT);
        let sent = h.outbound.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "好啊好啊");
    }

    #[tokio::test(start_paused = true)]
    async fn brk_reply_splits_capped_at_three() {
        let h = Harness::new();
        let ev = event_with_quote(10, 1, "q1");
        let report = h
            .send(&ev, "一<brk>二<brk>三<brk>四")
            .await
            .unwrap();
        assert_eq!(report, SendReport::SENT);
        let sent = h.outbound.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].0, "一");
        assert_eq!(sent[2].0, "三");
    }

    #[tokio::test(start_paused = true)]
    async fn newlines_also_split() {
        let h = Harness::new();
        let ev = event_with_quote(10, 1, "q1");
        h.send(&ev, "第一段\n\n 第二段 ").await.unwrap();
        let sent = h.outbound.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].0, "第二段");
    }

    #[tokio::test(start_paused = true)]
    async fn quote_attaches_only_on_first_segment_with_wide_gap() {
        let h = Harness::new();
        let ev = event_with_quote(10, 1, "q1");
        h.send(&ev, "一<brk>二").await.unwrap();
        let sent = h.outbound.sent();
        assert_eq!(sent[0].1.as_deref(), Some("q1"));
        assert_eq!(sent[1].1, None);
    }

    #[tokio::test(start_paused = true)]
    async fn narrow_gap_suppresses_quote() {
        let h = Harness::new();
        let ev = event_with_quote(3, 1, "q1");
        h.send(&ev, "好").await.unwrap();
        assert_eq!(h.outbound.sent()[0].1, None);
    }

    #[tokio::test(start_paused = true)]
    async fn force_quote_overrides_gap_rule() {
        let h = Harness::new();
        h.sessions.mark_force_quote_next_flush("qq:g");
        let ev = event_with_quote(2, 1, "q1");
        h.send(&ev, "好").await.unwrap();
        assert_eq!(h.outbound.sent()[0].1.as_deref(), Some("q1"));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_message_id_never_quotes() {
        let h = Harness::new();
        h.sessions.mark_force_quote_next_flush("qq:g");
        let ev = event_with_quote(10, 1, "0");
        h.send(&ev, "好").await.unwrap();
        assert_eq!(h.outbound.sent()[0].1, None);
    }

    #[tokio::test(start_paused = true)]
    async fn interruption_mid_send_stops_segments() {
        let h = Harness::new();
        let ev = event_with_quote(10, 1, "q1");
        let sessions = h.sessions.clone();

        // Three fresh messages land while the pipeline is still in its
        // typing delay (clamped to at least 2800ms).
        let interrupter = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1000)).await;
            sessions.notify_incoming("qq:g");
            sessions.notify_incoming("qq:g");
            sessions.notify_incoming("qq:g");
        });

        let report = h.send(&ev, "一<brk>二<brk>三").await.unwrap();
        interrupter.await.unwrap();
        assert_eq!(report, SendReport::CANCELLED);
        assert!(h.outbound.sent().is_empty(), "typing delay should absorb the cancel");
        assert!(h.sessions.force_quote_next_flush("qq:g"));
    }

    #[tokio::test(start_paused = true)]
    async fn adapter_failure_aborts_but_releases_token() {
        let mut outbound = RecordingOutbound::new();
        outbound.fail_after = Some(1);
        let outbound = Arc::new(outbound);
        let h = Harness {
            outbound_dyn: outbound.clone(),
            outbound,
            sessions: Arc::new(SessionStore::new(3)),
            typing: TypingConfig::default(),
            segment: SegmentDelayConfig::default(),
            quote: QuoteConfig::default(),
            dice: Arc::new(ScriptedDice::constant(0.0)),
        };
        let ev = event_with_quote(10, 1, "q1");
        let err = h.send(&ev, "一<brk>二<brk>三").await.unwrap_err();
        assert!(matches!(err, EngineError::Send(_)));
        assert_eq!(h.outbound.sent().len(), 1);
        // Token released: fresh traffic no longer counts against the dead
        // send, so the interruption threshold never trips.
        for _ in 0..3 {
            h.sessions.notify_incoming("qq:g");
        }
        assert!(!h.sessions.force_quote_next_flush("qq:g"));
    }

    #[tokio::test(start_paused = true)]
    async fn typing_delay_is_clamped() {
        let h = Harness::new();
        let ev = event_with_quote(10, 1, "q1");
        let start = tokio::time::Instant::now();
        h.send(&ev, "短").await.unwrap();
        let elapsed = start.elapsed();
        // 1000 + 60·1 + 0 = 1060 → clamped up to 2800.
        assert!(elapsed >= Duration::from_millis(2800));
        assert!(elapsed < Duration::from_millis(2900));
    }
}
