//! The reply pipeline: plan, wait out the think-time, assemble context
//! and prompt, call the model, and hand the result back for sending.
//!
//! Nothing here commits state. The bot turn is appended and energy spent
//! only after the send pipeline reports success.

use std::sync::Arc;

use tracing::{debug, info};

use banter_core::config::PersonaConfig;
use banter_core::EnrichedEvent;

use crate::context::ContextBuilder;
use crate::debug::DebugState;
use crate::error::Result;
use crate::planner::{Planner, PlanResult, ReplyMode};
use crate::ports::LlmClient;
use crate::prompt::{self, PromptBuilder, StyleHint};
use crate::style::{self, DynamicStyleParams};

/// A reply that passed planning and the model call, awaiting delivery.
#[derive(Debug)]
pub struct PreparedReply {
    pub text: String,
    pub plan: PlanResult,
    pub style: DynamicStyleParams,
    pub is_at_reply: bool,
}

#[derive(Debug)]
pub enum ReplyOutcome {
    Skip { reason: &'static str },
    NotConfigured,
    Reply(Box<PreparedReply>),
}

pub struct ReplyPipeline<'a> {
    pub planner: &'a Planner,
    pub context: &'a ContextBuilder,
    pub prompt: &'a PromptBuilder,
    pub llm: Option<&'a Arc<dyn LlmClient>>,
    pub persona: &'a PersonaConfig,
    pub debug: &'a DebugState,
}

impl ReplyPipeline<'_> {
    /// Run one conversational turn up to (and including) the model call.
    pub async fn run(
        &self,
        ev: &EnrichedEvent,
        since_last_bot_ms: Option<i64>,
        now: i64,
    ) -> Result<ReplyOutcome> {
        let session_key = ev.session_key();
        let plan = self.planner.plan(ev, since_last_bot_ms, now);
        self.debug.record_plan(&session_key, plan.clone());

        if !plan.should_reply {
            debug!(session = %session_key, reason = plan.reason, "planner skipped");
            return Ok(ReplyOutcome::Skip {
                reason: plan.reason,
            });
        }
        if plan.mode == ReplyMode::Command {
            return Ok(ReplyOutcome::Skip { reason: "command" });
        }

        let Some(llm) = self.llm else {
            return Ok(ReplyOutcome::NotConfigured);
        };

        if plan.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(plan.delay_ms)).await;
        }

        let ctx = self.context.build(ev, now);
        let style = style::style_for(
            plan.mode,
            plan.meta.intimacy,
            plan.meta.energy,
            self.persona.slang,
        );
        let messages = self
            .prompt
            .build_messages(&ctx, &StyleHint::from(&style), None);
        self.debug
            .record_prompt(&session_key, prompt::flatten(&messages));

        let text = llm.chat(&messages).await?;

        info!(
            session = %session_key,
            mode = ?plan.mode,
            chars = text.chars().count(),
            "reply drafted"
        );

        Ok(ReplyOutcome::Reply(Box::new(PreparedReply {
            text,
            plan,
            style,
            is_at_reply: ev.event.mentions_bot,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use banter_core::config::CooldownConfig;
    use banter_core::ChatEvent;
    use banter_memory::ConversationLog;
    use banter_stats::{EnergyMeter, GroupActivityTracker, StatsRegistry};

    use crate::dice::ScriptedDice;
    use crate::error::EngineError;
    use crate::ports::ChatMessage;

    struct EchoLlm {
        reply: &'static str,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl LlmClient for EchoLlm {
        async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
            self.seen.lock().unwrap().push(messages.to_vec());
            Ok(self.reply.to_string())
        }
    }

    struct FailingLlm;

    #[async_trait]
    impl LlmClient for FailingLlm {
        async fn chat(&self, _messages: &[ChatMessage]) -> Result<String> {
            Err(EngineError::Llm("upstream 500".into()))
        }
    }

    const NOW: i64 = 100_000_000;

    fn event(text: &str, mentions: bool) -> EnrichedEvent {
        EnrichedEvent::new(
            ChatEvent {
                platform: "qq".into(),
                group_id: "g".into(),
                user_id: "u".into(),
                message_id: "m".into(),
                raw_text: text.into(),
                timestamp: NOW,
                ingest_time: Some(NOW),
                mentions_bot: mentions,
                from_bot: false,
                user_name: None,
                group_name: None,
                is_private: false,
            },
            1,
        )
    }

    struct Fixture {
        planner: Planner,
        context: ContextBuilder,
        prompt: PromptBuilder,
        persona: PersonaConfig,
        debug: DebugState,
    }

    fn fixture(dice: ScriptedDice) -> Fixture {
        let log = Arc::new(ConversationLog::new(50));
        Fixture {
            planner: Planner::new(
                Arc::new(StatsRegistry::new()),
                Arc::new(EnergyMeter::new(0.05, 0.10)),
                Arc::new(GroupActivityTracker::new(300_000, 10.0)),
                CooldownConfig::default(),
                Arc::new(dice),
            ),
            context: ContextBuilder::new(log),
            prompt: PromptBuilder::new(PersonaConfig::default()),
            persona: PersonaConfig::default(),
            debug: DebugState::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn skip_paths_never_touch_the_llm() {
        let f = fixture(ScriptedDice::constant(0.99));
        let echo = Arc::new(EchoLlm {
            reply: "嗯",
            seen: Mutex::new(Vec::new()),
        });
        let llm: Arc<dyn LlmClient> = echo.clone();
        let pipeline = ReplyPipeline {
            planner: &f.planner,
            context: &f.context,
            prompt: &f.prompt,
            llm: Some(&llm),
            persona: &f.persona,
            debug: &f.debug,
        };
        // Hard cooldown skip.
        let out = pipeline.run(&event("ok", false), Some(1000), NOW).await.unwrap();
        assert!(matches!(out, ReplyOutcome::Skip { reason: "cooldown-hard" }));
        // Command skip.
        let out = pipeline.run(&event("/help", false), None, NOW).await.unwrap();
        assert!(matches!(out, ReplyOutcome::Skip { reason: "command" }));
        // The skipped plan is still visible on the debug surface, and the
        // model was never called.
        assert!(f.debug.last_plan("qq:g").is_some());
        assert!(echo.seen.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn mention_flows_through_to_a_reply() {
        let f = fixture(ScriptedDice::constant(0.5));
        let llm: Arc<dyn LlmClient> = Arc::new(EchoLlm {
            reply: "在呢在呢",
            seen: Mutex::new(Vec::new()),
        });
        let pipeline = ReplyPipeline {
            planner: &f.planner,
            context: &f.context,
            prompt: &f.prompt,
            llm: Some(&llm),
            persona: &f.persona,
            debug: &f.debug,
        };
        let out = pipeline.run(&event("在吗", true), Some(1000), NOW).await.unwrap();
        match out {
            ReplyOutcome::Reply(prepared) => {
                assert_eq!(prepared.text, "在呢在呢");
                assert!(prepared.is_at_reply);
                assert_eq!(prepared.plan.delay_ms, 600);
            }
            _ => panic!("expected a reply"),
        }
        assert!(f.debug.last_prompt("qq:g").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn llm_failure_propagates() {
        let f = fixture(ScriptedDice::constant(0.5));
        let llm: Arc<dyn LlmClient> = Arc::new(FailingLlm);
        let pipeline = ReplyPipeline {
            planner: &f.planner,
            context: &f.context,
            prompt: &f.prompt,
            llm: Some(&llm),
            persona: &f.persona,
            debug: &f.debug,
        };
        let err = pipeline.run(&event("在吗", true), None, NOW).await.unwrap_err();
        assert!(matches!(err, EngineError::Llm(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_llm_reports_not_configured() {
        let f = fixture(ScriptedDice::constant(0.5));
        let pipeline = ReplyPipeline {
            planner: &f.planner,
            context: &f.context,
            prompt: &f.prompt,
            llm: None,
            persona: &f.persona,
            debug: &f.debug,
        };
        let out = pipeline.run(&event("在吗", true), None, NOW).await.unwrap();
        assert!(matches!(out, ReplyOutcome::NotConfigured));
    }
}
