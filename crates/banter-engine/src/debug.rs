//! Read-only operational introspection: last decision and last prompt per
//! session. Pipelines write, accessors on the orchestrator read.

use dashmap::DashMap;

use crate::planner::PlanResult;

#[derive(Default)]
pub struct DebugState {
    plans: DashMap<String, PlanResult>,
    prompts: DashMap<String, String>,
}

impl DebugState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_plan(&self, session_key: &str, plan: PlanResult) {
        self.plans.insert(session_key.to_string(), plan);
    }

    pub fn record_prompt(&self, session_key: &str, flattened: String) {
        self.prompts.insert(session_key.to_string(), flattened);
    }

    pub fn last_plan(&self, session_key: &str) -> Option<PlanResult> {
        self.plans.get(session_key).map(|p| p.clone())
    }

    pub fn last_prompt(&self, session_key: &str) -> Option<String> {
        self.prompts.get(session_key).map(|p| p.clone())
    }
}
