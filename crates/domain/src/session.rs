use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tool::Message;

/// Upper bound on LLM turns taken within a single session (invariant 2).
pub const MAX_ITERATIONS: u32 = 15;

/// Which LLM configuration a session's turns are routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Low,
    High,
}

impl Default for ModelTier {
    fn default() -> Self {
        ModelTier::Low
    }
}

impl std::str::FromStr for ModelTier {
    type Err = ();

    /// Any value other than `"high"` resolves to `low`, per §4.9's gating
    /// rule ("model from query param with invalid → low").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "high" => ModelTier::High,
            _ => ModelTier::Low,
        })
    }
}

/// Description of one client-side table available to the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub table_name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub sample_rows: Vec<serde_json::Value>,
    pub row_count: u64,
}

/// The record persisted for one browser-executed tool invocation, keyed by
/// its `step_index` as `step_<N>` inside `Session::query_results`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: u32,
    pub thought: String,
    pub tool: String,
    pub input: serde_json::Value,
    /// Populated once the tool-result endpoint completes this step.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub truncated: bool,
}

/// The payload synthesised from a `final_answer` tool-use block, emitted as
/// the `answer` stream event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub answer: String,
    pub chart_type: String,
    #[serde(default)]
    pub chart_data: Vec<serde_json::Value>,
    pub steps: Vec<StepRecord>,
}

/// The unit of conversational state. Persisted in the Session Store, keyed
/// by `id`, with TTL refreshed on every read and write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub user_id: String,
    pub model_tier: ModelTier,
    pub use_thinking: bool,
    pub query: String,
    pub schema: Vec<TableInfo>,
    pub messages: Vec<Message>,
    /// `step_<N> -> StepRecord`, one entry per browser-executed tool
    /// invocation started so far (completed or still pending).
    pub query_results: HashMap<String, StepRecord>,
    pub step_index: u32,
    pub iteration: u32,
    pub pending_tool_id: Option<String>,
    pub awaiting_tool_result: bool,
    /// `toolId` of the most recently completed step, kept so a retried
    /// tool-result POST (same id, after `pending_tool_id` has already been
    /// cleared) can be answered idempotently instead of 400ing.
    #[serde(default)]
    pub last_completed_tool_id: Option<String>,
}

impl Session {
    pub fn new(
        id: String,
        user_id: String,
        model_tier: ModelTier,
        use_thinking: bool,
        query: String,
        schema: Vec<TableInfo>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            last_activity: now,
            user_id,
            model_tier,
            use_thinking,
            query,
            schema,
            messages: Vec::new(),
            query_results: HashMap::new(),
            step_index: 0,
            iteration: 0,
            pending_tool_id: None,
            awaiting_tool_result: false,
            last_completed_tool_id: None,
        }
    }

    pub fn step_key(index: u32) -> String {
        format!("step_{index}")
    }

    /// Invariant 1: `awaiting_tool_result` iff `pending_tool_id` is set and
    /// the last assistant message contains a matching, unresolved tool-use
    /// block.
    pub fn invariants_hold(&self) -> bool {
        let matches_last_assistant = match &self.pending_tool_id {
            None => true,
            Some(pending) => self
                .messages
                .iter()
                .rev()
                .find(|m| m.role == crate::tool::Role::Assistant)
                .and_then(|m| m.first_tool_use())
                .map(|(id, _, _)| id == pending)
                .unwrap_or(false),
        };
        (self.awaiting_tool_result == self.pending_tool_id.is_some()) && matches_last_assistant
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}
