//! The turn loop — the core state machine (spec §4.8).
//!
//! Given a session, runs LLM turns until the model answers, emits a
//! browser-executed tool call (and suspends), hits the iteration bound, or
//! errors. Entered once from the start endpoint and once per resume; the
//! two entry points share this function because a resume is, from the
//! turn loop's point of view, simply "step 1 again" on a session whose
//! `awaiting_tool_result` has already been cleared by tool-result
//! ingestion.

use std::sync::Arc;

use tokio::sync::mpsc;

use ta_domain::config::ModelTierConfig;
use ta_domain::error::Result;
use ta_domain::session::{AnalysisResult, ModelTier, Session, StepRecord, MAX_ITERATIONS};
use ta_domain::tool::Message;
use ta_providers::{ModelRequestConfig, ThinkingConfig};

use crate::runtime::events::AgentEvent;
use crate::runtime::prompt::build_prompt;
use crate::state::AppState;

/// Send an event, discarding the error if the subscriber has disconnected.
/// Spec §5: abandon in-flight stream writes, but the turn continues to
/// completion and the session still commits.
async fn emit(tx: &mpsc::Sender<AgentEvent>, event: AgentEvent) {
    let _ = tx.send(event).await;
}

async fn commit(state: &AppState, session: &mut Session) -> Result<()> {
    session.touch();
    state.sessions.put(session, state.config.sessions.ttl_seconds).await
}

fn tier_config(state: &AppState, tier: ModelTier) -> &ModelTierConfig {
    match tier {
        ModelTier::Low => &state.config.llm.low,
        ModelTier::High => &state.config.llm.high,
    }
}

fn resolve_request_config(
    state: &AppState,
    session: &Session,
) -> (ModelRequestConfig, Option<ThinkingConfig>) {
    let tier_cfg = tier_config(state, session.model_tier);
    let model_config = ModelRequestConfig {
        model_id: tier_cfg.model_id.clone(),
        max_tokens: tier_cfg.max_tokens,
    };
    let thinking_config = if session.use_thinking && tier_cfg.thinking_allowed {
        Some(ThinkingConfig { budget_tokens: tier_cfg.thinking_budget_tokens })
    } else {
        None
    };
    (model_config, thinking_config)
}

/// Steps completed so far, in order, for display in the reasoning trace.
fn ordered_steps(session: &Session) -> Vec<StepRecord> {
    (0..session.step_index)
        .filter_map(|i| session.query_results.get(&Session::step_key(i)).cloned())
        .collect()
}

/// Run the turn loop against `session` until it answers, suspends, errors,
/// or hits the iteration bound. `tx` carries events to the SSE response;
/// the caller is responsible for closing the stream, which this function
/// signals implicitly by whether its last emitted event was `done`.
pub async fn run_turn(state: Arc<AppState>, mut session: Session, tx: mpsc::Sender<AgentEvent>) {
    let span = tracing::info_span!("turn", session_id = %session.id, iteration = session.iteration);
    let _enter = span.enter();

    // Step 1: iteration guard.
    if session.iteration >= MAX_ITERATIONS {
        emit(&tx, AgentEvent::Error { message: "Maximum analysis iterations reached".into() }).await;
        emit(&tx, AgentEvent::Done {}).await;
        if let Err(err) = commit(&state, &mut session).await {
            tracing::error!(error = %err, "failed to commit session at iteration guard");
        }
        return;
    }

    // Step 2: build the LLM request. A session with no messages yet is a
    // fresh start; the prompt builder's output becomes the first user
    // message. A resume already has a full message history — tool-result
    // ingestion appended the pending tool's result before this re-entry.
    let (system, first_user_message) = build_prompt(&session.query, &session.schema);
    if session.messages.is_empty() {
        session.messages.push(Message::user_text(first_user_message));
    }

    let (model_config, thinking_config) = resolve_request_config(&state, &session);
    let tool_defs: Vec<_> = state.tools.definitions().to_vec();

    // Step 3: invoke the LLM.
    let response = {
        let call_span = tracing::info_span!("llm_call", model = %model_config.model_id);
        let _enter = call_span.enter();
        state
            .llm
            .call(&session.messages, &system, &tool_defs, &model_config, thinking_config)
            .await
    };

    let response = match response {
        Ok(r) => r,
        Err(err) => {
            emit(&tx, AgentEvent::Error { message: err.to_string() }).await;
            emit(&tx, AgentEvent::Done {}).await;
            if let Err(err) = commit(&state, &mut session).await {
                tracing::error!(error = %err, "failed to commit session after LLM failure");
            }
            return;
        }
    };

    // Step 4: record usage. Failures here are logged, not surfaced.
    state.quota.record(&session.user_id, response.usage.total()).await;

    // Step 5: append the assistant message and advance iteration.
    let assistant_message = Message::assistant(response.content_blocks.clone());
    session.messages.push(assistant_message.clone());
    session.iteration += 1;

    // Step 6: emit content events in block order. Tool-use blocks are
    // handled in step 7, never emitted as `thinking`.
    for block in &response.content_blocks {
        match block {
            ta_domain::tool::ContentPart::Text { text } => {
                emit(&tx, AgentEvent::Thinking { content: text.clone() }).await;
            }
            ta_domain::tool::ContentPart::Thinking { content } => {
                emit(&tx, AgentEvent::ExtendedThinking { content: content.clone() }).await;
            }
            _ => {}
        }
    }

    // Step 7: dispatch the first tool-use block, if any.
    match assistant_message.first_tool_use() {
        None => {
            emit(&tx, AgentEvent::Done {}).await;
            if let Err(err) = commit(&state, &mut session).await {
                tracing::error!(error = %err, "failed to commit session after plain-text turn");
            }
        }
        Some((_id, name, input)) if state.tools.is_server_terminal(name) => {
            let result = AnalysisResult {
                answer: input.get("answer").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                chart_type: input.get("chartType").and_then(|v| v.as_str()).unwrap_or("table").to_string(),
                chart_data: input
                    .get("chartData")
                    .and_then(|v| v.as_array())
                    .cloned()
                    .unwrap_or_default(),
                steps: ordered_steps(&session),
            };
            session.pending_tool_id = None;
            session.awaiting_tool_result = false;
            emit(&tx, AgentEvent::Answer { result }).await;
            emit(&tx, AgentEvent::Done {}).await;
            if let Err(err) = commit(&state, &mut session).await {
                tracing::error!(error = %err, "failed to commit session after final_answer");
            }
        }
        Some((id, name, input)) => {
            let step_key = Session::step_key(session.step_index);
            session.query_results.insert(
                step_key,
                StepRecord {
                    step: session.step_index,
                    thought: input.get("thought").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                    tool: name.to_string(),
                    input: input.clone(),
                    result: None,
                    error: None,
                    truncated: false,
                },
            );
            session.pending_tool_id = Some(id.to_string());
            session.awaiting_tool_result = true;
            match commit(&state, &mut session).await {
                Ok(()) => {
                    // No `done`: the suspended stream tells the client to
                    // execute the tool and resume (spec §4.7 contract).
                    emit(&tx, AgentEvent::ToolCall {
                        id: id.to_string(),
                        name: name.to_string(),
                        input: input.clone(),
                    })
                    .await;
                }
                Err(err) => {
                    tracing::error!(error = %err, "failed to commit session before tool_call");
                    emit(&tx, AgentEvent::Error { message: "internal error".into() }).await;
                    emit(&tx, AgentEvent::Done {}).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use ta_domain::config::Config;
    use ta_domain::session::{ModelTier, TableInfo};
    use ta_domain::stream::{StopReason, Usage};
    use ta_domain::tool::{ContentPart, ToolDefinition};
    use ta_providers::{LlmClient, LlmResponse};
    use ta_sessions::InMemorySessionStore;

    use crate::runtime::quota::QuotaAccountant;
    use crate::runtime::rate_limit::{InMemoryCounterBackend, RateLimiter};
    use crate::runtime::session_lock::SessionLockMap;
    use crate::runtime::tools::ToolCatalog;

    struct ScriptedLlm {
        responses: Mutex<Vec<LlmResponse>>,
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn call(
            &self,
            _messages: &[Message],
            _system: &str,
            _tools: &[ToolDefinition],
            _model_config: &ModelRequestConfig,
            _thinking_config: Option<ThinkingConfig>,
        ) -> Result<LlmResponse> {
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                panic!("scripted LLM exhausted");
            }
            Ok(responses.remove(0))
        }
    }

    fn test_state(llm: impl LlmClient + 'static) -> Arc<AppState> {
        Arc::new(AppState {
            config: Arc::new(Config::default()),
            sessions: Arc::new(InMemorySessionStore::new()),
            llm: Arc::new(llm),
            tools: Arc::new(ToolCatalog::standard()),
            session_locks: Arc::new(SessionLockMap::new()),
            rate_limiter: Arc::new(RateLimiter::new(
                Arc::new(InMemoryCounterBackend::new()),
                Config::default().rate_limit,
            )),
            quota: Arc::new(QuotaAccountant::new(
                Arc::new(InMemoryCounterBackend::new()),
                Config::default().quota,
            )),
        })
    }

    fn schema() -> Vec<TableInfo> {
        vec![TableInfo {
            table_name: "data".into(),
            columns: vec!["a".into(), "b".into()],
            sample_rows: vec![serde_json::json!({"a": 1, "b": 2})],
            row_count: 3,
        }]
    }

    async fn collect(rx: &mut mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
        let mut out = Vec::new();
        while let Ok(Some(ev)) =
            tokio::time::timeout(std::time::Duration::from_millis(50), rx.recv()).await
        {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn single_turn_final_answer() {
        let llm = ScriptedLlm {
            responses: Mutex::new(vec![LlmResponse {
                content_blocks: vec![ContentPart::ToolUse {
                    id: "t1".into(),
                    name: "final_answer".into(),
                    input: serde_json::json!({
                        "thought": "done",
                        "answer": "Here are the first 3 rows.",
                        "chartType": "table"
                    }),
                }],
                stop_reason: StopReason::ToolUse,
                usage: Usage { input_tokens: 50, output_tokens: 10 },
            }]),
        };
        let state = test_state(llm);
        let session = Session::new(
            "s1".into(),
            "u1".into(),
            ModelTier::Low,
            false,
            "Show the first 3 rows".into(),
            schema(),
        );
        let (tx, mut rx) = mpsc::channel(16);
        run_turn(state, session, tx).await;
        let events = collect(&mut rx).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], AgentEvent::Answer { .. }));
        assert!(matches!(events[1], AgentEvent::Done {}));
    }

    #[tokio::test]
    async fn browser_tool_suspends_without_done() {
        let llm = ScriptedLlm {
            responses: Mutex::new(vec![LlmResponse {
                content_blocks: vec![ContentPart::ToolUse {
                    id: "t1".into(),
                    name: "run_query".into(),
                    input: serde_json::json!({"thought": "count rows", "sql": "SELECT COUNT(*) FROM data"}),
                }],
                stop_reason: StopReason::ToolUse,
                usage: Usage { input_tokens: 50, output_tokens: 10 },
            }]),
        };
        let state = test_state(llm);
        let session = Session::new("s1".into(), "u1".into(), ModelTier::Low, false, "count rows".into(), schema());
        let (tx, mut rx) = mpsc::channel(16);
        run_turn(state.clone(), session, tx).await;
        let events = collect(&mut rx).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], AgentEvent::ToolCall { .. }));

        let persisted = state.sessions.get("s1").await.unwrap().unwrap();
        assert!(persisted.awaiting_tool_result);
        assert_eq!(persisted.pending_tool_id.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn iteration_cap_emits_error_then_done() {
        let llm = ScriptedLlm { responses: Mutex::new(vec![]) };
        let state = test_state(llm);
        let mut session = Session::new("s1".into(), "u1".into(), ModelTier::Low, false, "q".into(), schema());
        session.iteration = MAX_ITERATIONS;
        let (tx, mut rx) = mpsc::channel(16);
        run_turn(state, session, tx).await;
        let events = collect(&mut rx).await;
        match &events[0] {
            AgentEvent::Error { message } => assert_eq!(message, "Maximum analysis iterations reached"),
            other => panic!("expected error, got {other:?}"),
        }
        assert!(matches!(events[1], AgentEvent::Done {}));
    }

    #[tokio::test]
    async fn llm_failure_emits_error_then_done_and_preserves_iteration() {
        struct FailingLlm;
        #[async_trait]
        impl LlmClient for FailingLlm {
            async fn call(
                &self,
                _messages: &[Message],
                _system: &str,
                _tools: &[ToolDefinition],
                _model_config: &ModelRequestConfig,
                _thinking_config: Option<ThinkingConfig>,
            ) -> Result<LlmResponse> {
                Err(ta_domain::error::Error::Provider {
                    provider: "anthropic".into(),
                    message: "API rate limit exceeded".into(),
                })
            }
        }
        let state = test_state(FailingLlm);
        let session = Session::new("s1".into(), "u1".into(), ModelTier::Low, false, "q".into(), schema());
        let (tx, mut rx) = mpsc::channel(16);
        run_turn(state.clone(), session, tx).await;
        let events = collect(&mut rx).await;
        match &events[0] {
            AgentEvent::Error { message } => assert!(message.contains("API rate limit exceeded")),
            other => panic!("expected error, got {other:?}"),
        }
        assert!(matches!(events[1], AgentEvent::Done {}));
        let persisted = state.sessions.get("s1").await.unwrap().unwrap();
        assert_eq!(persisted.iteration, 0);
    }
}
