//! `POST /analyze/tool-result` — tool-result ingestion (spec §4.10). Not
//! streamed: writes the browser-computed result into the session and
//! clears the pending-tool flags so the next resume can proceed.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use ta_domain::session::Session;
use ta_domain::tool::Message;

use crate::api::admission::{admit, apply_rate_limit_headers, AdmissionError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultBody {
    pub session_id: String,
    pub tool_id: String,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

pub async fn tool_result(
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<ToolResultBody>,
) -> Response {
    let (_user_id, rate_decision, _quota) =
        match admit(&state, &headers, remote_addr, "tool_result", false).await {
            Ok(v) => v,
            Err(err) => return err.into_response(),
        };

    let mut session = match state.sessions.get(&body.session_id).await {
        Ok(Some(s)) => s,
        Ok(None) => return AdmissionError::not_found("Session not found").into_response(),
        Err(err) => {
            tracing::error!(error = %err, "session store error on tool-result");
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "internal error"})))
                .into_response();
        }
    };

    let mut response_headers = HeaderMap::new();
    apply_rate_limit_headers(&mut response_headers, &rate_decision);

    let is_pending_match =
        session.awaiting_tool_result && session.pending_tool_id.as_deref() == Some(body.tool_id.as_str());
    if !is_pending_match {
        // A client retrying after a flaky connection may resubmit the same
        // toolId after it already completed. Replay the same 200 instead of
        // 400ing, as long as it really is the step that just finished.
        let is_replay = !session.awaiting_tool_result
            && session.last_completed_tool_id.as_deref() == Some(body.tool_id.as_str());
        if is_replay {
            let mut resp = (StatusCode::OK, Json(json!({"ok": true}))).into_response();
            resp.headers_mut().extend(response_headers);
            return resp;
        }
        return AdmissionError::bad_request("toolId does not match the session's pending tool")
            .into_response();
    }

    let (stored_result, message_content, is_error, truncated) = render_result(&state, &body);

    session
        .messages
        .push(Message::user_tool_result(body.tool_id.clone(), message_content, is_error));

    let step_key = Session::step_key(session.step_index);
    if let Some(record) = session.query_results.get_mut(&step_key) {
        record.result = stored_result;
        record.error = body.error.clone();
        record.truncated = truncated;
    }
    session.step_index += 1;
    session.pending_tool_id = None;
    session.awaiting_tool_result = false;
    session.last_completed_tool_id = Some(body.tool_id.clone());
    session.touch();

    match state.sessions.put(&session, state.config.sessions.ttl_seconds).await {
        Ok(()) => {
            let mut resp = (StatusCode::OK, Json(json!({"ok": true}))).into_response();
            resp.headers_mut().extend(response_headers);
            resp
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to persist tool result");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "internal error"}))).into_response()
        }
    }
}

/// Apply the tool-result payload size cap (spec §9): results larger than
/// `max_result_bytes` are truncated to the first `max_result_rows` array
/// elements with a `truncated` marker, both in the persisted session and
/// in the message content shown to the model.
fn render_result(
    state: &AppState,
    body: &ToolResultBody,
) -> (Option<serde_json::Value>, String, bool, bool) {
    if let Some(err) = &body.error {
        return (None, err.clone(), true, false);
    }

    let result = body.result.clone().unwrap_or(serde_json::Value::Null);
    let limits = &state.config.sessions;
    let serialized = serde_json::to_string(&result).unwrap_or_default();
    if serialized.len() <= limits.max_result_bytes {
        return (Some(result), serialized, false, false);
    }

    if let serde_json::Value::Array(rows) = &result {
        let truncated_rows: Vec<_> = rows.iter().take(limits.max_result_rows).cloned().collect();
        let stored = serde_json::Value::Array(truncated_rows.clone());
        let message = json!({"rows": truncated_rows, "truncated": true}).to_string();
        return (Some(stored), message, false, true);
    }

    (Some(result), serialized, false, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ta_domain::config::Config;
    use ta_domain::error::Result;
    use ta_domain::stream::{StopReason, Usage};
    use ta_domain::tool::ToolDefinition;
    use ta_providers::{LlmResponse, ModelRequestConfig, ThinkingConfig};

    struct NoopLlm;

    #[async_trait::async_trait]
    impl ta_providers::LlmClient for NoopLlm {
        async fn call(
            &self,
            _messages: &[Message],
            _system: &str,
            _tools: &[ToolDefinition],
            _model_config: &ModelRequestConfig,
            _thinking_config: Option<ThinkingConfig>,
        ) -> Result<LlmResponse> {
            Ok(LlmResponse {
                content_blocks: vec![],
                stop_reason: StopReason::EndTurn,
                usage: Usage { input_tokens: 0, output_tokens: 0 },
            })
        }
    }

    fn minimal_state() -> AppState {
        AppState {
            config: Arc::new(Config::default()),
            sessions: Arc::new(ta_sessions::InMemorySessionStore::new()),
            llm: Arc::new(NoopLlm),
            tools: Arc::new(crate::runtime::tools::ToolCatalog::standard()),
            session_locks: Arc::new(crate::runtime::session_lock::SessionLockMap::new()),
            rate_limiter: Arc::new(crate::runtime::rate_limit::RateLimiter::new(
                Arc::new(crate::runtime::rate_limit::InMemoryCounterBackend::new()),
                Config::default().rate_limit,
            )),
            quota: Arc::new(crate::runtime::quota::QuotaAccountant::new(
                Arc::new(crate::runtime::rate_limit::InMemoryCounterBackend::new()),
                Config::default().quota,
            )),
        }
    }

    #[test]
    fn small_result_is_not_truncated() {
        let state = minimal_state();
        let body = ToolResultBody {
            session_id: "s1".into(),
            tool_id: "t1".into(),
            result: Some(serde_json::json!([{"count": 3}])),
            error: None,
        };
        let (stored, _content, is_error, truncated) = render_result(&state, &body);
        assert!(!is_error);
        assert!(!truncated);
        assert_eq!(stored, Some(serde_json::json!([{"count": 3}])));
    }

    #[test]
    fn oversized_array_is_truncated_with_marker() {
        let mut config = Config::default();
        config.sessions.max_result_bytes = 10;
        config.sessions.max_result_rows = 1;
        let state = AppState { config: Arc::new(config), ..minimal_state() };
        let body = ToolResultBody {
            session_id: "s1".into(),
            tool_id: "t1".into(),
            result: Some(serde_json::json!([{"a": 1}, {"a": 2}, {"a": 3}])),
            error: None,
        };
        let (stored, content, is_error, truncated) = render_result(&state, &body);
        assert!(!is_error);
        assert!(truncated);
        assert_eq!(stored, Some(serde_json::json!([{"a": 1}])));
        assert!(content.contains("\"truncated\":true"));
    }

    #[test]
    fn error_result_is_flagged_and_not_stored() {
        let state = minimal_state();
        let body = ToolResultBody {
            session_id: "s1".into(),
            tool_id: "t1".into(),
            result: None,
            error: Some("query failed".into()),
        };
        let (stored, content, is_error, truncated) = render_result(&state, &body);
        assert!(stored.is_none());
        assert!(is_error);
        assert!(!truncated);
        assert_eq!(content, "query failed");
    }

    fn pending_session() -> ta_domain::session::Session {
        let mut session = ta_domain::session::Session::new(
            "s1".into(),
            "u1".into(),
            ta_domain::session::ModelTier::Low,
            false,
            "how many rows".into(),
            vec![],
        );
        session.messages.push(Message::assistant(vec![ta_domain::tool::ContentPart::ToolUse {
            id: "t1".into(),
            name: "run_query".into(),
            input: serde_json::json!({"thought": "count rows", "sql": "SELECT COUNT(*)"}),
        }]));
        session.query_results.insert(
            ta_domain::session::Session::step_key(0),
            ta_domain::session::StepRecord {
                step: 0,
                thought: "count rows".into(),
                tool: "run_query".into(),
                input: serde_json::json!({"sql": "SELECT COUNT(*)"}),
                result: None,
                error: None,
                truncated: false,
            },
        );
        session.pending_tool_id = Some("t1".into());
        session.awaiting_tool_result = true;
        session
    }

    fn headers_with_user(user: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", user.parse().unwrap());
        headers
    }

    #[tokio::test]
    async fn resubmitting_the_same_tool_id_after_completion_replays_200() {
        let state = Arc::new(minimal_state());
        state.sessions.put(&pending_session(), 300).await.unwrap();

        let body = ToolResultBody {
            session_id: "s1".into(),
            tool_id: "t1".into(),
            result: Some(serde_json::json!([{"count": 3}])),
            error: None,
        };
        let addr: SocketAddr = "127.0.0.1:1234".parse().unwrap();

        let first = tool_result(
            axum::extract::State(state.clone()),
            axum::extract::ConnectInfo(addr),
            headers_with_user("u1"),
            axum::Json(body.clone_for_test()),
        )
        .await;
        assert_eq!(first.status(), StatusCode::OK);

        let session = state.sessions.get("s1").await.unwrap().unwrap();
        assert!(!session.awaiting_tool_result);
        assert_eq!(session.step_index, 1);

        let replay = tool_result(
            axum::extract::State(state.clone()),
            axum::extract::ConnectInfo(addr),
            headers_with_user("u1"),
            axum::Json(body.clone_for_test()),
        )
        .await;
        assert_eq!(replay.status(), StatusCode::OK);

        // The replay must not re-advance the session.
        let session = state.sessions.get("s1").await.unwrap().unwrap();
        assert_eq!(session.step_index, 1);
    }

    #[tokio::test]
    async fn mismatched_tool_id_with_no_prior_completion_is_bad_request() {
        let state = Arc::new(minimal_state());
        state.sessions.put(&pending_session(), 300).await.unwrap();

        let body = ToolResultBody {
            session_id: "s1".into(),
            tool_id: "wrong-id".into(),
            result: Some(serde_json::json!([{"count": 3}])),
            error: None,
        };
        let addr: SocketAddr = "127.0.0.1:1234".parse().unwrap();

        let response = tool_result(
            axum::extract::State(state),
            axum::extract::ConnectInfo(addr),
            headers_with_user("u1"),
            axum::Json(body),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    impl ToolResultBody {
        fn clone_for_test(&self) -> Self {
            Self {
                session_id: self.session_id.clone(),
                tool_id: self.tool_id.clone(),
                result: self.result.clone(),
                error: self.error.clone(),
            }
        }
    }
}
