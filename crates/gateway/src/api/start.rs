//! `GET /analyze` — admission, session creation, hand-off to the turn loop
//! (spec §4.9).

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use ta_domain::session::{ModelTier, Session, TableInfo};

use crate::api::admission::{admit, apply_quota_headers, apply_rate_limit_headers, AdmissionError};
use crate::runtime::events::AgentEvent;
use crate::runtime::turn::run_turn;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StartQuery {
    pub query: String,
    pub schema: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub thinking: Option<bool>,
}

pub async fn start(
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(params): Query<StartQuery>,
) -> Response {
    let (user_id, rate_decision, quota_decision) =
        match admit(&state, &headers, remote_addr, "analyze", true).await {
            Ok(v) => v,
            Err(err) => return err.into_response(),
        };

    if let Err(err) = validate_query(&params.query, &state) {
        return err.into_response();
    }
    let schema = match parse_schema(&params.schema, &state) {
        Ok(s) => s,
        Err(err) => return err.into_response(),
    };

    let model_tier = ModelTier::from_str(params.model.as_deref().unwrap_or("low")).unwrap_or(ModelTier::Low);
    let tier_cfg = match model_tier {
        ModelTier::Low => &state.config.llm.low,
        ModelTier::High => &state.config.llm.high,
    };
    if tier_cfg.requires_entitlement && !has_entitlement(&headers, model_tier) {
        return AdmissionError::forbidden("this model tier requires a paid entitlement").into_response();
    }

    let use_thinking = params.thinking.unwrap_or(true);
    let session_id = uuid::Uuid::new_v4().simple().to_string();
    let session = Session::new(session_id.clone(), user_id, model_tier, use_thinking, params.query, schema);

    let permit = match state.session_locks.acquire(&session.id).await {
        Ok(p) => p,
        Err(_) => {
            return (StatusCode::CONFLICT, Json(json!({"error": "session is busy"}))).into_response()
        }
    };

    let (tx, rx) = mpsc::channel(32);
    let _ = tx.send(AgentEvent::Session { session_id }).await;

    let run_state = state.clone();
    tokio::spawn(async move {
        let _permit = permit;
        run_turn(run_state, session, tx).await;
    });

    let mut response_headers = HeaderMap::new();
    apply_rate_limit_headers(&mut response_headers, &rate_decision);
    if let Some(q) = &quota_decision {
        apply_quota_headers(&mut response_headers, q);
    }

    let mut response = Sse::new(event_stream(rx)).keep_alive(KeepAlive::default()).into_response();
    response.headers_mut().extend(response_headers);
    response
}

fn event_stream(
    mut rx: mpsc::Receiver<AgentEvent>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield Ok(event.to_sse());
        }
    }
}

fn validate_query(query: &str, state: &AppState) -> Result<(), AdmissionError> {
    let limits = &state.config.sessions;
    if query.is_empty() || query.chars().count() > limits.max_query_chars {
        return Err(AdmissionError::bad_request(format!(
            "query must be 1 to {} characters",
            limits.max_query_chars
        )));
    }
    Ok(())
}

fn parse_schema(raw: &str, state: &AppState) -> Result<Vec<TableInfo>, AdmissionError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|_| AdmissionError::bad_request("schema must be valid JSON"))?;

    let mut tables: Vec<TableInfo> = match value {
        serde_json::Value::Array(_) => serde_json::from_value(value)
            .map_err(|_| AdmissionError::bad_request("schema array must contain TableInfo objects"))?,
        serde_json::Value::Object(_) => {
            let table: TableInfo = serde_json::from_value(value)
                .map_err(|_| AdmissionError::bad_request("schema object must be a TableInfo"))?;
            vec![table]
        }
        _ => return Err(AdmissionError::bad_request("schema must be an object or an array")),
    };

    let limits = &state.config.sessions;
    if tables.is_empty() || tables.len() > limits.max_tables {
        return Err(AdmissionError::bad_request(format!(
            "schema must describe 1 to {} tables",
            limits.max_tables
        )));
    }
    for table in &mut tables {
        if table.columns.len() > limits.max_columns {
            return Err(AdmissionError::bad_request(format!(
                "table {} exceeds {} columns",
                table.table_name, limits.max_columns
            )));
        }
        if table.sample_rows.len() > limits.max_sample_rows {
            table.sample_rows.truncate(limits.max_sample_rows);
        }
    }
    Ok(tables)
}

fn has_entitlement(headers: &HeaderMap, tier: ModelTier) -> bool {
    let needed = match tier {
        ModelTier::High => "high",
        ModelTier::Low => "low",
    };
    headers
        .get("x-entitlements")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').any(|t| t.trim() == needed))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_object_parses_as_a_single_table() {
        let raw = serde_json::json!({
            "table_name": "data",
            "columns": ["a", "b"],
            "sample_rows": [{"a": 1, "b": 2}],
            "row_count": 3
        })
        .to_string();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value.is_object());
        let table: TableInfo = serde_json::from_value(value).unwrap();
        assert_eq!(table.table_name, "data");
    }

    #[test]
    fn has_entitlement_parses_comma_separated_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-entitlements", "low, high".parse().unwrap());
        assert!(has_entitlement(&headers, ModelTier::High));
        assert!(has_entitlement(&headers, ModelTier::Low));
    }

    #[test]
    fn has_entitlement_false_when_header_absent() {
        let headers = HeaderMap::new();
        assert!(!has_entitlement(&headers, ModelTier::High));
    }
}
