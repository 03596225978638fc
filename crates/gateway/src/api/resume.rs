//! `GET /analyze/resume` — admission, reattach to an existing session, and
//! re-enter the turn loop (spec §4.10).

use std::net::SocketAddr;
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

use crate::api::admission::{admit, apply_quota_headers, apply_rate_limit_headers, AdmissionError};
use crate::runtime::events::AgentEvent;
use crate::runtime::turn::run_turn;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ResumeQuery {
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

pub async fn resume(
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(params): Query<ResumeQuery>,
) -> Response {
    let (_user_id, rate_decision, quota_decision) =
        match admit(&state, &headers, remote_addr, "resume", true).await {
            Ok(v) => v,
            Err(err) => return err.into_response(),
        };

    let session = match state.sessions.get(&params.session_id).await {
        Ok(Some(s)) => s,
        Ok(None) => return AdmissionError::not_found("Session not found").into_response(),
        Err(err) => {
            tracing::error!(error = %err, "session store error on resume");
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "internal error"})))
                .into_response();
        }
    };

    let permit = match state.session_locks.acquire(&session.id).await {
        Ok(p) => p,
        Err(_) => {
            return (StatusCode::CONFLICT, Json(json!({"error": "session is busy"}))).into_response()
        }
    };

    let (tx, rx) = mpsc::channel(32);
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

    // No `session` event here (spec P4: it appears only on the start
    // stream; the client already knows the id it's resuming).
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
