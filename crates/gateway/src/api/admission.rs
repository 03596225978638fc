//! Pre-stream admission checks shared by the start and resume endpoints
//! (spec §4.9, §4.10): authentication, rate limiting, quota, and the
//! request headers that accompany every response.

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::net::{IpAddr, SocketAddr};

use crate::runtime::quota::QuotaDecision;
use crate::runtime::rate_limit::{client_key, RateDecision};
use crate::state::AppState;

/// An admission failure, pre-stream. Rendered as a JSON body with an
/// `error` field and the appropriate status code (spec §4.9).
pub struct AdmissionError {
    pub status: StatusCode,
    pub body: serde_json::Value,
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl AdmissionError {
    pub fn unauthenticated() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            body: json!({"error": "authentication required"}),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, body: json!({"error": message.into()}) }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, body: json!({"error": message.into()}) }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self { status: StatusCode::FORBIDDEN, body: json!({"error": message.into()}) }
    }

    pub fn rate_limited(decision: RateDecision) -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            body: json!({"error": "rate limit exceeded", "retryAfterMs": decision.reset_in_ms}),
        }
    }

    pub fn quota_exceeded(decision: QuotaDecision) -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            body: json!({
                "error": "Token limit exceeded for the current period",
                "tokensUsed": decision.used,
                "tokenLimit": decision.limit,
                "periodEnd": decision.period_end,
            }),
        }
    }
}

/// Dev/test authenticator contract: the caller's identity is read from the
/// `X-User-Id` header. Real identity/session-cookie authentication is an
/// external collaborator (spec §1 out-of-scope); this is the seam a
/// production deployment replaces.
pub fn authenticate(headers: &HeaderMap) -> Result<String, AdmissionError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .ok_or_else(AdmissionError::unauthenticated)
}

/// Derive the rate-limit/quota client key from the authenticated user, or
/// (for the unauthenticated case callers don't expect here) the first
/// valid forwarded address.
pub fn resolve_client_key(headers: &HeaderMap, user_id: &str, remote_addr: SocketAddr) -> String {
    let forwarded = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok());
    client_key(Some(user_id), forwarded, remote_addr.ip())
}

pub fn remote_ip(addr: SocketAddr) -> IpAddr {
    addr.ip()
}

/// Attach `X-RateLimit-{Limit,Remaining,Reset}` to any response, success or
/// 429 (spec §4.2).
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &RateDecision) {
    insert_u64(headers, "x-ratelimit-limit", decision.limit as u64);
    insert_u64(headers, "x-ratelimit-remaining", decision.remaining as u64);
    insert_u64(headers, "x-ratelimit-reset", decision.reset_in_ms.div_ceil(1000));
}

/// Attach `X-Token-{Limit,Used,Remaining}` and `X-Period-End` (spec §6).
pub fn apply_quota_headers(headers: &mut HeaderMap, decision: &QuotaDecision) {
    insert_u64(headers, "x-token-limit", decision.limit);
    insert_u64(headers, "x-token-used", decision.used);
    insert_u64(headers, "x-token-remaining", decision.remaining);
    if let Ok(v) = HeaderValue::from_str(&decision.period_end.to_rfc3339()) {
        headers.insert("x-period-end", v);
    }
}

fn insert_u64(headers: &mut HeaderMap, name: &'static str, value: u64) {
    if let Ok(v) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(name, v);
    }
}

/// Full admission sequence for the start endpoint: authenticate, rate
/// limit, quota check. Returns the authenticated user id, client key, and
/// the rate/quota decisions so the caller can attach headers.
pub async fn admit(
    state: &AppState,
    headers: &HeaderMap,
    remote_addr: SocketAddr,
    endpoint: &str,
    check_quota: bool,
) -> Result<(String, RateDecision, Option<QuotaDecision>), AdmissionError> {
    let user_id = authenticate(headers)?;
    let client_key = resolve_client_key(headers, &user_id, remote_addr);

    let rate_decision = state.rate_limiter.check(endpoint, &client_key).await;
    if !rate_decision.allowed {
        return Err(AdmissionError::rate_limited(rate_decision));
    }

    let quota_decision = if check_quota {
        let decision = state.quota.check(&user_id).await;
        if !decision.allowed {
            return Err(AdmissionError::quota_exceeded(decision));
        }
        Some(decision)
    } else {
        None
    };

    Ok((user_id, rate_decision, quota_decision))
}
