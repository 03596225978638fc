//! Per-endpoint sliding-window request admission (spec §4.2).
//!
//! `RateLimiter` wraps a [`CounterBackend`] — the same Redis/in-memory
//! duality as the session store — keyed `ratelimit:<endpoint>:<client_key>`.
//! Windows are fixed (not a true sliding log) which the spec allows:
//! "counting is approximate-correct under the window boundary". A backend
//! failure fails open: the request is allowed and the failure is logged,
//! never surfaced to the caller.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use redis::AsyncCommands;

use ta_domain::config::RateLimitConfig;

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_in_ms: u64,
}

/// A counted increment against a fixed window, shared by the rate limiter
/// and the quota accountant.
#[async_trait::async_trait]
pub trait CounterBackend: Send + Sync {
    /// Increment `key`'s counter, creating it with `window_secs` expiry if
    /// absent. Returns `(new_count, seconds_until_expiry)`.
    async fn incr_and_get(&self, key: &str, window_secs: u64) -> Result<(u64, u64), String> {
        self.incr_by_and_get(key, 1, window_secs).await
    }

    /// Increment `key`'s counter by `delta`, creating it with `window_secs`
    /// expiry if absent. Returns `(new_count, seconds_until_expiry)`.
    async fn incr_by_and_get(
        &self,
        key: &str,
        delta: u64,
        window_secs: u64,
    ) -> Result<(u64, u64), String>;

    /// Read the current counter value without incrementing, for `check`
    /// operations that must not themselves count as a request.
    async fn get(&self, key: &str) -> Result<(u64, u64), String>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Redis-backed counter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct RedisCounterBackend {
    conn: redis::aio::ConnectionManager,
}

impl RedisCounterBackend {
    pub async fn connect(redis_url: &str) -> Result<Self, String> {
        let client = redis::Client::open(redis_url).map_err(|e| e.to_string())?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| e.to_string())?;
        Ok(Self { conn })
    }
}

#[async_trait::async_trait]
impl CounterBackend for RedisCounterBackend {
    async fn incr_by_and_get(
        &self,
        key: &str,
        delta: u64,
        window_secs: u64,
    ) -> Result<(u64, u64), String> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.incr(key, delta).await.map_err(|e| e.to_string())?;
        if count == delta {
            let _: () = conn
                .expire(key, window_secs as i64)
                .await
                .map_err(|e| e.to_string())?;
        }
        let ttl: i64 = conn.ttl(key).await.map_err(|e| e.to_string())?;
        Ok((count, ttl.max(0) as u64))
    }

    async fn get(&self, key: &str) -> Result<(u64, u64), String> {
        let mut conn = self.conn.clone();
        let count: Option<u64> = conn.get(key).await.map_err(|e| e.to_string())?;
        let ttl: i64 = conn.ttl(key).await.map_err(|e| e.to_string())?;
        Ok((count.unwrap_or(0), ttl.max(0) as u64))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory counter (tests, single-process deployments)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Window {
    count: u64,
    expires_at: Instant,
}

#[derive(Default)]
pub struct InMemoryCounterBackend {
    windows: Mutex<HashMap<String, Window>>,
}

impl InMemoryCounterBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CounterBackend for InMemoryCounterBackend {
    async fn incr_by_and_get(
        &self,
        key: &str,
        delta: u64,
        window_secs: u64,
    ) -> Result<(u64, u64), String> {
        let mut windows = self.windows.lock();
        let now = Instant::now();
        let entry = windows.get_mut(key).filter(|w| w.expires_at > now);
        if let Some(w) = entry {
            w.count += delta;
            let remaining = w.expires_at.saturating_duration_since(now).as_secs();
            return Ok((w.count, remaining));
        }
        windows.insert(
            key.to_string(),
            Window {
                count: delta,
                expires_at: now + Duration::from_secs(window_secs),
            },
        );
        Ok((delta, window_secs))
    }

    async fn get(&self, key: &str) -> Result<(u64, u64), String> {
        let windows = self.windows.lock();
        let now = Instant::now();
        match windows.get(key).filter(|w| w.expires_at > now) {
            Some(w) => Ok((w.count, w.expires_at.saturating_duration_since(now).as_secs())),
            None => Ok((0, 0)),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rate limiter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct RateLimiter {
    backend: Arc<dyn CounterBackend>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(backend: Arc<dyn CounterBackend>, config: RateLimitConfig) -> Self {
        Self { backend, config }
    }

    /// Admission check for `endpoint`/`client_key`. Fails open on backend
    /// error: the request is allowed, and the error is only logged.
    pub async fn check(&self, endpoint: &str, client_key: &str) -> RateDecision {
        let limit = self.config.for_endpoint(endpoint);
        let key = format!("ratelimit:{endpoint}:{client_key}");
        match self.backend.incr_and_get(&key, limit.window_secs).await {
            Ok((count, ttl_secs)) => {
                let remaining = limit.max_requests.saturating_sub(count as u32);
                RateDecision {
                    allowed: count <= limit.max_requests as u64,
                    limit: limit.max_requests,
                    remaining,
                    reset_in_ms: ttl_secs * 1000,
                }
            }
            Err(err) => {
                tracing::warn!(endpoint, error = %err, "rate limiter backend failure, failing open");
                RateDecision {
                    allowed: true,
                    limit: limit.max_requests,
                    remaining: limit.max_requests,
                    reset_in_ms: limit.window_secs * 1000,
                }
            }
        }
    }
}

/// Derive the admission client key: `user:<id>` for authenticated requests,
/// else the first valid address in `forwarded_for` (comma-separated,
/// left-to-right), falling back to `remote_addr`. Malformed candidate
/// addresses are skipped rather than rejecting the whole header.
pub fn client_key(
    user_id: Option<&str>,
    forwarded_for: Option<&str>,
    remote_addr: IpAddr,
) -> String {
    if let Some(id) = user_id {
        return format!("user:{id}");
    }
    if let Some(header) = forwarded_for {
        for candidate in header.split(',') {
            let candidate = candidate.trim();
            if let Ok(addr) = candidate.parse::<IpAddr>() {
                return format!("ip:{addr}");
            }
        }
    }
    format!("ip:{remote_addr}")
}
