//! Per-user token usage accounting against a period quota (spec §4.3).
//!
//! Shares the [`CounterBackend`] abstraction with the rate limiter, keyed
//! `quota:<user_id>:<period>` where `period` is the index of the current
//! `period_days`-long window since the Unix epoch, so a new key (and
//! counter) begins automatically at each period boundary.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use ta_domain::config::QuotaConfig;

use crate::runtime::rate_limit::CounterBackend;

/// Outcome of a quota admission check.
#[derive(Debug, Clone, Copy)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub used: u64,
    pub limit: u64,
    pub remaining: u64,
    pub period_end: DateTime<Utc>,
}

pub struct QuotaAccountant {
    backend: Arc<dyn CounterBackend>,
    config: QuotaConfig,
}

impl QuotaAccountant {
    pub fn new(backend: Arc<dyn CounterBackend>, config: QuotaConfig) -> Self {
        Self { backend, config }
    }

    fn period_window_secs(&self) -> u64 {
        (self.config.period_days.max(1) as u64) * 86_400
    }

    /// The current period's index and end timestamp, anchored to the Unix
    /// epoch so all users share period boundaries.
    fn current_period(&self) -> (i64, DateTime<Utc>) {
        let window_secs = self.period_window_secs() as i64;
        let now = Utc::now().timestamp();
        let period_index = now.div_euclid(window_secs);
        let period_end = DateTime::from_timestamp((period_index + 1) * window_secs, 0)
            .unwrap_or_else(Utc::now);
        (period_index, period_end)
    }

    fn key(&self, user_id: &str, period_index: i64) -> String {
        format!("quota:{user_id}:{period_index}")
    }

    /// `check` never mutates the counter; `allowed` is `used < limit`. On
    /// backend failure, fails open (allowed, used reported as 0) per the
    /// concurrency model's fail-open policy (spec §5).
    pub async fn check(&self, user_id: &str) -> QuotaDecision {
        let limit = self.config.limit_for(user_id);
        let (period_index, period_end) = self.current_period();
        match self.backend.get(&self.key(user_id, period_index)).await {
            Ok((used, _ttl)) => QuotaDecision {
                allowed: used < limit,
                used,
                limit,
                remaining: limit.saturating_sub(used),
                period_end,
            },
            Err(err) => {
                tracing::warn!(user_id, error = %err, "quota backend failure, failing open");
                QuotaDecision {
                    allowed: true,
                    used: 0,
                    limit,
                    remaining: limit,
                    period_end,
                }
            }
        }
    }

    /// Additive increment after an LLM turn (spec §4.3: called with
    /// `input_tokens + output_tokens` after every turn, never before
    /// session creation). Tolerates concurrent callers for the same user
    /// via the backend's atomic increment. Failures are logged, never
    /// surfaced (spec §7 propagation policy).
    pub async fn record(&self, user_id: &str, tokens: u64) {
        if tokens == 0 {
            return;
        }
        let (period_index, _) = self.current_period();
        let key = self.key(user_id, period_index);
        let window_secs = self.period_window_secs();
        if let Err(err) = self.backend.incr_by_and_get(&key, tokens, window_secs).await {
            tracing::warn!(user_id, error = %err, "quota record failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::rate_limit::InMemoryCounterBackend;
    use std::collections::HashMap;

    fn config(limit: u64) -> QuotaConfig {
        QuotaConfig {
            default_token_limit: limit,
            period_days: 30,
            per_user: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn no_usage_passes_check() {
        let accountant = QuotaAccountant::new(Arc::new(InMemoryCounterBackend::new()), config(1000));
        let decision = accountant.check("u1").await;
        assert!(decision.allowed);
        assert_eq!(decision.used, 0);
    }

    #[tokio::test]
    async fn record_then_check_reflects_usage() {
        let accountant = QuotaAccountant::new(Arc::new(InMemoryCounterBackend::new()), config(1000));
        accountant.record("u1", 400).await;
        let decision = accountant.check("u1").await;
        assert_eq!(decision.used, 400);
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn check_denies_once_limit_reached() {
        let accountant = QuotaAccountant::new(Arc::new(InMemoryCounterBackend::new()), config(500));
        accountant.record("u1", 500).await;
        let decision = accountant.check("u1").await;
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[tokio::test]
    async fn per_user_override_applies() {
        let mut per_user = HashMap::new();
        per_user.insert("vip".to_string(), 100_000);
        let cfg = QuotaConfig {
            default_token_limit: 1000,
            period_days: 30,
            per_user,
        };
        let accountant = QuotaAccountant::new(Arc::new(InMemoryCounterBackend::new()), cfg);
        let decision = accountant.check("vip").await;
        assert_eq!(decision.limit, 100_000);
    }

    #[tokio::test]
    async fn usage_is_isolated_per_user() {
        let accountant = QuotaAccountant::new(Arc::new(InMemoryCounterBackend::new()), config(1000));
        accountant.record("u1", 900).await;
        let decision = accountant.check("u2").await;
        assert_eq!(decision.used, 0);
    }
}
