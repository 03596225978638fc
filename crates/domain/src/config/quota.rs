use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-user token usage quota configuration.
///
/// `default_token_limit` applies to any user without a `per_user` override.
/// The quota period is a fixed rolling window of `period_days` days.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "d_token_limit")]
    pub default_token_limit: u64,
    #[serde(default = "d_period_days")]
    pub period_days: i64,
    /// Per-user overrides keyed by user_id.
    #[serde(default)]
    pub per_user: HashMap<String, u64>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_token_limit: d_token_limit(),
            period_days: d_period_days(),
            per_user: HashMap::new(),
        }
    }
}

impl QuotaConfig {
    pub fn limit_for(&self, user_id: &str) -> u64 {
        self.per_user
            .get(user_id)
            .copied()
            .unwrap_or(self.default_token_limit)
    }
}

fn d_token_limit() -> u64 {
    150_000
}
fn d_period_days() -> i64 {
    30
}
