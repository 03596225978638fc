use serde::{Deserialize, Serialize};

/// LLM provider + per-tier model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Environment variable holding the Anthropic API key.
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_base_url")]
    pub base_url: String,
    #[serde(default = "d_low_tier")]
    pub low: ModelTierConfig,
    #[serde(default = "d_high_tier")]
    pub high: ModelTierConfig,
    /// Provider request timeout; must be >= 60s per §5.
    #[serde(default = "d_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: d_api_key_env(),
            base_url: d_base_url(),
            low: d_low_tier(),
            high: d_high_tier(),
            timeout_secs: d_timeout_secs(),
        }
    }
}

/// Resolved model settings for one tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelTierConfig {
    pub model_id: String,
    pub max_tokens: u32,
    /// Whether this tier permits extended-thinking mode at all.
    pub thinking_allowed: bool,
    /// Token budget for the thinking block when thinking is requested and
    /// allowed; `max_tokens` is raised to accommodate it.
    pub thinking_budget_tokens: u32,
    /// Whether starting a session on this tier requires a paid entitlement
    /// (spec §4.9 model gating). Disabled by default; operators turn it on
    /// per tier alongside their own entitlement source.
    #[serde(default)]
    pub requires_entitlement: bool,
}

fn d_api_key_env() -> String {
    "ANTHROPIC_API_KEY".into()
}
fn d_base_url() -> String {
    "https://api.anthropic.com".into()
}
fn d_timeout_secs() -> u64 {
    90
}
fn d_low_tier() -> ModelTierConfig {
    ModelTierConfig {
        model_id: "claude-3-5-haiku-20241022".into(),
        max_tokens: 4096,
        thinking_allowed: false,
        thinking_budget_tokens: 0,
        requires_entitlement: false,
    }
}
fn d_high_tier() -> ModelTierConfig {
    ModelTierConfig {
        model_id: "claude-3-7-sonnet-20250219".into(),
        max_tokens: 4096,
        thinking_allowed: true,
        thinking_budget_tokens: 8192,
        requires_entitlement: false,
    }
}
