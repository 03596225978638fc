use ta_domain::error::Result;
use ta_domain::stream::Usage;
use ta_domain::tool::{ContentPart, Message, ToolDefinition};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resolved model settings for a single turn, derived from the session's
/// `model_tier`.
#[derive(Debug, Clone)]
pub struct ModelRequestConfig {
    pub model_id: String,
    pub max_tokens: u32,
}

/// Extended-thinking request parameters. Presence raises the effective
/// `max_tokens` ceiling to accommodate the thinking budget.
#[derive(Debug, Clone, Copy)]
pub struct ThinkingConfig {
    pub budget_tokens: u32,
}

/// Typed response from a single LLM turn.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content_blocks: Vec<ContentPart>,
    pub stop_reason: ta_domain::stream::StopReason,
    pub usage: Usage,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core client trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single-turn LLM request. Every adapter translates `messages`/`system`/
/// `tools` into its own wire format and parses the response back into the
/// shared [`LlmResponse`] shape — no untyped content ever reaches the turn
/// loop.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    async fn call(
        &self,
        messages: &[Message],
        system: &str,
        tools: &[ToolDefinition],
        model_config: &ModelRequestConfig,
        thinking_config: Option<ThinkingConfig>,
    ) -> Result<LlmResponse>;
}
