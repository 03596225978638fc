//! Anthropic-native adapter.
//!
//! Implements the Anthropic Messages API: tool use, extended thinking, and
//! the Anthropic-specific message structure where the system prompt is a
//! separate top-level `system` field rather than a message.

use serde_json::Value;
use ta_domain::error::{Error, Result};
use ta_domain::stream::{StopReason, Usage};
use ta_domain::tool::{ContentPart, Message, Role, ToolDefinition};

use crate::traits::{LlmClient, LlmResponse, ModelRequestConfig, ThinkingConfig};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
    }

    fn build_body(
        &self,
        messages: &[Message],
        system: &str,
        tools: &[ToolDefinition],
        model_config: &ModelRequestConfig,
        thinking_config: Option<ThinkingConfig>,
    ) -> Value {
        let api_messages: Vec<Value> = messages.iter().map(message_to_anthropic).collect();

        let max_tokens = match thinking_config {
            Some(t) => model_config.max_tokens.max(t.budget_tokens + 1024),
            None => model_config.max_tokens,
        };

        let mut body = serde_json::json!({
            "model": model_config.model_id,
            "messages": api_messages,
            "max_tokens": max_tokens,
            "stream": false,
        });

        if !system.is_empty() {
            body["system"] = Value::String(system.to_string());
        }

        if !tools.is_empty() {
            let tools: Vec<Value> = tools.iter().map(tool_to_anthropic).collect();
            body["tools"] = Value::Array(tools);
        }

        if let Some(thinking) = thinking_config {
            body["thinking"] = serde_json::json!({
                "type": "enabled",
                "budget_tokens": thinking.budget_tokens,
            });
        }

        body
    }
}

#[async_trait::async_trait]
impl LlmClient for AnthropicClient {
    async fn call(
        &self,
        messages: &[Message],
        system: &str,
        tools: &[ToolDefinition],
        model_config: &ModelRequestConfig,
        thinking_config: Option<ThinkingConfig>,
    ) -> Result<LlmResponse> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(messages, system, tools, model_config, thinking_config);

        tracing::debug!(model = %model_config.model_id, "anthropic call");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            return Err(Error::Provider {
                provider: "anthropic".into(),
                message: format!("HTTP {} - {}", status.as_u16(), resp_text),
            });
        }

        let resp_json: Value = serde_json::from_str(&resp_text)?;
        parse_anthropic_response(&resp_json)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn message_to_anthropic(msg: &Message) -> Value {
    let role = match msg.role {
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    let content: Vec<Value> = msg.content.iter().map(content_part_to_anthropic).collect();
    serde_json::json!({ "role": role, "content": content })
}

fn content_part_to_anthropic(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text { text } => serde_json::json!({ "type": "text", "text": text }),
        ContentPart::Thinking { content } => {
            serde_json::json!({ "type": "thinking", "thinking": content })
        }
        ContentPart::ToolUse { id, name, input } => serde_json::json!({
            "type": "tool_use",
            "id": id,
            "name": name,
            "input": input,
        }),
        ContentPart::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => serde_json::json!({
            "type": "tool_result",
            "tool_use_id": tool_use_id,
            "content": content,
            "is_error": is_error,
        }),
    }
}

fn tool_to_anthropic(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response parsing — never leak an untyped content block past here.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_anthropic_response(body: &Value) -> Result<LlmResponse> {
    let content_arr = body
        .get("content")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    let mut content_blocks = Vec::with_capacity(content_arr.len());
    for block in &content_arr {
        let block_type = block.get("type").and_then(|v| v.as_str()).unwrap_or("");
        let part = match block_type {
            "text" => ContentPart::Text {
                text: block.get("text").and_then(|v| v.as_str()).unwrap_or("").into(),
            },
            "thinking" => ContentPart::Thinking {
                content: block
                    .get("thinking")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .into(),
            },
            "tool_use" => ContentPart::ToolUse {
                id: block.get("id").and_then(|v| v.as_str()).unwrap_or("").into(),
                name: block.get("name").and_then(|v| v.as_str()).unwrap_or("").into(),
                input: block
                    .get("input")
                    .cloned()
                    .unwrap_or(Value::Object(Default::default())),
            },
            other => {
                tracing::warn!(block_type = other, "unrecognised anthropic content block");
                continue;
            }
        };
        content_blocks.push(part);
    }

    let stop_reason = match body.get("stop_reason").and_then(|v| v.as_str()) {
        Some("end_turn") => StopReason::EndTurn,
        Some("tool_use") => StopReason::ToolUse,
        Some("max_tokens") => StopReason::MaxTokens,
        _ => StopReason::Other,
    };

    let usage = body
        .get("usage")
        .and_then(parse_anthropic_usage)
        .unwrap_or_default();

    Ok(LlmResponse {
        content_blocks,
        stop_reason,
        usage,
    })
}

fn parse_anthropic_usage(v: &Value) -> Option<Usage> {
    let input_tokens = v.get("input_tokens")?.as_u64()?;
    let output_tokens = v.get("output_tokens")?.as_u64()?;
    Some(Usage {
        input_tokens,
        output_tokens,
    })
}

fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_and_tool_use_blocks() {
        let body = serde_json::json!({
            "content": [
                {"type": "text", "text": "let me check"},
                {"type": "tool_use", "id": "t1", "name": "run_query", "input": {"sql": "SELECT 1"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 100, "output_tokens": 20}
        });
        let resp = parse_anthropic_response(&body).unwrap();
        assert_eq!(resp.content_blocks.len(), 2);
        assert_eq!(resp.stop_reason, StopReason::ToolUse);
        assert_eq!(resp.usage.input_tokens, 100);
        assert_eq!(resp.usage.output_tokens, 20);
        match &resp.content_blocks[1] {
            ContentPart::ToolUse { name, .. } => assert_eq!(name, "run_query"),
            other => panic!("expected tool_use, got {other:?}"),
        }
    }

    #[test]
    fn parses_thinking_block() {
        let body = serde_json::json!({
            "content": [
                {"type": "thinking", "thinking": "considering the schema"},
                {"type": "text", "text": "done"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        });
        let resp = parse_anthropic_response(&body).unwrap();
        match &resp.content_blocks[0] {
            ContentPart::Thinking { content } => assert_eq!(content, "considering the schema"),
            other => panic!("expected thinking, got {other:?}"),
        }
        assert_eq!(resp.stop_reason, StopReason::EndTurn);
    }

    #[test]
    fn unknown_block_type_is_skipped_not_fatal() {
        let body = serde_json::json!({
            "content": [
                {"type": "redacted_thinking", "data": "xyz"},
                {"type": "text", "text": "still here"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 1, "output_tokens": 1}
        });
        let resp = parse_anthropic_response(&body).unwrap();
        assert_eq!(resp.content_blocks.len(), 1);
    }

    #[test]
    fn thinking_config_raises_max_tokens_ceiling() {
        let client = AnthropicClient::new("https://api.anthropic.com", "test-key", 90).unwrap();
        let model_config = ModelRequestConfig {
            model_id: "claude-3-7-sonnet-20250219".into(),
            max_tokens: 1024,
        };
        let body = client.build_body(
            &[Message::user_text("hi")],
            "system prompt",
            &[],
            &model_config,
            Some(ThinkingConfig { budget_tokens: 8192 }),
        );
        assert_eq!(body["max_tokens"], serde_json::json!(9216));
        assert_eq!(body["thinking"]["budget_tokens"], serde_json::json!(8192));
    }
}
