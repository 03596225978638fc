use serde::{Deserialize, Serialize};

/// Declarative description of a tool the LLM may invoke.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's input. Every tool's schema requires a
    /// `thought` string field alongside its own parameters.
    pub parameters: serde_json::Value,
    pub class: ToolClass,
}

/// Whether a tool's result comes back from the browser, or whether its
/// invocation alone concludes the analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolClass {
    BrowserExecuted,
    ServerTerminal,
}

/// A message in the conversation, in the LLM provider's role/content-block
/// shape. Only `user` and `assistant` roles appear; the system prompt is
/// passed to the provider as a separate top-level field, not as a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One block of message content. A tagged variant over the provider's
/// heterogeneous content-block array — never leaked as an untyped JSON
/// value past the LLM client boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "thinking")]
    Thinking { content: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentPart::Text { text: text.into() }],
        }
    }

    pub fn user_tool_result(
        tool_use_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentPart::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: content.into(),
                is_error,
            }],
        }
    }

    pub fn assistant(content: Vec<ContentPart>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// The first tool-use block in this message's content, if any.
    pub fn first_tool_use(&self) -> Option<(&str, &str, &serde_json::Value)> {
        self.content.iter().find_map(|p| match p {
            ContentPart::ToolUse { id, name, input } => {
                Some((id.as_str(), name.as_str(), input))
            }
            _ => None,
        })
    }
}

impl ContentPart {
    pub fn extract_all_text(parts: &[ContentPart]) -> String {
        parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_tool_use_finds_first_block() {
        let msg = Message::assistant(vec![
            ContentPart::Text { text: "thinking out loud".into() },
            ContentPart::ToolUse {
                id: "t1".into(),
                name: "run_query".into(),
                input: serde_json::json!({"sql": "SELECT 1"}),
            },
            ContentPart::ToolUse {
                id: "t2".into(),
                name: "final_answer".into(),
                input: serde_json::json!({}),
            },
        ]);
        let (id, name, _) = msg.first_tool_use().expect("expected a tool_use block");
        assert_eq!(id, "t1");
        assert_eq!(name, "run_query");
    }

    #[test]
    fn first_tool_use_none_when_absent() {
        let msg = Message::user_text("hello");
        assert!(msg.first_tool_use().is_none());
    }

    #[test]
    fn extract_all_text_skips_non_text_blocks() {
        let parts = vec![
            ContentPart::Text { text: "line one".into() },
            ContentPart::Thinking { content: "reasoning".into() },
            ContentPart::Text { text: "line two".into() },
        ];
        assert_eq!(ContentPart::extract_all_text(&parts), "line one\nline two");
    }
}
