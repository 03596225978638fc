//! Typed stream events and their SSE framing (spec §4.7).
//!
//! Each event is serialised as JSON and framed as `data: <json>\n\n` — no
//! `event:` line; the variant tag lives inside the JSON body via
//! `#[serde(tag = "type")]` so a single `axum::response::sse::Event::data`
//! call produces a spec-conformant frame.

use axum::response::sse::Event;
use serde::Serialize;

use ta_domain::session::AnalysisResult;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Session {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Thinking { content: String },
    ExtendedThinking { content: String },
    ToolCall { id: String, name: String, input: serde_json::Value },
    Answer { result: AnalysisResult },
    Error { message: String },
    Done {},
}

impl AgentEvent {
    /// Frame this event as an SSE `Event`. Infallible: every variant here
    /// serialises cleanly (no floats/maps with non-string keys).
    pub fn to_sse(&self) -> Event {
        Event::default().data(serde_json::to_string(self).expect("AgentEvent always serialises"))
    }
}
