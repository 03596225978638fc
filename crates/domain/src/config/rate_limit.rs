use serde::{Deserialize, Serialize};

/// Per-endpoint sliding-window request limits. Defaults match §4.2:
/// `{analyze: 20/min, login: 10/min, tool_result: 60/min, resume: 60/min}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "d_analyze")]
    pub analyze: EndpointLimit,
    #[serde(default = "d_login")]
    pub login: EndpointLimit,
    #[serde(default = "d_tool_result")]
    pub tool_result: EndpointLimit,
    #[serde(default = "d_resume")]
    pub resume: EndpointLimit,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            analyze: d_analyze(),
            login: d_login(),
            tool_result: d_tool_result(),
            resume: d_resume(),
        }
    }
}

impl RateLimitConfig {
    pub fn for_endpoint(&self, endpoint: &str) -> EndpointLimit {
        match endpoint {
            "analyze" => self.analyze,
            "login" => self.login,
            "tool_result" => self.tool_result,
            "resume" => self.resume,
            _ => self.analyze,
        }
    }
}

/// A single endpoint's window: `max_requests` per `window_secs` seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EndpointLimit {
    pub max_requests: u32,
    pub window_secs: u64,
}

fn d_analyze() -> EndpointLimit {
    EndpointLimit { max_requests: 20, window_secs: 60 }
}
fn d_login() -> EndpointLimit {
    EndpointLimit { max_requests: 10, window_secs: 60 }
}
fn d_tool_result() -> EndpointLimit {
    EndpointLimit { max_requests: 60, window_secs: 60 }
}
fn d_resume() -> EndpointLimit {
    EndpointLimit { max_requests: 60, window_secs: 60 }
}
