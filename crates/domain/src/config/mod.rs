mod llm;
mod quota;
mod rate_limit;
mod server;
mod sessions;

pub use llm::*;
pub use quota::*;
pub use rate_limit::*;
pub use server::*;
pub use sessions::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues. Returns an
    /// empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }
        if !self.server.redis_url.starts_with("redis://")
            && !self.server.redis_url.starts_with("rediss://")
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.redis_url".into(),
                message: format!(
                    "redis_url must start with redis:// or rediss:// (got \"{}\")",
                    self.server.redis_url
                ),
            });
        }

        if self.server.cors.allowed_origins.len() == 1
            && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard \"*\" allows all origins (not recommended for production)"
                    .into(),
            });
        }

        if self.sessions.ttl_seconds == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "sessions.ttl_seconds".into(),
                message: "ttl_seconds must be greater than 0".into(),
            });
        }
        if self.sessions.max_query_chars == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "sessions.max_query_chars".into(),
                message: "max_query_chars must be greater than 0".into(),
            });
        }
        if self.sessions.max_tables == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "sessions.max_tables".into(),
                message: "max_tables must be greater than 0".into(),
            });
        }

        if self.quota.default_token_limit == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "quota.default_token_limit".into(),
                message: "default_token_limit is 0 — no user will ever pass the quota check"
                    .into(),
            });
        }
        if self.quota.period_days <= 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "quota.period_days".into(),
                message: "period_days must be greater than 0".into(),
            });
        }

        for (name, limit) in [
            ("rate_limit.analyze", self.rate_limit.analyze),
            ("rate_limit.login", self.rate_limit.login),
            ("rate_limit.tool_result", self.rate_limit.tool_result),
            ("rate_limit.resume", self.rate_limit.resume),
        ] {
            if limit.max_requests == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("{name}.max_requests"),
                    message: "max_requests must be greater than 0".into(),
                });
            }
            if limit.window_secs == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("{name}.window_secs"),
                    message: "window_secs must be greater than 0".into(),
                });
            }
        }

        if !self.llm.base_url.starts_with("https://") && !self.llm.base_url.starts_with("http://")
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "llm.base_url".into(),
                message: format!(
                    "base_url must start with http:// or https:// (got \"{}\")",
                    self.llm.base_url
                ),
            });
        }
        if self.llm.timeout_secs < 60 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "llm.timeout_secs".into(),
                message: "timeout_secs below 60s risks truncating long extended-thinking turns"
                    .into(),
            });
        }
        if std::env::var(&self.llm.api_key_env).is_err() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "llm.api_key_env".into(),
                message: format!(
                    "environment variable \"{}\" is not set",
                    self.llm.api_key_env
                ),
            });
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
