use std::sync::Arc;

use ta_domain::config::Config;
use ta_providers::LlmClient;
use ta_sessions::SessionStore;

use crate::runtime::quota::QuotaAccountant;
use crate::runtime::rate_limit::RateLimiter;
use crate::runtime::session_lock::SessionLockMap;
use crate::runtime::tools::ToolCatalog;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<dyn SessionStore>,
    pub llm: Arc<dyn LlmClient>,
    pub tools: Arc<ToolCatalog>,
    pub session_locks: Arc<SessionLockMap>,
    pub rate_limiter: Arc<RateLimiter>,
    pub quota: Arc<QuotaAccountant>,
}
