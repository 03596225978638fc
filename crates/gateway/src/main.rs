mod api;
mod cli;
mod runtime;
mod state;

use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, ConfigCommand};
use runtime::quota::QuotaAccountant;
use runtime::rate_limit::{CounterBackend, InMemoryCounterBackend, RateLimiter, RedisCounterBackend};
use runtime::session_lock::SessionLockMap;
use runtime::tools::ToolCatalog;
use state::AppState;
use ta_domain::config::{Config, ConfigSeverity};
use ta_providers::AnthropicClient;
use ta_sessions::{InMemorySessionStore, RedisSessionStore, SessionStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _config_path) = cli::load_config()?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = cli::load_config()?;
            let valid = cli::config::validate(&config, &config_path);
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = cli::load_config()?;
            cli::config::show(&config);
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ta_gateway=debug")),
        )
        .json()
        .init();
}

/// Start the gateway server with the given configuration.
async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("tableagent gateway starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Session store (Redis-backed, falls back to in-memory if unreachable) ──
    let sessions: Arc<dyn SessionStore> = match RedisSessionStore::connect(&config.server.redis_url).await {
        Ok(store) => {
            tracing::info!(url = %config.server.redis_url, "Redis session store ready");
            Arc::new(store)
        }
        Err(err) => {
            tracing::warn!(error = %err, "Redis unreachable, falling back to in-memory session store");
            Arc::new(InMemorySessionStore::new())
        }
    };

    // ── Rate limiter / quota accountant (share the counter backend) ───
    let counter_backend: Arc<dyn CounterBackend> = match RedisCounterBackend::connect(&config.server.redis_url).await {
        Ok(backend) => Arc::new(backend),
        Err(err) => {
            tracing::warn!(error = %err, "Redis unreachable, falling back to in-memory counters");
            Arc::new(InMemoryCounterBackend::default())
        }
    };
    let rate_limiter = Arc::new(RateLimiter::new(counter_backend.clone(), config.rate_limit.clone()));
    let quota = Arc::new(QuotaAccountant::new(counter_backend, config.quota.clone()));
    tracing::info!("rate limiter + quota accountant ready");

    // ── LLM client ─────────────────────────────────────────────────────
    let api_key = std::env::var(&config.llm.api_key_env).unwrap_or_default();
    let llm = Arc::new(
        AnthropicClient::new(config.llm.base_url.clone(), api_key, config.llm.timeout_secs)
            .context("initializing Anthropic client")?,
    );
    tracing::info!(base_url = %config.llm.base_url, "LLM client ready");

    // ── Tool catalog ────────────────────────────────────────────────────
    let tools = Arc::new(ToolCatalog::standard());

    // ── Session locks (per-session concurrency) ──────────────────────
    let session_locks = Arc::new(SessionLockMap::new());
    tracing::info!("session lock map ready");

    let state = Arc::new(AppState {
        config: config.clone(),
        sessions,
        llm,
        tools,
        session_locks: session_locks.clone(),
        rate_limiter,
        quota,
    });

    // ── Periodic session lock pruning ─────────────────────────────────
    {
        let session_locks = session_locks.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                session_locks.prune_idle();
            }
        });
    }

    // ── CORS layer (config-aware) ────────────────────────────────────
    let cors_layer = build_cors_layer(&config.server.cors);

    // ── Concurrency limit (backpressure protection) ────────────────
    let max_concurrent = std::env::var("TA_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(256);
    tracing::info!(max_concurrent, "concurrency limit set");

    let app = api::router(state)
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent));

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, "tableagent gateway listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .await
        .context("axum server error")?;

    Ok(())
}

/// Build a [`CorsLayer`] from the configured allowed origins.
///
/// Origins may contain a trailing `*` wildcard for the port segment
/// (e.g. `http://localhost:*`). These are expanded into a predicate that
/// matches any port on that host. A literal `"*"` allows all origins
/// (not recommended for production).
fn build_cors_layer(cors: &ta_domain::config::CorsConfig) -> CorsLayer {
    use axum::http::header;

    // Special case: if the only entry is "*", use fully permissive CORS.
    // Note: allow_credentials is incompatible with wildcard origins.
    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    // Partition into exact origins and wildcard-port patterns.
    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();

    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            // e.g. "http://localhost:*" -> prefix "http://localhost:"
            let prefix = origin.trim_end_matches('*').to_owned();
            wildcard_prefixes.push(prefix);
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            // Validate the remainder is digits only to prevent prefix-based
            // bypass (e.g. "http://localhost:3000.evil.com").
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
