pub mod admission;
pub mod resume;
pub mod start;
pub mod tool_result;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router: `GET /analyze`, `GET /analyze/resume`,
/// `POST /analyze/tool-result`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/analyze", get(start::start))
        .route("/analyze/resume", get(resume::resume))
        .route("/analyze/tool-result", post(tool_result::tool_result))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
