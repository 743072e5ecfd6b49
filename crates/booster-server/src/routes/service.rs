use axum::extract::State;
use axum::http::{Method, Uri};
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::error::AppError;
use crate::state::AppState;

/// GET /: service identity.
pub async fn root(State(app): State<AppState>) -> Json<Value> {
    Json(json!({
        "app": app.config.app,
        "host": app.config.api.host,
        "port": app.config.api.port,
    }))
}

/// GET /diag: liveness check.
pub async fn diag() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /stats: version, uptime and shutdown state.
pub async fn stats(State(app): State<AppState>) -> Json<Value> {
    Json(json!({
        "app": app.config.app,
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": app.started_at.elapsed().as_secs(),
        "current_time": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "skills": app.registry.len(),
        "shutdown_requested": app.shutdown.is_fired(),
    }))
}

/// POST /restart: request a graceful stop; the supervisor restarts us.
pub async fn restart(State(app): State<AppState>) -> Json<Value> {
    tracing::warn!("restart requested over the status API");
    app.shutdown.fire();
    Json(json!({ "status": "restarting" }))
}

/// Fallback for unmatched routes.
pub async fn not_found(method: Method, uri: Uri) -> AppError {
    tracing::warn!(%method, %uri, "no handler");
    AppError::not_found(format!("{method} API handler for {uri} not found"))
}
