pub mod error;
pub mod routes;
pub mod state;
pub mod timing;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::{middleware, Router};
use booster_core::context::ShutdownSignal;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the axum Router with all routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(app_state: AppState) -> Router {
    let origin = match HeaderValue::from_str(&app_state.config.api.base_url()) {
        Ok(origin) => AllowOrigin::exact(origin),
        Err(_) => AllowOrigin::any(),
    };
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any);
    let slow = app_state.config.http.slow_request();

    Router::new()
        .route("/", get(routes::service::root))
        .route("/diag", get(routes::service::diag))
        .route("/stats", get(routes::service::stats))
        .route("/restart", post(routes::service::restart))
        // Skills
        .route("/skills", get(routes::skills::list_skills))
        .route("/skills/{skill_id}", get(routes::skills::get_skill))
        .route("/skill/chart/{skill_id}", get(routes::chart::get_chart))
        .fallback(routes::service::not_found)
        .layer(middleware::from_fn_with_state(slow, timing::process_time))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Serve the status API on `api.host:api.port` until shutdown fires.
pub async fn serve(app_state: AppState, mut shutdown: ShutdownSignal) -> anyhow::Result<()> {
    let addr = app_state.config.api.address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    serve_on(app_state, listener, async move { shutdown.wait().await }).await
}

/// Serve on a pre-bound listener, stopping when `until` resolves.
pub async fn serve_on(
    app_state: AppState,
    listener: tokio::net::TcpListener,
    until: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let actual = listener.local_addr()?;
    let app = build_router(app_state);

    tracing::info!("status API listening on http://{actual}");

    axum::serve(listener, app)
        .with_graceful_shutdown(until)
        .await?;
    tracing::info!("status API stopped");
    Ok(())
}
