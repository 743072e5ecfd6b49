use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::http::header::{HeaderValue, CACHE_CONTROL};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{SecondsFormat, Utc};

pub const PROCESS_TIME_HEADER: &str = "x-process-time";
pub const CURRENT_TIME_HEADER: &str = "x-current-time";

/// Stamp timing and no-cache headers on every response and warn about
/// handlers slower than `slow`.
pub async fn process_time(State(slow): State<Duration>, req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let mut response = next.run(req).await;

    let elapsed = started.elapsed();
    if elapsed > slow {
        tracing::warn!(
            %method,
            path,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow request"
        );
    }

    let headers = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&format!("{:.6}", elapsed.as_secs_f64())) {
        headers.insert(PROCESS_TIME_HEADER, v);
    }
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    if let Ok(v) = HeaderValue::from_str(&now) {
        headers.insert(CURRENT_TIME_HEADER, v);
    }
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache, no-store"));
    response
}
