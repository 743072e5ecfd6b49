use std::time::{Duration, Instant};

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::config::HttpConfig;
use crate::error::{BoosterError, Result};

pub const API_ID_HEADER: &str = "x-api-id";

/// JSON-over-HTTP client shared by every outbound service client.
///
/// Each attempt carries a fresh `x-api-id`. Network errors and 5xx
/// responses are retried up to the attempt budget; any other non-2xx
/// status fails at once. Failed attempts are spaced by a doubling backoff.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    attempts: u32,
    slow_request: Duration,
    retry_backoff: Duration,
}

impl ApiClient {
    pub fn new(cfg: &HttpConfig) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(cfg.timeout()).build()?;
        Ok(Self {
            http,
            attempts: cfg.attempts,
            slow_request: cfg.slow_request(),
            retry_backoff: cfg.retry_backoff(),
        })
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let resp = self.send(url, || self.http.get(url)).await?;
        let body = resp.text().await.map_err(|e| BoosterError::MalformedPayload {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&body).map_err(|e| BoosterError::MalformedPayload {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    pub async fn post_json<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<()> {
        self.send(url, || self.http.post(url).json(body)).await?;
        Ok(())
    }

    async fn send(&self, url: &str, build: impl Fn() -> RequestBuilder) -> Result<Response> {
        let mut reason = String::from("no attempts configured");

        for attempt in 1..=self.attempts {
            let api_id = Uuid::new_v4().to_string();
            let started = Instant::now();
            let result = build().header(API_ID_HEADER, &api_id).send().await;
            let elapsed = started.elapsed();
            if elapsed > self.slow_request {
                tracing::warn!(
                    url,
                    api_id = %api_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "slow request"
                );
            }

            match result {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if resp.status().is_server_error() => {
                    reason = format!("status {}", resp.status().as_u16());
                }
                Ok(resp) => {
                    return Err(BoosterError::UnexpectedStatus {
                        url: url.to_string(),
                        status: resp.status().as_u16(),
                    });
                }
                Err(e) => reason = e.to_string(),
            }
            tracing::debug!(url, api_id = %api_id, attempt, reason = %reason, "request attempt failed");
            if attempt < self.attempts {
                tokio::time::sleep(backoff_for(self.retry_backoff, attempt)).await;
            }
        }

        Err(BoosterError::RequestFailed {
            url: url.to_string(),
            attempts: self.attempts,
            reason,
        })
    }
}

/// Delay after failed attempt `attempt` (1-based): `base * 2^(attempt - 1)`.
fn backoff_for(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
}

/// `true` for statuses a sink uses to decline a call.
pub(crate) fn is_refusal(status: u16) -> bool {
    StatusCode::from_u16(status).is_ok_and(|s| s.is_client_error())
}
