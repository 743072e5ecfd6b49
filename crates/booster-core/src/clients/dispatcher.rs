use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::http::ApiClient;
use crate::config::with_scheme;
use crate::error::{BoosterError, Result};
use crate::source::{ActiveSkillSource, FeedbackSource};
use crate::types::{SkillFeedback, SkillId};

/// Client for the operator dispatcher: active skills and per-skill
/// operator counters.
#[derive(Debug, Clone)]
pub struct DispatcherClient {
    api: ApiClient,
    base_url: String,
}

#[derive(Deserialize)]
struct ActiveResponse {
    active: Vec<SkillId>,
}

#[derive(Deserialize)]
struct DetailsResponse {
    details: Value,
}

impl DispatcherClient {
    pub fn new(api: ApiClient, address: &str) -> Self {
        Self {
            api,
            base_url: with_scheme(address),
        }
    }
}

#[async_trait]
impl ActiveSkillSource for DispatcherClient {
    async fn active_skills(&self) -> Result<Vec<SkillId>> {
        let url = format!("{}/active_skills", self.base_url);
        let resp: ActiveResponse = self.api.get_json(&url).await?;
        Ok(resp.active)
    }
}

#[async_trait]
impl FeedbackSource for DispatcherClient {
    async fn skill_feedback(&self, skill_id: SkillId) -> Result<SkillFeedback> {
        let url = format!("{}/skill_details/{skill_id}", self.base_url);
        let resp: DetailsResponse = self.api.get_json(&url).await?;
        if !resp.details.is_object() {
            return Err(BoosterError::MalformedPayload {
                url,
                reason: "details is not an object".to_string(),
            });
        }

        let field = |name: &str| -> u32 {
            match resp.details.get(name).and_then(Value::as_u64) {
                Some(n) => u32::try_from(n).unwrap_or(u32::MAX),
                None => {
                    tracing::warn!(skill_id, field = name, "skill details field missing, using 0");
                    0
                }
            }
        };

        Ok(SkillFeedback {
            all: field("all"),
            online: field("online"),
            busy: field("busy"),
            wait: field("wait"),
            approximate_busy: None,
            overflow_total: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpConfig;

    fn client(url: &str) -> DispatcherClient {
        DispatcherClient::new(ApiClient::new(&HttpConfig::default()).unwrap(), url)
    }

    #[tokio::test]
    async fn reads_active_skills() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/active_skills")
            .with_status(200)
            .with_body(r#"{"active":[1,42]}"#)
            .create_async()
            .await;

        let ids = client(&server.url()).active_skills().await.unwrap();
        assert_eq!(ids, vec![1, 42]);
    }

    #[tokio::test]
    async fn missing_detail_fields_default_to_zero() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/skill_details/7")
            .with_status(200)
            .with_body(r#"{"details":{"all":100,"online":10,"busy":4}}"#)
            .create_async()
            .await;

        let fb = client(&server.url()).skill_feedback(7).await.unwrap();
        assert_eq!(fb.all, 100);
        assert_eq!(fb.online, 10);
        assert_eq!(fb.busy, 4);
        assert_eq!(fb.wait, 0);
        assert_eq!(fb.approximate_busy, None);
    }

    #[tokio::test]
    async fn non_object_details_are_malformed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/skill_details/7")
            .with_status(200)
            .with_body(r#"{"details":[1,2]}"#)
            .create_async()
            .await;

        let err = client(&server.url()).skill_feedback(7).await.unwrap_err();
        assert!(matches!(err, BoosterError::MalformedPayload { .. }));
    }

    #[test]
    fn address_without_scheme_gets_http() {
        let c = client("127.0.0.1:8090");
        assert_eq!(c.base_url, "http://127.0.0.1:8090");
    }
}
