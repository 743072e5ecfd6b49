use async_trait::async_trait;
use serde::Deserialize;

use super::http::ApiClient;
use crate::config::with_scheme;
use crate::error::Result;
use crate::source::LeadSource;
use crate::types::{Lead, SkillId};

/// Client for the lead buffer.
#[derive(Debug, Clone)]
pub struct LeadBufferClient {
    api: ApiClient,
    base_url: String,
}

#[derive(Deserialize)]
struct LeadsResponse {
    #[serde(default)]
    leads: Vec<Lead>,
}

impl LeadBufferClient {
    pub fn new(api: ApiClient, address: &str) -> Self {
        Self {
            api,
            base_url: with_scheme(address),
        }
    }
}

#[async_trait]
impl LeadSource for LeadBufferClient {
    async fn leads(&self, batch_size: u32, skill_id: SkillId) -> Result<Vec<Lead>> {
        let url = format!(
            "{}/data/lead/{batch_size}?skill_id={skill_id}",
            self.base_url
        );
        let resp: LeadsResponse = self.api.get_json(&url).await?;
        tracing::debug!(skill_id, requested = batch_size, received = resp.leads.len(), "leads fetched");
        Ok(resp.leads)
    }
}
