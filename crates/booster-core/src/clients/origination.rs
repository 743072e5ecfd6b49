use std::sync::Arc;

use async_trait::async_trait;

use super::http::{is_refusal, ApiClient};
use crate::config::with_scheme;
use crate::dispatch::SinkPool;
use crate::error::{BoosterError, Result};
use crate::source::OriginationSink;
use crate::types::Lead;

/// One call-origination endpoint.
#[derive(Debug, Clone)]
pub struct HttpSink {
    api: ApiClient,
    address: String,
    url: String,
}

impl HttpSink {
    pub fn new(api: ApiClient, address: &str) -> Self {
        Self {
            api,
            address: address.to_string(),
            url: format!("{}/call/start", with_scheme(address)),
        }
    }
}

#[async_trait]
impl OriginationSink for HttpSink {
    fn name(&self) -> &str {
        &self.address
    }

    async fn start_call(&self, lead: &Lead) -> Result<bool> {
        match self.api.post_json(&self.url, lead).await {
            Ok(()) => Ok(true),
            Err(BoosterError::UnexpectedStatus { status, .. }) if is_refusal(status) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Build the sink pool from configured addresses.
pub fn http_sink_pool(api: &ApiClient, addresses: &[String]) -> Result<SinkPool> {
    let sinks = addresses
        .iter()
        .map(|address| Arc::new(HttpSink::new(api.clone(), address)) as Arc<dyn OriginationSink>)
        .collect();
    SinkPool::new(sinks)
}
