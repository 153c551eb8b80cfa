//! Downstream sensors API client.

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde_json::Value;
use std::time::Duration;

use crate::config::SinkConfig;
use crate::error::{ConnectorError, Result};
use crate::transform::Observation;

/// Header carrying the integration the batch belongs to.
const INTEGRATION_HEADER: &str = "x-integration-id";

/// Receiver of observation batches.
#[async_trait]
pub trait ObservationSink: Send + Sync {
    /// Submit a batch; returns the sink's acknowledgement body.
    async fn send_observations(
        &self,
        observations: &[Observation],
        integration_id: &str,
    ) -> Result<Value>;
}

/// reqwest client posting observation batches as a JSON array.
#[derive(Debug, Clone)]
pub struct SensorsApiClient {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl SensorsApiClient {
    pub fn new(config: &SinkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl ObservationSink for SensorsApiClient {
    async fn send_observations(
        &self,
        observations: &[Observation],
        integration_id: &str,
    ) -> Result<Value> {
        let mut request = self
            .client
            .post(&self.url)
            .header(INTEGRATION_HEADER, integration_id)
            .json(observations);
        if let Some(key) = &self.api_key {
            request = request.header(AUTHORIZATION, format!("Bearer {key}"));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ConnectorError::from_status(status, message));
        }

        let body = response.text().await?;
        Ok(parse_ack(&body))
    }
}

/// Interpret an acknowledgement body: JSON if possible, raw text otherwise.
fn parse_ack(body: &str) -> Value {
    if body.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
}
