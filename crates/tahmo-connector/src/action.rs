//! The `pull_observations` action.
//!
//! ```text
//! Integration ──► auth / pull config ──► fetch pass (retry: batch) ──► per device:
//!                                                                      filter + transform
//!                                                                      deliver (retry: device)
//!                                                                      advance watermark
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::config::Integration;
use crate::delivery::{DeliveryCoordinator, DeviceResult};
use crate::error::Result;
use crate::fetch::{self, DeviceReadings};
use crate::provider::SourceFactory;
use crate::retry::RetryPolicy;
use crate::sink::ObservationSink;
use crate::state::StateStore;
use crate::transform::{self, Observation};

/// One entry of a run's result list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RunEntry {
    Device(DeviceResult),
    /// Emitted alone when the fetch pass returned no devices.
    Message { msg: String },
}

/// Observations a run would submit for one device, without submitting them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DevicePreview {
    pub device: String,
    pub observations: Vec<Observation>,
}

/// Pulls new readings for every configured device and forwards them.
pub struct PullObservations {
    sources: Arc<dyn SourceFactory>,
    sink: Arc<dyn ObservationSink>,
    store: Arc<dyn StateStore>,
    fetch_policy: RetryPolicy,
    delivery_policy: RetryPolicy,
}

impl PullObservations {
    pub fn new(
        sources: Arc<dyn SourceFactory>,
        sink: Arc<dyn ObservationSink>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            sources,
            sink,
            store,
            fetch_policy: RetryPolicy::fetch(),
            delivery_policy: RetryPolicy::delivery(),
        }
    }

    pub fn with_retry(mut self, fetch: RetryPolicy, delivery: RetryPolicy) -> Self {
        self.fetch_policy = fetch;
        self.delivery_policy = delivery;
        self
    }

    /// Execute one run against the integration.
    pub async fn run(&self, integration: &Integration) -> Result<Vec<RunEntry>> {
        self.run_at(integration, Utc::now()).await
    }

    /// Execute one run, using `now` for the default lookback window.
    ///
    /// Fails as a whole on configuration or fetch errors; delivery failures
    /// are reported per device in the returned list.
    pub async fn run_at(
        &self,
        integration: &Integration,
        now: DateTime<Utc>,
    ) -> Result<Vec<RunEntry>> {
        log::info!(
            "[PullObservations] executing pull_observations for integration={}",
            integration.id
        );

        let readings = self.fetch(integration, now).await?;
        if readings.is_empty() {
            let msg = format!(
                "No observations extracted for integration_id: {}.",
                integration.id
            );
            log::warn!("[PullObservations] {}", msg);
            return Ok(vec![RunEntry::Message { msg }]);
        }
        log::info!(
            "[PullObservations] readings pulled with success for {} devices",
            readings.len()
        );

        let coordinator = DeliveryCoordinator::new(
            self.sink.as_ref(),
            self.store.as_ref(),
            &integration.id,
            self.delivery_policy,
        );

        let mut results = Vec::with_capacity(readings.len());
        for DeviceReadings {
            device,
            watermark,
            page,
        } in readings
        {
            let observations = transform::filter_and_transform(&device, watermark.as_ref(), &page);
            let result = coordinator.deliver(&device, page.end(), observations).await?;
            results.push(RunEntry::Device(result));
        }
        Ok(results)
    }

    /// Fetch and transform without submitting or touching watermarks.
    pub async fn preview(
        &self,
        integration: &Integration,
        now: DateTime<Utc>,
    ) -> Result<Vec<DevicePreview>> {
        let readings = self.fetch(integration, now).await?;
        Ok(readings
            .into_iter()
            .map(|r| DevicePreview {
                observations: transform::filter_and_transform(
                    &r.device,
                    r.watermark.as_ref(),
                    &r.page,
                ),
                device: r.device,
            })
            .collect())
    }

    async fn fetch(
        &self,
        integration: &Integration,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeviceReadings>> {
        let auth = integration.auth_config().inspect_err(|e| log_abort(integration, e))?;
        let config = integration
            .pull_observations_config()
            .inspect_err(|e| log_abort(integration, e))?;
        let source = self
            .sources
            .connect(integration, &auth)
            .inspect_err(|e| log_abort(integration, e))?;

        fetch::fetch_with_retry(
            &integration.id,
            source.as_ref(),
            self.store.as_ref(),
            &config,
            &self.fetch_policy,
            now,
        )
        .await
    }
}

fn log_abort(integration: &Integration, error: &crate::error::ConnectorError) {
    if error.needs_attention() {
        log::error!(
            "[PullObservations] attention_needed=true integration={} run aborted: {}",
            integration.id,
            error
        );
    } else {
        log::error!(
            "[PullObservations] integration={} run aborted: {}",
            integration.id,
            error
        );
    }
}
