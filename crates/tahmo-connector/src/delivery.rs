//! Per-device submission and watermark advancement.
//!
//! A device's watermark moves only after the sink has acknowledged its
//! batch. Sink failures stay with the device: they are recorded in its
//! result and the run continues with the next one.

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::ActionId;
use crate::error::{ConnectorError, Result};
use crate::retry::RetryPolicy;
use crate::sink::ObservationSink;
use crate::state::{self, StateStore};
use crate::transform::Observation;

/// Where a fetched device ended up in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    /// Nothing to deliver: the page was stale or empty.
    FilteredOut,
    Delivered,
    DeliveryFailed,
}

/// Outcome of one device in a run, as reported to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceResult {
    pub device: String,
    /// `[]` when filtered out, `[error]` on failure, the sink ack on success.
    pub response: Value,
    #[serde(skip)]
    pub state: DeviceState,
}

/// Submits device batches and advances watermarks.
pub struct DeliveryCoordinator<'a> {
    sink: &'a dyn ObservationSink,
    store: &'a dyn StateStore,
    integration_id: &'a str,
    policy: RetryPolicy,
}

impl<'a> DeliveryCoordinator<'a> {
    pub fn new(
        sink: &'a dyn ObservationSink,
        store: &'a dyn StateStore,
        integration_id: &'a str,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            sink,
            store,
            integration_id,
            policy,
        }
    }

    /// Deliver a device's observations and, on success, move its watermark
    /// to `page_end`.
    ///
    /// Only state store failures are returned as errors; sink failures end
    /// up in the returned [`DeviceResult`].
    pub async fn deliver(
        &self,
        device: &str,
        page_end: DateTime<FixedOffset>,
        observations: Vec<Observation>,
    ) -> Result<DeviceResult> {
        if observations.is_empty() {
            log::debug!(
                "[Delivery] integration={} device={} nothing to deliver",
                self.integration_id,
                device
            );
            return Ok(DeviceResult {
                device: device.to_string(),
                response: json!([]),
                state: DeviceState::FilteredOut,
            });
        }

        let submitted = self
            .policy
            .run("sink submission", ConnectorError::is_transport, |_| {
                self.sink
                    .send_observations(&observations, self.integration_id)
            })
            .await;

        match submitted {
            Ok(ack) => {
                self.advance_watermark(device, page_end).await?;
                log::info!(
                    "[Delivery] integration={} device={} delivered {} observations",
                    self.integration_id,
                    device,
                    observations.len()
                );
                Ok(DeviceResult {
                    device: device.to_string(),
                    response: ack,
                    state: DeviceState::Delivered,
                })
            }
            Err(e) => {
                let msg = format!(
                    "Sensors API returned error for integration_id: {}. Exception: {}",
                    self.integration_id, e
                );
                log::error!(
                    "[Delivery] attention_needed=true action={} device={} {}",
                    ActionId::PullObservations,
                    device,
                    msg
                );
                Ok(DeviceResult {
                    device: device.to_string(),
                    response: json!([msg]),
                    state: DeviceState::DeliveryFailed,
                })
            }
        }
    }

    /// Store `page_end` as the device watermark unless a later one is
    /// already recorded.
    async fn advance_watermark(&self, device: &str, page_end: DateTime<FixedOffset>) -> Result<()> {
        let action = ActionId::PullObservations.as_str();
        let current = state::load_watermark(self.store, self.integration_id, action, device).await?;
        if current.is_some_and(|wm| wm > page_end) {
            log::warn!(
                "[Delivery] integration={} device={} keeping watermark {:?}, page ended earlier at {}",
                self.integration_id,
                device,
                current,
                page_end
            );
            return Ok(());
        }

        self.store
            .set_state(
                self.integration_id,
                action,
                state::watermark_state(&page_end),
                device,
            )
            .await
    }
}
