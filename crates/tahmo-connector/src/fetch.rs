//! Fetch pass: one page of readings per configured device.
//!
//! The pass is all-or-nothing. Any error for any device fails the whole
//! pass, and the retry unit is the pass, not the device.

use chrono::{DateTime, Duration, FixedOffset, Timelike, Utc};

use crate::config::{ActionId, PullObservationsConfig};
use crate::error::{ConnectorError, Result};
use crate::provider::{ReadingsPage, ReadingsRequest, ReadingsSource};
use crate::retry::RetryPolicy;
use crate::state::{self, StateStore};

/// Lookback window for devices that have never been delivered.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 1;

/// A device's page together with the watermark it was fetched against.
#[derive(Debug, Clone)]
pub struct DeviceReadings {
    pub device: String,
    pub watermark: Option<DateTime<FixedOffset>>,
    pub page: ReadingsPage,
}

/// Start-time floor for a device query, truncated to the minute.
///
/// Uses the watermark when there is one, otherwise `now - 1 day`.
pub fn query_start(watermark: Option<&DateTime<FixedOffset>>, now: DateTime<Utc>) -> DateTime<Utc> {
    let start = match watermark {
        Some(wm) => wm.with_timezone(&Utc),
        None => now - Duration::days(DEFAULT_LOOKBACK_DAYS),
    };
    truncate_to_minute(start)
}

fn truncate_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

/// Fetch one page per device, in configuration order.
pub async fn fetch_all(
    integration_id: &str,
    source: &dyn ReadingsSource,
    store: &dyn StateStore,
    config: &PullObservationsConfig,
    now: DateTime<Utc>,
) -> Result<Vec<DeviceReadings>> {
    let mut readings = Vec::with_capacity(config.devices_serial_number.len());

    for device in &config.devices_serial_number {
        let watermark = state::load_watermark(
            store,
            integration_id,
            ActionId::PullObservations.as_str(),
            device,
        )
        .await?;

        let request = ReadingsRequest {
            device: device.clone(),
            per_page: config.devices_per_page,
            start_date: query_start(watermark.as_ref(), now),
        };
        log::debug!(
            "[Fetch] integration={} device={} start_date={}",
            integration_id,
            device,
            request.start_date
        );

        let page = source.fetch_readings(&request).await?;
        log::info!(
            "[Fetch] integration={} device={} readings={} page=[{} .. {}]",
            integration_id,
            device,
            page.num_readings(),
            page.start(),
            page.end()
        );

        readings.push(DeviceReadings {
            device: device.clone(),
            watermark,
            page,
        });
    }

    Ok(readings)
}

/// Run [`fetch_all`] under the batch retry policy.
///
/// Only transport errors are retried. Whatever error ends the pass is logged
/// with the attention marker and returned.
pub async fn fetch_with_retry(
    integration_id: &str,
    source: &dyn ReadingsSource,
    store: &dyn StateStore,
    config: &PullObservationsConfig,
    policy: &RetryPolicy,
    now: DateTime<Utc>,
) -> Result<Vec<DeviceReadings>> {
    let result = policy
        .run("provider fetch", ConnectorError::is_transport, |_| {
            fetch_all(integration_id, source, store, config, now)
        })
        .await;

    if let Err(e) = &result {
        match e {
            ConnectorError::SchemaValidation(msg) => log::error!(
                "[Fetch] attention_needed=true integration={} Error while parsing TAHMO readings endpoint: {}",
                integration_id,
                msg
            ),
            other => log::error!(
                "[Fetch] attention_needed=true integration={} fetch pass failed: {}",
                integration_id,
                other
            ),
        }
    }
    result
}
