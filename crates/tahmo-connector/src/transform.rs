//! Page filtering and flattening into observations.
//!
//! The provider groups readings by metric; downstream wants one record per
//! instant. Reading `i` of every metric series belongs to the same instant,
//! so observation `i` merges entry `i` of each series into `additional`,
//! keyed `<metric>_<field>`.

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::provider::{ReadingData, ReadingsPage};

pub const OBSERVATION_TYPE: &str = "stationary-object";
pub const OBSERVATION_SUBTYPE: &str = "weather_station";

/// Coordinates attached to an observation.
///
/// The provider does not report station positions, so every observation
/// carries `(0.0, 0.0)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    pub const PLACEHOLDER: Location = Location { lat: 0.0, lon: 0.0 };
}

/// A flattened per-instant record sent downstream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub source: String,
    pub source_name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub subtype: String,
    pub recorded_at: DateTime<FixedOffset>,
    pub location: Location,
    pub additional: Map<String, Value>,
}

/// Whether the page starts before the watermark and was already delivered.
///
/// Page-level only: a page straddling the watermark is treated as stale as a
/// whole, including any newer readings it holds.
pub fn is_stale(page: &ReadingsPage, watermark: Option<&DateTime<FixedOffset>>) -> bool {
    watermark.is_some_and(|wm| page.start() < *wm)
}

/// Drop stale pages, flatten the rest.
pub fn filter_and_transform(
    device: &str,
    watermark: Option<&DateTime<FixedOffset>>,
    page: &ReadingsPage,
) -> Vec<Observation> {
    if is_stale(page, watermark) {
        log::info!(
            "[Transform] Excluding device ID '{}' readings from '{}'",
            device,
            page.start()
        );
        return Vec::new();
    }
    transform(device, page)
}

/// Flatten a page into one observation per reading index.
pub fn transform(device: &str, page: &ReadingsPage) -> Vec<Observation> {
    (0..page.num_readings())
        .filter_map(|index| observation_at(device, page, index))
        .collect()
}

fn observation_at(device: &str, page: &ReadingsPage, index: usize) -> Option<Observation> {
    let mut additional = Map::new();
    let mut recorded_at = None;

    for (metric, readings) in page.series() {
        let reading = readings.get(index)?;
        recorded_at.get_or_insert(reading.datetime);
        merge_reading(&mut additional, metric.field_prefix(), reading);
    }

    Some(Observation {
        source: device.to_string(),
        source_name: device.to_string(),
        kind: OBSERVATION_TYPE.to_string(),
        subtype: OBSERVATION_SUBTYPE.to_string(),
        recorded_at: recorded_at?,
        location: Location::PLACEHOLDER,
        additional,
    })
}

fn merge_reading(additional: &mut Map<String, Value>, prefix: &str, reading: &ReadingData) {
    let fields = [
        ("value", reading.value.map(Value::from)),
        ("precision", Some(Value::from(reading.precision))),
        ("mrid", Some(Value::from(reading.mrid))),
        ("error_flag", Some(Value::Bool(reading.error_flag))),
        (
            "error_description",
            reading.error_description.clone().map(Value::String),
        ),
    ];
    for (field, value) in fields {
        if let Some(value) = value {
            additional.insert(format!("{prefix}_{field}"), value);
        }
    }
}
