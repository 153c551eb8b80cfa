//! TAHMO readings endpoint: wire types and HTTP client.
//!
//! A response carries one page of readings for one station:
//!
//! ```text
//! {
//!   "pagination": {"page_num_readings": 2, "page_start_date": "...", "page_end_date": "..."},
//!   "data": {
//!     "Air Temperature": [{"readings": [{"datetime": "...", "value": 21.5, ...}, ...]}],
//!     ...
//!   }
//! }
//! ```
//!
//! Parsing is strict: every metric of the catalogue must be present, every
//! reading must carry its required fields, and each series must hold at least
//! `page_num_readings` entries. Anything else is a schema validation error.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::{AuthConfig, Integration};
use crate::error::{ConnectorError, Result};
use crate::timestamp;

// ── Metric catalogue ────────────────────────────────────────────────

/// A sensor metric reported by a TAHMO station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Metric {
    AirTemperature,
    AtmosphericPressure,
    BatteryPercent,
    BatteryVoltage,
    GustSpeed,
    LightningActivity,
    LightningDistance,
    LoggerTemperature,
    MaxPrecipRate,
    Precipitation,
    RhSensorTemp,
    ReferencePressure,
    SaturationExtractEc,
    SoilTemperature,
    SolarRadiation,
    Vpd,
    VaporPressure,
    WaterContent,
    WindDirection,
    WindSpeed,
    XAxisLevel,
    YAxisLevel,
}

impl Metric {
    /// Every metric a page must contain, in merge order.
    pub const ALL: [Metric; 22] = [
        Metric::AirTemperature,
        Metric::AtmosphericPressure,
        Metric::BatteryPercent,
        Metric::BatteryVoltage,
        Metric::GustSpeed,
        Metric::LightningActivity,
        Metric::LightningDistance,
        Metric::LoggerTemperature,
        Metric::MaxPrecipRate,
        Metric::Precipitation,
        Metric::RhSensorTemp,
        Metric::ReferencePressure,
        Metric::SaturationExtractEc,
        Metric::SoilTemperature,
        Metric::SolarRadiation,
        Metric::Vpd,
        Metric::VaporPressure,
        Metric::WaterContent,
        Metric::WindDirection,
        Metric::WindSpeed,
        Metric::XAxisLevel,
        Metric::YAxisLevel,
    ];

    /// Key used by the provider in the `data` object.
    pub fn display_name(&self) -> &'static str {
        match self {
            Metric::AirTemperature => "Air Temperature",
            Metric::AtmosphericPressure => "Atmospheric Pressure",
            Metric::BatteryPercent => "Battery Percent",
            Metric::BatteryVoltage => "Battery Voltage",
            Metric::GustSpeed => "Gust Speed",
            Metric::LightningActivity => "Lightning Activity",
            Metric::LightningDistance => "Lightning Distance",
            Metric::LoggerTemperature => "Logger Temperature",
            Metric::MaxPrecipRate => "Max Precip Rate",
            Metric::Precipitation => "Precipitation",
            Metric::RhSensorTemp => "RH Sensor Temp",
            Metric::ReferencePressure => "Reference Pressure",
            Metric::SaturationExtractEc => "Saturation Extract EC",
            Metric::SoilTemperature => "Soil Temperature",
            Metric::SolarRadiation => "Solar Radiation",
            Metric::Vpd => "VPD",
            Metric::VaporPressure => "Vapor Pressure",
            Metric::WaterContent => "Water Content",
            Metric::WindDirection => "Wind Direction",
            Metric::WindSpeed => "Wind Speed",
            Metric::XAxisLevel => "X-axis Level",
            Metric::YAxisLevel => "Y-axis Level",
        }
    }

    /// Prefix for this metric's keys in an observation's `additional` map.
    pub fn field_prefix(&self) -> &'static str {
        match self {
            Metric::AirTemperature => "air_temperature",
            Metric::AtmosphericPressure => "atmospheric_pressure",
            Metric::BatteryPercent => "battery_percent",
            Metric::BatteryVoltage => "battery_voltage",
            Metric::GustSpeed => "gust_speed",
            Metric::LightningActivity => "lightning_activity",
            Metric::LightningDistance => "lightning_distance",
            Metric::LoggerTemperature => "logger_temperature",
            Metric::MaxPrecipRate => "max_precip_rate",
            Metric::Precipitation => "precipitation",
            Metric::RhSensorTemp => "rh_sensor_temp",
            Metric::ReferencePressure => "reference_pressure",
            Metric::SaturationExtractEc => "saturation_extract_ec",
            Metric::SoilTemperature => "soil_temperature",
            Metric::SolarRadiation => "solar_radiation",
            Metric::Vpd => "vpd",
            Metric::VaporPressure => "vapor_pressure",
            Metric::WaterContent => "water_content",
            Metric::WindDirection => "wind_direction",
            Metric::WindSpeed => "wind_speed",
            Metric::XAxisLevel => "x_axis_level",
            Metric::YAxisLevel => "y_axis_level",
        }
    }
}

// ── Wire types ──────────────────────────────────────────────────────

/// One reading of one metric.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReadingData {
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub datetime: DateTime<FixedOffset>,
    #[serde(default)]
    pub value: Option<f64>,
    pub precision: i64,
    pub mrid: i64,
    pub error_flag: bool,
    /// `""` when the provider omits it, `None` when it sends null.
    #[serde(default = "empty_description")]
    pub error_description: Option<String>,
}

fn empty_description() -> Option<String> {
    Some(String::new())
}

/// A time series object inside a metric entry.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricSeries {
    pub readings: Vec<ReadingData>,
}

/// Page bounds reported by the provider.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Pagination {
    pub page_num_readings: usize,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub page_start_date: DateTime<FixedOffset>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub page_end_date: DateTime<FixedOffset>,
}

#[derive(Debug, Deserialize)]
struct ReadingsResponse {
    pagination: Pagination,
    data: BTreeMap<String, Vec<MetricSeries>>,
}

/// One validated page of readings for one device.
#[derive(Debug, Clone)]
pub struct ReadingsPage {
    pub pagination: Pagination,
    series: Vec<(Metric, Vec<ReadingData>)>,
}

impl ReadingsPage {
    /// Parse and validate a readings endpoint response body.
    pub fn from_json(body: &str) -> Result<Self> {
        let response: ReadingsResponse = serde_json::from_str(body)
            .map_err(|e| ConnectorError::SchemaValidation(e.to_string()))?;

        let mut data = response.data;
        let mut series = Vec::with_capacity(Metric::ALL.len());
        for metric in Metric::ALL {
            let entry = data.remove(metric.display_name()).ok_or_else(|| {
                ConnectorError::SchemaValidation(format!(
                    "data: missing metric '{}'",
                    metric.display_name()
                ))
            })?;
            let first = entry.into_iter().next().ok_or_else(|| {
                ConnectorError::SchemaValidation(format!(
                    "data.{}: expected at least one series",
                    metric.display_name()
                ))
            })?;
            series.push((metric, first.readings));
        }
        if !data.is_empty() {
            log::debug!(
                "[Fetch] ignoring unknown metrics: {:?}",
                data.keys().collect::<Vec<_>>()
            );
        }

        Self::from_parts(response.pagination, series)
    }

    /// Assemble a page from already-typed series, applying the same checks
    /// as [`ReadingsPage::from_json`].
    pub fn from_parts(
        pagination: Pagination,
        series: Vec<(Metric, Vec<ReadingData>)>,
    ) -> Result<Self> {
        for (metric, readings) in &series {
            if readings.len() < pagination.page_num_readings {
                return Err(ConnectorError::SchemaValidation(format!(
                    "data.{}: {} readings, page declares {}",
                    metric.display_name(),
                    readings.len(),
                    pagination.page_num_readings
                )));
            }
        }
        Ok(Self { pagination, series })
    }

    /// Metric series in merge order.
    pub fn series(&self) -> &[(Metric, Vec<ReadingData>)] {
        &self.series
    }

    pub fn num_readings(&self) -> usize {
        self.pagination.page_num_readings
    }

    pub fn start(&self) -> DateTime<FixedOffset> {
        self.pagination.page_start_date
    }

    pub fn end(&self) -> DateTime<FixedOffset> {
        self.pagination.page_end_date
    }
}

// ── Client ──────────────────────────────────────────────────────────

/// Query for one device's readings.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingsRequest {
    pub device: String,
    pub per_page: u32,
    pub start_date: DateTime<Utc>,
}

impl ReadingsRequest {
    /// Query string parameters; `start_date` has minute precision.
    pub fn query(&self) -> [(&'static str, String); 3] {
        [
            ("device_sn", self.device.clone()),
            ("per_page", self.per_page.to_string()),
            ("start_date", timestamp::format_query_start(&self.start_date)),
        ]
    }
}

/// Anything that can produce a page of readings for a device.
#[async_trait]
pub trait ReadingsSource: Send + Sync {
    async fn fetch_readings(&self, request: &ReadingsRequest) -> Result<ReadingsPage>;
}

/// reqwest client for the TAHMO readings endpoint.
#[derive(Debug, Clone)]
pub struct TahmoClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl TahmoClient {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
            token: token.to_string(),
        })
    }
}

#[async_trait]
impl ReadingsSource for TahmoClient {
    async fn fetch_readings(&self, request: &ReadingsRequest) -> Result<ReadingsPage> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&request.query())
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ConnectorError::from_status(status, message));
        }

        let body = response.text().await?;
        ReadingsPage::from_json(&body)
    }
}

/// Builds a readings source once the integration's credentials are known.
pub trait SourceFactory: Send + Sync {
    fn connect(&self, integration: &Integration, auth: &AuthConfig) -> Result<Box<dyn ReadingsSource>>;
}

/// Connects [`TahmoClient`]s to the integration's `base_url`.
#[derive(Debug, Clone)]
pub struct TahmoClientFactory {
    pub timeout: Duration,
}

impl SourceFactory for TahmoClientFactory {
    fn connect(&self, integration: &Integration, auth: &AuthConfig) -> Result<Box<dyn ReadingsSource>> {
        Ok(Box::new(TahmoClient::new(
            &integration.base_url,
            &auth.token,
            self.timeout,
        )?))
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::response_body;
    use super::*;
    use chrono::TimeZone;

    const T0: &str = "2024-01-01 05:00:00+00:00";
    const T1: &str = "2024-01-01 05:05:00+00:00";

    #[test]
    fn catalogue_names_are_unique() {
        let mut names: Vec<_> = Metric::ALL.iter().map(|m| m.display_name()).collect();
        let mut prefixes: Vec<_> = Metric::ALL.iter().map(|m| m.field_prefix()).collect();
        names.sort();
        names.dedup();
        prefixes.sort();
        prefixes.dedup();
        assert_eq!(names.len(), 22);
        assert_eq!(prefixes.len(), 22);
    }

    #[test]
    fn parses_valid_page() {
        let body = response_body(T0, T1, &[T0, T1], &[Some(21.5), None], &[]).to_string();
        let page = ReadingsPage::from_json(&body).unwrap();
        assert_eq!(page.num_readings(), 2);
        assert_eq!(page.series().len(), 22);
        assert_eq!(page.start(), Utc.with_ymd_and_hms(2024, 1, 1, 5, 0, 0).unwrap());
        assert_eq!(page.end(), Utc.with_ymd_and_hms(2024, 1, 1, 5, 5, 0).unwrap());

        let (metric, readings) = &page.series()[0];
        assert_eq!(*metric, Metric::AirTemperature);
        assert_eq!(readings[0].value, Some(21.5));
        assert_eq!(readings[1].value, None);
        assert_eq!(readings[0].error_description, None);
    }

    #[test]
    fn missing_metric_fails() {
        let mut body = response_body(T0, T1, &[T0], &[Some(1.0)], &[]);
        body["data"].as_object_mut().unwrap().remove("Wind Speed");
        match ReadingsPage::from_json(&body.to_string()) {
            Err(ConnectorError::SchemaValidation(msg)) => assert!(msg.contains("Wind Speed")),
            other => panic!("expected SchemaValidation, got {:?}", other),
        }
    }

    #[test]
    fn missing_pagination_fails() {
        let mut body = response_body(T0, T1, &[T0], &[Some(1.0)], &[]);
        body.as_object_mut().unwrap().remove("pagination");
        assert!(matches!(
            ReadingsPage::from_json(&body.to_string()),
            Err(ConnectorError::SchemaValidation(_))
        ));
    }

    #[test]
    fn type_mismatch_fails() {
        let mut body = response_body(T0, T1, &[T0], &[Some(1.0)], &[]);
        body["data"]["VPD"][0]["readings"][0]["precision"] = serde_json::json!("two");
        assert!(matches!(
            ReadingsPage::from_json(&body.to_string()),
            Err(ConnectorError::SchemaValidation(_))
        ));

        let mut body = response_body(T0, T1, &[T0], &[Some(1.0)], &[]);
        body["data"]["VPD"][0]["readings"][0]["datetime"] = serde_json::json!("not a date");
        assert!(ReadingsPage::from_json(&body.to_string()).is_err());
    }

    #[test]
    fn missing_required_reading_field_fails() {
        let mut body = response_body(T0, T1, &[T0], &[Some(1.0)], &[]);
        body["data"]["Precipitation"][0]["readings"][0]
            .as_object_mut()
            .unwrap()
            .remove("error_flag");
        assert!(matches!(
            ReadingsPage::from_json(&body.to_string()),
            Err(ConnectorError::SchemaValidation(_))
        ));
    }

    #[test]
    fn optional_reading_fields_default() {
        let mut body = response_body(T0, T1, &[T0], &[Some(1.0)], &[]);
        let reading = body["data"]["VPD"][0]["readings"][0].as_object_mut().unwrap();
        reading.remove("value");
        reading.remove("error_description");
        let page = ReadingsPage::from_json(&body.to_string()).unwrap();
        let (_, readings) = page
            .series()
            .iter()
            .find(|(m, _)| *m == Metric::Vpd)
            .unwrap();
        assert_eq!(readings[0].value, None);
        assert_eq!(readings[0].error_description.as_deref(), Some(""));
    }

    #[test]
    fn short_series_fails() {
        let mut body = response_body(T0, T1, &[T0, T1], &[Some(1.0), Some(2.0)], &[]);
        body["data"]["Gust Speed"][0]["readings"]
            .as_array_mut()
            .unwrap()
            .pop();
        match ReadingsPage::from_json(&body.to_string()) {
            Err(ConnectorError::SchemaValidation(msg)) => assert!(msg.contains("Gust Speed")),
            other => panic!("expected SchemaValidation, got {:?}", other),
        }
    }

    #[test]
    fn empty_series_list_fails() {
        let mut body = response_body(T0, T1, &[T0], &[Some(1.0)], &[]);
        body["data"]["Gust Speed"] = serde_json::json!([]);
        assert!(ReadingsPage::from_json(&body.to_string()).is_err());
    }

    #[test]
    fn unknown_metrics_are_ignored() {
        let mut body = response_body(T0, T1, &[T0], &[Some(1.0)], &[]);
        body["data"]["Leaf Wetness"] = serde_json::json!([{"readings": []}]);
        assert!(ReadingsPage::from_json(&body.to_string()).is_ok());
    }

    #[test]
    fn zero_reading_page_is_valid() {
        let body = response_body(T0, T0, &[], &[], &[]).to_string();
        let page = ReadingsPage::from_json(&body).unwrap();
        assert_eq!(page.num_readings(), 0);
    }

    #[test]
    fn request_query_uses_minute_precision() {
        let request = ReadingsRequest {
            device: "TA00001".into(),
            per_page: 1000,
            start_date: Utc.with_ymd_and_hms(2024, 1, 1, 5, 7, 42).unwrap(),
        };
        assert_eq!(
            request.query(),
            [
                ("device_sn", "TA00001".to_string()),
                ("per_page", "1000".to_string()),
                ("start_date", "2024-01-01 05:07".to_string()),
            ]
        );
    }
}
