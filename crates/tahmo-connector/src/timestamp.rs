//! Timestamp formats shared by the provider payload and the watermark state.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Deserializer};

/// Reading datetimes and stored watermarks: `2024-01-01 05:00:00+00:00`.
pub const READING_FORMAT: &str = "%Y-%m-%d %H:%M:%S%z";

/// Query `start_date` parameter, minute precision.
pub const QUERY_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Parse a provider or watermark timestamp.
///
/// Accepts the reading format (offset with or without colon) and RFC 3339.
pub fn parse(s: &str) -> Result<DateTime<FixedOffset>, chrono::ParseError> {
    let s = s.trim();
    DateTime::parse_from_str(s, READING_FORMAT)
        .or_else(|e| DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%:z").map_err(|_| e))
        .or_else(|e| DateTime::parse_from_rfc3339(s).map_err(|_| e))
}

/// Format a timestamp the way watermarks are stored.
pub fn format_watermark(ts: &DateTime<FixedOffset>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%:z").to_string()
}

/// Format a query start-time floor; seconds are dropped.
pub fn format_query_start(ts: &DateTime<Utc>) -> String {
    ts.format(QUERY_FORMAT).to_string()
}

/// Serde adapter for provider timestamp strings.
pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<FixedOffset>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse(&raw).map_err(|e| serde::de::Error::custom(format!("invalid datetime '{raw}': {e}")))
}
