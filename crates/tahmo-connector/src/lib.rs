//! TAHMO weather-station connector.
//!
//! Incrementally pulls sensor readings per station from the TAHMO readings
//! endpoint, flattens them into observations and forwards them to a sensors
//! ingestion API, tracking a per-device watermark so data is neither lost nor
//! re-submitted across runs.
//!
//! # Architecture
//!
//! ```text
//! Integration config ──► fetch pass ──► filter + transform ──► delivery ──► sink
//!                          │   ▲                                  │
//!                          │   └──────── watermark ◄── state ◄────┘
//!                          ▼
//!                  TAHMO readings API
//! ```
//!
//! # Modules
//!
//! - [`config`]: integration record, typed action configs, connector settings.
//! - [`error`]: unified error type.
//! - [`provider`]: readings endpoint wire types and HTTP client.
//! - [`fetch`]: the batch-wide fetch pass.
//! - [`transform`]: stale-page filter and observation flattening.
//! - [`sink`]: sensors API client.
//! - [`delivery`]: per-device submission and watermark advancement.
//! - [`state`]: watermark state store (SQLite and in-memory).
//! - [`retry`]: bounded fixed-wait retry.
//! - [`timestamp`]: provider timestamp parsing and watermark formatting.
//! - [`action`]: the `pull_observations` run.

pub mod action;
pub mod config;
pub mod delivery;
pub mod error;
pub mod fetch;
pub mod provider;
pub mod retry;
pub mod sink;
pub mod state;
pub mod timestamp;
pub mod transform;

pub use action::{DevicePreview, PullObservations, RunEntry};
pub use config::{ConnectorConfig, Integration};
pub use error::{ConnectorError, Result};
