//! Integration configuration and connector settings.
//!
//! The integration record carries free-form configuration blocks keyed by
//! action id. [`Integration::auth_config`] and
//! [`Integration::pull_observations_config`] locate and validate the two
//! blocks this connector needs; everything else in the file configures the
//! connector process itself (sink endpoint, state database, retry policy).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConnectorError, Result};
use crate::retry::RetryPolicy;

/// Default number of readings requested per page.
pub const DEFAULT_DEVICES_PER_PAGE: u32 = 1000;

/// Default timeout for provider and sink calls.
const DEFAULT_TIMEOUT_SECS: u64 = 120;

// ── Action ids ──────────────────────────────────────────────────────

/// Actions an integration can carry configuration for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionId {
    #[serde(rename = "auth")]
    Auth,
    #[serde(rename = "pull_observations")]
    PullObservations,
}

impl ActionId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionId::Auth => "auth",
            ActionId::PullObservations => "pull_observations",
        }
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Integration record ──────────────────────────────────────────────

/// One named configuration block attached to an integration.
///
/// `action_id` stays a plain string so blocks for actions this connector
/// does not know about are carried without failing the load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionConfiguration {
    pub action_id: String,
    #[serde(default)]
    pub data: Value,
}

/// The integration being served: identity, provider URL and config blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Integration {
    pub id: String,
    /// Provider readings endpoint.
    pub base_url: String,
    #[serde(default)]
    pub configurations: Vec<ActionConfiguration>,
}

/// Credentials for the provider API.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuthConfig {
    pub token: String,
}

/// Devices to poll and the page size to request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PullObservationsConfig {
    pub devices_serial_number: Vec<String>,
    #[serde(default = "default_devices_per_page")]
    pub devices_per_page: u32,
}

fn default_devices_per_page() -> u32 {
    DEFAULT_DEVICES_PER_PAGE
}

impl Integration {
    /// Find the raw configuration block for an action.
    pub fn find_config(&self, action: ActionId) -> Option<&ActionConfiguration> {
        self.configurations
            .iter()
            .find(|c| c.action_id == action.as_str())
    }

    fn typed_config<T: serde::de::DeserializeOwned>(&self, action: ActionId) -> Result<T> {
        let block = self
            .find_config(action)
            .ok_or_else(|| ConnectorError::ConfigurationMissing {
                integration: self.id.clone(),
                action,
            })?;
        serde_json::from_value(block.data.clone()).map_err(|e| {
            ConnectorError::InvalidConfiguration {
                action,
                reason: e.to_string(),
            }
        })
    }

    /// Resolve and validate the `auth` block.
    pub fn auth_config(&self) -> Result<AuthConfig> {
        let config: AuthConfig = self.typed_config(ActionId::Auth)?;
        if config.token.trim().is_empty() {
            return Err(ConnectorError::InvalidConfiguration {
                action: ActionId::Auth,
                reason: "token must not be empty".to_string(),
            });
        }
        Ok(config)
    }

    /// Resolve and validate the `pull_observations` block.
    ///
    /// Duplicate serial numbers are dropped, keeping the first occurrence.
    pub fn pull_observations_config(&self) -> Result<PullObservationsConfig> {
        let mut config: PullObservationsConfig = self.typed_config(ActionId::PullObservations)?;
        if config.devices_per_page == 0 {
            return Err(ConnectorError::InvalidConfiguration {
                action: ActionId::PullObservations,
                reason: "devices_per_page must be greater than zero".to_string(),
            });
        }
        if let Some(blank) = config
            .devices_serial_number
            .iter()
            .position(|d| d.trim().is_empty())
        {
            return Err(ConnectorError::InvalidConfiguration {
                action: ActionId::PullObservations,
                reason: format!("devices_serial_number[{blank}] is empty"),
            });
        }
        let mut seen = std::collections::HashSet::new();
        config
            .devices_serial_number
            .retain(|device| seen.insert(device.clone()));
        Ok(config)
    }
}

// ── Connector settings ──────────────────────────────────────────────

/// Downstream sensors API endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Retry policy as written in YAML.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub attempts: u32,
    pub wait_secs: u64,
}

impl From<RetrySettings> for RetryPolicy {
    fn from(settings: RetrySettings) -> Self {
        RetryPolicy::new(settings.attempts, Duration::from_secs(settings.wait_secs))
    }
}

/// Retry policies for the two retry sites.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_fetch_retry")]
    pub fetch: RetrySettings,
    #[serde(default = "default_delivery_retry")]
    pub delivery: RetrySettings,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            fetch: default_fetch_retry(),
            delivery: default_delivery_retry(),
        }
    }
}

fn default_fetch_retry() -> RetrySettings {
    RetrySettings {
        attempts: 3,
        wait_secs: 60,
    }
}

fn default_delivery_retry() -> RetrySettings {
    RetrySettings {
        attempts: 3,
        wait_secs: 10,
    }
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Root of the connector YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub integration: Integration,
    pub sink: SinkConfig,
    /// SQLite file holding device watermarks.
    #[serde(default)]
    pub state_path: Option<PathBuf>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl ConnectorConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// State database path, falling back to `~/.tahmo-connector/state.db`.
    pub fn state_path(&self) -> PathBuf {
        self.state_path.clone().unwrap_or_else(default_state_path)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

fn default_state_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tahmo-connector")
        .join("state.db")
}
