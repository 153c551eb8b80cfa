//! Connector error types.

use crate::config::ActionId;

/// Errors raised while pulling and forwarding observations.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// The integration has no configuration block for the action.
    #[error(
        "{action} settings for integration {integration} are missing. \
         Please fix the integration setup in the portal."
    )]
    ConfigurationMissing { integration: String, action: ActionId },

    /// The configuration block exists but does not match its schema.
    #[error("invalid {action} configuration: {reason}")]
    InvalidConfiguration { action: ActionId, reason: String },

    /// The provider response does not match the expected shape.
    #[error("schema validation error: {0}")]
    SchemaValidation(String),

    /// The remote end rejected our credentials (401/403).
    #[error("authentication failed (status {status}): {message}")]
    Authentication { status: u16, message: String },

    /// Timeout, connection failure or non-success HTTP status.
    #[error("transport error{}: {message}", status_suffix(.status))]
    Transport { status: Option<u16>, message: String },

    /// State store read/write failed.
    #[error("state store error: {0}")]
    State(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, ConnectorError>;

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

impl ConnectorError {
    /// Whether the error came from the HTTP layer and may succeed on retry.
    ///
    /// Authentication failures are HTTP errors too and are retried the same
    /// way; they stay a separate variant so callers can alert on them.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ConnectorError::Transport { .. } | ConnectorError::Authentication { .. }
        )
    }

    /// Whether the error should be logged with the attention marker.
    pub fn needs_attention(&self) -> bool {
        !matches!(self, ConnectorError::ConfigurationMissing { .. })
    }

    /// Build the error for a non-success HTTP status.
    pub(crate) fn from_status(status: reqwest::StatusCode, message: String) -> Self {
        let code = status.as_u16();
        if code == 401 || code == 403 {
            ConnectorError::Authentication {
                status: code,
                message,
            }
        } else {
            ConnectorError::Transport {
                status: Some(code),
                message,
            }
        }
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(err: reqwest::Error) -> Self {
        ConnectorError::Transport {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

impl From<rusqlite::Error> for ConnectorError {
    fn from(err: rusqlite::Error) -> Self {
        ConnectorError::State(err.to_string())
    }
}
