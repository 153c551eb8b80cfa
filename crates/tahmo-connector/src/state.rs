//! Per-device watermark state.
//!
//! State is an opaque JSON object stored under
//! `(integration_id, action_id, source_id)`. The pull action keeps one
//! entry per device holding the last page end that was confirmed delivered.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use crate::error::{ConnectorError, Result};
use crate::timestamp;

/// Key holding the watermark inside a device's state object.
pub const WATERMARK_KEY: &str = "latest_device_timestamp";

pub type State = Map<String, Value>;

/// Durable key-value store for integration state.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_state(
        &self,
        integration_id: &str,
        action_id: &str,
        source_id: &str,
    ) -> Result<Option<State>>;

    async fn set_state(
        &self,
        integration_id: &str,
        action_id: &str,
        state: State,
        source_id: &str,
    ) -> Result<()>;
}

// ── Watermark codec ─────────────────────────────────────────────────

/// Extract the watermark from a device's state, if any.
pub fn watermark_from_state(state: &State) -> Result<Option<DateTime<FixedOffset>>> {
    match state.get(WATERMARK_KEY) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) => timestamp::parse(raw).map(Some).map_err(|e| {
            ConnectorError::State(format!("invalid {WATERMARK_KEY} '{raw}': {e}"))
        }),
        Some(other) => Err(ConnectorError::State(format!(
            "invalid {WATERMARK_KEY}: expected string, got {other}"
        ))),
    }
}

/// Build the state object recording `watermark`.
pub fn watermark_state(watermark: &DateTime<FixedOffset>) -> State {
    let mut state = Map::new();
    state.insert(
        WATERMARK_KEY.to_string(),
        Value::String(timestamp::format_watermark(watermark)),
    );
    state
}

/// Read a device's watermark from the store.
pub async fn load_watermark(
    store: &dyn StateStore,
    integration_id: &str,
    action_id: &str,
    device: &str,
) -> Result<Option<DateTime<FixedOffset>>> {
    match store.get_state(integration_id, action_id, device).await? {
        Some(state) => watermark_from_state(&state),
        None => Ok(None),
    }
}

// ── SQLite store ────────────────────────────────────────────────────

/// SQLite-backed state store.
///
/// The connection sits behind a `Mutex` so the store is `Sync`; it is only
/// locked for the synchronous statement, never across an `.await`.
pub struct SqliteStateStore {
    conn: Mutex<Connection>,
}

impl SqliteStateStore {
    /// Open (or create) the state database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// Open a throwaway in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS integration_state (
                integration_id  TEXT NOT NULL,
                action_id       TEXT NOT NULL,
                source_id       TEXT NOT NULL,
                state           TEXT NOT NULL,
                updated_at      TEXT NOT NULL,
                PRIMARY KEY (integration_id, action_id, source_id)
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ConnectorError::State(format!("connection lock poisoned: {e}")))
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get_state(
        &self,
        integration_id: &str,
        action_id: &str,
        source_id: &str,
    ) -> Result<Option<State>> {
        let raw: Option<String> = {
            let conn = self.lock()?;
            conn.query_row(
                "SELECT state FROM integration_state \
                 WHERE integration_id = ?1 AND action_id = ?2 AND source_id = ?3",
                params![integration_id, action_id, source_id],
                |row| row.get(0),
            )
            .optional()?
        };

        match raw {
            Some(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| ConnectorError::State(format!("corrupt state for {source_id}: {e}"))),
            None => Ok(None),
        }
    }

    async fn set_state(
        &self,
        integration_id: &str,
        action_id: &str,
        state: State,
        source_id: &str,
    ) -> Result<()> {
        let text = Value::Object(state).to_string();
        let updated_at = chrono::Utc::now().to_rfc3339();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO integration_state (integration_id, action_id, source_id, state, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(integration_id, action_id, source_id) DO UPDATE SET \
                state = excluded.state, \
                updated_at = excluded.updated_at",
            params![integration_id, action_id, source_id, text, updated_at],
        )?;
        log::debug!(
            "[State] saved integration={} action={} source={}",
            integration_id,
            action_id,
            source_id
        );
        Ok(())
    }
}

// ── In-memory store ─────────────────────────────────────────────────

/// Process-local state store for tests and dry runs.
#[derive(Default)]
pub struct InMemoryStateStore {
    entries: Mutex<HashMap<(String, String, String), State>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(integration_id: &str, action_id: &str, source_id: &str) -> (String, String, String) {
        (
            integration_id.to_string(),
            action_id.to_string(),
            source_id.to_string(),
        )
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get_state(
        &self,
        integration_id: &str,
        action_id: &str,
        source_id: &str,
    ) -> Result<Option<State>> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| ConnectorError::State(format!("state lock poisoned: {e}")))?;
        Ok(entries
            .get(&Self::key(integration_id, action_id, source_id))
            .cloned())
    }

    async fn set_state(
        &self,
        integration_id: &str,
        action_id: &str,
        state: State,
        source_id: &str,
    ) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| ConnectorError::State(format!("state lock poisoned: {e}")))?;
        entries.insert(Self::key(integration_id, action_id, source_id), state);
        Ok(())
    }
}
