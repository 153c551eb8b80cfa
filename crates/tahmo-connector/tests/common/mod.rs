//! Shared helpers: in-process provider and sink servers.

#![allow(dead_code)]

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tahmo_connector::config::{ActionConfiguration, Integration, SinkConfig};
use tahmo_connector::provider::{Metric, TahmoClientFactory};
use tahmo_connector::retry::RetryPolicy;
use tahmo_connector::sink::SensorsApiClient;
use tahmo_connector::state::StateStore;
use tahmo_connector::PullObservations;

pub const TOKEN: &str = "provider-token";

// ── Provider ────────────────────────────────────────────────────────

/// A request as seen by the fake provider.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub params: HashMap<String, String>,
    pub authorization: Option<String>,
}

#[derive(Default)]
pub struct ProviderState {
    /// Response body per `device_sn`.
    pub pages: Mutex<HashMap<String, Value>>,
    /// When set, every request fails with this status.
    pub fail_status: Mutex<Option<u16>>,
    /// When set, every request gets this raw body.
    pub raw_body: Mutex<Option<String>>,
    pub requests: Mutex<Vec<SeenRequest>>,
}

impl ProviderState {
    pub fn set_page(&self, device: &str, page: Value) {
        self.pages.lock().unwrap().insert(device.to_string(), page);
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.requests.lock().unwrap().clone()
    }
}

async fn readings(
    State(state): State<Arc<ProviderState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    state.requests.lock().unwrap().push(SeenRequest {
        params: params.clone(),
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    });

    if let Some(status) = *state.fail_status.lock().unwrap() {
        let code = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (code, "provider unavailable".to_string());
    }
    if let Some(body) = state.raw_body.lock().unwrap().clone() {
        return (StatusCode::OK, body);
    }

    let device = params.get("device_sn").cloned().unwrap_or_default();
    match state.pages.lock().unwrap().get(&device) {
        Some(page) => (StatusCode::OK, page.to_string()),
        None => (StatusCode::NOT_FOUND, format!("unknown device {device}")),
    }
}

// ── Sink ────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct SinkState {
    /// Devices whose batches are rejected with a 500.
    pub failing: Mutex<HashSet<String>>,
    pub batches: Mutex<Vec<Vec<Value>>>,
    pub attempts: Mutex<HashMap<String, u32>>,
}

impl SinkState {
    pub fn fail_device(&self, device: &str) {
        self.failing.lock().unwrap().insert(device.to_string());
    }

    pub fn batches(&self) -> Vec<Vec<Value>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn attempts(&self, device: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(device)
            .copied()
            .unwrap_or(0)
    }
}

async fn observations(
    State(state): State<Arc<SinkState>>,
    Json(batch): Json<Vec<Value>>,
) -> (StatusCode, Json<Value>) {
    let device = batch
        .first()
        .and_then(|o| o["source"].as_str())
        .unwrap_or_default()
        .to_string();
    *state.attempts.lock().unwrap().entry(device.clone()).or_default() += 1;

    if state.failing.lock().unwrap().contains(&device) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"detail": "sink exploded"})),
        );
    }
    let accepted = batch.len();
    state.batches.lock().unwrap().push(batch);
    (StatusCode::CREATED, Json(json!({"accepted": accepted})))
}

// ── Harness ─────────────────────────────────────────────────────────

pub struct Harness {
    pub provider: Arc<ProviderState>,
    pub sink: Arc<SinkState>,
    pub provider_addr: SocketAddr,
    pub sink_addr: SocketAddr,
}

impl Harness {
    pub async fn start() -> Self {
        let provider = Arc::new(ProviderState::default());
        let sink = Arc::new(SinkState::default());

        let provider_app = Router::new()
            .route("/readings", get(readings))
            .with_state(provider.clone());
        let sink_app = Router::new()
            .route("/observations", post(observations))
            .with_state(sink.clone());

        let provider_addr = serve(provider_app).await;
        let sink_addr = serve(sink_app).await;

        Self {
            provider,
            sink,
            provider_addr,
            sink_addr,
        }
    }

    pub fn integration(&self, devices: &[&str]) -> Integration {
        Integration {
            id: "integration-1".into(),
            base_url: format!("http://{}/readings", self.provider_addr),
            configurations: vec![
                ActionConfiguration {
                    action_id: "auth".into(),
                    data: json!({"token": TOKEN}),
                },
                ActionConfiguration {
                    action_id: "pull_observations".into(),
                    data: json!({"devices_serial_number": devices, "devices_per_page": 100}),
                },
            ],
        }
    }

    /// Action wired to the fake servers with zero-wait retries.
    pub fn action(&self, store: Arc<dyn StateStore>) -> PullObservations {
        let sink = SensorsApiClient::new(&SinkConfig {
            url: format!("http://{}/observations", self.sink_addr),
            api_key: Some("sink-key".into()),
            timeout_secs: 5,
        })
        .unwrap();
        let sources = TahmoClientFactory {
            timeout: Duration::from_secs(5),
        };
        let instant = RetryPolicy::new(3, Duration::ZERO);
        PullObservations::new(Arc::new(sources), Arc::new(sink), store).with_retry(instant, instant)
    }
}

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

// ── Fixtures ────────────────────────────────────────────────────────

/// A provider page where every metric has `values` at `times`, except the
/// metrics listed in `overrides`.
pub fn page(
    start: &str,
    end: &str,
    times: &[&str],
    values: &[Option<f64>],
    overrides: &[(Metric, Vec<Option<f64>>)],
) -> Value {
    let mut data = Map::new();
    for metric in Metric::ALL {
        let metric_values = overrides
            .iter()
            .find(|(m, _)| *m == metric)
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| values.to_vec());
        let readings: Vec<Value> = times
            .iter()
            .zip(metric_values)
            .map(|(t, v)| {
                json!({
                    "datetime": t,
                    "value": v,
                    "precision": 1,
                    "mrid": 42,
                    "error_flag": false,
                    "error_description": ""
                })
            })
            .collect();
        data.insert(
            metric.display_name().to_string(),
            json!([{ "readings": readings }]),
        );
    }
    json!({
        "pagination": {
            "page_num_readings": times.len(),
            "page_start_date": start,
            "page_end_date": end
        },
        "data": data
    })
}
