//! Simulated node.
//!
//! Serves the node HTTP surface and broadcasts advertisements so the
//! commander can be run end to end without hardware. "Executing" a binary
//! waits for the configured run time and then leaves a text report as output.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rand::Rng;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tessie_core::{
    Advertisement, NodeStatus, StatusResponse, ENDPOINT_ARG, ENDPOINT_EXECUTE, ENDPOINT_OUTPUT,
    ENDPOINT_STATUS, ENDPOINT_UPLOAD_BIN, ENDPOINT_UPLOAD_PAYLOAD, UPLOAD_FIELD,
};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub name: String,
    pub mac: String,
    pub run_time: Duration,
    pub spiffs_capacity: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            name: "tessie-sim".to_string(),
            mac: "02:00:00:00:00:01".to_string(),
            run_time: Duration::from_secs(2),
            spiffs_capacity: 1_441_792,
        }
    }
}

#[derive(Debug, Default, Clone)]
struct Job {
    binary: Option<Vec<u8>>,
    payloads: BTreeMap<String, Vec<u8>>,
    argument: Option<String>,
}

#[derive(Debug, Default)]
struct NodeState {
    status: NodeStatus,
    staged: Job,
    last_run: Job,
    output: Option<Vec<u8>>,
    total_executed: u64,
}

/// What the simulated node last executed.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub status: NodeStatus,
    pub total_executed: u64,
    pub binary_len: usize,
    pub payload_names: Vec<String>,
    pub argument: Option<String>,
}

#[derive(Clone)]
pub struct SimulatedNode {
    config: Arc<SimulatorConfig>,
    state: Arc<Mutex<NodeState>>,
}

impl SimulatedNode {
    pub fn new(config: SimulatorConfig) -> Self {
        let state = NodeState {
            status: NodeStatus::Available,
            ..NodeState::default()
        };
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(state)),
        }
    }

    #[cfg(test)]
    pub async fn snapshot(&self) -> NodeSnapshot {
        let state = self.state.lock().await;
        NodeSnapshot {
            status: state.status,
            total_executed: state.total_executed,
            binary_len: state.last_run.binary.as_ref().map_or(0, Vec::len),
            payload_names: state.last_run.payloads.keys().cloned().collect(),
            argument: state.last_run.argument.clone(),
        }
    }

    pub async fn advertisement(&self) -> Advertisement {
        let state = self.state.lock().await;
        let stored: u64 = state
            .staged
            .binary
            .iter()
            .chain(state.staged.payloads.values())
            .chain(state.output.iter())
            .map(|blob| blob.len() as u64)
            .sum();
        let rssi = rand::rng().random_range(-75..=-40);
        Advertisement {
            node: self.config.name.clone(),
            mac: self.config.mac.clone(),
            total_executed: state.total_executed,
            status: state.status,
            free_spiffs_bytes: self.config.spiffs_capacity.saturating_sub(stored),
            rssi,
        }
    }
}

pub fn router(node: SimulatedNode) -> Router {
    Router::new()
        .route(ENDPOINT_STATUS, get(get_status))
        .route(ENDPOINT_UPLOAD_BIN, post(upload_binary))
        .route(ENDPOINT_UPLOAD_PAYLOAD, post(upload_payload))
        .route(ENDPOINT_ARG, post(set_argument))
        .route(ENDPOINT_EXECUTE, post(execute))
        .route(ENDPOINT_OUTPUT, get(get_output))
        .layer(DefaultBodyLimit::disable())
        .with_state(node)
}

/// Serves the HTTP surface on `http_port` and advertises to `advertise_to`.
pub async fn run(
    node: SimulatedNode,
    http_port: u16,
    advertise_to: SocketAddr,
    advertise_interval: Duration,
) -> anyhow::Result<()> {
    let advertiser = node.clone();
    tokio::spawn(async move {
        if let Err(e) = advertise(advertiser, advertise_to, advertise_interval).await {
            warn!("Advertiser stopped: {}", e);
        }
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", http_port)).await?;
    info!(
        "Simulated node '{}' serving on http://{}",
        node.config.name,
        listener.local_addr()?
    );
    axum::serve(listener, router(node)).await?;
    Ok(())
}

async fn advertise(node: SimulatedNode, target: SocketAddr, interval: Duration) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    socket.set_broadcast(true)?;
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let datagram = node.advertisement().await.encode()?;
        if let Err(e) = socket.send_to(&datagram, target).await {
            warn!("Failed to send advertisement to {}: {}", target, e);
        }
    }
}

async fn get_status(State(node): State<SimulatedNode>) -> Json<StatusResponse> {
    let status = node.state.lock().await.status;
    Json(StatusResponse { status })
}

/// Reads the upload field out of a multipart body.
async fn read_upload(mut multipart: Multipart) -> Result<Vec<u8>, (StatusCode, String)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Malformed upload: {}", e)))?
    {
        if field.name() == Some(UPLOAD_FIELD) {
            let data = field
                .bytes()
                .await
                .map_err(|e| (StatusCode::BAD_REQUEST, format!("Failed to read bytes: {}", e)))?;
            return Ok(data.to_vec());
        }
    }
    Err((StatusCode::BAD_REQUEST, "No file in request".to_string()))
}

async fn upload_binary(
    State(node): State<SimulatedNode>,
    multipart: Multipart,
) -> Result<&'static str, (StatusCode, String)> {
    let data = read_upload(multipart).await?;
    info!(bytes = data.len(), "Binary received");
    node.state.lock().await.staged.binary = Some(data);
    Ok("Binary uploaded")
}

#[derive(Deserialize)]
struct PayloadParams {
    filename: String,
}

async fn upload_payload(
    State(node): State<SimulatedNode>,
    Query(params): Query<PayloadParams>,
    multipart: Multipart,
) -> Result<&'static str, (StatusCode, String)> {
    let data = read_upload(multipart).await?;
    info!(payload = %params.filename, bytes = data.len(), "Payload received");
    node.state
        .lock()
        .await
        .staged
        .payloads
        .insert(params.filename, data);
    Ok("Payload uploaded")
}

async fn set_argument(State(node): State<SimulatedNode>, body: Bytes) -> &'static str {
    let argument = String::from_utf8_lossy(&body).into_owned();
    node.state.lock().await.staged.argument = Some(argument);
    "Argument set"
}

async fn execute(State(node): State<SimulatedNode>) -> impl IntoResponse {
    {
        let mut state = node.state.lock().await;
        if state.status == NodeStatus::Busy {
            return (StatusCode::CONFLICT, "Task already running");
        }
        if state.staged.binary.is_none() {
            return (StatusCode::BAD_REQUEST, "No binary uploaded");
        }
        state.last_run = std::mem::take(&mut state.staged);
        state.output = None;
        state.status = NodeStatus::Busy;
    }

    let run_time = node.config.run_time;
    tokio::spawn(async move {
        tokio::time::sleep(run_time).await;
        let mut state = node.state.lock().await;
        let report = render_output(&state.last_run);
        state.output = Some(report.into_bytes());
        state.total_executed += 1;
        state.status = NodeStatus::Available;
        info!(total_executed = state.total_executed, "Task done");
    });

    (StatusCode::OK, "Task started")
}

async fn get_output(State(node): State<SimulatedNode>) -> Result<Vec<u8>, StatusCode> {
    node.state
        .lock()
        .await
        .output
        .clone()
        .ok_or(StatusCode::NOT_FOUND)
}

fn render_output(job: &Job) -> String {
    let names: Vec<&str> = job.payloads.keys().map(String::as_str).collect();
    format!(
        "This is output\nArgument given: {}\nBinary size: {} bytes\nPayloads: {}\n",
        job.argument.as_deref().unwrap_or(""),
        job.binary.as_ref().map_or(0, Vec::len),
        if names.is_empty() {
            "none".to_string()
        } else {
            names.join(", ")
        }
    )
}
