use axum::{extract::State, Json};
use serde::Serialize;

use crate::http::server::AppState;
use crate::http::tunnel::TunnelSnapshot;
use crate::transcript::TranscriptSummary;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub proto: String,
    pub xxe_test: bool,
    pub active_connections: u64,
    pub active_tunnels: usize,
    pub recent_transcripts: usize,
}

#[derive(Debug, Serialize)]
pub struct TranscriptView {
    pub capacity: usize,
    pub entries: Vec<TranscriptSummary>,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        proto: state.proto.to_string(),
        xxe_test: state.probe.is_enabled(),
        active_connections: state.connections.active_count(),
        active_tunnels: state.tunnels.len(),
        recent_transcripts: state.recorder.recent().len(),
    })
}

/// Recently relayed transactions, oldest first.
pub async fn get_transcripts(State(state): State<AppState>) -> Json<TranscriptView> {
    let recent = state.recorder.recent();
    Json(TranscriptView {
        capacity: recent.capacity(),
        entries: recent.snapshot(),
    })
}

pub async fn get_tunnels(State(state): State<AppState>) -> Json<Vec<TunnelSnapshot>> {
    Json(state.tunnels.snapshot())
}
