//! Forward-proxy relay for every method except CONNECT.
//!
//! # Responsibilities
//! - Read the client request once and resolve its absolute target
//! - Normalize headers (hop-by-hop strip, forwarded-for chain)
//! - Substitute the probe payload when XXE test mode is on
//! - Forward to the origin and buffer its response under one deadline
//! - Record the transcript, then return the origin response
//!
//! # Design Decisions
//! - A failed origin round trip is answered with 500 and logged; the
//!   serving loop keeps running
//! - A failed transcript write is logged and counted, never surfaced to
//!   the client. Only the first write attempt runs before the response is
//!   returned

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::http::request::{BodyError, InboundRequest};
use crate::http::response::OutboundResponse;
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::security::{append_forwarded_for, strip_hop_headers};
use crate::transcript::Recorded;

/// Per-request relay failure.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("request body: {0}")]
    RequestBody(#[source] BodyError),

    #[error("request has neither an absolute URL nor a Host header")]
    MissingHost,

    #[error("invalid target host: {0}")]
    InvalidTarget(String),

    #[error("origin request failed: {0}")]
    Upstream(#[source] hyper_util::client::legacy::Error),

    #[error("origin did not respond within {0:?}")]
    Timeout(Duration),

    #[error("origin response body: {0}")]
    ResponseBody(#[source] BodyError),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::RequestBody(BodyError::TooLarge(_)) => StatusCode::PAYLOAD_TOO_LARGE,
            RelayError::RequestBody(BodyError::Read(_))
            | RelayError::MissingHost
            | RelayError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
            RelayError::Upstream(_) | RelayError::Timeout(_) | RelayError::ResponseBody(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        // origin details stay in the log
        let body = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "Server Error".to_string()
        } else {
            self.to_string()
        };
        (status, body).into_response()
    }
}

/// Router fallback: relays the request and answers with the origin response.
pub async fn relay_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();

    let response = match relay(&state, peer, request).await {
        Ok(response) => response,
        Err(e) => {
            if e.status().is_server_error() {
                tracing::error!(peer_addr = %peer, method = %method, error = %e, "Relay failed");
            } else {
                tracing::warn!(peer_addr = %peer, method = %method, error = %e, "Rejected request");
            }
            e.into_response()
        }
    };

    metrics::record_request(&method, response.status().as_u16(), start);
    response
}

async fn relay(
    state: &AppState,
    peer: SocketAddr,
    request: Request<Body>,
) -> Result<Response, RelayError> {
    let (mut inbound, extensions) = InboundRequest::read(request, state.max_body_bytes)
        .await
        .map_err(RelayError::RequestBody)?;
    inbound.resolve_target()?;

    tracing::info!(
        peer_addr = %peer,
        method = %inbound.method,
        url = %inbound.uri,
        "Relaying request"
    );

    strip_hop_headers(&mut inbound.headers);
    append_forwarded_for(&mut inbound.headers, peer.ip());

    let body = state.probe.outgoing_body(inbound.body.clone());
    let forwarded = inbound.to_forward(body, extensions);

    // the deadline covers the whole origin exchange, body included
    let round_trip = async {
        let response = state
            .client
            .request(forwarded)
            .await
            .map_err(RelayError::Upstream)?;
        OutboundResponse::read(response, state.max_body_bytes)
            .await
            .map_err(RelayError::ResponseBody)
    };
    let (outbound, extensions) = tokio::time::timeout(state.request_timeout, round_trip)
        .await
        .map_err(|_| RelayError::Timeout(state.request_timeout))??;

    let probe_alert = match state.probe.inspect_response(&outbound.body) {
        Some(finding) => {
            tracing::warn!(
                security_alert = true,
                url = %inbound.uri,
                marker = finding.marker,
                offset = finding.offset,
                "Possible XXE file disclosure in origin response"
            );
            metrics::record_probe_alert();
            true
        }
        None => false,
    };

    match state.recorder.record(&inbound, &outbound, probe_alert).await {
        Ok(Recorded::Stored(request_id)) => {
            tracing::debug!(request_id = %request_id, "Transcript recorded");
        }
        Ok(Recorded::Retrying) => {
            tracing::warn!(url = %inbound.uri, "Transcript write retrying in background");
        }
        Err(e) => {
            tracing::error!(
                persistence_error = true,
                url = %inbound.uri,
                error = %e,
                "Failed to record transcript"
            );
        }
    }

    tracing::info!(
        peer_addr = %peer,
        method = %inbound.method,
        url = %inbound.uri,
        status = outbound.status.as_u16(),
        "Relayed response"
    );

    Ok(outbound.into_response(extensions))
}
