//! CONNECT tunnel engine.
//!
//! # Responsibilities
//! - Dial the requested `host:port` with a bounded timeout
//! - Take over the client connection once the 200 is written
//! - Splice both byte streams until either direction ends
//! - Track open sessions for the admin view
//!
//! # Design Decisions
//! - The upgrade hand-off is checked before answering 200, so a
//!   connection that cannot be taken over never sees a success status
//! - One pump task per direction; whichever finishes first signals the
//!   other, and both shut down their writer before returning
//! - No retries: a half-open tunnel is never resumed

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::Instrument;

use crate::http::server::AppState;
use crate::net::ConnectionId;
use crate::observability::metrics;

const DEFAULT_TUNNEL_PORT: u16 = 443;
const PUMP_BUFFER_SIZE: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("CONNECT request has no target authority")]
    MissingAuthority,

    #[error("dial tcp {target}: i/o timeout after {}s", .timeout.as_secs())]
    DialTimeout { target: String, timeout: Duration },

    #[error("dial tcp {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("Hijacking not supported")]
    HijackUnsupported,
}

impl IntoResponse for TunnelError {
    fn into_response(self) -> Response {
        let status = match self {
            TunnelError::MissingAuthority => StatusCode::BAD_REQUEST,
            TunnelError::DialTimeout { .. } | TunnelError::Dial { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            TunnelError::HijackUnsupported => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// `host:port` named by a CONNECT request.
pub fn connect_target(uri: &Uri) -> Result<String, TunnelError> {
    let authority = uri.authority().ok_or(TunnelError::MissingAuthority)?;
    let port = authority.port_u16().unwrap_or(DEFAULT_TUNNEL_PORT);
    Ok(format!("{}:{}", authority.host(), port))
}

/// Open a raw TCP stream to `target`, giving up after `timeout`.
pub async fn dial(target: &str, timeout: Duration) -> Result<TcpStream, TunnelError> {
    dial_with(target, timeout, TcpStream::connect(target)).await
}

async fn dial_with<S>(
    target: &str,
    timeout: Duration,
    connect: impl Future<Output = io::Result<S>>,
) -> Result<S, TunnelError> {
    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(TunnelError::Dial {
            target: target.to_string(),
            source,
        }),
        Err(_) => Err(TunnelError::DialTimeout {
            target: target.to_string(),
            timeout,
        }),
    }
}

/// Handle a CONNECT request.
///
/// Answers 200 once the origin is dialed; the splice itself runs in a
/// background task after hyper hands over the client connection.
pub async fn serve_connect(
    state: &AppState,
    peer: SocketAddr,
    mut request: Request<Body>,
) -> Response {
    let target = match connect_target(request.uri()) {
        Ok(target) => target,
        Err(e) => {
            tracing::warn!(peer_addr = %peer, uri = %request.uri(), "CONNECT without authority");
            return e.into_response();
        }
    };

    tracing::info!(peer_addr = %peer, target = %target, "CONNECT");

    let origin = match dial(&target, state.connect_timeout).await {
        Ok(origin) => origin,
        Err(e) => {
            tracing::warn!(peer_addr = %peer, target = %target, error = %e, "Tunnel dial failed");
            metrics::record_tunnel("dial_failed");
            return e.into_response();
        }
    };

    let Some(on_upgrade) = request.extensions_mut().remove::<OnUpgrade>() else {
        tracing::error!(peer_addr = %peer, target = %target, "Connection cannot be taken over");
        metrics::record_tunnel("upgrade_failed");
        return TunnelError::HijackUnsupported.into_response();
    };

    let tunnels = state.tunnels.clone();
    tokio::spawn(async move {
        let upgraded = match on_upgrade.await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                tracing::warn!(peer_addr = %peer, target = %target, error = %e, "Upgrade failed");
                metrics::record_tunnel("upgrade_failed");
                return;
            }
        };

        let guard = tunnels.register(peer, target.clone());
        let started = Instant::now();
        let stats = TunnelSession::new(TokioIo::new(upgraded), origin).run().await;

        metrics::record_tunnel_bytes("client_to_origin", stats.client_to_origin);
        metrics::record_tunnel_bytes("origin_to_client", stats.origin_to_client);
        tracing::info!(
            tunnel_id = %guard.id(),
            peer_addr = %peer,
            target = %target,
            client_to_origin = stats.client_to_origin,
            origin_to_client = stats.origin_to_client,
            duration_ms = started.elapsed().as_millis() as u64,
            "Tunnel closed"
        );
    }
    .in_current_span());

    metrics::record_tunnel("established");
    StatusCode::OK.into_response()
}

/// Bytes copied in each direction over a tunnel's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TunnelStats {
    pub client_to_origin: u64,
    pub origin_to_client: u64,
}

/// A spliced client/origin stream pair.
pub struct TunnelSession<C, O> {
    client: C,
    origin: O,
}

impl<C, O> TunnelSession<C, O>
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    O: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(client: C, origin: O) -> Self {
        Self { client, origin }
    }

    /// Copy in both directions until either side ends or errors.
    ///
    /// Both streams are closed when this returns.
    pub async fn run(self) -> TunnelStats {
        let (client_read, client_write) = tokio::io::split(self.client);
        let (origin_read, origin_write) = tokio::io::split(self.origin);

        let (closed_tx, closed_rx) = watch::channel(false);
        let closed_tx = Arc::new(closed_tx);

        let upstream = tokio::spawn(pump(
            client_read,
            origin_write,
            Arc::clone(&closed_tx),
            closed_rx.clone(),
        ));
        let downstream = tokio::spawn(pump(origin_read, client_write, closed_tx, closed_rx));

        let (upstream, downstream) = tokio::join!(upstream, downstream);
        TunnelStats {
            client_to_origin: upstream.unwrap_or_default(),
            origin_to_client: downstream.unwrap_or_default(),
        }
    }
}

async fn pump<R, W>(
    mut reader: R,
    mut writer: W,
    closed_tx: Arc<watch::Sender<bool>>,
    closed_rx: watch::Receiver<bool>,
) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut copied = 0u64;

    tokio::select! {
        result = copy_counted(&mut reader, &mut writer, &mut copied) => {
            if let Err(e) = result {
                tracing::debug!(error = %e, "Tunnel direction ended with error");
            }
        }
        _ = peer_closed(closed_rx) => {}
    }

    let _ = writer.shutdown().await;
    closed_tx.send_replace(true);
    copied
}

async fn copy_counted<R, W>(reader: &mut R, writer: &mut W, copied: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; PUMP_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        *copied += n as u64;
    }
}

async fn peer_closed(mut closed_rx: watch::Receiver<bool>) {
    let _ = closed_rx.wait_for(|closed| *closed).await;
}

#[derive(Debug, Clone)]
struct TunnelInfo {
    client: SocketAddr,
    target: String,
    opened_at: Instant,
}

/// Point-in-time view of an open tunnel.
#[derive(Debug, Clone, Serialize)]
pub struct TunnelSnapshot {
    pub id: ConnectionId,
    pub client: SocketAddr,
    pub target: String,
    pub age_secs: u64,
}

/// Open tunnel sessions, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct TunnelRegistry {
    sessions: Arc<DashMap<ConnectionId, TunnelInfo>>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session; it is removed when the guard drops.
    pub fn register(&self, client: SocketAddr, target: String) -> TunnelGuard {
        let id = ConnectionId::new();
        self.sessions.insert(
            id,
            TunnelInfo {
                client,
                target,
                opened_at: Instant::now(),
            },
        );
        metrics::tunnel_opened();
        TunnelGuard {
            id,
            sessions: Arc::clone(&self.sessions),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn snapshot(&self) -> Vec<TunnelSnapshot> {
        let mut tunnels: Vec<TunnelSnapshot> = self
            .sessions
            .iter()
            .map(|entry| TunnelSnapshot {
                id: *entry.key(),
                client: entry.client,
                target: entry.target.clone(),
                age_secs: entry.opened_at.elapsed().as_secs(),
            })
            .collect();
        tunnels.sort_by_key(|t| t.id.as_u64());
        tunnels
    }
}

/// Keeps a session registered while alive.
#[derive(Debug)]
pub struct TunnelGuard {
    id: ConnectionId,
    sessions: Arc<DashMap<ConnectionId, TunnelInfo>>,
}

impl TunnelGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for TunnelGuard {
    fn drop(&mut self) {
        self.sessions.remove(&self.id);
        metrics::tunnel_closed();
    }
}
