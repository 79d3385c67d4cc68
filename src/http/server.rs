//! Proxy server: accept loop and method dispatch.
//!
//! # Responsibilities
//! - Build the shared state handed to every connection
//! - Accept connections, terminating TLS when proto = https
//! - Serve HTTP/1.1 with header case preserved and upgrades enabled
//! - Send CONNECT to the tunnel engine and everything else to the relay
//! - Stop accepting on shutdown and drain in-flight connections
//!
//! # Design Decisions
//! - Connections are served with hyper directly so CONNECT can be routed
//!   before axum sees the request; the axum router only holds the relay
//! - A failing connection is logged and dropped; the loop keeps serving

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::config::{ProxyConfig, Proto};
use crate::http::relay::relay_handler;
use crate::http::tunnel::{serve_connect, TunnelRegistry};
use crate::net::{load_tls_acceptor, ConnectionTracker, Listener, ListenerError, TlsError};
use crate::resilience::RetryPolicy;
use crate::security::SecurityProbe;
use crate::transcript::{RecentTranscripts, TranscriptRecorder, TranscriptStore};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// State shared by every connection.
#[derive(Clone)]
pub struct AppState {
    pub client: Client<HttpConnector, Body>,
    pub probe: SecurityProbe,
    pub recorder: TranscriptRecorder,
    pub tunnels: TunnelRegistry,
    pub connections: ConnectionTracker,
    pub proto: Proto,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(config: &ProxyConfig, store: Arc<dyn TranscriptStore>) -> Self {
        let connect_timeout = Duration::from_secs(config.timeouts.connect_secs);

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        let client = Client::builder(TokioExecutor::new())
            .http1_preserve_header_case(true)
            .http1_title_case_headers(true)
            .build(connector);

        let recent = Arc::new(RecentTranscripts::new(config.transcript.recent_capacity));
        let recorder = TranscriptRecorder::new(
            store,
            RetryPolicy::from(&config.transcript.retry),
            recent,
        );

        Self {
            client,
            probe: SecurityProbe::new(config.probe.xxe_test),
            recorder,
            tunnels: TunnelRegistry::new(),
            connections: ConnectionTracker::new(),
            proto: config.listener.proto,
            connect_timeout,
            request_timeout: Duration::from_secs(config.timeouts.request_secs),
            max_body_bytes: config.limits.max_body_bytes,
        }
    }
}

/// The client-facing proxy.
pub struct ProxyServer {
    state: AppState,
    tls: Option<TlsAcceptor>,
}

impl ProxyServer {
    /// Build the server. TLS material is loaded here when proto = https.
    pub fn new(config: &ProxyConfig, store: Arc<dyn TranscriptStore>) -> Result<Self, ServerError> {
        let tls = match config.listener.proto {
            Proto::Https => Some(load_tls_acceptor(
                Path::new(&config.listener.tls.cert_path),
                Path::new(&config.listener.tls.key_path),
            )?),
            Proto::Http => None,
        };

        Ok(Self {
            state: AppState::new(config, store),
            tls,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    fn build_router(state: AppState) -> Router {
        Router::new()
            .fallback(relay_handler)
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until `shutdown` fires, then wait (bounded) for open connections.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let router = Self::build_router(self.state.clone());

        tracing::info!(
            address = ?listener.local_addr().ok(),
            proto = %self.state.proto,
            xxe_test = self.state.probe.is_enabled(),
            "Proxy server starting"
        );

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer, permit) = match accepted {
                        Ok(accepted) => accepted,
                        Err(ListenerError::Closed) => return Err(ListenerError::Closed.into()),
                        Err(e) => {
                            tracing::warn!(error = %e, "Accept failed");
                            continue;
                        }
                    };

                    let guard = self.state.connections.track();
                    let state = self.state.clone();
                    let router = router.clone();
                    let tls = self.tls.clone();

                    tokio::spawn(async move {
                        let _permit = permit;
                        let _guard = guard;
                        match tls {
                            Some(acceptor) => match acceptor.accept(stream).await {
                                Ok(stream) => serve_connection(stream, peer, state, router).await,
                                Err(e) => {
                                    tracing::debug!(peer_addr = %peer, error = %e, "TLS handshake failed");
                                }
                            },
                            None => serve_connection(stream, peer, state, router).await,
                        }
                    });
                }
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown requested, no longer accepting connections");
                    break;
                }
            }
        }

        let in_flight = self.state.connections.active_count();
        if in_flight > 0 {
            tracing::info!(connections = in_flight, "Draining connections");
            if tokio::time::timeout(DRAIN_TIMEOUT, self.state.connections.wait_until_idle())
                .await
                .is_err()
            {
                tracing::warn!(
                    connections = self.state.connections.active_count(),
                    "Drain timed out, closing remaining connections"
                );
            }
        }

        tracing::info!("Proxy server stopped");
        Ok(())
    }
}

async fn serve_connection<I>(io: I, peer: SocketAddr, state: AppState, router: Router)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |request: Request<Incoming>| {
        let state = state.clone();
        let router = router.clone();
        async move { Ok::<_, Infallible>(dispatch(state, router, peer, request).await) }
    });

    if let Err(e) = http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .serve_connection(TokioIo::new(io), service)
        .with_upgrades()
        .await
    {
        tracing::debug!(peer_addr = %peer, error = %e, "Connection ended with error");
    }
}

async fn dispatch(
    state: AppState,
    router: Router,
    peer: SocketAddr,
    request: Request<Incoming>,
) -> Response {
    let mut request = request.map(Body::new);

    if request.method() == Method::CONNECT {
        let span = tracing::info_span!("tunnel", peer_addr = %peer, uri = %request.uri());
        return serve_connect(&state, peer, request).instrument(span).await;
    }

    request.extensions_mut().insert(ConnectInfo(peer));
    match router.oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    }
}
