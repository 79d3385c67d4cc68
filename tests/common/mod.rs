//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use intercept_proxy::config::{Proto, ProxyConfig};
use intercept_proxy::http::{AppState, InboundRequest, OutboundResponse, ProxyServer};
use intercept_proxy::net::Listener;
use intercept_proxy::transcript::{RequestId, StoreError, TranscriptStore};
use intercept_proxy::Shutdown;

pub const WAIT: Duration = Duration::from_secs(5);

/// A request as it arrived at a mock origin.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    /// Request line and headers, verbatim.
    pub head: String,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    /// Value of the first header named `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<String> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    }
}

/// Read one HTTP/1.1 message head and a Content-Length body.
pub async fn read_message<S>(stream: &mut S) -> Option<(String, Vec<u8>)>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);

    let mut body = buf[head_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    Some((head, body))
}

/// Start an origin that answers every request with `status` and `body`,
/// reporting each request it receives on the returned channel.
pub async fn start_mock_origin(
    status: &'static str,
    extra_headers: &'static str,
    body: &'static str,
) -> (SocketAddr, mpsc::UnboundedReceiver<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let Some((head, body_in)) = read_message(&mut socket).await else {
                    return;
                };
                let _ = tx.send(CapturedRequest {
                    head,
                    body: body_in,
                });

                let response = format!(
                    "HTTP/1.1 {status}\r\n{extra_headers}Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, rx)
}

/// Start an origin that sends a response head promising more body than it
/// ever writes, then holds the connection open.
pub async fn start_stalling_origin() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                if read_message(&mut socket).await.is_none() {
                    return;
                }
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nab")
                    .await;
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
        }
    });

    addr
}

/// Start a TCP server that writes back whatever it reads.
pub async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });

    addr
}

/// Address nothing is listening on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

pub fn test_config() -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.listener.proto = Proto::Http;
    config.timeouts.connect_secs = 2;
    config.timeouts.request_secs = 5;
    config
}

pub struct TestProxy {
    pub addr: SocketAddr,
    pub state: AppState,
    pub shutdown: Shutdown,
}

impl TestProxy {
    /// reqwest client that sends everything through this proxy.
    pub fn client(&self) -> reqwest::Client {
        reqwest::Client::builder()
            .proxy(reqwest::Proxy::http(format!("http://{}", self.addr)).unwrap())
            .timeout(WAIT)
            .build()
            .unwrap()
    }
}

/// Run a plain-http proxy on an ephemeral port.
pub async fn start_proxy(config: ProxyConfig, store: Arc<dyn TranscriptStore>) -> TestProxy {
    let server = ProxyServer::new(&config, store).unwrap();
    let state = server.state().clone();
    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });

    TestProxy {
        addr,
        state,
        shutdown,
    }
}

/// Store whose every write fails with a non-transient error.
pub struct FailingStore;

#[async_trait]
impl TranscriptStore for FailingStore {
    async fn record_request(&self, _request: &InboundRequest) -> Result<RequestId, StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolClosed))
    }

    async fn record_response(
        &self,
        _id: RequestId,
        _response: &OutboundResponse,
    ) -> Result<(), StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolClosed))
    }
}
