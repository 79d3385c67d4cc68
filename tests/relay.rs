//! End-to-end tests for the HTTP relay path.

mod common;

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use common::*;
use intercept_proxy::security::XXE_PAYLOAD;
use intercept_proxy::transcript::{RequestId, SqlTranscriptStore};

#[tokio::test]
async fn strips_hop_headers_and_adds_forwarded_for() {
    let (origin, mut captured) = start_mock_origin("200 OK", "", "hello").await;
    let store = SqlTranscriptStore::in_memory().await.unwrap();
    let proxy = start_proxy(test_config(), Arc::new(store)).await;

    let response = proxy
        .client()
        .get(format!("http://{origin}/"))
        .header("Connection", "keep-alive")
        .header("Keep-Alive", "timeout=5")
        .header("X-Custom", "kept")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "hello");

    let request = captured.recv().await.unwrap();
    assert!(request.head.starts_with("GET / HTTP/1.1"));
    assert_eq!(request.header("connection"), None);
    assert_eq!(request.header("keep-alive"), None);
    assert_eq!(request.header("x-custom").as_deref(), Some("kept"));
    assert_eq!(request.header("x-forwarded-for").as_deref(), Some("127.0.0.1"));
}

#[tokio::test]
async fn extends_existing_forwarded_for_chain() {
    let (origin, mut captured) = start_mock_origin("200 OK", "", "").await;
    let store = SqlTranscriptStore::in_memory().await.unwrap();
    let proxy = start_proxy(test_config(), Arc::new(store)).await;

    proxy
        .client()
        .get(format!("http://{origin}/"))
        .header("X-Forwarded-For", "203.0.113.5")
        .send()
        .await
        .unwrap();

    let request = captured.recv().await.unwrap();
    assert_eq!(
        request.header("x-forwarded-for").as_deref(),
        Some("203.0.113.5, 127.0.0.1")
    );
}

#[tokio::test]
async fn transcript_links_response_to_request() {
    let (origin, _captured) = start_mock_origin(
        "201 Created",
        "Set-Cookie: sid=abc; Path=/\r\n",
        "created",
    )
    .await;
    let store = SqlTranscriptStore::in_memory().await.unwrap();
    let proxy = start_proxy(test_config(), Arc::new(store.clone())).await;

    let response = proxy
        .client()
        .post(format!("http://{origin}/items?x=1"))
        .header("Cookie", "theme=dark")
        .body("name=widget")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);

    let recent = proxy.state.recorder.recent().snapshot();
    assert_eq!(recent.len(), 1);
    assert!(recent[0].persisted);
    assert!(!recent[0].probe_alert);

    let id = RequestId::from_str(recent[0].request_id.as_deref().unwrap()).unwrap();
    let request = store.fetch_request(id).await.unwrap().unwrap();
    assert_eq!(request.method, "POST");
    assert_eq!(request.url, format!("http://{origin}/items?x=1"));
    assert_eq!(request.cookies, "theme=dark");
    assert_eq!(request.body, "name=widget");

    let responses = store.fetch_responses(id).await.unwrap();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status, 201);
    assert_eq!(responses[0].cookies, "sid=abc; Path=/");
    assert_eq!(responses[0].body, "created");
}

#[tokio::test]
async fn probe_mode_swaps_body_and_relays_leak_untouched() {
    let leaked = "root:x:0:0:root:/root:/bin/bash\n";
    let (origin, mut captured) = start_mock_origin("200 OK", "", leaked).await;
    let store = SqlTranscriptStore::in_memory().await.unwrap();

    let mut config = test_config();
    config.probe.xxe_test = true;
    let proxy = start_proxy(config, Arc::new(store.clone())).await;

    let response = proxy
        .client()
        .post(format!("http://{origin}/upload"))
        .header("Content-Type", "application/json")
        .body(r#"{"harmless":true}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), leaked);

    let request = captured.recv().await.unwrap();
    assert_eq!(request.body, XXE_PAYLOAD.as_bytes());

    let recent = proxy.state.recorder.recent().snapshot();
    assert!(recent[0].probe_alert);

    // the transcript keeps what the client sent
    let id = RequestId::from_str(recent[0].request_id.as_deref().unwrap()).unwrap();
    let stored = store.fetch_request(id).await.unwrap().unwrap();
    assert_eq!(stored.body, r#"{"harmless":true}"#);
}

#[tokio::test]
async fn origin_failure_returns_500_and_keeps_serving() {
    let store = SqlTranscriptStore::in_memory().await.unwrap();
    let proxy = start_proxy(test_config(), Arc::new(store.clone())).await;
    let client = proxy.client();

    let dead = closed_port().await;
    let response = client.get(format!("http://{dead}/")).send().await.unwrap();
    assert_eq!(response.status(), 500);
    assert_eq!(response.text().await.unwrap(), "Server Error");
    assert_eq!(store.count_responses().await.unwrap(), 0);

    let (origin, _captured) = start_mock_origin("200 OK", "", "still here").await;
    let response = client.get(format!("http://{origin}/")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "still here");
}

#[tokio::test]
async fn stalled_origin_body_hits_the_request_deadline() {
    let origin = start_stalling_origin().await;
    let store = SqlTranscriptStore::in_memory().await.unwrap();

    let mut config = test_config();
    config.timeouts.request_secs = 1;
    let proxy = start_proxy(config, Arc::new(store.clone())).await;

    let started = Instant::now();
    let response = proxy
        .client()
        .get(format!("http://{origin}/slow"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
    assert_eq!(response.text().await.unwrap(), "Server Error");
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(store.count_responses().await.unwrap(), 0);
}

#[tokio::test]
async fn persistence_failure_still_relays_response() {
    let (origin, _captured) = start_mock_origin("200 OK", "", "delivered").await;
    let proxy = start_proxy(test_config(), Arc::new(FailingStore)).await;

    let response = proxy
        .client()
        .get(format!("http://{origin}/"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "delivered");

    let recent = proxy.state.recorder.recent().snapshot();
    assert_eq!(recent.len(), 1);
    assert!(!recent[0].persisted);
    assert_eq!(recent[0].request_id, None);
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let (origin, _captured) = start_mock_origin("200 OK", "", "").await;
    let store = SqlTranscriptStore::in_memory().await.unwrap();

    let mut config = test_config();
    config.limits.max_body_bytes = 16;
    let proxy = start_proxy(config, Arc::new(store)).await;

    let response = proxy
        .client()
        .post(format!("http://{origin}/"))
        .body(vec![b'a'; 64])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 413);
}

#[tokio::test]
async fn origin_form_without_host_is_rejected() {
    let store = SqlTranscriptStore::in_memory().await.unwrap();
    let proxy = start_proxy(test_config(), Arc::new(store)).await;

    let mut stream = TcpStream::connect(proxy.addr).await.unwrap();
    stream
        .write_all(b"GET /no-host HTTP/1.1\r\n\r\n")
        .await
        .unwrap();

    let (head, _body) = read_message(&mut stream).await.unwrap();
    assert!(head.starts_with("HTTP/1.1 400"), "{head}");
}
