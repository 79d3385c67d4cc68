//! Read-only diagnostic API.
//!
//! Served on its own listener when `admin.enabled`; every route requires
//! `Authorization: Bearer <api_key>`.

pub mod auth;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState, api_key: &str) -> Router {
    let api_key: Arc<str> = Arc::from(api_key);
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/transcripts", get(get_transcripts))
        .route("/admin/tunnels", get(get_tunnels))
        .layer(middleware::from_fn_with_state(api_key, admin_auth_middleware))
        .with_state(state)
}

/// Bind the admin listener and serve it in the background until `shutdown`.
pub async fn spawn_admin_server(
    addr: SocketAddr,
    router: Router,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<SocketAddr> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(address = %local_addr, "Admin API listening");

    tokio::spawn(async move {
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await;
        if let Err(e) = served {
            tracing::error!(error = %e, "Admin API stopped");
        }
    });

    Ok(local_addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;
    use crate::transcript::SqlTranscriptStore;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    async fn router() -> Router {
        let store = SqlTranscriptStore::in_memory().await.unwrap();
        let state = AppState::new(&ProxyConfig::default(), Arc::new(store));
        setup_admin_router(state, "secret")
    }

    fn get(path: &str, auth: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(path);
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn requires_bearer_key() {
        let app = router().await;

        let missing = app.clone().oneshot(get("/admin/status", None)).await.unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = app
            .clone()
            .oneshot(get("/admin/status", Some("Bearer nope")))
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

        let ok = app
            .oneshot(get("/admin/status", Some("Bearer secret")))
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_reports_mode() {
        let response = router()
            .await
            .oneshot(get("/admin/status", Some("Bearer secret")))
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(json["proto"], "https");
        assert_eq!(json["xxe_test"], false);
        assert_eq!(json["active_tunnels"], 0);
    }

    #[tokio::test]
    async fn transcripts_start_empty() {
        let response = router()
            .await
            .oneshot(get("/admin/transcripts", Some("Bearer secret")))
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(json["capacity"], 256);
        assert_eq!(json["entries"].as_array().unwrap().len(), 0);
    }
}
