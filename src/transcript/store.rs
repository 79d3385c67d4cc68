//! Durable transcript storage.
//!
//! # Responsibilities
//! - Persist each request and hand back its generated id
//! - Persist the paired response, linked to an existing request only
//! - Read records back for audit
//!
//! # Design Decisions
//! - One transaction per operation; a failure leaves no partial row
//! - The parent request is checked inside the response transaction, and the
//!   foreign key backs that check up
//! - The pool is the only shared state; concurrent callers never share a
//!   cursor or a transaction

use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use uuid::Uuid;

use crate::config::TranscriptConfig;
use crate::http::request::InboundRequest;
use crate::http::response::OutboundResponse;
use crate::transcript::format::{body_text, format_cookies, format_headers};

/// SQLite's primary result code for a busy database.
const SQLITE_BUSY: &str = "5";

/// Identifier of a persisted request, assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generate a new random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Errors from transcript persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A response was recorded against a request that was never stored.
    #[error("request {0} does not exist")]
    UnknownRequest(RequestId),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Whether retrying the same operation could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::UnknownRequest(_) => false,
            StoreError::Database(e) => match e {
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
                sqlx::Error::Database(db) => db.code().as_deref() == Some(SQLITE_BUSY),
                _ => false,
            },
        }
    }
}

/// Persistence seam used by the relay.
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    /// Persist a request; the returned id is durable when this resolves.
    async fn record_request(&self, request: &InboundRequest) -> Result<RequestId, StoreError>;

    /// Persist the response paired with `id`.
    ///
    /// Fails with [`StoreError::UnknownRequest`] if `id` was never recorded.
    async fn record_response(
        &self,
        id: RequestId,
        response: &OutboundResponse,
    ) -> Result<(), StoreError>;
}

/// A stored request row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RequestRecord {
    pub id: String,
    pub method: String,
    pub url: String,
    pub headers: String,
    pub cookies: String,
    pub body: String,
    pub created_at: i64,
}

/// A stored response row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ResponseRecord {
    pub request_id: String,
    pub status: i64,
    pub headers: String,
    pub cookies: String,
    pub body: String,
    pub created_at: i64,
}

const CREATE_REQUESTS: &str = "CREATE TABLE IF NOT EXISTS requests (
    id TEXT PRIMARY KEY NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    headers TEXT NOT NULL,
    cookies TEXT NOT NULL,
    body TEXT NOT NULL,
    created_at INTEGER NOT NULL
)";

const CREATE_RESPONSES: &str = "CREATE TABLE IF NOT EXISTS responses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    request_id TEXT NOT NULL REFERENCES requests(id),
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    cookies TEXT NOT NULL,
    body TEXT NOT NULL,
    created_at INTEGER NOT NULL
)";

const CREATE_RESPONSES_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS responses_request_id ON responses(request_id)";

/// Transcript store backed by an sqlx SQLite pool.
#[derive(Debug, Clone)]
pub struct SqlTranscriptStore {
    pool: SqlitePool,
}

impl SqlTranscriptStore {
    /// Open the database named in `config` and create the schema.
    pub async fn connect(config: &TranscriptConfig) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&config.database_url)?.foreign_keys(true);

        // every connection to ":memory:" is its own database
        let max_connections = if config.database_url.contains(":memory:") {
            1
        } else {
            config.max_connections
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        tracing::info!(
            database_url = %config.database_url,
            max_connections,
            "Transcript database connected"
        );

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Private in-memory database, mostly for tests.
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect(&TranscriptConfig {
            database_url: "sqlite::memory:".to_string(),
            ..TranscriptConfig::default()
        })
        .await
    }

    /// Create the tables if they do not exist.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for statement in [CREATE_REQUESTS, CREATE_RESPONSES, CREATE_RESPONSES_INDEX] {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn fetch_request(&self, id: RequestId) -> Result<Option<RequestRecord>, StoreError> {
        let record = sqlx::query_as::<_, RequestRecord>(
            "SELECT id, method, url, headers, cookies, body, created_at FROM requests WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn fetch_responses(&self, id: RequestId) -> Result<Vec<ResponseRecord>, StoreError> {
        let records = sqlx::query_as::<_, ResponseRecord>(
            "SELECT request_id, status, headers, cookies, body, created_at
             FROM responses WHERE request_id = ? ORDER BY id",
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    pub async fn count_responses(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM responses")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl TranscriptStore for SqlTranscriptStore {
    async fn record_request(&self, request: &InboundRequest) -> Result<RequestId, StoreError> {
        let id = RequestId::new();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO requests (id, method, url, headers, cookies, body, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(request.method.as_str())
        .bind(request.url())
        .bind(format_headers(&request.headers))
        .bind(format_cookies(&request.cookie_lines()))
        .bind(body_text(&request.body))
        .bind(unix_now())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::trace!(request_id = %id, "Request recorded");
        Ok(id)
    }

    async fn record_response(
        &self,
        id: RequestId,
        response: &OutboundResponse,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let parent: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM requests WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
        if parent.is_none() {
            // dropping `tx` rolls back
            return Err(StoreError::UnknownRequest(id));
        }

        sqlx::query(
            "INSERT INTO responses (request_id, status, headers, cookies, body, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(i64::from(response.status.as_u16()))
        .bind(format_headers(&response.headers))
        .bind(format_cookies(&response.cookie_lines()))
        .bind(body_text(&response.body))
        .bind(unix_now())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e {
                if db.is_foreign_key_violation() {
                    return StoreError::UnknownRequest(id);
                }
            }
            StoreError::Database(e)
        })?;
        tx.commit().await?;

        tracing::trace!(request_id = %id, status = response.status.as_u16(), "Response recorded");
        Ok(())
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::http::{HeaderMap, Method, StatusCode};

    fn request() -> InboundRequest {
        let mut headers = HeaderMap::new();
        headers.append("accept", "text/html".parse().unwrap());
        headers.append("cookie", "sid=abc".parse().unwrap());
        InboundRequest {
            method: Method::POST,
            uri: "http://example.com/login".parse().unwrap(),
            headers,
            body: Bytes::from_static(b"user=root"),
        }
    }

    fn response() -> OutboundResponse {
        let mut headers = HeaderMap::new();
        headers.append("set-cookie", "sid=def".parse().unwrap());
        OutboundResponse {
            status: StatusCode::FOUND,
            headers,
            body: Bytes::from_static(b"redirecting"),
        }
    }

    #[tokio::test]
    async fn request_then_response_are_linked() {
        let store = SqlTranscriptStore::in_memory().await.unwrap();

        let id = store.record_request(&request()).await.unwrap();
        store.record_response(id, &response()).await.unwrap();

        let stored = store.fetch_request(id).await.unwrap().unwrap();
        assert_eq!(stored.method, "POST");
        assert_eq!(stored.url, "http://example.com/login");
        assert_eq!(stored.headers, "Accept: \"text/html\"\nCookie: \"sid=abc\"\n");
        assert_eq!(stored.cookies, "sid=abc");
        assert_eq!(stored.body, "user=root");

        let responses = store.fetch_responses(id).await.unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].status, 302);
        assert_eq!(responses[0].cookies, "sid=def");
        assert_eq!(responses[0].body, "redirecting");
    }

    #[tokio::test]
    async fn response_for_unknown_request_is_rejected() {
        let store = SqlTranscriptStore::in_memory().await.unwrap();
        store.record_request(&request()).await.unwrap();

        let missing = RequestId::new();
        let err = store.record_response(missing, &response()).await.unwrap_err();

        assert!(matches!(err, StoreError::UnknownRequest(id) if id == missing));
        assert!(!err.is_transient());
        assert_eq!(store.count_responses().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let store = SqlTranscriptStore::in_memory().await.unwrap();
        let a = store.record_request(&request()).await.unwrap();
        let b = store.record_request(&request()).await.unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn request_id_round_trips_through_text() {
        let id = RequestId::new();
        assert_eq!(id.to_string().parse::<RequestId>().unwrap(), id);
    }
}
