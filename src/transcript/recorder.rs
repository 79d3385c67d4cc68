//! Transcript capture for relayed transactions.
//!
//! Writes the request row, then the response row linked to it, and mirrors
//! a summary into the in-memory view. The caller waits for one attempt at
//! each stage only; a transient failure is retried in a background task,
//! resuming from the stage that failed.

use std::sync::Arc;

use thiserror::Error;

use crate::http::request::InboundRequest;
use crate::http::response::OutboundResponse;
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::{retry_transient, RetryPolicy};
use crate::transcript::recent::{RecentTranscripts, TranscriptSummary};
use crate::transcript::store::{RequestId, StoreError, TranscriptStore};

/// Persistence failure for one stage of a transaction.
#[derive(Debug, Error)]
pub enum TranscriptError {
    #[error("failed to record request: {0}")]
    Request(#[source] StoreError),

    #[error("failed to record response for request {id}: {source}")]
    Response {
        id: RequestId,
        #[source]
        source: StoreError,
    },
}

impl TranscriptError {
    fn is_transient(&self) -> bool {
        match self {
            TranscriptError::Request(e) => e.is_transient(),
            TranscriptError::Response { source, .. } => source.is_transient(),
        }
    }

    fn stage(&self) -> &'static str {
        match self {
            TranscriptError::Request(_) => "request",
            TranscriptError::Response { .. } => "response",
        }
    }
}

/// Result of the inline recording attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// Both rows are stored.
    Stored(RequestId),
    /// A transient failure was handed to a background retry.
    Retrying,
}

/// Shared recorder; cheap to clone.
#[derive(Clone)]
pub struct TranscriptRecorder {
    store: Arc<dyn TranscriptStore>,
    retry: RetryPolicy,
    recent: Arc<RecentTranscripts>,
}

impl TranscriptRecorder {
    pub fn new(
        store: Arc<dyn TranscriptStore>,
        retry: RetryPolicy,
        recent: Arc<RecentTranscripts>,
    ) -> Self {
        Self {
            store,
            retry,
            recent,
        }
    }

    pub fn recent(&self) -> &Arc<RecentTranscripts> {
        &self.recent
    }

    /// Persist one request/response pair.
    ///
    /// The response row is only attempted once the request row exists. Each
    /// stage is tried once before this returns; no backoff delay is spent
    /// here. A summary is pushed to the recent view once the outcome is
    /// final, which for a retried pair happens in the background.
    pub async fn record(
        &self,
        request: &InboundRequest,
        response: &OutboundResponse,
        probe_alert: bool,
    ) -> Result<Recorded, TranscriptError> {
        let failed = match self.persist(request, response, RetryPolicy::none(), None).await {
            Ok(id) => {
                self.summarize(request, response, probe_alert, &Ok(id));
                return Ok(Recorded::Stored(id));
            }
            Err(e) => e,
        };

        if !failed.is_transient() || self.retry.max_attempts <= 1 {
            metrics::record_transcript_failure(failed.stage());
            self.summarize(request, response, probe_alert, &Err(&failed));
            return Err(failed);
        }

        tracing::warn!(error = %failed, "Transcript write deferred to background retry");
        let recorder = self.clone();
        let request = request.clone();
        let response = response.clone();
        tokio::spawn(async move {
            let resume_from = match failed {
                TranscriptError::Request(_) => None,
                TranscriptError::Response { id, .. } => Some(id),
            };
            tokio::time::sleep(calculate_backoff(
                1,
                recorder.retry.base_delay_ms,
                recorder.retry.max_delay_ms,
            ))
            .await;

            // the inline attempt counts against the budget
            let remaining = RetryPolicy {
                max_attempts: recorder.retry.max_attempts - 1,
                ..recorder.retry
            };
            let outcome = recorder
                .persist(&request, &response, remaining, resume_from)
                .await;
            if let Err(e) = &outcome {
                metrics::record_transcript_failure(e.stage());
                tracing::error!(
                    persistence_error = true,
                    url = %request.uri,
                    error = %e,
                    "Failed to record transcript after retries"
                );
            }
            let outcome = outcome.as_ref().map(|id| *id);
            recorder.summarize(&request, &response, probe_alert, &outcome);
        });

        Ok(Recorded::Retrying)
    }

    fn summarize(
        &self,
        request: &InboundRequest,
        response: &OutboundResponse,
        probe_alert: bool,
        outcome: &Result<RequestId, &TranscriptError>,
    ) {
        let (request_id, persisted) = match outcome {
            Ok(id) => (Some(id.to_string()), true),
            Err(TranscriptError::Response { id, .. }) => (Some(id.to_string()), false),
            Err(TranscriptError::Request(_)) => (None, false),
        };
        self.recent.push(TranscriptSummary {
            request_id,
            method: request.method.to_string(),
            url: request.url(),
            status: response.status.as_u16(),
            request_bytes: request.body.len(),
            response_bytes: response.body.len(),
            persisted,
            probe_alert,
            recorded_at: TranscriptSummary::now_secs(),
        });
    }

    /// Write both rows under `policy`, skipping the request row when
    /// `resume` already names it.
    async fn persist(
        &self,
        request: &InboundRequest,
        response: &OutboundResponse,
        policy: RetryPolicy,
        resume: Option<RequestId>,
    ) -> Result<RequestId, TranscriptError> {
        let id = match resume {
            Some(id) => id,
            None => retry_transient(policy, "record_request", StoreError::is_transient, || {
                self.store.record_request(request)
            })
            .await
            .map_err(TranscriptError::Request)?,
        };

        retry_transient(policy, "record_response", StoreError::is_transient, || {
            self.store.record_response(id, response)
        })
        .await
        .map_err(|source| TranscriptError::Response { id, source })?;

        Ok(id)
    }
}
