//! Bounded in-memory view of recent transactions.
//!
//! Holds summaries only (no bodies) for the admin API. Oldest entries are
//! evicted once `capacity` is reached; capacity zero keeps nothing.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// One relayed transaction as seen by the diagnostic view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptSummary {
    /// Store id, absent when the request row could not be written.
    pub request_id: Option<String>,
    pub method: String,
    pub url: String,
    pub status: u16,
    pub request_bytes: usize,
    pub response_bytes: usize,
    /// Both rows were written.
    pub persisted: bool,
    /// The probe found the leak marker in the response.
    pub probe_alert: bool,
    /// Seconds since the Unix epoch.
    pub recorded_at: u64,
}

impl TranscriptSummary {
    pub fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

/// Fixed-capacity ring buffer of summaries.
#[derive(Debug)]
pub struct RecentTranscripts {
    capacity: usize,
    entries: Mutex<VecDeque<TranscriptSummary>>,
}

impl RecentTranscripts {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a summary, evicting the oldest when full.
    pub fn push(&self, summary: TranscriptSummary) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(summary);
    }

    /// Copy of the buffer, oldest first.
    pub fn snapshot(&self) -> Vec<TranscriptSummary> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
