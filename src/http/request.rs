//! Inbound request model.
//!
//! # Responsibilities
//! - Buffer the client body exactly once, up to a size limit
//! - Resolve the absolute target URL of a forward-proxy request
//! - Build the forwarded copy sent to the origin
//!
//! # Design Decisions
//! - The transport body is consumed in `read`; every later consumer
//!   (forwarding, transcript) uses the buffered `Bytes`
//! - Request extensions (header casing) travel with the forwarded copy

use axum::body::{Body, Bytes};
use axum::http::{header, Extensions, HeaderMap, Method, Request, Uri, Version};
use http_body_util::LengthLimitError;
use thiserror::Error;

use crate::http::relay::RelayError;

/// Failure while buffering a body.
#[derive(Debug, Error)]
pub enum BodyError {
    #[error("body exceeds {0} bytes")]
    TooLarge(usize),

    #[error("failed to read body: {0}")]
    Read(#[source] axum::Error),
}

/// A client request with its body fully buffered.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InboundRequest {
    /// Consume `request`, reading its body once.
    ///
    /// Returns the buffered request and the transport extensions, which the
    /// caller hands back to [`InboundRequest::to_forward`].
    pub async fn read(
        request: Request<Body>,
        limit: usize,
    ) -> Result<(Self, Extensions), BodyError> {
        let (parts, body) = request.into_parts();
        let body = read_body(body, limit).await?;

        Ok((
            Self {
                method: parts.method,
                uri: parts.uri,
                headers: parts.headers,
                body,
            },
            parts.extensions,
        ))
    }

    /// Raw `Cookie` header lines, in arrival order.
    pub fn cookie_lines(&self) -> Vec<&str> {
        header_lines(&self.headers, header::COOKIE)
    }

    /// Absolute URL of the request as received (after target resolution).
    pub fn url(&self) -> String {
        self.uri.to_string()
    }

    /// Replace an origin-form target with an absolute URL built from `Host`.
    ///
    /// Forward-proxy clients send absolute-form targets; anything else is
    /// treated as a plain-http request to the host named in `Host`.
    pub fn resolve_target(&mut self) -> Result<(), RelayError> {
        if self.uri.scheme().is_some() && self.uri.authority().is_some() {
            return Ok(());
        }

        let host = self
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .filter(|h| !h.is_empty())
            .ok_or(RelayError::MissingHost)?;

        let path = self
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        self.uri = format!("http://{host}{path}")
            .parse()
            .map_err(|_| RelayError::InvalidTarget(host.to_string()))?;
        Ok(())
    }

    /// Build the request sent to the origin.
    ///
    /// Headers, method and URL are copied unchanged; `body` replaces the
    /// client body. The stale `Content-Length` is dropped so the client
    /// recomputes it from `body`.
    pub fn to_forward(&self, body: Bytes, extensions: Extensions) -> Request<Body> {
        let mut headers = self.headers.clone();
        headers.remove(header::CONTENT_LENGTH);

        let mut forwarded = Request::new(Body::from(body));
        *forwarded.method_mut() = self.method.clone();
        *forwarded.uri_mut() = self.uri.clone();
        *forwarded.version_mut() = Version::HTTP_11;
        *forwarded.headers_mut() = headers;
        *forwarded.extensions_mut() = extensions;
        forwarded
    }
}

/// Buffer a body of at most `limit` bytes.
pub(crate) async fn read_body(body: Body, limit: usize) -> Result<Bytes, BodyError> {
    axum::body::to_bytes(body, limit).await.map_err(|e| {
        if is_length_limit(&e) {
            BodyError::TooLarge(limit)
        } else {
            BodyError::Read(e)
        }
    })
}

fn is_length_limit(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<LengthLimitError>() {
            return true;
        }
        current = e.source();
    }
    false
}

pub(crate) fn header_lines(headers: &HeaderMap, name: header::HeaderName) -> Vec<&str> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str, host: Option<&str>) -> InboundRequest {
        let mut headers = HeaderMap::new();
        if let Some(host) = host {
            headers.insert(header::HOST, host.parse().unwrap());
        }
        InboundRequest {
            method: Method::GET,
            uri: uri.parse().unwrap(),
            headers,
            body: Bytes::new(),
        }
    }

    #[tokio::test]
    async fn read_buffers_body_and_keeps_extensions() {
        let mut req = Request::builder()
            .method(Method::POST)
            .uri("http://example.com/submit")
            .header("cookie", "a=1")
            .header("cookie", "b=2")
            .body(Body::from("payload"))
            .unwrap();
        req.extensions_mut().insert(42u32);

        let (inbound, extensions) = InboundRequest::read(req, 1024).await.unwrap();
        assert_eq!(inbound.body, "payload");
        assert_eq!(inbound.cookie_lines(), vec!["a=1", "b=2"]);
        assert_eq!(extensions.get::<u32>(), Some(&42));
    }

    #[tokio::test]
    async fn read_rejects_oversized_body() {
        let req = Request::builder()
            .uri("http://example.com/")
            .body(Body::from(vec![0u8; 64]))
            .unwrap();

        let err = InboundRequest::read(req, 16).await.unwrap_err();
        assert!(matches!(err, BodyError::TooLarge(16)));
    }

    #[test]
    fn absolute_target_is_untouched() {
        let mut req = request("http://example.com/a?b=c", Some("other.test"));
        req.resolve_target().unwrap();
        assert_eq!(req.url(), "http://example.com/a?b=c");
    }

    #[test]
    fn origin_form_uses_host_header() {
        let mut req = request("/index.html?x=1", Some("example.com:8080"));
        req.resolve_target().unwrap();
        assert_eq!(req.url(), "http://example.com:8080/index.html?x=1");
    }

    #[test]
    fn origin_form_without_host_fails() {
        let mut req = request("/", None);
        assert!(matches!(req.resolve_target(), Err(RelayError::MissingHost)));
    }

    #[test]
    fn forwarded_copy_swaps_body_and_drops_length() {
        let mut req = request("http://example.com/", None);
        req.method = Method::PUT;
        req.headers.insert(header::CONTENT_LENGTH, "3".parse().unwrap());
        req.headers.insert("x-keep", "yes".parse().unwrap());
        req.body = Bytes::from_static(b"abc");

        let forwarded = req.to_forward(Bytes::from_static(b"replaced"), Extensions::new());
        assert_eq!(forwarded.method(), Method::PUT);
        assert_eq!(forwarded.uri(), "http://example.com/");
        assert_eq!(forwarded.headers()["x-keep"], "yes");
        assert!(!forwarded.headers().contains_key(header::CONTENT_LENGTH));
        // the buffered copy is untouched
        assert_eq!(req.body, "abc");
    }
}
