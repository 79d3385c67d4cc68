//! Origin response model.
//!
//! # Responsibilities
//! - Buffer the origin body exactly once, up to a size limit
//! - Strip hop-by-hop headers before the response reaches the client
//! - Rebuild a client response that is byte-identical apart from that strip
//!
//! # Design Decisions
//! - Buffering lets the transcript and the probe read the body that is
//!   streamed back, without a second read from the origin connection

use axum::body::{Body, Bytes};
use axum::http::{header, Extensions, HeaderMap, Response, StatusCode};
use hyper::body::Incoming;

use crate::http::request::{header_lines, read_body, BodyError};
use crate::security::strip_hop_headers;

/// An origin response with its body fully buffered.
#[derive(Debug, Clone)]
pub struct OutboundResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl OutboundResponse {
    /// Consume an origin response, reading its body once and stripping
    /// hop-by-hop headers.
    pub async fn read(
        response: Response<Incoming>,
        limit: usize,
    ) -> Result<(Self, Extensions), BodyError> {
        let (parts, body) = response.into_parts();
        let body = read_body(Body::new(body), limit).await?;

        let mut headers = parts.headers;
        strip_hop_headers(&mut headers);

        Ok((
            Self {
                status: parts.status,
                headers,
                body,
            },
            parts.extensions,
        ))
    }

    /// Raw `Set-Cookie` header lines, in arrival order.
    pub fn cookie_lines(&self) -> Vec<&str> {
        header_lines(&self.headers, header::SET_COOKIE)
    }

    /// Response relayed to the client.
    pub fn into_response(self, extensions: Extensions) -> Response<Body> {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        *response.extensions_mut() = extensions;
        response
    }
}
