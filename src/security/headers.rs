//! Header manipulation for forwarded traffic.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers from requests and responses
//! - Maintain the X-Forwarded-For chain
//!
//! # Design Decisions
//! - Pure functions over a `HeaderMap`; no other side effects
//! - Header name matching is case-insensitive (`HeaderName` is normalized)
//! - Existing X-Forwarded-For values are kept verbatim, the peer is appended

use std::net::IpAddr;

use axum::http::header::{HeaderMap, HeaderName, HeaderValue};

/// Name of the forwarded-for chain header.
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Headers that only make sense between adjacent hops.
pub const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Returns true if `name` is one of the hop-by-hop headers.
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|hop| hop.eq_ignore_ascii_case(name))
}

/// Remove every hop-by-hop header, including all of its values.
pub fn strip_hop_headers(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP_HEADERS {
        // drops every value stored under the name
        headers.remove(name);
    }
}

/// Append `client_ip` to X-Forwarded-For.
///
/// An absent header becomes just the IP. Existing values, possibly spread
/// over several header lines, are joined with `", "` and the IP is appended
/// to form a single line.
pub fn append_forwarded_for(headers: &mut HeaderMap, client_ip: IpAddr) {
    let ip = client_ip.to_string();

    let mut chain: Vec<u8> = Vec::new();
    for prior in headers.get_all(&X_FORWARDED_FOR) {
        chain.extend_from_slice(prior.as_bytes());
        chain.extend_from_slice(b", ");
    }
    chain.extend_from_slice(ip.as_bytes());

    let value = match HeaderValue::from_bytes(&chain) {
        Ok(value) => value,
        Err(_) => match HeaderValue::from_str(&ip) {
            Ok(value) => value,
            Err(_) => return,
        },
    };
    headers.insert(X_FORWARDED_FOR, value);
}
