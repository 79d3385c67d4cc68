//! Human-auditable text encoding for transcript columns.
//!
//! Headers are stored one name per line, all of its values quoted on that
//! line: `Content-Type: "text/html"`. Cookies are the raw cookie header
//! lines joined by a single space.

use axum::http::HeaderMap;

/// Encode a header multimap, one line per distinct name.
pub fn format_headers(headers: &HeaderMap) -> String {
    let mut out = String::new();
    for name in headers.keys() {
        out.push_str(&canonical_name(name.as_str()));
        out.push(':');
        for value in headers.get_all(name) {
            out.push_str(" \"");
            out.push_str(&String::from_utf8_lossy(value.as_bytes()));
            out.push('"');
        }
        out.push('\n');
    }
    out
}

/// Encode raw cookie header lines.
pub fn format_cookies(lines: &[&str]) -> String {
    lines.join(" ")
}

/// Body as stored text.
pub fn body_text(body: &[u8]) -> String {
    String::from_utf8_lossy(body).into_owned()
}

/// `x-forwarded-for` → `X-Forwarded-For`.
fn canonical_name(name: &str) -> String {
    name.split('-')
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}
