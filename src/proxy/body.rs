//! Response body decoding by content type.

use axum::http::{header, HeaderMap};
use bytes::Bytes;
use serde_json::Value;

/// Upstream response body, decoded by content type.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
    Binary(Bytes),
    Empty,
}

impl ResponseBody {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseBody::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Re-encode for the wire.
    pub fn into_bytes(self) -> Bytes {
        match self {
            ResponseBody::Json(value) => serde_json::to_vec(&value)
                .map(Bytes::from)
                .unwrap_or_default(),
            ResponseBody::Text(text) => Bytes::from(text),
            ResponseBody::Binary(bytes) => bytes,
            ResponseBody::Empty => Bytes::new(),
        }
    }
}

fn is_json(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json")
}

/// JSON → structured value, `text/*` → string, anything else → bytes.
///
/// A body that claims JSON but does not parse is kept as bytes.
pub fn parse_body(headers: &HeaderMap, bytes: Bytes) -> ResponseBody {
    if bytes.is_empty() {
        return ResponseBody::Empty;
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if is_json(content_type) {
        match serde_json::from_slice(&bytes) {
            Ok(value) => ResponseBody::Json(value),
            Err(e) => {
                tracing::debug!(error = %e, "Upstream sent invalid JSON, keeping raw body");
                ResponseBody::Binary(bytes)
            }
        }
    } else if content_type.trim_start().to_ascii_lowercase().starts_with("text/") {
        ResponseBody::Text(String::from_utf8_lossy(&bytes).into_owned())
    } else {
        ResponseBody::Binary(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn with_type(content_type: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        headers
    }

    #[test]
    fn test_json() {
        let body = parse_body(
            &with_type("application/json; charset=utf-8"),
            Bytes::from_static(br#"{"farm":1}"#),
        );
        assert_eq!(body.as_json(), Some(&serde_json::json!({"farm": 1})));

        let problem = parse_body(
            &with_type("application/problem+json"),
            Bytes::from_static(br#"{"title":"x"}"#),
        );
        assert!(problem.as_json().is_some());
    }

    #[test]
    fn test_invalid_json_falls_back_to_bytes() {
        let body = parse_body(&with_type("application/json"), Bytes::from_static(b"{oops"));
        assert_eq!(body, ResponseBody::Binary(Bytes::from_static(b"{oops")));
    }

    #[test]
    fn test_text_and_binary() {
        let text = parse_body(&with_type("text/plain"), Bytes::from_static(b"ok"));
        assert_eq!(text.as_text(), Some("ok"));

        let binary = parse_body(&with_type("image/png"), Bytes::from_static(&[0x89, 0x50]));
        assert!(matches!(binary, ResponseBody::Binary(_)));

        let untyped = parse_body(&HeaderMap::new(), Bytes::from_static(b"raw"));
        assert!(matches!(untyped, ResponseBody::Binary(_)));

        assert_eq!(parse_body(&with_type("application/json"), Bytes::new()), ResponseBody::Empty);
    }
}
