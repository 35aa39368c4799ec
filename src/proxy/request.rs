//! Value records for one proxied call.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use http_body_util::Full;
use url::Url;

use crate::error::{GatewayError, Result};
use crate::load_balancer::SelectionContext;
use crate::proxy::body::ResponseBody;
use crate::security::headers::filter_hop_by_hop;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Hook applied to the outbound request before the first attempt.
pub type RequestTransform = Arc<dyn Fn(&mut ProxyRequest) + Send + Sync>;

/// Hook applied to the decoded upstream response.
pub type ResponseTransform = Arc<dyn Fn(ProxyResponse) -> ProxyResponse + Send + Sync>;

/// Caller's description of one proxied call. `None` fields fall back to
/// the service's configuration, then gateway defaults.
#[derive(Clone, Default)]
pub struct ProxyRequestConfig {
    pub service: String,
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,

    pub client_ip: Option<String>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,

    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
    pub strip_prefix: Option<String>,
    pub add_prefix: Option<String>,
    pub preserve_host: Option<bool>,

    pub transform_request: Option<RequestTransform>,
    pub transform_response: Option<ResponseTransform>,
}

impl ProxyRequestConfig {
    pub fn new(service: impl Into<String>, method: Method, path: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method,
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn get(service: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(service, Method::GET, path)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }

    pub fn with_request_transform(
        mut self,
        f: impl Fn(&mut ProxyRequest) + Send + Sync + 'static,
    ) -> Self {
        self.transform_request = Some(Arc::new(f));
        self
    }

    pub fn with_response_transform(
        mut self,
        f: impl Fn(ProxyResponse) -> ProxyResponse + Send + Sync + 'static,
    ) -> Self {
        self.transform_response = Some(Arc::new(f));
        self
    }

    pub fn selection_context(&self) -> SelectionContext {
        SelectionContext {
            client_ip: self.client_ip.clone(),
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
        }
    }
}

impl fmt::Debug for ProxyRequestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyRequestConfig")
            .field("service", &self.service)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("body_len", &self.body.as_ref().map(Bytes::len))
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .finish_non_exhaustive()
    }
}

/// Fully resolved outbound request, as seen by the request transform.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyRequest {
    pub(crate) fn to_http(&self) -> Result<Request<Full<Bytes>>> {
        let mut builder = Request::builder()
            .method(self.method.clone())
            .uri(self.url.as_str());
        if let Some(headers) = builder.headers_mut() {
            *headers = self.headers.clone();
        }
        builder
            .body(Full::new(self.body.clone()))
            .map_err(|e| GatewayError::InvalidRequest(e.to_string()))
    }
}

/// Decoded upstream response.
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
    /// Upstream bytes as received. Relayed verbatim when present; cleared
    /// once a response transform replaces `body`.
    pub raw_body: Option<Bytes>,
    pub response_time: Duration,
    /// Instance that served the call.
    pub instance_id: String,
}

impl IntoResponse for ProxyResponse {
    fn into_response(self) -> Response {
        let mut headers = filter_hop_by_hop(&self.headers);
        // The body may have been re-encoded.
        headers.remove(header::CONTENT_LENGTH);

        let bytes = match self.raw_body {
            Some(raw) => raw,
            None => self.body.into_bytes(),
        };
        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = self.status;
        *response.headers_mut() = headers;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_builder_and_context() {
        let config = ProxyRequestConfig::get("farm-service", "/farms")
            .with_query("page", "2")
            .with_client_ip("203.0.113.7")
            .with_retries(0);
        assert_eq!(config.method, Method::GET);
        assert_eq!(config.retries, Some(0));
        assert_eq!(
            config.selection_context().client_ip.as_deref(),
            Some("203.0.113.7")
        );
        assert!(format!("{config:?}").contains("farm-service"));
    }

    #[tokio::test]
    async fn test_into_response_reencodes_body() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("999"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));

        let response = ProxyResponse {
            status: StatusCode::CREATED,
            headers,
            body: ResponseBody::Json(serde_json::json!({"id": 7})),
            raw_body: None,
            response_time: Duration::from_millis(3),
            instance_id: "A".into(),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(response.headers().get(header::TRANSFER_ENCODING).is_none());
        assert_ne!(
            response.headers().get(header::CONTENT_LENGTH).map(|v| v.as_bytes()),
            Some(&b"999"[..])
        );
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], br#"{"id":7}"#);
    }

    #[tokio::test]
    async fn test_into_response_relays_raw_bytes() {
        let raw = Bytes::from_static(br#"{"zeta":1,"alpha":2,"id":12345678901234567890123}"#);
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let body = crate::proxy::body::parse_body(&headers, raw.clone());
        assert!(body.as_json().is_some());

        let response = ProxyResponse {
            status: StatusCode::OK,
            headers,
            body,
            raw_body: Some(raw.clone()),
            response_time: Duration::from_millis(3),
            instance_id: "A".into(),
        }
        .into_response();

        let relayed = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(relayed, raw);
    }
}
