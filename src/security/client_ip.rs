//! Client IP extraction.
//!
//! Priority: trusted proxy-provided address, first `X-Forwarded-For` entry,
//! `X-Real-IP`, then the raw connection address.

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";

/// Client address already resolved by a trusted proxy layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustedClientIp(pub IpAddr);

pub fn extract_client_ip(
    headers: &HeaderMap,
    trusted: Option<IpAddr>,
    peer: Option<SocketAddr>,
) -> Option<String> {
    if let Some(ip) = trusted {
        return Some(ip.to_string());
    }

    let forwarded = headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return Some(ip.to_string());
    }

    let real_ip = headers
        .get(X_REAL_IP)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return Some(ip.to_string());
    }

    peer.map(|addr| addr.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> Option<SocketAddr> {
        Some("192.0.2.1:55000".parse().unwrap())
    }

    #[test]
    fn test_priority_order() {
        let mut headers = HeaderMap::new();
        headers.insert(X_REAL_IP, HeaderValue::from_static("198.51.100.9"));
        headers.insert(
            X_FORWARDED_FOR,
            HeaderValue::from_static("203.0.113.5, 10.0.0.1"),
        );
        let trusted: IpAddr = "198.51.100.77".parse().unwrap();

        assert_eq!(
            extract_client_ip(&headers, Some(trusted), peer()).as_deref(),
            Some("198.51.100.77")
        );
        assert_eq!(
            extract_client_ip(&headers, None, peer()).as_deref(),
            Some("203.0.113.5")
        );

        headers.remove(X_FORWARDED_FOR);
        assert_eq!(
            extract_client_ip(&headers, None, peer()).as_deref(),
            Some("198.51.100.9")
        );

        headers.remove(X_REAL_IP);
        assert_eq!(
            extract_client_ip(&headers, None, peer()).as_deref(),
            Some("192.0.2.1")
        );
        assert!(extract_client_ip(&headers, None, None).is_none());
    }
}
