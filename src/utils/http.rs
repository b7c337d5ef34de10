//! HTTP utility functions

use bytes::Bytes;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION};
use serde_json::json;
use std::net::{IpAddr, SocketAddr};
use tracing::debug;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
pub const X_TARGET_URL: &str = "x-target-url";

/// Headers that identify the caller to the upstream
pub const OUTBOUND_STRIPPED_HEADERS: &[&str] = &["cookie", "referer", "origin"];

/// Upstream headers that must not reach the caller
pub const INBOUND_STRIPPED_HEADERS: &[&str] = &["set-cookie", "x-powered-by"];

const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Hardening headers attached to responses the proxy generates itself
const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "SAMEORIGIN"),
    ("referrer-policy", "no-referrer"),
    ("x-dns-prefetch-control", "off"),
    ("cross-origin-opener-policy", "same-origin"),
    ("cross-origin-resource-policy", "same-origin"),
    ("strict-transport-security", "max-age=15552000; includeSubDomains"),
];

/// Check if a header is a hop-by-hop header
pub fn is_hop_by_hop_header(name: &str) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.to_lowercase().as_str())
}

/// Remove every value of each named header. `HeaderMap` lookups are
/// case-insensitive.
pub fn strip_headers(headers: &mut HeaderMap, names: &[&str]) -> usize {
    let mut removed = 0;
    for name in names {
        if headers.remove(*name).is_some() {
            removed += 1;
        }
    }
    removed
}

/// Remove hop-by-hop headers, including any listed in `Connection`
pub fn remove_hop_by_hop_headers(headers: &mut HeaderMap) {
    let listed: Vec<String> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|token| token.trim().to_lowercase())
        .filter(|token| !token.is_empty())
        .collect();

    let fixed: Vec<HeaderName> = headers
        .keys()
        .filter(|name| is_hop_by_hop_header(name.as_str()))
        .cloned()
        .collect();

    for name in fixed {
        headers.remove(name);
    }
    for name in &listed {
        headers.remove(name.as_str());
    }
}

/// Set (never append) a header from a string value
pub fn set_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(HeaderName::from_static(name), value);
        }
        Err(_) => debug!("Dropping unrepresentable value for header {}", name),
    }
}

pub fn apply_security_headers(headers: &mut HeaderMap) {
    for (name, value) in SECURITY_HEADERS {
        headers.insert(
            HeaderName::from_static(*name),
            HeaderValue::from_static(*value),
        );
    }
}

/// `{"error": "<message>"}`
pub fn json_error_body(message: &str) -> Bytes {
    Bytes::from(json!({ "error": message }).to_string())
}

/// Address the request is attributed to. With `trust_proxy`, the leftmost
/// parseable entry of `X-Forwarded-For` wins over the socket peer.
pub fn client_ip(remote_addr: SocketAddr, headers: &HeaderMap, trust_proxy: bool) -> IpAddr {
    if trust_proxy {
        let forwarded = headers
            .get(X_FORWARDED_FOR)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .and_then(|first| first.trim().parse::<IpAddr>().ok());
        if let Some(ip) = forwarded {
            return ip;
        }
    }
    remote_addr.ip()
}

/// Scheme the caller used to reach the proxy
pub fn forwarded_proto(headers: &HeaderMap, trust_proxy: bool) -> String {
    if trust_proxy {
        let proto = headers
            .get(X_FORWARDED_PROTO)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(|value| value.trim().to_lowercase());
        if let Some(proto) = proto.filter(|p| p == "http" || p == "https") {
            return proto;
        }
    }
    "http".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(*value));
        }
        map
    }

    #[test]
    fn test_hop_by_hop_headers() {
        assert!(is_hop_by_hop_header("Connection"));
        assert!(is_hop_by_hop_header("transfer-encoding"));
        assert!(is_hop_by_hop_header("Trailer"));
        assert!(!is_hop_by_hop_header("trailers"));
        assert!(!is_hop_by_hop_header("content-type"));
        assert!(!is_hop_by_hop_header("x-forwarded-for"));
    }

    #[test]
    fn test_strip_headers_removes_all_values() {
        let mut map = headers(&[
            ("set-cookie", "a=1"),
            ("set-cookie", "b=2"),
            ("x-powered-by", "Express"),
            ("content-type", "text/plain"),
        ]);

        let removed = strip_headers(&mut map, INBOUND_STRIPPED_HEADERS);

        assert_eq!(removed, 2);
        assert!(map.get("set-cookie").is_none());
        assert!(map.get("x-powered-by").is_none());
        assert_eq!(map.get("content-type").unwrap(), "text/plain");
    }

    #[test]
    fn test_remove_hop_by_hop_honours_connection_tokens() {
        let mut map = headers(&[
            ("connection", "keep-alive, x-private-hop"),
            ("x-private-hop", "1"),
            ("keep-alive", "timeout=5"),
            ("trailer", "expires"),
            ("accept", "*/*"),
        ]);

        remove_hop_by_hop_headers(&mut map);

        assert_eq!(map.len(), 1);
        assert!(map.contains_key("accept"));
    }

    #[test]
    fn test_client_ip_ignores_forwarded_for_unless_trusted() {
        let remote: SocketAddr = "10.0.0.7:5000".parse().unwrap();
        let map = headers(&[("x-forwarded-for", "203.0.113.9, 10.0.0.1")]);

        assert_eq!(client_ip(remote, &map, false), remote.ip());
        assert_eq!(client_ip(remote, &map, true), "203.0.113.9".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_client_ip_falls_back_on_garbage() {
        let remote: SocketAddr = "10.0.0.7:5000".parse().unwrap();
        let map = headers(&[("x-forwarded-for", "not-an-ip")]);
        assert_eq!(client_ip(remote, &map, true), remote.ip());
    }

    #[test]
    fn test_forwarded_proto() {
        let map = headers(&[("x-forwarded-proto", "HTTPS")]);
        assert_eq!(forwarded_proto(&map, true), "https");
        assert_eq!(forwarded_proto(&map, false), "http");
        assert_eq!(forwarded_proto(&HeaderMap::new(), true), "http");
    }

    #[test]
    fn test_json_error_body() {
        let body = json_error_body("Missing target URL");
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "Missing target URL");
    }
}
