//! Logging utility functions for proxy operations

use crate::log_debug;
use crate::proxy::core::ProxyError;
use hyper::{Method, StatusCode};
use std::net::IpAddr;
use std::time::Duration;
use tracing::{error, info, warn};

/// Log incoming request information
pub fn log_incoming_request(method: &Method, path: &str, client_ip: &IpAddr) {
    log_debug!("📥 {} {} from {}", method, path, client_ip);
}

/// Log a request turned away before forwarding
pub fn log_rejection(method: &Method, path: &str, client_ip: &IpAddr, error: &ProxyError) {
    match error {
        ProxyError::TooManyRequests => {
            warn!("🚦 {} {} from {} → 429 rate limited", method, path, client_ip);
        }
        ProxyError::DomainNotAllowed(host) => {
            warn!("⛔ {} {} from {} → 403 domain '{}' not allowed", method, path, client_ip, host);
        }
        other => {
            log_debug!("🚫 {} {} from {} → {} {}", method, path, client_ip, other.status(), other.kind());
        }
    }
}

/// Log forwarding request details
pub fn log_forwarding_request(method: &Method, host: &str, header_count: usize, body_len: usize) {
    info!("🔄 Forwarding {} to {}", method, host);
    log_debug!(
        "🔄 FORWARDING REQUEST:\n  Method: {}\n  Host: {}\n  Headers: {}\n  Body Size: {} bytes",
        method, host, header_count, body_len
    );
}

/// Log upstream success
pub fn log_upstream_success(method: &Method, host: &str, status: StatusCode, elapsed: Duration) {
    info!("✅ {} {} → {} ({}ms)", method, host, status, elapsed.as_millis());
}

/// Log upstream failure. The cause stays in the log, never in the response.
pub fn log_upstream_failure(method: &Method, host: &str, elapsed: Duration, cause: &dyn std::fmt::Display) {
    error!("❌ {} {} → upstream error ({}ms): {}", method, host, elapsed.as_millis(), cause);
}
