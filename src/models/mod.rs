use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::utils::now;

// One record per handled request, emitted through the logging sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLog {
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub client_ip: IpAddr,
    pub status_code: u16,
    pub duration_ms: u64,

    // Only set once the target has been resolved
    pub target_host: Option<String>,

    // Error kind for rejected or failed requests
    pub error: Option<String>,
    pub user_agent: Option<String>,
}

impl AccessLog {
    pub fn new(method: String, path: String, client_ip: IpAddr) -> Self {
        Self {
            timestamp: now(),
            method,
            path,
            client_ip,
            status_code: 0,
            duration_ms: 0,
            target_host: None,
            error: None,
            user_agent: None,
        }
    }

    /// Apache-style one-liner used in production mode
    pub fn combined_line(&self) -> String {
        format!(
            "{} - [{}] \"{} {}\" {} {}ms \"{}\"{}",
            self.client_ip,
            self.timestamp.to_rfc3339(),
            self.method,
            self.path,
            self.status_code,
            self.duration_ms,
            self.user_agent.as_deref().unwrap_or("-"),
            self.target_host
                .as_deref()
                .map(|host| format!(" -> {}", host))
                .unwrap_or_default(),
        )
    }
}
