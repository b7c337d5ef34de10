//! Upstream HTTP client
//!
//! A single shared reqwest client with connection pooling. TLS certificates
//! are always verified. Redirects are followed by the client; with
//! confinement on, a redirect off the allow-list is returned as-is.

use crate::config::allow_list::AllowList;
use crate::config::settings::{HttpClientConfig, ProxyConfig};
use crate::error::Result;
use crate::proxy::core::{OutboundRequest, Transport, TransportError, UpstreamResponse};
use async_trait::async_trait;
use reqwest::redirect::{Attempt, Policy};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Production transport backed by reqwest
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &ProxyConfig, allow_list: Arc<AllowList>) -> Result<Self> {
        let client_config = &config.http_client;

        info!("🚀 Initializing upstream HTTP client");
        info!("   Max idle connections per host: {}", client_config.max_idle_per_host);
        info!("   Idle timeout: {}s", client_config.idle_timeout_secs);
        info!("   Connect timeout: {}s", client_config.connect_timeout_secs);
        info!("   Request timeout: {}s", config.request_timeout);
        info!(
            "   Redirects: up to {} ({})",
            client_config.max_redirects,
            if client_config.confine_redirects { "allow-list only" } else { "any host" }
        );

        let keepalive = client_config
            .tcp_keepalive
            .then(|| Duration::from_secs(client_config.tcp_keepalive_interval_secs));

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(Duration::from_secs(client_config.connect_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(client_config.idle_timeout_secs))
            .pool_max_idle_per_host(client_config.max_idle_per_host)
            .tcp_nodelay(true)
            .tcp_keepalive(keepalive)
            .redirect(redirect_policy(client_config, allow_list))
            .build()?;

        Ok(Self { client })
    }
}

fn redirect_policy(config: &HttpClientConfig, allow_list: Arc<AllowList>) -> Policy {
    let max_redirects = config.max_redirects;
    let confine = config.confine_redirects;

    Policy::custom(move |attempt: Attempt| {
        if attempt.previous().len() > max_redirects {
            return attempt.error(format!("more than {} redirects", max_redirects));
        }
        if confine {
            let host = attempt.url().host_str().unwrap_or_default().to_string();
            if !allow_list.is_allowed(&host) {
                // Relay the 3xx itself rather than leave the allow-list
                warn!("⛔ Not following redirect to non-allowed host '{}'", host);
                return attempt.stop();
            }
        }
        debug!("↪️ Following redirect to {}", attempt.url());
        attempt.follow()
    })
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_redirect() {
        TransportError::Redirect(err.to_string())
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: OutboundRequest) -> std::result::Result<UpstreamResponse, TransportError> {
        let response = self
            .client
            .request(request.method, request.url)
            .headers(request.headers)
            .body(request.body)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(classify)?;

        Ok(UpstreamResponse { status, headers, body })
    }
}
