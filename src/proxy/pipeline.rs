//! Request pipeline
//!
//! Stages run in a fixed order and the first failure ends the request:
//! admission, credential check, target resolution, forwarding. The health
//! route is answered before any stage runs.

use crate::config::allow_list::AllowList;
use crate::config::settings::ProxyConfig;
use crate::log_proxy_transaction;
use crate::middleware::{AdmissionGate, CredentialVerifier, TargetResolver};
use crate::models::AccessLog;
use crate::proxy::core::{ProxyError, ProxyRequest, ProxyResponse, RequestContext, Transport};
use crate::proxy::forward::ForwardingProxy;
use crate::proxy::http_client::ReqwestTransport;
use crate::utils::{client_ip, duration_to_ms, log_incoming_request, log_rejection, Clock, SystemClock};
use bytes::Bytes;
use futures::FutureExt;
use hyper::header::{AUTHORIZATION, USER_AGENT};
use hyper::{Method, StatusCode};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

pub const HEALTH_BODY: &str = "✅ Secure Proxy Server Running";

pub struct Pipeline {
    gate: Arc<AdmissionGate>,
    verifier: CredentialVerifier,
    resolver: TargetResolver,
    forwarder: ForwardingProxy,
    clock: Arc<dyn Clock>,
    route_prefix: String,
    health_path: String,
    trust_proxy: bool,
    standard_headers: bool,
    window: Duration,
}

impl Pipeline {
    pub fn new(
        config: &ProxyConfig,
        allow_list: Arc<AllowList>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gate: Arc::new(AdmissionGate::from_config(&config.rate_limit)),
            verifier: CredentialVerifier::new(&config.auth.jwt_secret),
            resolver: TargetResolver::new(allow_list),
            forwarder: ForwardingProxy::new(transport, config.max_body_size, config.trust_proxy),
            clock,
            route_prefix: config.route_prefix.trim_end_matches('/').to_string(),
            health_path: config.health_path.clone(),
            trust_proxy: config.trust_proxy,
            standard_headers: config.rate_limit.standard_headers,
            window: config.rate_limit.window(),
        }
    }

    /// Production wiring: allow-list from config, reqwest transport, system clock
    pub fn from_config(config: &ProxyConfig) -> crate::Result<Self> {
        let allow_list = Arc::new(AllowList::from_config(&config.allow_list)?);
        debug!("Allow-list: {}", allow_list.entries().join(", "));
        let transport = Arc::new(ReqwestTransport::new(config, allow_list.clone())?);
        Ok(Self::new(config, allow_list, transport, Arc::new(SystemClock)))
    }

    pub fn gate(&self) -> Arc<AdmissionGate> {
        Arc::clone(&self.gate)
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Handle one request. Never fails: every error becomes a response.
    pub async fn handle(&self, request: ProxyRequest) -> ProxyResponse {
        let started = Instant::now();
        let method = request.method.clone();
        let path = request.uri.path().to_string();
        let ip = client_ip(request.remote_addr, &request.headers, self.trust_proxy);
        let user_agent = request
            .headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        log_incoming_request(&method, &path, &ip);

        let mut ctx = RequestContext::new(ip, started);
        let mut failure = None;

        let health = (method == Method::GET || method == Method::HEAD) && path == self.health_path;
        let mut response = if health {
            ProxyResponse::local(StatusCode::OK, Bytes::from_static(HEALTH_BODY.as_bytes()), "text/plain; charset=utf-8")
        } else {
            match AssertUnwindSafe(self.process(request, &mut ctx)).catch_unwind().await {
                Ok(Ok(response)) => response,
                Ok(Err(err)) => {
                    log_rejection(&method, &path, &ip, &err);
                    failure = Some(err.kind());
                    err.into_response()
                }
                Err(_) => {
                    error!("❌ Handler panicked while serving {} {}", method, path);
                    let err = ProxyError::Internal("handler panicked".to_string());
                    failure = Some(err.kind());
                    err.into_response()
                }
            }
        };

        if self.standard_headers {
            if let Some(decision) = ctx.rate {
                decision.apply_headers(&mut response.headers, self.window);
            }
        }

        let mut entry = AccessLog::new(method.to_string(), path, ip);
        entry.status_code = response.status.as_u16();
        entry.duration_ms = duration_to_ms(started.elapsed());
        entry.target_host = ctx.target.as_ref().map(|target| target.hostname.clone());
        entry.error = failure.map(str::to_string);
        entry.user_agent = user_agent;
        log_proxy_transaction!(&entry);

        response
    }

    async fn process(&self, request: ProxyRequest, ctx: &mut RequestContext) -> Result<ProxyResponse, ProxyError> {
        let decision = self.gate.check(&ctx.client_ip.to_string(), self.clock.now());
        ctx.rate = Some(decision);
        if !decision.allowed {
            return Err(ProxyError::TooManyRequests);
        }

        if !self.matches_route(request.uri.path()) {
            return Err(ProxyError::NotFound);
        }

        let authorization = request
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        ctx.claims = Some(self.verifier.verify(authorization, self.clock.unix_timestamp())?);

        let target = self.resolver.resolve(&request.uri, &request.headers)?;
        ctx.target = Some(target.clone());

        self.forwarder.forward(request, &target, ctx).await
    }

    fn matches_route(&self, path: &str) -> bool {
        let prefix = self.route_prefix.as_str();
        prefix.is_empty()
            || path == prefix
            || path.strip_prefix(prefix).map_or(false, |rest| rest.starts_with('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::DeploymentProfile;
    use crate::proxy::core::{OutboundRequest, TransportError, UpstreamResponse};
    use crate::test_utils::{bearer_token, request, upstream_response, RecordingTransport, TEST_SECRET};
    use crate::utils::ManualClock;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    fn pipeline(profile: DeploymentProfile, transport: Arc<dyn Transport>) -> Pipeline {
        let mut config = ProxyConfig::for_profile(profile);
        config.auth.jwt_secret = TEST_SECRET.to_string();
        let allow = Arc::new(AllowList::from_config(&config.allow_list).unwrap());
        Pipeline::new(&config, allow, transport, Arc::new(ManualClock::new()))
    }

    #[tokio::test]
    async fn test_health_bypasses_everything() {
        let transport = Arc::new(RecordingTransport::ok(upstream_response(200, &[], "")));
        let p = pipeline(DeploymentProfile::Standalone, transport.clone());

        let response = p.handle(request(Method::GET, "/", &[])).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(&response.body[..], HEALTH_BODY.as_bytes());
        assert!(response.headers.get("ratelimit-limit").is_none());
        assert!(p.gate().is_empty());
        assert!(transport.requests().is_empty());

        let head = p.handle(request(Method::HEAD, "/", &[])).await;
        assert_eq!(head.status, StatusCode::OK);
        assert_eq!(head.headers["content-type"], "text/plain; charset=utf-8");
        assert!(p.gate().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let transport = Arc::new(RecordingTransport::ok(upstream_response(200, &[], "")));
        let p = pipeline(DeploymentProfile::Standalone, transport);

        let response = p.handle(request(Method::GET, "/proxyfoo?url=https://api.github.com/", &[])).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);

        // Health path only answers GET and HEAD
        let response = p.handle(request(Method::POST, "/", &[])).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_edge_profile_routes_every_path() {
        let transport = Arc::new(RecordingTransport::ok(upstream_response(204, &[], "")));
        let p = pipeline(DeploymentProfile::Edge, transport.clone());
        let auth = bearer_token(None);

        let response = p
            .handle(request(Method::GET, "/anything?url=https://api.github.com/zen", &[("authorization", auth.as_str())]))
            .await;
        assert_eq!(response.status, StatusCode::NO_CONTENT);
        assert_eq!(transport.single_request().url.as_str(), "https://api.github.com/zen");

        let health = p.handle(request(Method::GET, "/healthz", &[])).await;
        assert_eq!(health.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rate_limit_headers_on_forwarded_response() {
        let transport = Arc::new(RecordingTransport::ok(upstream_response(200, &[], "ok")));
        let p = pipeline(DeploymentProfile::Standalone, transport);
        let auth = bearer_token(None);

        let response = p
            .handle(request(Method::GET, "/proxy?url=https://api.github.com/", &[("authorization", auth.as_str())]))
            .await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.headers["ratelimit-policy"], "300;w=900");
        assert_eq!(response.headers["ratelimit-remaining"], "299");
        // Relayed responses do not get the local hardening headers
        assert!(response.headers.get("x-frame-options").is_none());
    }

    /// Upstream that never answers; flags when the in-flight call is dropped
    #[derive(Default)]
    struct StalledTransport {
        entered: Notify,
        dropped: Arc<AtomicBool>,
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl Transport for StalledTransport {
        async fn send(&self, _request: OutboundRequest) -> Result<UpstreamResponse, TransportError> {
            let _flag = DropFlag(self.dropped.clone());
            self.entered.notify_one();
            futures::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_dropped_request_cancels_upstream_call() {
        let transport = Arc::new(StalledTransport::default());
        let p = Arc::new(pipeline(DeploymentProfile::Standalone, transport.clone()));
        let auth = bearer_token(None);
        let req = request(Method::GET, "/proxy?url=https://api.github.com/", &[("authorization", auth.as_str())]);

        let handler = tokio::spawn({
            let p = p.clone();
            async move { p.handle(req).await }
        });
        transport.entered.notified().await;
        assert!(!transport.dropped.load(Ordering::SeqCst));

        handler.abort();
        assert!(handler.await.unwrap_err().is_cancelled());
        assert!(transport.dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_route_matching() {
        let transport = Arc::new(RecordingTransport::ok(upstream_response(200, &[], "")));
        let p = pipeline(DeploymentProfile::Standalone, transport);
        assert!(p.matches_route("/proxy"));
        assert!(p.matches_route("/proxy/"));
        assert!(p.matches_route("/proxy/a/b"));
        assert!(!p.matches_route("/proxyx"));
        assert!(!p.matches_route("/"));
    }
}
