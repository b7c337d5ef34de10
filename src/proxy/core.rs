//! Core proxy types shared by the pipeline stages and the transport.
//!
//! The transport is a trait so the pipeline can be driven against a
//! recording mock in tests and against reqwest in production.

use crate::middleware::{AuthError, Claims, RateDecision, ResolveError, Target};
use crate::utils::{apply_security_headers, json_error_body};
use async_trait::async_trait;
use bytes::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, HeaderMap, Method, Response, StatusCode, Uri};
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;
use url::Url;

/// Inbound request as seen by the pipeline
#[derive(Debug)]
pub struct ProxyRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Body,
    pub remote_addr: SocketAddr,
}

/// Response handed back to the server loop
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Request-scoped failures. Each maps to exactly one status code.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("too many requests")]
    TooManyRequests,

    #[error("missing credential")]
    MissingCredential,

    #[error("invalid credential")]
    InvalidCredential,

    #[error("missing target")]
    MissingTarget,

    #[error("invalid target URL")]
    InvalidUrl,

    #[error("domain '{0}' not allowed")]
    DomainNotAllowed(String),

    #[error("request body too large")]
    PayloadTooLarge,

    #[error("not found")]
    NotFound,

    /// Carries the transport cause for logging; never shown to the caller
    #[error("upstream error: {0}")]
    Upstream(#[from] TransportError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::MissingCredential => StatusCode::UNAUTHORIZED,
            ProxyError::InvalidCredential => StatusCode::FORBIDDEN,
            ProxyError::MissingTarget | ProxyError::InvalidUrl => StatusCode::BAD_REQUEST,
            ProxyError::DomainNotAllowed(_) => StatusCode::FORBIDDEN,
            ProxyError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::NotFound => StatusCode::NOT_FOUND,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable name used in access logs
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::TooManyRequests => "TooManyRequests",
            ProxyError::MissingCredential => "MissingCredential",
            ProxyError::InvalidCredential => "InvalidCredential",
            ProxyError::MissingTarget => "MissingTarget",
            ProxyError::InvalidUrl => "InvalidURL",
            ProxyError::DomainNotAllowed(_) => "DomainNotAllowed",
            ProxyError::PayloadTooLarge => "PayloadTooLarge",
            ProxyError::NotFound => "NotFound",
            ProxyError::Upstream(_) => "UpstreamError",
            ProxyError::Internal(_) => "InternalError",
        }
    }

    /// Message placed in the response body
    pub fn message(&self) -> String {
        match self {
            ProxyError::TooManyRequests => "Too many requests, please try again later.".to_string(),
            ProxyError::MissingCredential => AuthError::Missing.to_string(),
            ProxyError::InvalidCredential => AuthError::Invalid.to_string(),
            ProxyError::MissingTarget => ResolveError::MissingTarget.to_string(),
            ProxyError::InvalidUrl => ResolveError::InvalidUrl.to_string(),
            ProxyError::DomainNotAllowed(host) => ResolveError::DomainNotAllowed(host.clone()).to_string(),
            ProxyError::PayloadTooLarge => "Request body too large".to_string(),
            ProxyError::NotFound => "Not found".to_string(),
            ProxyError::Upstream(_) => "Proxy error: upstream request failed".to_string(),
            ProxyError::Internal(_) => "Internal server error".to_string(),
        }
    }

    /// JSON error response with hardening headers
    pub fn into_response(self) -> ProxyResponse {
        ProxyResponse::local(self.status(), json_error_body(&self.message()), "application/json")
    }
}

impl From<AuthError> for ProxyError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Missing => ProxyError::MissingCredential,
            AuthError::Invalid => ProxyError::InvalidCredential,
        }
    }
}

impl From<ResolveError> for ProxyError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::MissingTarget => ProxyError::MissingTarget,
            ResolveError::InvalidUrl => ProxyError::InvalidUrl,
            ResolveError::DomainNotAllowed(host) => ProxyError::DomainNotAllowed(host),
        }
    }
}

impl ProxyResponse {
    /// Response generated by the proxy itself rather than relayed
    pub fn local(status: StatusCode, body: Bytes, content_type: &'static str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        apply_security_headers(&mut headers);
        Self { status, headers, body }
    }

    pub fn into_hyper(self) -> Response<Body> {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Request handed to the transport
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// What the transport got back from the upstream
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("upstream timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("redirect rejected: {0}")]
    Redirect(String),

    #[error("{0}")]
    Other(String),
}

/// Sends one request upstream. Implementations follow redirects and verify
/// TLS certificates.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse, TransportError>;
}

/// Values accumulated while a request moves through the pipeline
#[derive(Debug)]
pub struct RequestContext {
    pub client_ip: IpAddr,
    pub started: Instant,
    pub rate: Option<RateDecision>,
    pub claims: Option<Claims>,
    pub target: Option<Target>,
}

impl RequestContext {
    pub fn new(client_ip: IpAddr, started: Instant) -> Self {
        Self {
            client_ip,
            started,
            rate: None,
            claims: None,
            target: None,
        }
    }
}
