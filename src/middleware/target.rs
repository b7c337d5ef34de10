//! Target URL extraction and allow-list enforcement

use crate::config::allow_list::AllowList;
use crate::utils::{is_http_scheme, parse_url, path_and_query, query_param, X_TARGET_URL};
use hyper::{HeaderMap, Uri};
use std::sync::Arc;
use url::Url;

const TARGET_QUERY_PARAM: &str = "url";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("Missing target URL")]
    MissingTarget,

    #[error("Invalid URL format")]
    InvalidUrl,

    #[error("Domain '{0}' not allowed")]
    DomainNotAllowed(String),
}

/// Upstream destination of one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// The string exactly as the caller supplied it
    pub raw: String,
    pub scheme: String,
    /// Lowercase host, without port
    pub hostname: String,
    pub path_and_query: String,
    pub url: Url,
}

impl Target {
    /// Parse an absolute http(s) URL with a non-empty host. No allow-list check.
    pub fn parse(raw: &str) -> Result<Self, ResolveError> {
        let url = parse_url(raw.trim()).map_err(|_| ResolveError::InvalidUrl)?;
        if !is_http_scheme(&url) {
            return Err(ResolveError::InvalidUrl);
        }

        let hostname = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_ascii_lowercase(),
            _ => return Err(ResolveError::InvalidUrl),
        };

        Ok(Self {
            raw: raw.to_string(),
            scheme: url.scheme().to_string(),
            hostname,
            path_and_query: path_and_query(&url),
            url,
        })
    }

    /// URL sent upstream: the target without its fragment
    pub fn outbound_url(&self) -> Url {
        let mut url = self.url.clone();
        url.set_fragment(None);
        url
    }
}

/// Finds the caller's target and checks it against the allow-list
#[derive(Debug, Clone)]
pub struct TargetResolver {
    allow_list: Arc<AllowList>,
}

impl TargetResolver {
    pub fn new(allow_list: Arc<AllowList>) -> Self {
        Self { allow_list }
    }

    /// The `url` query parameter wins over the `X-Target-Url` header
    pub fn resolve(&self, uri: &Uri, headers: &HeaderMap) -> Result<Target, ResolveError> {
        let raw = extract_candidate(uri, headers)?;
        let target = Target::parse(&raw)?;

        if !self.allow_list.is_allowed(&target.hostname) {
            return Err(ResolveError::DomainNotAllowed(target.hostname));
        }
        Ok(target)
    }
}

fn extract_candidate(uri: &Uri, headers: &HeaderMap) -> Result<String, ResolveError> {
    if let Some(value) = query_param(uri.query(), TARGET_QUERY_PARAM) {
        return Ok(value);
    }

    match headers.get(X_TARGET_URL) {
        Some(value) => {
            let value = value.to_str().map_err(|_| ResolveError::InvalidUrl)?.trim();
            if value.is_empty() {
                Err(ResolveError::MissingTarget)
            } else {
                Ok(value.to_string())
            }
        }
        None => Err(ResolveError::MissingTarget),
    }
}
