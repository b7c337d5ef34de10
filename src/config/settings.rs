//! Proxy server configuration settings

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Config file picked up from the working directory when no path is given
pub const DEFAULT_CONFIG_PATH: &str = "config.yml";

/// Upper bound on the rate limit window and grace period (one week)
pub const MAX_WINDOW_SECS: u64 = 7 * 24 * 60 * 60;

/// Main configuration for the proxy server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Which set of defaults this deployment starts from
    pub profile: DeploymentProfile,

    /// Affects logging verbosity only
    pub environment: Environment,

    /// Server listening address
    pub listen_addr: SocketAddr,

    /// Log filter; defaults per environment when unset
    pub log_level: Option<String>,

    /// Path prefix of the proxy route
    pub route_prefix: String,

    /// Unauthenticated GET/HEAD route answering with a static body
    pub health_path: String,

    /// Derive client address and scheme from X-Forwarded-* headers
    pub trust_proxy: bool,

    /// Upstream request timeout in seconds
    pub request_timeout: u64,

    /// Maximum request body size in bytes
    pub max_body_size: usize,

    pub auth: AuthConfig,

    pub allow_list: AllowListConfig,

    pub rate_limit: RateLimitConfig,

    /// HTTP client configuration
    pub http_client: HttpClientConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentProfile {
    /// Proxy mounted under `/proxy`, health check on `/`
    #[default]
    Standalone,
    /// Proxy on every path, health check on `/healthz`
    Edge,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

/// Bearer token settings
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret for token signatures; never serialized back out
    #[serde(skip_serializing)]
    pub jwt_secret: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AllowListConfig {
    /// Hostnames added to the built-in allow-list
    pub extra_domains: Vec<String>,
}

/// Fixed-window admission settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Window width in seconds
    pub window_secs: u64,

    /// Requests admitted per client per window
    pub max_requests: u32,

    /// Emit RateLimit-* response headers
    pub standard_headers: bool,

    /// Seconds between sweeps of stale windows
    pub cleanup_interval_secs: u64,

    /// Entry count above which a request may trigger an inline sweep
    pub cleanup_threshold: usize,

    /// How long an expired window is kept before eviction; one window if unset
    pub grace_secs: Option<u64>,
}

/// HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// Maximum idle connections per host
    pub max_idle_per_host: usize,

    /// Idle timeout in seconds
    pub idle_timeout_secs: u64,

    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,

    /// Redirect hops followed before giving up
    pub max_redirects: usize,

    /// Only follow redirects that stay on the allow-list
    pub confine_redirects: bool,

    /// Enable TCP keepalive
    pub tcp_keepalive: bool,

    /// TCP keepalive interval in seconds
    pub tcp_keepalive_interval_secs: u64,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &if self.jwt_secret.is_empty() { "<unset>" } else { "<redacted>" })
            .finish()
    }
}

impl FromStr for DeploymentProfile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "standalone" | "server" => Ok(Self::Standalone),
            "edge" | "api" => Ok(Self::Edge),
            other => Err(Error::Config(format!("Unknown deployment profile '{}'", other))),
        }
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(Error::Config(format!("Unknown environment '{}'", other))),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self::for_profile(DeploymentProfile::Standalone)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 15 * 60,
            max_requests: 300,
            standard_headers: true,
            cleanup_interval_secs: 60,
            cleanup_threshold: 10_000,
            grace_secs: None,
        }
    }
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 50,
            idle_timeout_secs: 90,
            connect_timeout_secs: 10,
            max_redirects: 21,
            confine_redirects: true,
            tcp_keepalive: true,
            tcp_keepalive_interval_secs: 30,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs.unwrap_or(self.window_secs))
    }
}

impl ProxyConfig {
    /// Defaults for a deployment profile
    pub fn for_profile(profile: DeploymentProfile) -> Self {
        let (route_prefix, health_path, rate_limit) = match profile {
            DeploymentProfile::Standalone => ("/proxy", "/", RateLimitConfig::default()),
            DeploymentProfile::Edge => (
                "/",
                "/healthz",
                RateLimitConfig {
                    window_secs: 10 * 60,
                    max_requests: 200,
                    ..RateLimitConfig::default()
                },
            ),
        };

        Self {
            profile,
            environment: Environment::default(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            log_level: None,
            route_prefix: route_prefix.to_string(),
            health_path: health_path.to_string(),
            trust_proxy: false,
            request_timeout: 30,
            max_body_size: 10 * 1024 * 1024, // 10MB
            auth: AuthConfig::default(),
            allow_list: AllowListConfig::default(),
            rate_limit,
            http_client: HttpClientConfig::default(),
        }
    }

    /// Load configuration from a YAML file.
    ///
    /// Keys missing from the file fall back to the defaults of the profile
    /// the file names (standalone if it names none).
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::layered(Some(read_yaml(path.as_ref())?), None)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        Self::layered(Some(serde_yaml::from_str(contents)?), None)
    }

    /// Load configuration from a file (explicit path, or `config.yml` if
    /// present) or profile defaults, then apply environment overrides
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, None, |key| std::env::var(key).ok())
    }

    /// Layered load.
    ///
    /// The profile comes from `profile`, then `PROXY_PROFILE`, then the
    /// file's `profile:` key. Its defaults are the base; the file is overlaid
    /// on them and environment overrides from `lookup` go last.
    pub fn load_with<F>(path: Option<&Path>, profile: Option<DeploymentProfile>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let overlay = match path {
            Some(path) => Some(read_yaml(path)?),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Some(read_yaml(Path::new(DEFAULT_CONFIG_PATH))?),
            None => None,
        };

        let profile = match profile {
            Some(profile) => Some(profile),
            None => lookup("PROXY_PROFILE").map(|p| p.parse::<DeploymentProfile>()).transpose()?,
        };

        let mut config = Self::layered(overlay, profile)?;
        config.apply_env_overrides(lookup)?;
        Ok(config)
    }

    /// Overlay `overlay` on the defaults of `profile`, or of the profile the
    /// overlay names when `profile` is `None`
    fn layered(overlay: Option<Value>, profile: Option<DeploymentProfile>) -> Result<Self> {
        let overlay = overlay.filter(|value| !value.is_null());
        let profile = match profile {
            Some(profile) => profile,
            None => overlay
                .as_ref()
                .and_then(|value| value.get("profile"))
                .and_then(Value::as_str)
                .map(str::parse)
                .transpose()?
                .unwrap_or_default(),
        };

        let mut merged = serde_yaml::to_value(Self::for_profile(profile))?;
        if let Some(overlay) = overlay {
            merge_values(&mut merged, overlay);
        }
        let mut config: Self = serde_yaml::from_value(merged)?;
        config.profile = profile;
        Ok(config)
    }

    /// Apply environment variable overrides through `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup("JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }

        if let Some(extra) = lookup("EXTRA_WHITELIST") {
            self.allow_list.extra_domains.extend(
                extra
                    .split(',')
                    .map(str::trim)
                    .filter(|entry| !entry.is_empty())
                    .map(str::to_string),
            );
        }

        if let Some(environment) = lookup("PROXY_ENV") {
            self.environment = environment.parse()?;
        }

        if let Some(addr) = lookup("PROXY_LISTEN_ADDR") {
            self.listen_addr = addr
                .parse()
                .map_err(|e| Error::Config(format!("Invalid PROXY_LISTEN_ADDR '{}': {}", addr, e)))?;
        }

        if let Some(port) = lookup("PORT") {
            let port = port
                .parse::<u16>()
                .map_err(|e| Error::Config(format!("Invalid PORT '{}': {}", port, e)))?;
            self.listen_addr.set_port(port);
        }

        if let Some(trust) = lookup("PROXY_TRUST_PROXY") {
            self.trust_proxy = trust.trim().eq_ignore_ascii_case("true");
        }

        if let Some(max) = lookup("PROXY_RATE_LIMIT_MAX") {
            self.rate_limit.max_requests = parse_number("PROXY_RATE_LIMIT_MAX", &max)?;
        }

        if let Some(window) = lookup("PROXY_RATE_LIMIT_WINDOW_SECS") {
            self.rate_limit.window_secs = parse_number("PROXY_RATE_LIMIT_WINDOW_SECS", &window)?;
        }

        if let Some(timeout) = lookup("PROXY_REQUEST_TIMEOUT") {
            self.request_timeout = parse_number("PROXY_REQUEST_TIMEOUT", &timeout)?;
        }

        if let Some(max_size) = lookup("PROXY_MAX_BODY_SIZE") {
            self.max_body_size = parse_number("PROXY_MAX_BODY_SIZE", &max_size)?;
        }

        Ok(())
    }

    /// Reject configurations the proxy cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.is_empty() {
            return Err(Error::Config("JWT secret is not set (JWT_SECRET)".to_string()));
        }
        if self.rate_limit.window_secs == 0 || self.rate_limit.max_requests == 0 {
            return Err(Error::Config("rate limit window and ceiling must be positive".to_string()));
        }
        if self.rate_limit.window_secs > MAX_WINDOW_SECS
            || self.rate_limit.grace_secs.map_or(false, |grace| grace > MAX_WINDOW_SECS)
        {
            return Err(Error::Config(format!(
                "rate limit window and grace period must not exceed {} seconds",
                MAX_WINDOW_SECS
            )));
        }
        if self.rate_limit.cleanup_interval_secs == 0 {
            return Err(Error::Config("rate limit cleanup interval must be positive".to_string()));
        }
        if !self.route_prefix.starts_with('/') || !self.health_path.starts_with('/') {
            return Err(Error::Config("route prefix and health path must start with '/'".to_string()));
        }
        if self.request_timeout == 0 {
            return Err(Error::Config("request timeout must be positive".to_string()));
        }
        Ok(())
    }

    /// Effective log filter
    pub fn log_level(&self) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| crate::logging::default_level(self.environment).to_string())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

fn read_yaml(path: &Path) -> Result<Value> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;
    Ok(serde_yaml::from_str(&contents)?)
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("Invalid {} '{}': {}", key, value, e)))
}

/// Recursively overlay `overlay` onto `base`; mappings merge, everything else replaces
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
