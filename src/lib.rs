//! Rust Secure Proxy - an authenticated, allow-list restricted HTTP forward proxy
//!
//! Every proxied request passes through a fixed pipeline: per-client
//! admission, bearer token verification, target resolution against the
//! allow-list, then forwarding with header sanitization in both directions.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod models;
pub mod proxy;
pub mod utils;

// Re-export commonly used items
pub use config::{AllowList, DeploymentProfile, Environment, ProxyConfig};
pub use error::{Error, Result};
pub use logging::{init_logger_with_config, log_debug, log_error, log_info};
pub use middleware::{AdmissionGate, CredentialVerifier, Target, TargetResolver};
pub use models::AccessLog;
pub use proxy::{Pipeline, ProxyError, ProxyRequest, ProxyResponse, ProxyServer, ReqwestTransport, Transport};
pub use utils::{Clock, ManualClock, SystemClock};
