//! Error handling module for the proxy server

use thiserror::Error;

/// Startup and serving errors. Per-request failures are `ProxyError`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Allow-list error: {0}")]
    AllowList(String),

    #[error("Upstream client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Result type for the proxy server
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Config(err.to_string())
    }
}
