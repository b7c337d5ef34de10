//! Configuration management

pub mod allow_list;
pub mod settings;

pub use allow_list::{AllowList, STATIC_ALLOW_LIST};
pub use settings::{
    AllowListConfig, AuthConfig, DeploymentProfile, Environment, HttpClientConfig, ProxyConfig,
    RateLimitConfig,
};
