//! Server command-line arguments

use crate::config::settings::{DeploymentProfile, Environment, ProxyConfig};
use crate::proxy::server::ProxyServer;
use anyhow::{Context, Result};
use clap::Args;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, Args)]
pub struct ServerArgs {
    /// YAML configuration file (defaults to ./config.yml when present)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Listening address, e.g. 0.0.0.0:3000
    #[arg(long)]
    pub listen_addr: Option<SocketAddr>,

    /// Log filter (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Deployment profile: standalone or edge
    #[arg(long)]
    pub profile: Option<String>,

    /// Environment mode: development or production
    #[arg(long = "env")]
    pub environment: Option<String>,
}

impl ServerArgs {
    /// Load file and environment configuration, then apply CLI flags on top.
    /// `--profile` selects the defaults the file and environment are layered on.
    pub fn to_config(&self) -> Result<ProxyConfig> {
        let profile = self
            .profile
            .as_deref()
            .map(str::parse::<DeploymentProfile>)
            .transpose()?;

        let mut config = ProxyConfig::load_with(self.config.as_deref(), profile, |key| std::env::var(key).ok())?;
        self.apply_overrides(&mut config)?;
        Ok(config)
    }

    /// Apply CLI flags to an already loaded configuration
    pub fn apply_overrides(&self, config: &mut ProxyConfig) -> Result<()> {
        if let Some(addr) = self.listen_addr {
            config.listen_addr = addr;
        }
        if let Some(level) = &self.log_level {
            config.log_level = Some(level.clone());
        }
        if let Some(environment) = &self.environment {
            config.environment = environment.parse::<Environment>()?;
        }
        Ok(())
    }

    /// Start the proxy server with a validated configuration
    pub async fn start_server(config: ProxyConfig) -> Result<()> {
        config.validate().context("Invalid configuration")?;
        debug!("ProxyConfig resolved: {:?}", config);

        info!("📋 Server Configuration:");
        info!("   Listen address: {}", config.listen_addr);
        info!("   Profile: {:?} ({:?})", config.profile, config.environment);
        info!("   Proxy route: {}", config.route_prefix);
        info!("   Health route: GET|HEAD {}", config.health_path);
        info!("   Trust proxy headers: {}", config.trust_proxy);
        info!("   Request timeout: {}s", config.request_timeout);
        info!("   Max body size: {} bytes", config.max_body_size);
        info!("   Extra allowed hosts: {}", config.allow_list.extra_domains.len());

        ProxyServer::with_config(config)?.start().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cli_flags_override_config() {
        let args = ServerArgs {
            listen_addr: Some("0.0.0.0:8081".parse().unwrap()),
            log_level: Some("warn".into()),
            environment: Some("production".into()),
            ..ServerArgs::default()
        };
        let mut config = ProxyConfig::for_profile(DeploymentProfile::Edge);
        config.rate_limit.max_requests = 7;
        args.apply_overrides(&mut config).unwrap();

        assert_eq!(config.listen_addr.port(), 8081);
        assert_eq!(config.log_level(), "warn");
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.profile, DeploymentProfile::Edge);
        assert_eq!(config.rate_limit.max_requests, 7);
    }

    #[test]
    fn test_profile_flag_keeps_file_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "rate_limit:\n  max_requests: 5\nauth:\n  jwt_secret: from-file").unwrap();

        let args = ServerArgs {
            config: Some(file.path().to_path_buf()),
            profile: Some("edge".into()),
            listen_addr: Some("127.0.0.1:8082".parse().unwrap()),
            ..ServerArgs::default()
        };
        let config = args.to_config().unwrap();

        assert_eq!(config.profile, DeploymentProfile::Edge);
        assert_eq!(config.route_prefix, "/");
        assert_eq!(config.health_path, "/healthz");
        assert_eq!(config.rate_limit.window_secs, 600);
        assert_eq!(config.listen_addr.port(), 8082);
        if std::env::var("PROXY_RATE_LIMIT_MAX").is_err() {
            assert_eq!(config.rate_limit.max_requests, 5);
        }
    }

    #[test]
    fn test_unknown_profile_is_rejected() {
        let args = ServerArgs {
            profile: Some("mesh".into()),
            ..ServerArgs::default()
        };
        assert!(args.to_config().is_err());
    }
}
