//! Main entry point for the secure proxy

use clap::Parser;
use rust_secure_proxy::{cli::ServerArgs, init_logger_with_config, log_error, log_info};

#[derive(Parser)]
#[command(name = "rust-secure-proxy")]
#[command(about = "Authenticated, allow-list restricted HTTP forward proxy")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(flatten)]
    server: ServerArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match cli.server.to_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    init_logger_with_config(&config.log_level(), config.environment);

    log_info!("🚀 Starting Secure Proxy Server");
    log_info!("📋 Version: {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = ServerArgs::start_server(config).await {
        log_error!("Server error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
