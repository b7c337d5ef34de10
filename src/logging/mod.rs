use crate::config::settings::Environment;
use crate::models::AccessLog;
use anyhow::Result;
use log::{debug, error, info, LevelFilter};
use std::sync::Once;
use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

static INIT: Once = Once::new();

/// Default filter directive for an environment when `RUST_LOG` is unset
pub fn default_level(environment: Environment) -> &'static str {
    match environment {
        Environment::Production => "info",
        Environment::Development => "debug",
    }
}

/// Initialize the global logger.
///
/// `RUST_LOG` wins over `level`. Development gets the pretty multi-line
/// format, production a compact single-line one without ANSI colours.
pub fn init_logger_with_config(level: &str, environment: Environment) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level));

        let builder = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(false)
            .with_level(true);

        let installed = match environment {
            Environment::Development => builder
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(true)
                .pretty()
                .try_init(),
            Environment::Production => builder.with_ansi(false).compact().try_init(),
        };
        if let Err(e) = installed {
            eprintln!("Warning: Failed to install tracing subscriber: {}", e);
        }

        // Initialize LogTracer to bridge log events to tracing (after subscriber is set up)
        if let Err(e) = LogTracer::init() {
            eprintln!("Warning: Failed to initialize LogTracer: {:?}", e);
        }

        log::set_max_level(level.parse::<LevelFilter>().unwrap_or(LevelFilter::Trace));
    });
}

/// Emit one access record. The one-liner goes out at info, the full
/// structured record at debug.
pub fn log_transaction(log_entry: &AccessLog) -> Result<()> {
    info!("{}", log_entry.combined_line());
    debug!("TRANSACTION: {}", serde_json::to_string(log_entry)?);
    Ok(())
}

/// Log an error message
pub fn log_error(message: &str) {
    error!("{}", message);
}

/// Log an info message
pub fn log_info(message: &str) {
    info!("{}", message);
}

/// Log a debug message
pub fn log_debug(message: &str) {
    debug!("{}", message);
}

/// Convenience macro for logging proxy transactions
#[macro_export]
macro_rules! log_proxy_transaction {
    ($log_entry:expr) => {
        if let Err(e) = $crate::logging::log_transaction($log_entry) {
            eprintln!("Failed to log transaction: {}", e);
        }
    };
}

/// Convenience macro for logging errors
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::log_error(&format!($($arg)*));
    };
}

/// Convenience macro for logging info messages
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::log_info(&format!($($arg)*));
    };
}

/// Convenience macro for logging debug messages
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::log_debug(&format!($($arg)*));
    };
}
