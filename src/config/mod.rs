//! Configuration loaded from environment variables.
//!
//! # Example
//!
//! ```rust,ignore
//! use blaze_pool::config::Config;
//!
//! let config = Config::from_env()?;
//! println!("Listen address: {}", config.server.listen_addr);
//! println!("Max workers: {}", config.pool.max_workers);
//! ```

mod error;
mod logging;
mod parse;
mod pool;
mod server;

pub use error::ConfigError;
pub use logging::{LogFormat, LoggingConfig};
pub use parse::parse_duration;
pub use pool::{LaneMode, WorkerPoolConfig, DEFAULT_MAX_IDLE_DURATION, DEFAULT_MAX_WORKERS};
pub use server::ServerConfig;

/// Complete application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub pool: WorkerPoolConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerConfig::from_env()?,
            pool: WorkerPoolConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
        })
    }

    /// Print configuration summary to log.
    pub fn log_summary(&self) {
        use tracing::info;

        info!("Configuration loaded:");
        info!("  Listen: {}", self.server.listen_addr);
        info!("  Runtime threads: {}", self.server.worker_threads());
        info!("  Max workers: {}", self.pool.max_workers);
        info!(
            "  Max idle duration: {}ms",
            self.pool.max_idle_duration.as_millis()
        );
        info!("  Lane mode: {:?}", self.pool.lane_mode);

        match self.pool.handle_timeout {
            Some(timeout) => info!("  Handle timeout: {}ms", timeout.as_millis()),
            None => info!("  Handle timeout: disabled"),
        }

        if self.pool.log_all_errors {
            info!("  Log all errors: enabled");
        }
    }
}
