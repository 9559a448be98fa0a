//! Worker pool configuration.

use std::time::Duration;

use super::parse::{env_bool, env_duration, env_or, env_parse};
use super::ConfigError;

/// Default ceiling on live workers.
pub const DEFAULT_MAX_WORKERS: usize = 256 * 1024;

/// Default time a worker may stay idle before it is reaped.
pub const DEFAULT_MAX_IDLE_DURATION: Duration = Duration::from_secs(10);

/// How dispatch hands a connection to a worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LaneMode {
    /// Detect from the current runtime (default).
    #[default]
    Auto,
    /// Force synchronous rendezvous handoff.
    Single,
    /// Force asynchronous handoff.
    Multi,
}

/// Worker pool configuration.
///
/// Immutable once the pool is built.
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | `MAX_WORKERS` | `262144` | Ceiling on live workers |
/// | `MAX_IDLE_DURATION` | `10s` | Idle time before a worker is reaped |
/// | `LOG_ALL_ERRORS` | `0` | Also log transient network errors |
/// | `LANE_MODE` | `auto` | `auto`, `single` or `multi` |
/// | `HANDLE_TIMEOUT` | `off` | Deadline for one connection |
#[derive(Clone, Debug)]
pub struct WorkerPoolConfig {
    pub max_workers: usize,
    pub max_idle_duration: Duration,
    pub log_all_errors: bool,
    pub lane_mode: LaneMode,
    pub handle_timeout: Option<Duration>,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            max_idle_duration: DEFAULT_MAX_IDLE_DURATION,
            log_all_errors: false,
            lane_mode: LaneMode::Auto,
            handle_timeout: None,
        }
    }
}

impl WorkerPoolConfig {
    pub fn new(max_workers: usize) -> Self {
        Self::default().with_max_workers(max_workers)
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let max_workers = env_parse("MAX_WORKERS", DEFAULT_MAX_WORKERS)?;
        if max_workers == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_WORKERS".into(),
                message: "worker count cannot be zero".into(),
            });
        }

        let max_idle_duration =
            env_duration("MAX_IDLE_DURATION", "10s")?.unwrap_or(DEFAULT_MAX_IDLE_DURATION);
        let handle_timeout = env_duration("HANDLE_TIMEOUT", "off")?;

        Ok(Self {
            max_workers,
            max_idle_duration,
            log_all_errors: env_bool("LOG_ALL_ERRORS", false),
            lane_mode: Self::parse_lane_mode()?,
            handle_timeout,
        })
    }

    fn parse_lane_mode() -> Result<LaneMode, ConfigError> {
        let raw = env_or("LANE_MODE", "auto");
        match raw.to_lowercase().as_str() {
            "auto" | "" => Ok(LaneMode::Auto),
            "single" => Ok(LaneMode::Single),
            "multi" => Ok(LaneMode::Multi),
            _ => Err(ConfigError::Invalid {
                key: "LANE_MODE".into(),
                message: format!("expected auto, single or multi, got '{}'", raw),
            }),
        }
    }

    /// Zero is clamped to one.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// A zero duration falls back to the default.
    pub fn with_max_idle_duration(mut self, duration: Duration) -> Self {
        self.max_idle_duration = if duration.is_zero() {
            DEFAULT_MAX_IDLE_DURATION
        } else {
            duration
        };
        self
    }

    pub fn with_log_all_errors(mut self, enabled: bool) -> Self {
        self.log_all_errors = enabled;
        self
    }

    pub fn with_lane_mode(mut self, mode: LaneMode) -> Self {
        self.lane_mode = mode;
        self
    }

    pub fn with_handle_timeout(mut self, timeout: Duration) -> Self {
        self.handle_timeout = Some(timeout);
        self
    }
}
