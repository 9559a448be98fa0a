//! blaze_pool - bounded worker pools and adaptive object pools on Tokio.
//!
//! The core of a high-throughput connection server: accepted connections
//! are dispatched to reusable worker tasks kept on a lock-free idle stack,
//! and short-lived objects (buffers, timers) come from pools that size
//! themselves from observed demand.
//!
//! # Features
//!
//! - **Admission control**: `WorkerPool::serve` sheds connections past
//!   `max_workers` instead of queueing them
//! - **Lock-free idle stack**: tagged-index Treiber stack over a never-freed arena
//! - **Direct handoff**: parked workers are resumed with their next
//!   connection, with a rendezvous mode for single-threaded runtimes
//! - **Idle reaping**: workers idle past `max_idle_duration` exit
//! - **Adaptive pools**: default and max object sizes follow the 95th
//!   percentile of demand
//!
//! # Example
//!
//! ```rust,ignore
//! use blaze_pool::config::WorkerPoolConfig;
//! use blaze_pool::worker::WorkerPool;
//!
//! let pool = WorkerPool::new(WorkerPoolConfig::new(1024), handler);
//! pool.start();
//! if let Err(rejected) = pool.serve(conn).await {
//!     rejected.into_inner().close().await?;
//! }
//! pool.stop();
//! ```

/// Package version from Cargo.toml
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Git commit hash (8 chars) with optional "-dirty" suffix
pub const BUILD_VERSION: &str = env!("BUILD_VERSION");

/// Full version string: "0.1.0 (abc12345)" or "0.1.0 (abc12345-dirty)"
pub const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("BUILD_VERSION"), ")");

pub mod adaptive;
pub mod config;
pub mod handoff;
pub mod listener;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod stack;
pub mod worker;

// Re-exports for convenience
pub use adaptive::{AdaptivePool, BufferPool, TimerPool};
pub use config::{Config, WorkerPoolConfig};
pub use worker::{ConnHandler, HandlerError, TaskPool, WorkerPool};
