//! Bounded pools of reusable worker tasks.
//!
//! A worker is a tokio task that parks on its slot's handoff between jobs.
//! Dispatch pops the most recently idled worker off a lock-free stack and
//! resumes it with the job; when no worker is idle a new one is spawned,
//! up to `max_workers`. Past the ceiling, [`WorkerPool::serve`] sheds the
//! connection instead of queueing it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        WorkerPool                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │   serve(conn)                                               │
//! │       │                                                     │
//! │       ├── pop idle ──────────┐                              │
//! │       ├── reserve + spawn ───┤                              │
//! │       └── at capacity ──▶ Rejected(conn)                    │
//! │                              ▼                              │
//! │                  ┌──────────────────────┐                   │
//! │                  │ Handoff (per worker) │                   │
//! │                  └──────────┬───────────┘                   │
//! │                             ▼                               │
//! │        worker: handle ─▶ close/hijack ─▶ park (push)        │
//! │                                                             │
//! │   reaper: every max_idle_duration, exit stale idle workers  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod error;
mod lane;
mod pool;
mod slot;
mod task;

pub use error::{HandlerError, HandlerResult, RejectReason, Rejected};
pub use lane::Lane;
pub use pool::{WorkerPool, WorkerPoolBuilder};
pub use task::TaskPool;

use async_trait::async_trait;
use serde::Serialize;

use crate::listener::Connection;

/// Per-connection handler run by a worker.
#[async_trait]
pub trait ConnHandler<C: Connection>: Send + Sync + 'static {
    /// Serve one connection. Returning [`HandlerError::Hijacked`] hands the
    /// connection to [`ConnHandler::hijack`] instead of closing it.
    async fn handle(&self, conn: &mut C) -> HandlerResult;

    /// Take ownership of a hijacked connection.
    fn hijack(&self, conn: C) {
        drop(conn);
    }
}

/// Connection lifecycle events reported to the state hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnState {
    /// A worker started handling the connection.
    Active,
    /// The handler took the connection over.
    Hijacked,
    /// The worker closed the connection.
    Closed,
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStats {
    /// Worker tasks alive, busy or idle.
    pub live_workers: usize,
    /// Workers parked on the idle stack.
    pub idle_workers: usize,
    /// Ceiling on live workers.
    pub max_workers: usize,
    /// Connections handed to a worker.
    pub served: u64,
    /// Connections refused by `serve`.
    pub rejected: u64,
    /// Workers evicted by the idle reaper.
    pub reaped: u64,
}
