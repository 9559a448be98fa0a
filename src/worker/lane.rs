//! Execution-lane detection.
//!
//! With a single scheduler thread an asynchronous handoff would let the
//! acceptor run ahead of every worker, so dispatch switches to rendezvous.

use tokio::runtime::{Handle, RuntimeFlavor};

use crate::config::LaneMode;

/// Resolved dispatch mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lane {
    /// One schedulable lane: dispatch waits for the worker to pick up.
    Single,
    /// Several lanes: dispatch returns as soon as the payload is stored.
    Multi,
}

impl LaneMode {
    /// Resolve against the runtime the caller is running in.
    pub fn resolve(self) -> Lane {
        match self {
            LaneMode::Single => Lane::Single,
            LaneMode::Multi => Lane::Multi,
            LaneMode::Auto => detect(),
        }
    }
}

fn detect() -> Lane {
    match Handle::try_current() {
        Ok(handle) => match handle.runtime_flavor() {
            RuntimeFlavor::CurrentThread => Lane::Single,
            _ if handle.metrics().num_workers() <= 1 => Lane::Single,
            _ => Lane::Multi,
        },
        Err(_) if num_cpus::get() == 1 => Lane::Single,
        Err(_) => Lane::Multi,
    }
}
