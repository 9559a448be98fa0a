//! Server configuration.

use std::net::SocketAddr;

use super::parse::{env_or, env_parse};
use super::ConfigError;
use crate::listener::DEFAULT_BACKLOG;

/// Acceptor and runtime configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address to listen on.
    pub listen_addr: SocketAddr,
    /// Tokio worker threads (0 = CPU count).
    pub runtime_threads: usize,
    /// `listen(2)` backlog.
    pub backlog: u32,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw_addr = env_or("LISTEN_ADDR", "0.0.0.0:8080");
        let listen_addr = raw_addr.parse().map_err(|e: std::net::AddrParseError| {
            ConfigError::Parse {
                key: "LISTEN_ADDR".into(),
                value: raw_addr.clone(),
                error: e.to_string(),
            }
        })?;

        Ok(Self {
            listen_addr,
            runtime_threads: env_parse("RUNTIME_THREADS", 0)?,
            backlog: env_parse("LISTEN_BACKLOG", DEFAULT_BACKLOG)?,
        })
    }

    /// Worker threads to start, resolving 0 to the CPU count.
    pub fn worker_threads(&self) -> usize {
        if self.runtime_threads == 0 {
            num_cpus::get()
        } else {
            self.runtime_threads
        }
    }
}
