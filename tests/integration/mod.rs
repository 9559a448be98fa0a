//! Integration tests for blaze_pool
//!
//! These drive the public pool API with in-memory connections, plus one
//! TCP smoke test against a bound listener.
//! Run with: cargo test --test integration

mod helpers;

mod adaptive_pool;
mod lifecycle;
mod tcp_echo;
mod worker_pool;
