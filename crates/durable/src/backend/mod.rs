//! Execution backends
//!
//! - [`memory`]: tokio tasks and real timers in this process
//! - [`durable`]: adapter over an external deterministic-replay engine

pub mod durable;
pub mod memory;
