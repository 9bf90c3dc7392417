//! In-process backend
//!
//! Runs workflows on tokio tasks with real timers. Fast and dependency-free,
//! but not durable across process restarts.

mod context;
mod executor;
mod mailbox;

pub use executor::{InMemoryExecutor, InMemoryExecutorConfig, InMemoryHandle};
