//! Workflow execution engine
//!
//! The engine module holds the contracts every backend implements
//! ([`Executor`], [`WorkflowHandle`]), backend configuration, lifecycle
//! hooks and the [`BackendRegistry`] that builds executors by name.

mod config;
mod executor;
mod hooks;
mod registry;

pub use config::{backend_from_env, ClientHandle, Config, DURABLE_BACKEND, INMEMORY_BACKEND};
pub use executor::{Executor, ExecutorError, WorkflowHandle, STATUS_QUERY};
pub use hooks::ExecutorHooks;
pub use registry::{default_registry, BackendFactory, BackendRegistry, RegistryError};
