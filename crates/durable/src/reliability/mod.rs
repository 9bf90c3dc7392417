//! Reliability patterns for workflow execution
//!
//! This module provides [`RetryPolicy`], the backend-neutral retry
//! configuration with exponential backoff and jitter.

mod retry;

pub(crate) use retry::duration_millis;
pub use retry::RetryPolicy;
