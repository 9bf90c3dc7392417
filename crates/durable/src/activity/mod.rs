//! Activity abstractions
//!
//! Activities are the side-effecting units of work a workflow invokes. They:
//! - May fail and be retried according to the bound retry policy
//! - Receive the attempt number and a retry-stable activity ID
//! - Support cancellation via tokens

mod context;
mod definition;

pub use context::ActivityContext;
pub use definition::{Activity, ActivityError, TypedActivity};
