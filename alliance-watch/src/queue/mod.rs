//! Serialized access to the player API.

mod operation;
mod rate_limiter;
mod service;

pub use operation::{Operation, OperationKind, OperationSummary};
pub use rate_limiter::{BackoffPolicy, RateLimitState, RateLimiter};
pub use service::{OperationHandler, QueueConfig, QueueInfo, RequestQueue};
