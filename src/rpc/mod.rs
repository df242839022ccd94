//! Batched JSON-RPC plumbing
//!
//! Responsible for:
//! - Throttling and retrying individual RPC dispatches (rate limiter)
//! - Turning logical eth_call lists into chunked JSON-RPC array requests

mod batch;
mod rate_limiter;

pub use batch::{BatchCall, BatchExecutor, CallOutcome};
pub use rate_limiter::RateLimiter;
