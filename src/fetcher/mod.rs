//! On-chain data fetch
//!
//! Responsible for:
//! - Paging through the position registry for an account (two
//!   overlapping accessors, deduplicated)
//! - Resolving pool state and token symbols in two batched stages

mod pools;
mod positions;

pub use pools::{PoolResolver, PoolState};
pub use positions::{FetchReport, Position, PositionFetcher};
