//! Position Fetcher - paginated registry scan
//!
//! Pages through the position registry with two accessors per offset
//! (all positions + unstaked concentrated positions; the sources
//! overlap) and submits the whole plan as one batch. Empty slots and
//! zero-pool rows are dropped, the rest deduplicated by (id, pool).
//!
//! Degraded-read policy: a failed page only shrinks this cycle's
//! coverage - no retry, no error. The report counts failed pages so
//! the driver can rotate endpoints when nothing at all came back.

use alloy_primitives::{Address, U256};
use alloy_sol_types::{sol, SolCall};
use eyre::{eyre, Result};
use tracing::{debug, warn};

use crate::rpc::{BatchCall, BatchExecutor, CallOutcome};

/// Positions per registry page.
const PAGE_SIZE: u64 = 500;

// ============================================
// REGISTRY INTERFACE
// ============================================

sol! {
    interface IPositionRegistry {
        struct PositionInfo {
            uint256 id;
            address pool;
            uint128 liquidity;
            uint128 staked;
            int24 tickLower;
            int24 tickUpper;
            uint160 sqrtRatioLower;
            uint160 sqrtRatioUpper;
            uint256 lockEnd;
        }

        function poolsLength() external view returns (uint256);

        function positions(address account, uint256 offset, uint256 limit)
            external view returns (PositionInfo[] memory);

        function unstakedClPositions(address account, uint256 offset, uint256 limit)
            external view returns (PositionInfo[] memory);
    }
}

// ============================================
// TYPES
// ============================================

/// One concentrated-liquidity position as reported by the registry.
/// Immutable once decoded; lives for a single poll cycle.
#[derive(Debug, Clone)]
pub struct Position {
    pub id: U256,
    pub pool: Address,
    pub liquidity: u128,
    pub staked: u128,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub sqrt_ratio_lower: U256,
    pub sqrt_ratio_upper: U256,
    pub lock_end: U256,
}

impl From<IPositionRegistry::PositionInfo> for Position {
    fn from(info: IPositionRegistry::PositionInfo) -> Self {
        Self {
            id: info.id,
            pool: info.pool,
            liquidity: info.liquidity,
            staked: info.staked,
            tick_lower: info.tickLower.as_i32(),
            tick_upper: info.tickUpper.as_i32(),
            sqrt_ratio_lower: info.sqrtRatioLower.to::<U256>(),
            sqrt_ratio_upper: info.sqrtRatioUpper.to::<U256>(),
            lock_end: info.lockEnd,
        }
    }
}

impl Position {
    /// Registry pages are fixed-size arrays padded with zeroed slots.
    fn is_empty_slot(&self) -> bool {
        self.liquidity == 0 && self.staked == 0 && self.id == U256::ZERO
    }
}

/// Result of one registry scan.
#[derive(Debug)]
pub struct FetchReport {
    pub positions: Vec<Position>,
    pub failed_pages: usize,
    pub total_pages: usize,
}

impl FetchReport {
    /// True when the plan existed but not a single page came back -
    /// the signal the driver uses to rotate RPC endpoints.
    pub fn all_pages_failed(&self) -> bool {
        self.total_pages > 0 && self.failed_pages == self.total_pages
    }
}

// ============================================
// FETCHER
// ============================================

pub struct PositionFetcher {
    registry: Address,
    max_pool_scan: u64,
}

impl PositionFetcher {
    pub fn new(registry: Address, max_pool_scan: u64) -> Self {
        Self {
            registry,
            max_pool_scan,
        }
    }

    /// Enumerate all positions for `account`, deduplicated across the
    /// two overlapping registry accessors.
    pub async fn fetch(&self, exec: &BatchExecutor, account: Address) -> FetchReport {
        let count = match self.fetch_pool_count(exec).await {
            Ok(count) => count,
            Err(err) => {
                warn!(
                    "poolsLength() failed, scanning up to {} pools: {}",
                    self.max_pool_scan, err
                );
                self.max_pool_scan
            }
        };

        let calls = self.build_page_plan(account, count);
        let total_pages = calls.len();
        debug!("Scanning {} registry pages for {:?}", total_pages, account);

        let outcomes = exec.execute(&calls).await;

        let mut raw: Vec<Position> = Vec::new();
        let mut failed_pages = 0usize;
        for outcome in &outcomes {
            match outcome {
                CallOutcome::Success(bytes) => match decode_page(bytes) {
                    Ok(page) => raw.extend(page),
                    Err(err) => {
                        failed_pages += 1;
                        warn!("Undecodable registry page: {}", err);
                    }
                },
                CallOutcome::Failure(msg) => {
                    failed_pages += 1;
                    debug!("Registry page failed: {}", msg);
                }
            }
        }

        if failed_pages > 0 {
            warn!(
                "{}/{} registry pages failed this cycle (coverage reduced)",
                failed_pages, total_pages
            );
        }

        FetchReport {
            positions: collect_positions(raw),
            failed_pages,
            total_pages,
        }
    }

    async fn fetch_pool_count(&self, exec: &BatchExecutor) -> Result<u64> {
        let call = BatchCall {
            target: self.registry,
            calldata: IPositionRegistry::poolsLengthCall {}.abi_encode(),
        };
        let outcomes = exec.execute(std::slice::from_ref(&call)).await;

        let bytes = match outcomes.first() {
            Some(CallOutcome::Success(bytes)) => bytes,
            Some(CallOutcome::Failure(msg)) => return Err(eyre!("{}", msg)),
            None => return Err(eyre!("empty batch result")),
        };
        let count = IPositionRegistry::poolsLengthCall::abi_decode_returns(bytes)
            .map_err(|e| eyre!("poolsLength decode: {}", e))?;
        Ok(count.try_into().unwrap_or(self.max_pool_scan))
    }

    /// Two logical calls per page offset: the all-positions accessor
    /// and the unstaked-concentrated accessor.
    fn build_page_plan(&self, account: Address, count: u64) -> Vec<BatchCall> {
        let mut calls = Vec::new();
        for offset in page_offsets(count) {
            let offset = U256::from(offset);
            let limit = U256::from(PAGE_SIZE);
            calls.push(BatchCall {
                target: self.registry,
                calldata: IPositionRegistry::positionsCall {
                    account,
                    offset,
                    limit,
                }
                .abi_encode(),
            });
            calls.push(BatchCall {
                target: self.registry,
                calldata: IPositionRegistry::unstakedClPositionsCall {
                    account,
                    offset,
                    limit,
                }
                .abi_encode(),
            });
        }
        calls
    }
}

fn page_offsets(count: u64) -> impl Iterator<Item = u64> {
    (0..count).step_by(PAGE_SIZE as usize)
}

/// Both accessors share the return shape, so one decoder covers both.
fn decode_page(bytes: &[u8]) -> Result<Vec<Position>> {
    let infos = IPositionRegistry::positionsCall::abi_decode_returns(bytes)
        .map_err(|e| eyre!("page decode: {}", e))?;
    Ok(infos.into_iter().map(Position::from).collect())
}

/// Drop zero-pool rows and empty slots, then dedupe by (id, pool),
/// keeping the first occurrence.
fn collect_positions(raw: Vec<Position>) -> Vec<Position> {
    let mut seen = std::collections::HashSet::new();
    raw.into_iter()
        .filter(|p| p.pool != Address::ZERO)
        .filter(|p| !p.is_empty_slot())
        .filter(|p| seen.insert((p.id, p.pool)))
        .collect()
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    fn position(id: u64, pool: Address) -> Position {
        Position {
            id: U256::from(id),
            pool,
            liquidity: 1_000,
            staked: 0,
            tick_lower: -100,
            tick_upper: 100,
            sqrt_ratio_lower: U256::from(1u64),
            sqrt_ratio_upper: U256::from(2u64),
            lock_end: U256::ZERO,
        }
    }

    const POOL_A: Address = address!("1111111111111111111111111111111111111111");
    const POOL_B: Address = address!("2222222222222222222222222222222222222222");

    #[test]
    fn test_page_plan_is_two_calls_per_offset() {
        let fetcher = PositionFetcher::new(POOL_A, 4_000);
        let account = address!("3333333333333333333333333333333333333333");

        // ceil(1234 / 500) = 3 offsets -> 6 calls
        assert_eq!(fetcher.build_page_plan(account, 1_234).len(), 6);
        // exact multiple: ceil(1000 / 500) = 2 offsets -> 4 calls
        assert_eq!(fetcher.build_page_plan(account, 1_000).len(), 4);
        assert_eq!(fetcher.build_page_plan(account, 1).len(), 2);
        assert!(fetcher.build_page_plan(account, 0).is_empty());
    }

    #[test]
    fn test_dedup_by_id_and_pool() {
        // Same (id, pool) from both accessors; same id on another pool
        // is a distinct position
        let raw = vec![position(7, POOL_A), position(7, POOL_A), position(7, POOL_B)];
        let positions = collect_positions(raw);
        assert_eq!(positions.len(), 2);
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let mut first = position(7, POOL_A);
        first.liquidity = 111;
        let mut second = position(7, POOL_A);
        second.liquidity = 222;

        let positions = collect_positions(vec![first, second]);
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].liquidity, 111);
    }

    #[test]
    fn test_zero_pool_rows_are_dropped() {
        let raw = vec![position(7, Address::ZERO), position(8, POOL_A)];
        let positions = collect_positions(raw);
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].pool, POOL_A);
    }

    #[test]
    fn test_empty_slots_are_dropped() {
        let mut slot = position(0, POOL_A);
        slot.liquidity = 0;
        slot.staked = 0;

        // A real position that happens to have zero liquidity but a
        // staked balance is NOT an empty slot
        let mut staked_only = position(0, POOL_B);
        staked_only.liquidity = 0;
        staked_only.staked = 500;

        let positions = collect_positions(vec![slot, staked_only]);
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].pool, POOL_B);
    }
}
