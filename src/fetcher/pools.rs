//! Pool Resolver - two-stage batched pool state fetch
//!
//! Stage 0 serves pools whose state is still fresh in the TTL cache.
//! Stage 1 batches four calls per remaining pool (slot0, token0,
//! token1, liquidity); a pool survives only if all four succeed.
//! Stage 2 batches one symbol() call per referenced token and falls
//! back to a placeholder when a token will not report one.
//!
//! A pool that could not be fully resolved is simply absent from the
//! returned map for this cycle - callers treat a missing entry as
//! temporarily unavailable, not as an error.

use std::collections::HashMap;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use alloy_sol_types::{sol, SolCall};
use eyre::{eyre, Result};
use tracing::{debug, warn};

use crate::cache::TtlCache;
use crate::rpc::{BatchCall, BatchExecutor, CallOutcome};

/// Shown when a token contract has no usable symbol().
const SYMBOL_PLACEHOLDER: &str = "???";

// ============================================
// POOL INTERFACES
// ============================================

sol! {
    interface IClPool {
        function slot0() external view returns (
            uint160 sqrtPriceX96, int24 tick, uint16 observationIndex,
            uint16 observationCardinality, uint16 observationCardinalityNext,
            uint8 feeProtocol, bool unlocked
        );
        function token0() external view returns (address);
        function token1() external view returns (address);
        function liquidity() external view returns (uint128);
    }

    interface IERC20 {
        function symbol() external view returns (string memory);
    }
}

// ============================================
// TYPES
// ============================================

/// Current state of one concentrated-liquidity pool. The tick is the
/// authoritative "current price" for range checks.
#[derive(Debug, Clone)]
pub struct PoolState {
    pub address: Address,
    pub symbol: String,
    pub tick: i32,
    pub sqrt_price: U256,
    pub liquidity: u128,
    pub token0: Address,
    pub token1: Address,
}

/// Everything stage 1 learns about a pool before symbols exist.
struct PoolBasics {
    sqrt_price: U256,
    tick: i32,
    token0: Address,
    token1: Address,
    liquidity: u128,
}

// ============================================
// RESOLVER
// ============================================

pub struct PoolResolver {
    cache: TtlCache<Address, PoolState>,
}

impl PoolResolver {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: TtlCache::new(ttl),
        }
    }

    pub fn cached_pools(&self) -> usize {
        self.cache.len()
    }

    /// Resolve current state for every pool address, cache hits plus
    /// freshly fetched. Pools that could not be fully resolved are
    /// absent from the result.
    pub async fn resolve(
        &mut self,
        exec: &BatchExecutor,
        pools: &[Address],
    ) -> HashMap<Address, PoolState> {
        let (mut resolved, misses) = self.split_cached(pools);
        if misses.is_empty() {
            return resolved;
        }
        debug!(
            "Resolving {} pools ({} served from cache)",
            misses.len(),
            resolved.len()
        );

        // Stage 1: pool basics, four calls per pool
        let calls = build_basics_plan(&misses);
        let outcomes = exec.execute(&calls).await;

        let mut basics: Vec<(Address, PoolBasics)> = Vec::new();
        for (i, &pool) in misses.iter().enumerate() {
            match decode_basics(&outcomes[i * 4..i * 4 + 4]) {
                Some(b) => basics.push((pool, b)),
                None => warn!("Pool {:?} unresolved this cycle (partial data)", pool),
            }
        }

        // Stage 2: symbols for the union of referenced tokens
        let mut tokens: Vec<Address> = Vec::new();
        for (_, b) in &basics {
            for token in [b.token0, b.token1] {
                if !tokens.contains(&token) {
                    tokens.push(token);
                }
            }
        }
        let symbols = self.fetch_symbols(exec, &tokens).await;

        for (pool, b) in basics {
            let state = assemble_pool_state(pool, &b, &symbols);
            self.cache.set(pool, state.clone());
            resolved.insert(pool, state);
        }
        resolved
    }

    /// Single-pool convenience wrapper; errors if the pool could not
    /// be resolved this cycle.
    #[allow(dead_code)]
    pub async fn resolve_one(
        &mut self,
        exec: &BatchExecutor,
        pool: Address,
    ) -> Result<PoolState> {
        let mut map = self.resolve(exec, std::slice::from_ref(&pool)).await;
        map.remove(&pool)
            .ok_or_else(|| eyre!("pool {:?} could not be resolved", pool))
    }

    /// Stage 0: partition into fresh cache hits and pools that need a
    /// fetch. Duplicate input addresses collapse here.
    fn split_cached(&mut self, pools: &[Address]) -> (HashMap<Address, PoolState>, Vec<Address>) {
        let mut hits = HashMap::new();
        let mut misses = Vec::new();
        for &pool in pools {
            if hits.contains_key(&pool) || misses.contains(&pool) {
                continue;
            }
            match self.cache.get(&pool) {
                Some(state) => {
                    hits.insert(pool, state.clone());
                }
                None => misses.push(pool),
            }
        }
        (hits, misses)
    }

    async fn fetch_symbols(
        &self,
        exec: &BatchExecutor,
        tokens: &[Address],
    ) -> HashMap<Address, String> {
        let calls: Vec<BatchCall> = tokens
            .iter()
            .map(|&token| BatchCall {
                target: token,
                calldata: IERC20::symbolCall {}.abi_encode(),
            })
            .collect();
        let outcomes = exec.execute(&calls).await;
        symbol_lookup(tokens, &outcomes)
    }
}

// ============================================
// PLAN BUILDING & ASSEMBLY
// ============================================

fn build_basics_plan(pools: &[Address]) -> Vec<BatchCall> {
    let mut calls = Vec::with_capacity(pools.len() * 4);
    for &pool in pools {
        calls.push(BatchCall {
            target: pool,
            calldata: IClPool::slot0Call {}.abi_encode(),
        });
        calls.push(BatchCall {
            target: pool,
            calldata: IClPool::token0Call {}.abi_encode(),
        });
        calls.push(BatchCall {
            target: pool,
            calldata: IClPool::token1Call {}.abi_encode(),
        });
        calls.push(BatchCall {
            target: pool,
            calldata: IClPool::liquidityCall {}.abi_encode(),
        });
    }
    calls
}

/// All four basics calls must have succeeded and decoded, otherwise
/// the pool is dropped for this cycle.
fn decode_basics(outcomes: &[CallOutcome]) -> Option<PoolBasics> {
    let slot0 = IClPool::slot0Call::abi_decode_returns(outcomes[0].data()?).ok()?;
    let token0 = IClPool::token0Call::abi_decode_returns(outcomes[1].data()?).ok()?;
    let token1 = IClPool::token1Call::abi_decode_returns(outcomes[2].data()?).ok()?;
    let liquidity = IClPool::liquidityCall::abi_decode_returns(outcomes[3].data()?).ok()?;

    Some(PoolBasics {
        sqrt_price: slot0.sqrtPriceX96.to::<U256>(),
        tick: slot0.tick.as_i32(),
        token0,
        token1,
        liquidity,
    })
}

fn symbol_lookup(tokens: &[Address], outcomes: &[CallOutcome]) -> HashMap<Address, String> {
    tokens
        .iter()
        .zip(outcomes)
        .map(|(&token, outcome)| {
            let symbol = outcome
                .data()
                .and_then(|bytes| IERC20::symbolCall::abi_decode_returns(bytes).ok())
                .unwrap_or_else(|| SYMBOL_PLACEHOLDER.to_string());
            (token, symbol)
        })
        .collect()
}

fn assemble_pool_state(
    pool: Address,
    basics: &PoolBasics,
    symbols: &HashMap<Address, String>,
) -> PoolState {
    let sym = |token: &Address| {
        symbols
            .get(token)
            .cloned()
            .unwrap_or_else(|| SYMBOL_PLACEHOLDER.to_string())
    };
    PoolState {
        address: pool,
        symbol: format!("{}/{}", sym(&basics.token0), sym(&basics.token1)),
        tick: basics.tick,
        sqrt_price: basics.sqrt_price,
        liquidity: basics.liquidity,
        token0: basics.token0,
        token1: basics.token1,
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    const POOL: Address = address!("1111111111111111111111111111111111111111");
    const TOKEN0: Address = address!("4444444444444444444444444444444444444444");
    const TOKEN1: Address = address!("5555555555555555555555555555555555555555");

    fn basics() -> PoolBasics {
        PoolBasics {
            sqrt_price: U256::from(1u64) << 96,
            tick: 1_000,
            token0: TOKEN0,
            token1: TOKEN1,
            liquidity: 42,
        }
    }

    fn state(pool: Address) -> PoolState {
        assemble_pool_state(pool, &basics(), &HashMap::new())
    }

    /// ABI encoding of a single string return value.
    fn encode_symbol(s: &str) -> Vec<u8> {
        let mut out = vec![0u8; 64];
        out[31] = 0x20;
        out[63] = s.len() as u8;
        let mut data = s.as_bytes().to_vec();
        data.resize(32, 0);
        out.extend(data);
        out
    }

    #[test]
    fn test_basics_plan_is_four_calls_per_pool() {
        let pools = [POOL, TOKEN0];
        assert_eq!(build_basics_plan(&pools).len(), 8);
    }

    #[test]
    fn test_symbol_lookup_decodes_and_falls_back() {
        let tokens = [TOKEN0, TOKEN1];
        let outcomes = [
            CallOutcome::Success(encode_symbol("USDC")),
            CallOutcome::Failure("execution reverted".to_string()),
        ];
        let symbols = symbol_lookup(&tokens, &outcomes);
        assert_eq!(symbols[&TOKEN0], "USDC");
        assert_eq!(symbols[&TOKEN1], SYMBOL_PLACEHOLDER);
    }

    #[test]
    fn test_assemble_joins_symbols() {
        let mut symbols = HashMap::new();
        symbols.insert(TOKEN0, "WETH".to_string());
        symbols.insert(TOKEN1, "USDC".to_string());

        let state = assemble_pool_state(POOL, &basics(), &symbols);
        assert_eq!(state.symbol, "WETH/USDC");
        assert_eq!(state.tick, 1_000);
        assert_eq!(state.liquidity, 42);
    }

    #[test]
    fn test_assemble_placeholder_for_unknown_tokens() {
        let state = assemble_pool_state(POOL, &basics(), &HashMap::new());
        assert_eq!(state.symbol, "???/???");
    }

    #[test]
    fn test_fresh_cache_hit_skips_fetch() {
        let mut resolver = PoolResolver::new(Duration::from_secs(60));
        resolver.cache.set(POOL, state(POOL));

        let (hits, misses) = resolver.split_cached(&[POOL, TOKEN0]);
        assert!(hits.contains_key(&POOL));
        assert_eq!(misses, vec![TOKEN0]);
    }

    #[test]
    fn test_expired_cache_entry_is_refetched() {
        let mut resolver = PoolResolver::new(Duration::ZERO);
        resolver.cache.set(POOL, state(POOL));

        let (hits, misses) = resolver.split_cached(&[POOL]);
        assert!(hits.is_empty());
        assert_eq!(misses, vec![POOL]);
    }

    #[test]
    fn test_duplicate_pool_addresses_collapse() {
        let mut resolver = PoolResolver::new(Duration::from_secs(60));
        let (hits, misses) = resolver.split_cached(&[POOL, POOL, POOL]);
        assert!(hits.is_empty());
        assert_eq!(misses, vec![POOL]);
    }

    #[test]
    fn test_partial_basics_drop_pool() {
        let sym = encode_symbol("X");
        let outcomes = [
            CallOutcome::Failure("transport".to_string()),
            CallOutcome::Success(sym.clone()),
            CallOutcome::Success(sym.clone()),
            CallOutcome::Success(sym),
        ];
        assert!(decode_basics(&outcomes).is_none());
    }
}
