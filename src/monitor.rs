//! State-Transition Monitor
//!
//! Per-position state machine over two independent axes (range and
//! stake), keyed by (pool, position id). Each poll cycle compares the
//! fresh status against the last observation and decides which alerts
//! fire:
//!
//! - out-of-range: on the in->out edge, and again while still out once
//!   the cooldown has elapsed since the last alert for that key
//! - back-in-range: exactly once per out->in edge, never gated
//! - unstaked: same shape as out-of-range on the stake axis
//!
//! The cooldown keeps a position parked outside its range for days
//! from paging every cycle; the edge-triggered back-in-range alert
//! cannot spam because it only fires once per excursion.
//!
//! A position never seen before is assumed to have been in range and
//! staked, so a freshly-seen healthy position stays quiet while a
//! freshly-seen broken one alerts immediately.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use alloy_primitives::{Address, U256};
use tracing::debug;

use crate::fetcher::{PoolState, Position};

/// Observations not seen for this many consecutive cycles are dropped;
/// a position that reappears later is treated as first-seen again.
const MISSED_CYCLES_BEFORE_PRUNE: u64 = 3;

// ============================================
// STATUS & ALERTS
// ============================================

/// Ephemeral join of a Position and its pool's current state.
/// Computed fresh every cycle, never stored.
#[derive(Debug, Clone)]
pub struct PositionStatus {
    pub pool: Address,
    pub position_id: U256,
    pub pool_symbol: String,
    pub current_tick: i32,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub in_range: bool,
    pub staked: bool,
}

impl PositionStatus {
    pub fn from_parts(position: &Position, pool: &PoolState) -> Self {
        Self {
            pool: position.pool,
            position_id: position.id,
            pool_symbol: pool.symbol.clone(),
            current_tick: pool.tick,
            tick_lower: position.tick_lower,
            tick_upper: position.tick_upper,
            in_range: is_in_range(pool.tick, position.tick_lower, position.tick_upper),
            staked: position.staked > 0,
        }
    }
}

/// Lower bound inclusive, upper bound exclusive - a tick sitting
/// exactly on tick_upper earns no fees.
pub fn is_in_range(tick: i32, tick_lower: i32, tick_upper: i32) -> bool {
    tick_lower <= tick && tick < tick_upper
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeDirection {
    Below,
    Above,
}

impl std::fmt::Display for RangeDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RangeDirection::Below => write!(f, "below"),
            RangeDirection::Above => write!(f, "above"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertKind {
    OutOfRange { direction: RangeDirection },
    BackInRange,
    Unstaked,
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub kind: AlertKind,
    pub status: PositionStatus,
}

/// One-time overview sent after the first successful cycle.
#[derive(Debug, Clone)]
pub struct StartupSummary {
    pub wallet: Address,
    pub total_positions: usize,
    pub cl_positions: usize,
    pub out_of_range: usize,
}

// ============================================
// MONITOR
// ============================================

struct Observation {
    in_range: bool,
    staked: bool,
    last_out_of_range_alert: Option<Instant>,
    last_unstaked_alert: Option<Instant>,
    last_seen_cycle: u64,
}

pub struct Monitor {
    cooldown: Duration,
    observations: HashMap<(Address, U256), Observation>,
    cycle: u64,
}

impl Monitor {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            observations: HashMap::new(),
            cycle: 0,
        }
    }

    /// Number of position keys currently remembered.
    pub fn tracked(&self) -> usize {
        self.observations.len()
    }

    pub fn evaluate(&mut self, statuses: &[PositionStatus]) -> Vec<Alert> {
        self.evaluate_at(statuses, Instant::now())
    }

    /// One poll cycle: decide alerts for every status, then update the
    /// observation map unconditionally.
    pub fn evaluate_at(&mut self, statuses: &[PositionStatus], now: Instant) -> Vec<Alert> {
        self.cycle += 1;
        let mut alerts = Vec::new();

        for status in statuses {
            let key = (status.pool, status.position_id);
            let (prev_in_range, prev_staked, mut last_range_alert, mut last_unstaked_alert) =
                match self.observations.remove(&key) {
                    Some(o) => (
                        o.in_range,
                        o.staked,
                        o.last_out_of_range_alert,
                        o.last_unstaked_alert,
                    ),
                    // First sight: assume it was healthy before
                    None => (true, true, None, None),
                };

            // Range axis
            if status.in_range {
                if !prev_in_range {
                    alerts.push(Alert {
                        kind: AlertKind::BackInRange,
                        status: status.clone(),
                    });
                }
                last_range_alert = None;
            } else if prev_in_range || cooldown_elapsed(last_range_alert, now, self.cooldown) {
                let direction = if status.current_tick < status.tick_lower {
                    RangeDirection::Below
                } else {
                    RangeDirection::Above
                };
                alerts.push(Alert {
                    kind: AlertKind::OutOfRange { direction },
                    status: status.clone(),
                });
                last_range_alert = Some(now);
            }

            // Stake axis
            if status.staked {
                last_unstaked_alert = None;
            } else if prev_staked || cooldown_elapsed(last_unstaked_alert, now, self.cooldown) {
                alerts.push(Alert {
                    kind: AlertKind::Unstaked,
                    status: status.clone(),
                });
                last_unstaked_alert = Some(now);
            }

            self.observations.insert(
                key,
                Observation {
                    in_range: status.in_range,
                    staked: status.staked,
                    last_out_of_range_alert: last_range_alert,
                    last_unstaked_alert,
                    last_seen_cycle: self.cycle,
                },
            );
        }

        self.prune_missing();
        alerts
    }

    /// Drop observations for positions that vanished from the fetch
    /// (withdrawn, migrated) instead of remembering them forever.
    fn prune_missing(&mut self) {
        let cycle = self.cycle;
        let before = self.observations.len();
        self.observations
            .retain(|_, o| cycle - o.last_seen_cycle < MISSED_CYCLES_BEFORE_PRUNE);
        let dropped = before - self.observations.len();
        if dropped > 0 {
            debug!("Pruned {} stale position observations", dropped);
        }
    }

    pub fn startup_summary(
        wallet: Address,
        total_positions: usize,
        statuses: &[PositionStatus],
    ) -> StartupSummary {
        StartupSummary {
            wallet,
            total_positions,
            cl_positions: statuses.len(),
            out_of_range: statuses.iter().filter(|s| !s.in_range).count(),
        }
    }
}

fn cooldown_elapsed(last_alert: Option<Instant>, now: Instant, cooldown: Duration) -> bool {
    match last_alert {
        Some(at) => now.duration_since(at) >= cooldown,
        None => true,
    }
}

// ============================================
// TESTS
// ============================================
