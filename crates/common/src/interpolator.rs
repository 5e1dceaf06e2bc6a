//! # Reward Interpolator
//!
//! Rewards accrue continuously on-chain but are only materialized when a
//! stake is touched. Between touches the client estimates the balance from
//! the last snapshot:
//!
//! ```text
//! estimate(now) = last_reward_amount
//!               + principal × rate_per_second × elapsed / rate_scale
//!
//! elapsed = max(0, min(now, accrual_end) − last_update)
//! ```
//!
//! This is the same integer formula the program applies in its reward
//! update, so an estimate taken at time `t` equals what a transaction
//! landing at `t` would materialize.
//!
//! ## Monotonicity
//!
//! [`interpolate`] is non-decreasing in `now` for a fixed snapshot.
//! [`RewardInterpolator`] additionally clamps against its own high-water
//! mark so a clock that steps backwards never shows a smaller number.
//!
//! ## No I/O
//!
//! Everything here is pure arithmetic. Snapshot refresh lives in the
//! client's reward tracker.

use serde::{Deserialize, Serialize};

use crate::accounts::{ProjectAccount, StakeAccount};

/// Fixed-point scale of the program's `reward_rate_per_second`.
pub const REWARD_RATE_SCALE: u64 = 1_000_000_000;

pub const SECONDS_PER_YEAR: u64 = 31_536_000;

pub const BPS_DENOMINATOR: u64 = 10_000;

// ════════════════════════════════════════════════════════════════════════════════
// SNAPSHOT
// ════════════════════════════════════════════════════════════════════════════════

/// Last known accrual state of one stake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardSnapshot {
    pub principal: u64,
    pub rate_per_second: u64,
    /// Divisor applied to `principal × rate × elapsed`. Zero is treated
    /// as one.
    pub rate_scale: u64,
    /// Unix seconds of the snapshot.
    pub last_update: i64,
    pub last_reward_amount: u64,
    /// Accrual stops here (pool end). `None` = open-ended.
    pub accrual_end: Option<i64>,
}

impl RewardSnapshot {
    /// Builds a snapshot from the on-chain stake and its pool.
    #[must_use]
    pub fn from_accounts(stake: &StakeAccount, project: &ProjectAccount) -> Self {
        Self {
            principal: stake.amount,
            rate_per_second: project.reward_rate_per_second,
            rate_scale: REWARD_RATE_SCALE,
            last_update: stake.last_stake_timestamp,
            last_reward_amount: stake.rewards_pending,
            accrual_end: (project.pool_end_time > 0).then_some(project.pool_end_time),
        }
    }
}

/// Estimated reward at `now`. Saturates at `u64::MAX`.
#[must_use]
pub fn interpolate(snapshot: &RewardSnapshot, now: i64) -> u64 {
    let until = match snapshot.accrual_end {
        Some(end) => now.min(end),
        None => now,
    };
    let elapsed = until.saturating_sub(snapshot.last_update).max(0) as u128;
    let scale = u128::from(snapshot.rate_scale.max(1));

    let accrued = u128::from(snapshot.principal)
        .saturating_mul(u128::from(snapshot.rate_per_second))
        .saturating_mul(elapsed)
        / scale;

    let total = u128::from(snapshot.last_reward_amount).saturating_add(accrued);
    u64::try_from(total).unwrap_or(u64::MAX)
}

// ════════════════════════════════════════════════════════════════════════════════
// STATEFUL INTERPOLATOR
// ════════════════════════════════════════════════════════════════════════════════

/// Holds one snapshot and never reports less than it already reported
/// for that snapshot.
#[derive(Debug, Clone)]
pub struct RewardInterpolator {
    snapshot: RewardSnapshot,
    high_water: u64,
}

impl RewardInterpolator {
    #[must_use]
    pub fn new(snapshot: RewardSnapshot) -> Self {
        Self {
            high_water: snapshot.last_reward_amount,
            snapshot,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> &RewardSnapshot {
        &self.snapshot
    }

    /// Estimate at `now`, clamped to be non-decreasing.
    pub fn estimate(&mut self, now: i64) -> u64 {
        let value = interpolate(&self.snapshot, now).max(self.high_water);
        self.high_water = value;
        value
    }

    /// Replaces the snapshot. The high-water mark restarts from the new
    /// snapshot since a claim legitimately lowers the pending amount.
    pub fn reset(&mut self, snapshot: RewardSnapshot) {
        self.snapshot = snapshot;
        self.high_water = snapshot.last_reward_amount;
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// RATE HELPERS
// ════════════════════════════════════════════════════════════════════════════════

/// Per-second rate (scaled by [`REWARD_RATE_SCALE`]) of a fixed-mode pool.
#[must_use]
pub fn fixed_rate_per_second(rate_bps_per_year: u64) -> u64 {
    let numerator = u128::from(rate_bps_per_year) * u128::from(REWARD_RATE_SCALE);
    let denominator = u128::from(BPS_DENOMINATOR) * u128::from(SECONDS_PER_YEAR);
    u64::try_from(numerator / denominator).unwrap_or(u64::MAX)
}

/// Annual percentage of a dynamic pool, from its pool-wide rate and
/// current total stake. `None` when nothing is staked.
#[must_use]
pub fn dynamic_apr_percent(reward_rate_per_second: u64, total_staked: u64) -> Option<f64> {
    if total_staked == 0 {
        return None;
    }
    let annual = reward_rate_per_second as f64 * SECONDS_PER_YEAR as f64;
    Some(annual * 100.0 / total_staked as f64)
}

/// Annual percentage of a fixed pool.
#[must_use]
pub fn fixed_apy_percent(rate_bps_per_year: u64) -> f64 {
    rate_bps_per_year as f64 / 100.0
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════
