//! Domain types shared by the builder, the submission layer and the
//! mirror.

use std::fmt;

use serde::{Deserialize, Serialize};
use solana_program::pubkey::Pubkey;

use crate::accounts::{ProjectAccount, StakeAccount};
use crate::address::PoolAddresses;
use crate::runtime::{AssetIdentity, RuntimeKind};

// ════════════════════════════════════════════════════════════════════════════════
// POOL
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateMode {
    /// Rate derived from `rate_bps_per_year`.
    Fixed,
    /// Rate derived from the reward reserve spread over the pool duration.
    Dynamic,
}

impl RateMode {
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Fixed => 0,
            Self::Dynamic => 1,
        }
    }

    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        if value == 1 {
            Self::Dynamic
        } else {
            Self::Fixed
        }
    }
}

/// Everything the client knows about one pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolDescriptor {
    pub asset: AssetIdentity,
    pub pool_slot: u32,
    pub addresses: PoolAddresses,
    pub admin: Pubkey,
    pub lockup_seconds: u64,
    pub rate_mode: RateMode,
    pub rate_bps_per_year: u64,
    pub pool_duration_seconds: u64,
    pub reflection_asset: Option<AssetIdentity>,
}

impl PoolDescriptor {
    /// Builds a descriptor from a decoded pool account. The reflection
    /// asset's runtime must be resolved by the caller.
    #[must_use]
    pub fn from_project(
        asset: AssetIdentity,
        pool_slot: u32,
        addresses: PoolAddresses,
        project: &ProjectAccount,
        reflection_asset: Option<AssetIdentity>,
    ) -> Self {
        Self {
            asset,
            pool_slot,
            addresses,
            admin: project.admin,
            lockup_seconds: project.lockup_seconds,
            rate_mode: RateMode::from_u8(project.rate_mode),
            rate_bps_per_year: project.rate_bps_per_year,
            pool_duration_seconds: project.pool_duration_seconds,
            reflection_asset,
        }
    }
}

/// Provisioning request for a new pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub rate_mode: RateMode,
    pub rate_bps_per_year: u64,
    pub lockup_seconds: u64,
    pub pool_duration_seconds: u64,
    /// Reward reserve deposited in the last on-chain step.
    pub reward_amount: u64,
    pub reflection_mint: Option<Pubkey>,
    pub referrer: Option<Pubkey>,
    pub referrer_split_bps: Option<u64>,
}

impl PoolConfig {
    /// Dynamic-rate pool that locks for its whole duration.
    #[must_use]
    pub fn dynamic(duration_days: u64, reward_amount: u64) -> Self {
        let seconds = duration_days.saturating_mul(86_400);
        Self {
            rate_mode: RateMode::Dynamic,
            rate_bps_per_year: 0,
            lockup_seconds: seconds,
            pool_duration_seconds: seconds,
            reward_amount,
            reflection_mint: None,
            referrer: None,
            referrer_split_bps: None,
        }
    }
}

/// Mirror-side view of a pool, as returned by lookups by mint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSummary {
    pub mint: Pubkey,
    pub pool_slot: u32,
    /// Reserved by an in-progress provisioning run.
    pub pending: bool,
}

// ════════════════════════════════════════════════════════════════════════════════
// STAKE RECORD
// ════════════════════════════════════════════════════════════════════════════════

/// Client view of an on-chain stake record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeRecord {
    pub address: Pubkey,
    pub owner: Pubkey,
    pub pool: Pubkey,
    pub principal: u64,
    pub stake_start_timestamp: i64,
    pub withdrawal_wallet: Pubkey,
    pub pending_rewards_snapshot: u64,
    pub pending_reflections_snapshot: u64,
}

impl StakeRecord {
    #[must_use]
    pub fn from_account(address: Pubkey, account: &StakeAccount) -> Self {
        Self {
            address,
            owner: account.user,
            pool: account.project,
            principal: account.amount,
            stake_start_timestamp: account.last_stake_timestamp,
            withdrawal_wallet: account.withdrawal_wallet,
            pending_rewards_snapshot: account.rewards_pending,
            pending_reflections_snapshot: account.reflections_pending,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// OPERATIONS
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Stake,
    Unstake,
    ClaimReward,
    ClaimReflection,
    RefreshReflections,
    CreatePoolShell,
    InitializePool,
    DepositRewards,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stake => "stake",
            Self::Unstake => "unstake",
            Self::ClaimReward => "claim_reward",
            Self::ClaimReflection => "claim_reflection",
            Self::RefreshReflections => "refresh_reflections",
            Self::CreatePoolShell => "create_pool_shell",
            Self::InitializePool => "initialize_pool",
            Self::DepositRewards => "deposit_rewards",
        };
        f.write_str(name)
    }
}

/// An auxiliary holding account that must exist before the core
/// instruction runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSpec {
    pub address: Pubkey,
    /// Wallet the account belongs to.
    pub owner: Pubkey,
    pub mint: Pubkey,
    pub runtime: RuntimeKind,
}

/// One user action, described before any instruction is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationEnvelope {
    pub kind: OperationKind,
    pub mint: Pubkey,
    pub pool_slot: u32,
    pub amount: Option<u64>,
    /// Accounts found missing during preparation, created in the same
    /// transaction.
    pub required_auxiliary_accounts: Vec<AccountSpec>,
    pub idempotency_hint: Option<String>,
}

impl OperationEnvelope {
    #[must_use]
    pub fn new(kind: OperationKind, mint: Pubkey, pool_slot: u32) -> Self {
        Self {
            kind,
            mint,
            pool_slot,
            amount: None,
            required_auxiliary_accounts: Vec::new(),
            idempotency_hint: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_mode_wire_values() {
        assert_eq!(RateMode::Fixed.as_u8(), 0);
        assert_eq!(RateMode::Dynamic.as_u8(), 1);
        assert_eq!(RateMode::from_u8(1), RateMode::Dynamic);
        assert_eq!(RateMode::from_u8(7), RateMode::Fixed);
    }

    #[test]
    fn dynamic_config_locks_for_duration() {
        let cfg = PoolConfig::dynamic(30, 5_000);
        assert_eq!(cfg.lockup_seconds, 30 * 86_400);
        assert_eq!(cfg.pool_duration_seconds, cfg.lockup_seconds);
        assert_eq!(cfg.rate_mode, RateMode::Dynamic);
    }

    #[test]
    fn pool_config_json_shape() {
        let cfg = PoolConfig::dynamic(1, 10);
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("\"rate_mode\":\"dynamic\""));
        let back: PoolConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn operation_kind_display() {
        assert_eq!(OperationKind::ClaimReflection.to_string(), "claim_reflection");
    }
}
