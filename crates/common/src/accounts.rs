//! # Program Account Layouts
//!
//! Borsh mirrors of the staking program's accounts. Each account on the
//! ledger is `discriminator(8) || borsh(body)`, where the discriminator is
//! the first 8 bytes of `sha256("account:<Name>")`.
//!
//! Field order matters: it is the wire order. Do not reorder.
//!
//! ```text
//! ┌──────────────┬─────────────────────────────────────┐
//! │ 8-byte disc  │ borsh body (Platform|Project|Stake) │
//! └──────────────┴─────────────────────────────────────┘
//! ```

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};
use solana_program::pubkey::Pubkey;
use thiserror::Error;

/// Discriminator length prefixing every program account.
pub const DISCRIMINATOR_LEN: usize = 8;

/// `sha256("account:<name>")[..8]`.
#[must_use]
pub fn account_discriminator(name: &str) -> [u8; DISCRIMINATOR_LEN] {
    let digest = Sha256::digest(format!("account:{name}").as_bytes());
    let mut out = [0u8; DISCRIMINATOR_LEN];
    out.copy_from_slice(&digest[..DISCRIMINATOR_LEN]);
    out
}

// ════════════════════════════════════════════════════════════════════════════════
// ERROR
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AccountDecodeError {
    #[error("account data too short: {len} bytes")]
    TooShort { len: usize },

    #[error("discriminator mismatch for {account}")]
    Discriminator { account: &'static str },

    #[error("borsh decode failed for {account}: {reason}")]
    Borsh { account: &'static str, reason: String },
}

/// Shared decode / encode for all program accounts.
pub trait ProgramAccount: BorshSerialize + BorshDeserialize + Sized {
    const NAME: &'static str;

    fn discriminator() -> [u8; DISCRIMINATOR_LEN] {
        account_discriminator(Self::NAME)
    }

    /// Decodes raw account data. Trailing bytes (account padding) are
    /// ignored.
    fn decode(data: &[u8]) -> Result<Self, AccountDecodeError> {
        if data.len() < DISCRIMINATOR_LEN {
            return Err(AccountDecodeError::TooShort { len: data.len() });
        }
        if data[..DISCRIMINATOR_LEN] != Self::discriminator() {
            return Err(AccountDecodeError::Discriminator { account: Self::NAME });
        }
        let mut body = &data[DISCRIMINATOR_LEN..];
        Self::deserialize(&mut body).map_err(|e| AccountDecodeError::Borsh {
            account: Self::NAME,
            reason: e.to_string(),
        })
    }

    /// Encodes to the on-ledger representation.
    fn encode(&self) -> Vec<u8> {
        let mut out = Self::discriminator().to_vec();
        // Writing into a Vec cannot fail.
        let _ = self.serialize(&mut out);
        out
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// PLATFORM
// ════════════════════════════════════════════════════════════════════════════════

/// Global platform config. Holds the fee collector every value-moving
/// instruction pays into.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct PlatformAccount {
    pub admin: Pubkey,
    pub fee_collector: Pubkey,
    pub platform_token_fee_bps: u64,
    pub platform_sol_fee: u64,
    pub is_initialized: bool,
    pub bump: u8,
}

impl ProgramAccount for PlatformAccount {
    const NAME: &'static str = "Platform";
}

// ════════════════════════════════════════════════════════════════════════════════
// PROJECT (POOL)
// ════════════════════════════════════════════════════════════════════════════════

/// On-chain pool state.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ProjectAccount {
    pub admin: Pubkey,
    pub token_mint: Pubkey,
    pub pool_id: u64,
    pub staking_vault: Pubkey,
    pub reward_vault: Pubkey,
    pub reflection_vault: Option<Pubkey>,
    pub reflection_token: Option<Pubkey>,

    pub total_staked: u64,
    pub total_rewards_deposited: u64,
    pub total_rewards_claimed: u64,

    pub rate_bps_per_year: u64,
    /// 0 = fixed, 1 = dynamic.
    pub rate_mode: u8,
    /// Fixed-point, scaled by `REWARD_RATE_SCALE`.
    pub reward_rate_per_second: u64,
    pub lockup_seconds: u64,
    pub pool_duration_seconds: u64,
    pub pool_start_time: i64,
    pub pool_end_time: i64,

    pub last_update_time: i64,
    pub reward_per_token_stored: u64,
    pub reflection_per_token_stored: u64,
    pub last_reflection_update_time: i64,
    pub last_reflection_balance: u64,

    pub referrer: Option<Pubkey>,
    pub referrer_split_bps: u64,

    pub is_paused: bool,
    pub deposit_paused: bool,
    pub withdraw_paused: bool,
    pub claim_paused: bool,
    pub is_initialized: bool,
    pub bump: u8,
    pub total_reflection_debt: u64,
}

impl ProgramAccount for ProjectAccount {
    const NAME: &'static str = "Project";
}

impl ProjectAccount {
    /// Empty shell as written by `create_project`, before parameters are
    /// initialized.
    #[must_use]
    pub fn shell(
        admin: Pubkey,
        token_mint: Pubkey,
        pool_slot: u32,
        staking_vault: Pubkey,
        reward_vault: Pubkey,
    ) -> Self {
        Self {
            admin,
            token_mint,
            pool_id: u64::from(pool_slot),
            staking_vault,
            reward_vault,
            reflection_vault: None,
            reflection_token: None,
            total_staked: 0,
            total_rewards_deposited: 0,
            total_rewards_claimed: 0,
            rate_bps_per_year: 0,
            rate_mode: 0,
            reward_rate_per_second: 0,
            lockup_seconds: 0,
            pool_duration_seconds: 0,
            pool_start_time: 0,
            pool_end_time: 0,
            last_update_time: 0,
            reward_per_token_stored: 0,
            reflection_per_token_stored: 0,
            last_reflection_update_time: 0,
            last_reflection_balance: 0,
            referrer: None,
            referrer_split_bps: 0,
            is_paused: false,
            deposit_paused: false,
            withdraw_paused: false,
            claim_paused: false,
            is_initialized: false,
            bump: 0,
            total_reflection_debt: 0,
        }
    }

    #[must_use]
    pub fn reflections_enabled(&self) -> bool {
        self.reflection_vault.is_some() && self.reflection_token.is_some()
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// STAKE
// ════════════════════════════════════════════════════════════════════════════════

/// Per-user stake record.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct StakeAccount {
    pub user: Pubkey,
    pub project: Pubkey,
    pub amount: u64,
    pub last_stake_timestamp: i64,
    pub withdrawal_wallet: Pubkey,
    pub reward_per_token_paid: u64,
    pub rewards_pending: u64,
    pub total_rewards_claimed: u64,
    pub reflection_per_token_paid: u64,
    pub reflections_pending: u64,
    pub total_reflections_claimed: u64,
    pub reflection_debt: u64,
    pub reward_rate_snapshot: u64,
    pub bump: u8,
}

impl ProgramAccount for StakeAccount {
    const NAME: &'static str = "Stake";
}

impl StakeAccount {
    /// Fresh record as the program writes it on first deposit.
    #[must_use]
    pub fn opened(user: Pubkey, project: Pubkey, amount: u64, now: i64) -> Self {
        Self {
            user,
            project,
            amount,
            last_stake_timestamp: now,
            withdrawal_wallet: user,
            reward_per_token_paid: 0,
            rewards_pending: 0,
            total_rewards_claimed: 0,
            reflection_per_token_paid: 0,
            reflections_pending: 0,
            total_reflections_claimed: 0,
            reflection_debt: 0,
            reward_rate_snapshot: 0,
            bump: 0,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════
