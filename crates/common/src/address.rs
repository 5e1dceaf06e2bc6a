//! # Address Deriver
//!
//! Pure derivation of program-owned addresses. Every address the client
//! touches for a pool is a function of `(program_id, mint, pool_slot)`, and
//! every stake record is a function of `(program_id, pool, owner)`.
//!
//! ```text
//! ("project",       mint, slot_le8) ──► pool address
//! ("staking_vault", mint, slot_le8) ──► staking vault
//! ("reward_vault",  mint, slot_le8) ──► reward vault
//! ("stake",         pool, owner)    ──► stake record
//! ("platform_v2")                   ──► platform config
//! ```
//!
//! The slot is a `u32` in the client but the on-chain program stores
//! `pool_id: u64`, so the seed is always the 8-byte little-endian form.
//!
//! ## Compatibility
//!
//! Vault seeds are `(mint, slot_le8)`. Program builds that seed the vaults
//! with the pool address instead (`("staking_vault", pool)`,
//! `("reward_vault", pool)`) derive different vault addresses, and every
//! pool instruction built here fails their seed constraints. Only point
//! the client at a program build that uses the mint-and-slot vault seeds.
//!
//! ## Contract
//!
//! - Same inputs, same output, in the same program namespace.
//! - Distinct `(mint, slot)` pairs never collide (seed sets are
//!   fixed-width so no two inputs concatenate to the same bytes).
//! - No I/O.

use serde::{Deserialize, Serialize};
use solana_program::pubkey::Pubkey;

pub const PROJECT_SEED: &[u8] = b"project";
pub const STAKING_VAULT_SEED: &[u8] = b"staking_vault";
pub const REWARD_VAULT_SEED: &[u8] = b"reward_vault";
pub const STAKE_SEED: &[u8] = b"stake";
pub const PLATFORM_SEED: &[u8] = b"platform_v2";

/// Seed encoding of a pool slot.
#[must_use]
pub fn slot_seed(pool_slot: u32) -> [u8; 8] {
    u64::from(pool_slot).to_le_bytes()
}

// ════════════════════════════════════════════════════════════════════════════════
// ADDRESS KIND
// ════════════════════════════════════════════════════════════════════════════════

/// Typed seed sets. Using an enum instead of raw seed slices means a
/// malformed seed list cannot be constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Pool { mint: Pubkey, pool_slot: u32 },
    StakingVault { mint: Pubkey, pool_slot: u32 },
    RewardVault { mint: Pubkey, pool_slot: u32 },
    StakeRecord { pool: Pubkey, owner: Pubkey },
    Platform,
}

/// Derives the address for `kind` under `program_id`.
#[must_use]
pub fn derive(program_id: &Pubkey, kind: AddressKind) -> Pubkey {
    derive_with_bump(program_id, kind).0
}

/// Same as [`derive`] but also returns the canonical bump.
#[must_use]
pub fn derive_with_bump(program_id: &Pubkey, kind: AddressKind) -> (Pubkey, u8) {
    match kind {
        AddressKind::Pool { mint, pool_slot } => Pubkey::find_program_address(
            &[PROJECT_SEED, mint.as_ref(), &slot_seed(pool_slot)],
            program_id,
        ),
        AddressKind::StakingVault { mint, pool_slot } => Pubkey::find_program_address(
            &[STAKING_VAULT_SEED, mint.as_ref(), &slot_seed(pool_slot)],
            program_id,
        ),
        AddressKind::RewardVault { mint, pool_slot } => Pubkey::find_program_address(
            &[REWARD_VAULT_SEED, mint.as_ref(), &slot_seed(pool_slot)],
            program_id,
        ),
        AddressKind::StakeRecord { pool, owner } => Pubkey::find_program_address(
            &[STAKE_SEED, pool.as_ref(), owner.as_ref()],
            program_id,
        ),
        AddressKind::Platform => Pubkey::find_program_address(&[PLATFORM_SEED], program_id),
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// POOL ADDRESSES
// ════════════════════════════════════════════════════════════════════════════════

/// The three addresses that make up one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolAddresses {
    pub pool: Pubkey,
    pub staking_vault: Pubkey,
    pub reward_vault: Pubkey,
}

impl PoolAddresses {
    #[must_use]
    pub fn derive(program_id: &Pubkey, mint: &Pubkey, pool_slot: u32) -> Self {
        Self {
            pool: derive(program_id, AddressKind::Pool { mint: *mint, pool_slot }),
            staking_vault: derive(
                program_id,
                AddressKind::StakingVault { mint: *mint, pool_slot },
            ),
            reward_vault: derive(
                program_id,
                AddressKind::RewardVault { mint: *mint, pool_slot },
            ),
        }
    }

    /// Stake record address for `owner` in this pool.
    #[must_use]
    pub fn stake_record(&self, program_id: &Pubkey, owner: &Pubkey) -> Pubkey {
        derive(
            program_id,
            AddressKind::StakeRecord { pool: self.pool, owner: *owner },
        )
    }
}

/// Platform config address.
#[must_use]
pub fn platform_address(program_id: &Pubkey) -> Pubkey {
    derive(program_id, AddressKind::Platform)
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════
