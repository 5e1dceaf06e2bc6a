//! # Program Instructions
//!
//! Encoders for the staking program's instructions. Data layout is
//! `sha256("global:<name>")[..8] || borsh(args)`; every pool instruction
//! leads with `(token_mint, pool_id)`.
//!
//! Account lists follow the program's account structs exactly. Two
//! conventions cover accounts that may not exist:
//!
//! - `initialize_pool`'s `Option<..>` accounts are passed as the program id
//!   when absent, which is how the program reads `None`.
//! - `deposit` and `withdraw` always take a referrer and a reflection vault.
//!   Callers pass the staker for a missing referrer and the pool's staking
//!   vault for a missing reflection vault; the program ignores both when
//!   the pool has no referrer or reflections.

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};
use solana_program::instruction::{AccountMeta, Instruction};
use solana_program::pubkey::Pubkey;
use solana_program::system_program;

use crate::address::PoolAddresses;

/// `sha256("global:<name>")[..8]`.
#[must_use]
pub fn instruction_discriminator(name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("global:{name}").as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

fn encode<A: BorshSerialize>(name: &str, args: &A) -> Vec<u8> {
    let mut data = instruction_discriminator(name).to_vec();
    // Writing into a Vec cannot fail.
    let _ = args.serialize(&mut data);
    data
}

// ════════════════════════════════════════════════════════════════════════════════
// ARGUMENTS
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct PoolArgs {
    pub token_mint: Pubkey,
    pub pool_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct AmountArgs {
    pub token_mint: Pubkey,
    pub pool_id: u64,
    pub amount: u64,
}

/// Parameters for `initialize_pool`.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct InitializePoolParams {
    pub rate_bps_per_year: u64,
    pub rate_mode: u8,
    pub lockup_seconds: u64,
    pub pool_duration_seconds: u64,
    pub referrer: Option<Pubkey>,
    pub referrer_split_bps: Option<u64>,
    pub enable_reflections: bool,
    pub reflection_token: Option<Pubkey>,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct InitializePoolArgs {
    pub token_mint: Pubkey,
    pub pool_id: u64,
    pub params: InitializePoolParams,
}

/// Instruction names, as the program registers them.
pub mod names {
    pub const CREATE_PROJECT: &str = "create_project";
    pub const INITIALIZE_POOL: &str = "initialize_pool";
    pub const DEPOSIT: &str = "deposit";
    pub const WITHDRAW: &str = "withdraw";
    pub const CLAIM: &str = "claim";
    pub const CLAIM_REFLECTIONS: &str = "claim_reflections";
    pub const REFRESH_REFLECTIONS: &str = "refresh_reflections";
    pub const DEPOSIT_REWARDS: &str = "deposit_rewards";
}

// ════════════════════════════════════════════════════════════════════════════════
// ACCOUNT SETS
// ════════════════════════════════════════════════════════════════════════════════

/// Accounts shared by deposit / withdraw / claim.
#[derive(Debug, Clone, Copy)]
pub struct UserPoolAccounts {
    pub platform: Pubkey,
    pub pool: PoolAddresses,
    pub stake: Pubkey,
    pub mint: Pubkey,
    pub user: Pubkey,
    pub token_program: Pubkey,
    pub fee_collector: Pubkey,
    /// Project referrer, or the user when the pool has none.
    pub referrer: Pubkey,
}

// ════════════════════════════════════════════════════════════════════════════════
// BUILDERS
// ════════════════════════════════════════════════════════════════════════════════

/// `create_project`: allocates the pool shell and both vaults.
#[must_use]
pub fn create_project(
    program_id: &Pubkey,
    pool: &PoolAddresses,
    mint: &Pubkey,
    pool_slot: u32,
    admin: &Pubkey,
    token_program: &Pubkey,
) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(pool.pool, false),
            AccountMeta::new(pool.staking_vault, false),
            AccountMeta::new(pool.reward_vault, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new(*admin, true),
            AccountMeta::new_readonly(*token_program, false),
            AccountMeta::new_readonly(system_program::ID, false),
        ],
        data: encode(
            names::CREATE_PROJECT,
            &PoolArgs { token_mint: *mint, pool_id: u64::from(pool_slot) },
        ),
    }
}

/// Reflection accounts passed to `initialize_pool` when reflections are on.
#[derive(Debug, Clone, Copy)]
pub struct ReflectionSetup {
    pub reflection_mint: Pubkey,
    /// Staking vault's holding account for the reflection asset.
    pub reflection_account: Pubkey,
    pub reflection_token_program: Pubkey,
}

/// `initialize_pool`: writes rate, lockup and duration into the shell.
#[must_use]
#[allow(clippy::too_many_arguments)]
pub fn initialize_pool(
    program_id: &Pubkey,
    pool: &PoolAddresses,
    mint: &Pubkey,
    pool_slot: u32,
    admin: &Pubkey,
    token_program: &Pubkey,
    params: InitializePoolParams,
    reflection: Option<ReflectionSetup>,
) -> Instruction {
    let optional = |key: Option<Pubkey>, writable: bool| {
        let key = key.unwrap_or(*program_id);
        if writable && key != *program_id {
            AccountMeta::new(key, false)
        } else {
            AccountMeta::new_readonly(key, false)
        }
    };

    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(pool.pool, false),
            AccountMeta::new_readonly(pool.staking_vault, false),
            optional(reflection.map(|r| r.reflection_mint), false),
            optional(reflection.map(|r| r.reflection_account), true),
            AccountMeta::new(*admin, true),
            optional(reflection.map(|_| spl_associated_token_account::ID), false),
            AccountMeta::new_readonly(system_program::ID, false),
            AccountMeta::new_readonly(*token_program, false),
            optional(reflection.map(|r| r.reflection_token_program), false),
        ],
        data: encode(
            names::INITIALIZE_POOL,
            &InitializePoolArgs {
                token_mint: *mint,
                pool_id: u64::from(pool_slot),
                params,
            },
        ),
    }
}

/// `deposit`: moves `amount` from the user into the staking vault.
/// `reflection_vault` is the staking vault when reflections are off.
#[must_use]
pub fn deposit(
    program_id: &Pubkey,
    accounts: &UserPoolAccounts,
    pool_slot: u32,
    user_token_account: &Pubkey,
    fee_collector_token_account: &Pubkey,
    reflection_vault: &Pubkey,
    amount: u64,
) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new_readonly(accounts.platform, false),
            AccountMeta::new(accounts.pool.pool, false),
            AccountMeta::new(accounts.stake, false),
            AccountMeta::new(accounts.pool.staking_vault, false),
            AccountMeta::new(*user_token_account, false),
            AccountMeta::new(*fee_collector_token_account, false),
            AccountMeta::new(accounts.fee_collector, false),
            AccountMeta::new(accounts.referrer, false),
            AccountMeta::new(*reflection_vault, false),
            AccountMeta::new_readonly(accounts.mint, false),
            AccountMeta::new(accounts.user, true),
            AccountMeta::new_readonly(accounts.token_program, false),
            AccountMeta::new_readonly(system_program::ID, false),
        ],
        data: encode(
            names::DEPOSIT,
            &AmountArgs {
                token_mint: accounts.mint,
                pool_id: u64::from(pool_slot),
                amount,
            },
        ),
    }
}

/// `withdraw`: returns `amount` of principal to the withdrawal account.
#[must_use]
pub fn withdraw(
    program_id: &Pubkey,
    accounts: &UserPoolAccounts,
    pool_slot: u32,
    withdrawal_token_account: &Pubkey,
    fee_collector_token_account: &Pubkey,
    reflection_vault: &Pubkey,
    amount: u64,
) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new_readonly(accounts.platform, false),
            AccountMeta::new(accounts.pool.pool, false),
            AccountMeta::new(accounts.stake, false),
            AccountMeta::new(accounts.pool.staking_vault, false),
            AccountMeta::new(*withdrawal_token_account, false),
            AccountMeta::new(*fee_collector_token_account, false),
            AccountMeta::new(accounts.fee_collector, false),
            AccountMeta::new(accounts.referrer, false),
            AccountMeta::new(*reflection_vault, false),
            AccountMeta::new_readonly(accounts.mint, false),
            AccountMeta::new(accounts.user, true),
            AccountMeta::new_readonly(accounts.token_program, false),
            AccountMeta::new_readonly(system_program::ID, false),
        ],
        data: encode(
            names::WITHDRAW,
            &AmountArgs {
                token_mint: accounts.mint,
                pool_id: u64::from(pool_slot),
                amount,
            },
        ),
    }
}

/// `claim`: pays accrued rewards from the reward vault.
#[must_use]
pub fn claim(
    program_id: &Pubkey,
    accounts: &UserPoolAccounts,
    pool_slot: u32,
    user_token_account: &Pubkey,
) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new_readonly(accounts.platform, false),
            AccountMeta::new(accounts.pool.pool, false),
            AccountMeta::new(accounts.stake, false),
            AccountMeta::new(accounts.pool.reward_vault, false),
            AccountMeta::new(*user_token_account, false),
            AccountMeta::new(accounts.fee_collector, false),
            AccountMeta::new(accounts.referrer, false),
            AccountMeta::new_readonly(accounts.mint, false),
            AccountMeta::new(accounts.user, true),
            AccountMeta::new_readonly(accounts.token_program, false),
            AccountMeta::new_readonly(system_program::ID, false),
        ],
        data: encode(
            names::CLAIM,
            &PoolArgs { token_mint: accounts.mint, pool_id: u64::from(pool_slot) },
        ),
    }
}

/// Accounts for `claim_reflections`.
#[derive(Debug, Clone, Copy)]
pub struct ReflectionClaimAccounts {
    pub pool: PoolAddresses,
    pub stake: Pubkey,
    pub reflection_vault: Pubkey,
    pub user_reflection_account: Pubkey,
    pub reflection_mint: Pubkey,
    pub user: Pubkey,
    /// Program of the reflection asset, which may differ from the staked
    /// asset's.
    pub reflection_token_program: Pubkey,
}

/// `claim_reflections`.
#[must_use]
pub fn claim_reflections(
    program_id: &Pubkey,
    mint: &Pubkey,
    pool_slot: u32,
    accounts: &ReflectionClaimAccounts,
) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(accounts.pool.pool, false),
            AccountMeta::new(accounts.stake, false),
            AccountMeta::new_readonly(accounts.pool.staking_vault, false),
            AccountMeta::new(accounts.reflection_vault, false),
            AccountMeta::new(accounts.user_reflection_account, false),
            AccountMeta::new_readonly(accounts.reflection_mint, false),
            AccountMeta::new(accounts.user, true),
            AccountMeta::new_readonly(accounts.reflection_token_program, false),
        ],
        data: encode(
            names::CLAIM_REFLECTIONS,
            &PoolArgs { token_mint: *mint, pool_id: u64::from(pool_slot) },
        ),
    }
}

/// `refresh_reflections`: recomputes reflection-per-token from the vault
/// balance.
#[must_use]
pub fn refresh_reflections(
    program_id: &Pubkey,
    pool: &PoolAddresses,
    mint: &Pubkey,
    pool_slot: u32,
    stake: &Pubkey,
    reflection_vault: &Pubkey,
    user: &Pubkey,
) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(pool.pool, false),
            AccountMeta::new(*stake, false),
            AccountMeta::new_readonly(pool.staking_vault, false),
            AccountMeta::new_readonly(*reflection_vault, false),
            AccountMeta::new_readonly(*user, true),
        ],
        data: encode(
            names::REFRESH_REFLECTIONS,
            &PoolArgs { token_mint: *mint, pool_id: u64::from(pool_slot) },
        ),
    }
}

/// `deposit_rewards`: funds the reward vault.
#[must_use]
#[allow(clippy::too_many_arguments)]
pub fn deposit_rewards(
    program_id: &Pubkey,
    pool: &PoolAddresses,
    mint: &Pubkey,
    pool_slot: u32,
    admin: &Pubkey,
    admin_token_account: &Pubkey,
    token_program: &Pubkey,
    amount: u64,
) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(pool.pool, false),
            AccountMeta::new(pool.reward_vault, false),
            AccountMeta::new(*admin_token_account, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new(*admin, true),
            AccountMeta::new_readonly(*token_program, false),
        ],
        data: encode(
            names::DEPOSIT_REWARDS,
            &AmountArgs {
                token_mint: *mint,
                pool_id: u64::from(pool_slot),
                amount,
            },
        ),
    }
}

/// Splits instruction data into `(name, args)` for a known instruction.
/// Used by simulators and log decoding; returns `None` for foreign data.
#[must_use]
pub fn identify(data: &[u8]) -> Option<(&'static str, &[u8])> {
    if data.len() < 8 {
        return None;
    }
    let all = [
        names::CREATE_PROJECT,
        names::INITIALIZE_POOL,
        names::DEPOSIT,
        names::WITHDRAW,
        names::CLAIM,
        names::CLAIM_REFLECTIONS,
        names::REFRESH_REFLECTIONS,
        names::DEPOSIT_REWARDS,
    ];
    all.into_iter()
        .find(|name| data[..8] == instruction_discriminator(name))
        .map(|name| (name, &data[8..]))
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════
