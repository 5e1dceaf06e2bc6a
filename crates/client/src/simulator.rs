//! # Program Simulator
//!
//! [`TransactionHook`] that applies the staking program's instructions to
//! [`MockLedger`](crate::ledger::MockLedger) state, so whole flows
//! (provision, stake, unstake, claim) can run without a cluster.
//!
//! Only the account effects the client observes are modelled: pool shell
//! and parameters, stake principal, pending rewards and reflection
//! counters. Token balances are not tracked; lamports moved by system
//! transfers are. Holding-account creation through the associated-token
//! program creates an empty account so later existence checks see it.
//!
//! Any failing instruction fails the whole transaction, and the mock
//! ledger discards its partial effects.

use std::collections::HashMap;

use borsh::BorshDeserialize;
use parking_lot::RwLock;
use solana_sdk::account::Account;
use solana_sdk::instruction::CompiledInstruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::system_program;
use solana_sdk::transaction::Transaction;
use staking_common::instruction::{identify, names, AmountArgs, InitializePoolArgs, PoolArgs};
use staking_common::interpolator::fixed_rate_per_second;
use staking_common::{
    interpolate, ProgramAccount, ProjectAccount, RateMode, RewardSnapshot, StakeAccount,
};

use crate::ledger::TransactionHook;

type Accounts = HashMap<Pubkey, Account>;

/// Bincode tag of `SystemInstruction::Transfer`.
const SYSTEM_TRANSFER_TAG: u32 = 2;

pub struct ProgramSimulator {
    program_id: Pubkey,
    now: RwLock<i64>,
}

impl ProgramSimulator {
    #[must_use]
    pub fn new(program_id: Pubkey, now: i64) -> Self {
        Self { program_id, now: RwLock::new(now) }
    }

    #[must_use]
    pub fn now(&self) -> i64 {
        *self.now.read()
    }

    pub fn set_now(&self, now: i64) {
        *self.now.write() = now;
    }

    pub fn advance(&self, seconds: i64) {
        *self.now.write() += seconds;
    }

    fn program_account(&self, data: Vec<u8>) -> Account {
        Account { lamports: 1, data, owner: self.program_id, executable: false, rent_epoch: 0 }
    }

    fn load<T: ProgramAccount>(accounts: &Accounts, address: &Pubkey) -> Result<T, String> {
        let account = accounts
            .get(address)
            .ok_or_else(|| format!("AccountNotInitialized: {address}"))?;
        T::decode(&account.data).map_err(|e| e.to_string())
    }

    fn store<T: ProgramAccount>(&self, accounts: &mut Accounts, address: Pubkey, value: &T) {
        accounts.insert(address, self.program_account(value.encode()));
    }

    /// Materializes accrued rewards into the stake, as every mutating
    /// program instruction does first.
    fn accrue(stake: &mut StakeAccount, project: &ProjectAccount, now: i64) {
        let snapshot = RewardSnapshot::from_accounts(stake, project);
        stake.rewards_pending = interpolate(&snapshot, now);
        stake.last_stake_timestamp = now;
    }

    fn apply_program(
        &self,
        name: &str,
        args: &[u8],
        keys: &[Pubkey],
        accounts: &mut Accounts,
    ) -> Result<(), String> {
        let key = |i: usize| keys.get(i).copied().ok_or_else(|| format!("{name}: missing account {i}"));
        let now = self.now();

        match name {
            names::CREATE_PROJECT => {
                let args = PoolArgs::try_from_slice(args).map_err(|e| e.to_string())?;
                let pool = key(0)?;
                if accounts.contains_key(&pool) {
                    return Err(format!("account {pool} already in use"));
                }
                let slot = u32::try_from(args.pool_id).map_err(|e| e.to_string())?;
                let shell = ProjectAccount::shell(key(4)?, args.token_mint, slot, key(1)?, key(2)?);
                self.store(accounts, pool, &shell);
            }
            names::INITIALIZE_POOL => {
                let args = InitializePoolArgs::try_from_slice(args).map_err(|e| e.to_string())?;
                let pool = key(0)?;
                let mut project: ProjectAccount = Self::load(accounts, &pool)?;
                if project.admin != key(4)? {
                    return Err("Unauthorized".to_string());
                }
                if project.is_initialized {
                    return Err("AlreadyInitialized".to_string());
                }
                let params = args.params;
                project.rate_bps_per_year = params.rate_bps_per_year;
                project.rate_mode = params.rate_mode;
                project.lockup_seconds = params.lockup_seconds;
                project.pool_duration_seconds = params.pool_duration_seconds;
                project.referrer = params.referrer;
                project.referrer_split_bps = params.referrer_split_bps.unwrap_or(0);
                if params.enable_reflections {
                    project.reflection_token = params.reflection_token;
                    project.reflection_vault = Some(key(3)?);
                }
                if RateMode::from_u8(params.rate_mode) == RateMode::Fixed {
                    project.reward_rate_per_second = fixed_rate_per_second(params.rate_bps_per_year);
                }
                project.pool_start_time = now;
                if params.pool_duration_seconds > 0 {
                    project.pool_end_time = now.saturating_add(params.pool_duration_seconds as i64);
                }
                project.is_initialized = true;
                self.store(accounts, pool, &project);
            }
            names::DEPOSIT_REWARDS => {
                let args = AmountArgs::try_from_slice(args).map_err(|e| e.to_string())?;
                let pool = key(0)?;
                let mut project: ProjectAccount = Self::load(accounts, &pool)?;
                if !project.is_initialized {
                    return Err("PoolNotInitialized".to_string());
                }
                project.total_rewards_deposited = project.total_rewards_deposited.saturating_add(args.amount);
                if RateMode::from_u8(project.rate_mode) == RateMode::Dynamic && project.pool_duration_seconds > 0 {
                    project.reward_rate_per_second = project.total_rewards_deposited / project.pool_duration_seconds;
                }
                self.store(accounts, pool, &project);
            }
            names::DEPOSIT => {
                let args = AmountArgs::try_from_slice(args).map_err(|e| e.to_string())?;
                if args.amount == 0 {
                    return Err("InvalidAmount".to_string());
                }
                let (pool, stake_address, user) = (key(1)?, key(2)?, key(10)?);
                let mut project: ProjectAccount = Self::load(accounts, &pool)?;
                if !project.is_initialized || project.deposit_paused {
                    return Err("DepositsPaused".to_string());
                }
                let stake = match accounts.get(&stake_address) {
                    Some(account) => {
                        let mut stake = StakeAccount::decode(&account.data).map_err(|e| e.to_string())?;
                        Self::accrue(&mut stake, &project, now);
                        stake.amount = stake.amount.saturating_add(args.amount);
                        stake
                    }
                    None => StakeAccount::opened(user, pool, args.amount, now),
                };
                project.total_staked = project.total_staked.saturating_add(args.amount);
                self.store(accounts, stake_address, &stake);
                self.store(accounts, pool, &project);
            }
            names::WITHDRAW => {
                let args = AmountArgs::try_from_slice(args).map_err(|e| e.to_string())?;
                let (pool, stake_address) = (key(1)?, key(2)?);
                let mut project: ProjectAccount = Self::load(accounts, &pool)?;
                let mut stake: StakeAccount = Self::load(accounts, &stake_address)?;
                if args.amount == 0 || args.amount > stake.amount {
                    return Err("InsufficientStake".to_string());
                }
                Self::accrue(&mut stake, &project, now);
                stake.amount -= args.amount;
                project.total_staked = project.total_staked.saturating_sub(args.amount);
                if stake.amount == 0 {
                    accounts.remove(&stake_address);
                } else {
                    self.store(accounts, stake_address, &stake);
                }
                self.store(accounts, pool, &project);
            }
            names::CLAIM => {
                let (pool, stake_address) = (key(1)?, key(2)?);
                let mut project: ProjectAccount = Self::load(accounts, &pool)?;
                let mut stake: StakeAccount = Self::load(accounts, &stake_address)?;
                Self::accrue(&mut stake, &project, now);
                stake.total_rewards_claimed = stake.total_rewards_claimed.saturating_add(stake.rewards_pending);
                project.total_rewards_claimed = project.total_rewards_claimed.saturating_add(stake.rewards_pending);
                stake.rewards_pending = 0;
                self.store(accounts, stake_address, &stake);
                self.store(accounts, pool, &project);
            }
            names::CLAIM_REFLECTIONS => {
                let (pool, stake_address) = (key(0)?, key(1)?);
                let project: ProjectAccount = Self::load(accounts, &pool)?;
                if !project.reflections_enabled() {
                    return Err("ReflectionsNotEnabled".to_string());
                }
                let mut stake: StakeAccount = Self::load(accounts, &stake_address)?;
                stake.total_reflections_claimed =
                    stake.total_reflections_claimed.saturating_add(stake.reflections_pending);
                stake.reflections_pending = 0;
                self.store(accounts, stake_address, &stake);
            }
            names::REFRESH_REFLECTIONS => {
                let (pool, stake_address) = (key(0)?, key(1)?);
                let mut project: ProjectAccount = Self::load(accounts, &pool)?;
                let _: StakeAccount = Self::load(accounts, &stake_address)?;
                project.last_reflection_update_time = now;
                self.store(accounts, pool, &project);
            }
            other => return Err(format!("unsupported instruction {other}")),
        }
        Ok(())
    }

    fn apply_holding_creation(keys: &[Pubkey], accounts: &mut Accounts) -> Result<(), String> {
        // [payer, holding, wallet, mint, system program, token program]
        let (holding, token_program) = match (keys.get(1), keys.get(5)) {
            (Some(holding), Some(program)) => (*holding, *program),
            _ => return Err("malformed holding creation".to_string()),
        };
        accounts.entry(holding).or_insert(Account {
            lamports: 1,
            data: Vec::new(),
            owner: token_program,
            executable: false,
            rent_epoch: 0,
        });
        Ok(())
    }

    /// `[from, to]`, data `tag(u32 LE) || lamports(u64 LE)`. Other system
    /// instructions have no modelled effect.
    fn apply_system(keys: &[Pubkey], data: &[u8], accounts: &mut Accounts) -> Result<(), String> {
        let tag = data.get(..4).and_then(|b| <[u8; 4]>::try_from(b).ok()).map(u32::from_le_bytes);
        if tag != Some(SYSTEM_TRANSFER_TAG) {
            return Ok(());
        }
        let lamports = data
            .get(4..12)
            .and_then(|b| <[u8; 8]>::try_from(b).ok())
            .map(u64::from_le_bytes)
            .ok_or("malformed transfer")?;
        let (from, to) = match (keys.first(), keys.get(1)) {
            (Some(from), Some(to)) => (*from, *to),
            _ => return Err("malformed transfer".to_string()),
        };
        let balance = accounts.get(&from).map_or(0, |a| a.lamports);
        if balance < lamports {
            return Err(format!("insufficient lamports {balance}, need {lamports}"));
        }
        if let Some(source) = accounts.get_mut(&from) {
            source.lamports -= lamports;
        }
        accounts
            .entry(to)
            .or_insert(Account {
                lamports: 0,
                data: Vec::new(),
                owner: system_program::ID,
                executable: false,
                rent_epoch: 0,
            })
            .lamports += lamports;
        Ok(())
    }
}

fn instruction_keys(transaction: &Transaction, ix: &CompiledInstruction) -> Vec<Pubkey> {
    ix.accounts
        .iter()
        .filter_map(|&i| transaction.message.account_keys.get(usize::from(i)).copied())
        .collect()
}

impl TransactionHook for ProgramSimulator {
    fn apply(&self, transaction: &Transaction, accounts: &mut Accounts) -> Result<(), String> {
        for ix in &transaction.message.instructions {
            let Some(program) = transaction.message.account_keys.get(usize::from(ix.program_id_index)) else {
                return Err("program index out of range".to_string());
            };
            let keys = instruction_keys(transaction, ix);
            if *program == self.program_id {
                let (name, args) = identify(&ix.data).ok_or("unknown instruction")?;
                self.apply_program(name, args, &keys, accounts)?;
            } else if *program == spl_associated_token_account::ID {
                Self::apply_holding_creation(&keys, accounts)?;
            } else if *program == system_program::ID {
                Self::apply_system(&keys, &ix.data, accounts)?;
            }
        }
        Ok(())
    }
}
