//! Typed reads of the program's accounts.

use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;
use spl_token::solana_program::program_pack::Pack;
use spl_token::state::Account as TokenAccount;
use staking_common::{
    platform_address, AssetIdentity, PlatformAccount, PoolAddresses, ProgramAccount,
    ProjectAccount, StakeAccount, StakeRecord,
};

use crate::error::{StakingError, StakingResult};
use crate::ledger::LedgerReader;

pub struct PoolReader {
    program_id: Pubkey,
    ledger: Arc<dyn LedgerReader>,
}

impl PoolReader {
    #[must_use]
    pub fn new(program_id: Pubkey, ledger: Arc<dyn LedgerReader>) -> Self {
        Self { program_id, ledger }
    }

    #[must_use]
    pub fn program_id(&self) -> Pubkey {
        self.program_id
    }

    #[must_use]
    pub fn ledger(&self) -> &Arc<dyn LedgerReader> {
        &self.ledger
    }

    #[must_use]
    pub fn addresses(&self, mint: &Pubkey, pool_slot: u32) -> PoolAddresses {
        PoolAddresses::derive(&self.program_id, mint, pool_slot)
    }

    async fn read<T: ProgramAccount>(&self, address: &Pubkey) -> StakingResult<Option<T>> {
        match self.ledger.get_account(address).await? {
            Some(account) => Ok(Some(T::decode(&account.data)?)),
            None => Ok(None),
        }
    }

    pub async fn platform(&self) -> StakingResult<PlatformAccount> {
        let address = platform_address(&self.program_id);
        self.read::<PlatformAccount>(&address)
            .await?
            .ok_or(StakingError::PlatformNotFound(address))
    }

    pub async fn project(&self, mint: &Pubkey, pool_slot: u32) -> StakingResult<Option<ProjectAccount>> {
        self.read(&self.addresses(mint, pool_slot).pool).await
    }

    pub async fn require_project(&self, mint: &Pubkey, pool_slot: u32) -> StakingResult<ProjectAccount> {
        self.project(mint, pool_slot)
            .await?
            .ok_or(StakingError::PoolNotFound { mint: *mint, pool_slot })
    }

    /// Stake record of `owner`, with its address. `None` when absent.
    pub async fn stake(
        &self,
        mint: &Pubkey,
        pool_slot: u32,
        owner: &Pubkey,
    ) -> StakingResult<Option<(Pubkey, StakeAccount)>> {
        let address = self.addresses(mint, pool_slot).stake_record(&self.program_id, owner);
        Ok(self.read::<StakeAccount>(&address).await?.map(|s| (address, s)))
    }

    pub async fn require_stake(
        &self,
        mint: &Pubkey,
        pool_slot: u32,
        owner: &Pubkey,
    ) -> StakingResult<(Pubkey, StakeAccount)> {
        self.stake(mint, pool_slot, owner)
            .await?
            .ok_or_else(|| StakingError::StakeNotFound {
                owner: *owner,
                pool: self.addresses(mint, pool_slot).pool,
            })
    }

    pub async fn stake_record(
        &self,
        mint: &Pubkey,
        pool_slot: u32,
        owner: &Pubkey,
    ) -> StakingResult<Option<StakeRecord>> {
        Ok(self
            .stake(mint, pool_slot, owner)
            .await?
            .map(|(address, account)| StakeRecord::from_account(address, &account)))
    }

    /// What `wallet` holds of `asset`: lamports for the native mint, the
    /// token amount of its holding account otherwise. A missing or still
    /// empty holding account holds nothing.
    pub async fn holding_balance(&self, asset: &AssetIdentity, wallet: &Pubkey) -> StakingResult<u64> {
        if asset.is_native() {
            return Ok(self.ledger.get_balance(wallet).await?);
        }
        let holding = asset.holding_address(wallet);
        let Some(account) = self.ledger.get_account(&holding).await? else {
            return Ok(0);
        };
        if account.data.is_empty() {
            return Ok(0);
        }
        // Both token programs share the classic base layout.
        let base = account
            .data
            .get(..TokenAccount::LEN)
            .ok_or_else(|| StakingError::Ledger(format!("holding {holding} is not a token account")))?;
        TokenAccount::unpack_from_slice(base)
            .map(|state| state.amount)
            .map_err(|e| StakingError::Ledger(format!("holding {holding}: {e}")))
    }
}
