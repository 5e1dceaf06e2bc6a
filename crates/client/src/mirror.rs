//! # Stake Mirror
//!
//! Off-chain relational mirror of stakes and pools. It serves listing
//! queries and the slot allocator's collision check, and it is NEVER the
//! arbiter of correctness: every value-moving decision reads the ledger.
//!
//! ## Contract
//!
//! - Writes are idempotent (upsert / delete-if-present).
//! - Failures are reported, never retried internally. The reconciler
//!   decides what to do with them (log and move on).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use solana_sdk::pubkey::Pubkey;
use staking_common::{PoolDescriptor, PoolSummary};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MirrorError {
    #[error("mirror request failed: {0}")]
    Request(String),

    #[error("mirror returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("mirror response invalid: {0}")]
    Decode(String),
}

#[async_trait]
pub trait StakeMirror: Send + Sync {
    async fn upsert_stake_record(
        &self,
        owner: &Pubkey,
        mint: &Pubkey,
        pool_slot: u32,
        principal: u64,
        record_address: &Pubkey,
    ) -> Result<(), MirrorError>;

    async fn delete_stake_record(
        &self,
        owner: &Pubkey,
        mint: &Pubkey,
        pool_slot: u32,
    ) -> Result<(), MirrorError>;

    async fn find_pools_by_mint(&self, mint: &Pubkey) -> Result<Vec<PoolSummary>, MirrorError>;

    /// Advisory reservation written before the pool shell is submitted.
    async fn reserve_pool_slot(
        &self,
        mint: &Pubkey,
        pool_slot: u32,
        creator: &Pubkey,
    ) -> Result<(), MirrorError>;

    /// Final pool row, written after the on-chain steps complete.
    async fn record_pool(&self, descriptor: &PoolDescriptor) -> Result<(), MirrorError>;
}

// ════════════════════════════════════════════════════════════════════════════════
// MEMORY MIRROR
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorStakeRow {
    pub principal: u64,
    pub record_address: Pubkey,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorPoolRow {
    pub creator: Pubkey,
    pub descriptor: Option<PoolDescriptor>,
}

impl MirrorPoolRow {
    #[must_use]
    pub fn pending(&self) -> bool {
        self.descriptor.is_none()
    }
}

type StakeKey = (Pubkey, Pubkey, u32);

/// In-memory mirror. Also used by the CLI when no mirror URL is set.
#[derive(Default)]
pub struct MemoryMirror {
    stakes: RwLock<HashMap<StakeKey, MirrorStakeRow>>,
    pools: RwLock<HashMap<(Pubkey, u32), MirrorPoolRow>>,
    fail_writes: RwLock<Option<String>>,
    fail_reads: RwLock<Option<String>>,
}

impl MemoryMirror {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every write fail with `message` until cleared.
    pub fn set_write_failure(&self, message: Option<String>) {
        *self.fail_writes.write() = message;
    }

    /// Makes every read fail with `message` until cleared.
    pub fn set_read_failure(&self, message: Option<String>) {
        *self.fail_reads.write() = message;
    }

    #[must_use]
    pub fn stake(&self, owner: &Pubkey, mint: &Pubkey, pool_slot: u32) -> Option<MirrorStakeRow> {
        self.stakes.read().get(&(*owner, *mint, pool_slot)).cloned()
    }

    #[must_use]
    pub fn stake_count(&self) -> usize {
        self.stakes.read().len()
    }

    #[must_use]
    pub fn pool(&self, mint: &Pubkey, pool_slot: u32) -> Option<MirrorPoolRow> {
        self.pools.read().get(&(*mint, pool_slot)).cloned()
    }

    fn check_write(&self) -> Result<(), MirrorError> {
        match self.fail_writes.read().as_ref() {
            Some(message) => Err(MirrorError::Request(message.clone())),
            None => Ok(()),
        }
    }

    fn check_read(&self) -> Result<(), MirrorError> {
        match self.fail_reads.read().as_ref() {
            Some(message) => Err(MirrorError::Request(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl StakeMirror for MemoryMirror {
    async fn upsert_stake_record(
        &self,
        owner: &Pubkey,
        mint: &Pubkey,
        pool_slot: u32,
        principal: u64,
        record_address: &Pubkey,
    ) -> Result<(), MirrorError> {
        self.check_write()?;
        self.stakes.write().insert(
            (*owner, *mint, pool_slot),
            MirrorStakeRow {
                principal,
                record_address: *record_address,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn delete_stake_record(
        &self,
        owner: &Pubkey,
        mint: &Pubkey,
        pool_slot: u32,
    ) -> Result<(), MirrorError> {
        self.check_write()?;
        self.stakes.write().remove(&(*owner, *mint, pool_slot));
        Ok(())
    }

    async fn find_pools_by_mint(&self, mint: &Pubkey) -> Result<Vec<PoolSummary>, MirrorError> {
        self.check_read()?;
        let mut pools: Vec<PoolSummary> = self
            .pools
            .read()
            .iter()
            .filter(|((m, _), _)| m == mint)
            .map(|((m, slot), row)| PoolSummary {
                mint: *m,
                pool_slot: *slot,
                pending: row.pending(),
            })
            .collect();
        pools.sort_by_key(|p| p.pool_slot);
        Ok(pools)
    }

    async fn reserve_pool_slot(
        &self,
        mint: &Pubkey,
        pool_slot: u32,
        creator: &Pubkey,
    ) -> Result<(), MirrorError> {
        self.check_write()?;
        let mut pools = self.pools.write();
        match pools.get(&(*mint, pool_slot)) {
            Some(row) if row.creator != *creator => Err(MirrorError::Status {
                status: 409,
                body: format!("slot {pool_slot} already reserved"),
            }),
            Some(_) => Ok(()),
            None => {
                pools.insert(
                    (*mint, pool_slot),
                    MirrorPoolRow { creator: *creator, descriptor: None },
                );
                Ok(())
            }
        }
    }

    async fn record_pool(&self, descriptor: &PoolDescriptor) -> Result<(), MirrorError> {
        self.check_write()?;
        self.pools.write().insert(
            (descriptor.asset.mint, descriptor.pool_slot),
            MirrorPoolRow {
                creator: descriptor.admin,
                descriptor: Some(descriptor.clone()),
            },
        );
        Ok(())
    }
}

const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn check() {
        assert_send_sync::<MemoryMirror>();
    }
    let _ = check;
};

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_then_delete() {
        let mirror = MemoryMirror::new();
        let (owner, mint, record) = (Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique());

        mirror
            .upsert_stake_record(&owner, &mint, 0, 500, &record)
            .await
            .unwrap();
        assert_eq!(mirror.stake(&owner, &mint, 0).map(|r| r.principal), Some(500));

        mirror
            .delete_stake_record(&owner, &mint, 0)
            .await
            .unwrap();
        assert!(mirror.stake(&owner, &mint, 0).is_none());
    }

    #[tokio::test]
    async fn delete_absent_is_ok() {
        let mirror = MemoryMirror::new();
        let result = mirror
            .delete_stake_record(&Pubkey::new_unique(), &Pubkey::new_unique(), 3)
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn reservation_is_pending_and_exclusive() {
        let mirror = MemoryMirror::new();
        let mint = Pubkey::new_unique();
        let creator = Pubkey::new_unique();

        mirror
            .reserve_pool_slot(&mint, 2, &creator)
            .await
            .unwrap();
        let pools = mirror.find_pools_by_mint(&mint).await.unwrap_or_default();
        assert_eq!(pools, vec![PoolSummary { mint, pool_slot: 2, pending: true }]);

        // Same creator may re-reserve; someone else may not.
        assert!(mirror.reserve_pool_slot(&mint, 2, &creator).await.is_ok());
        assert!(mirror
            .reserve_pool_slot(&mint, 2, &Pubkey::new_unique())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn write_failure_injection() {
        let mirror = MemoryMirror::new();
        mirror.set_write_failure(Some("db down".into()));
        let result = mirror
            .upsert_stake_record(&Pubkey::new_unique(), &Pubkey::new_unique(), 0, 1, &Pubkey::new_unique())
            .await;
        assert_eq!(result, Err(MirrorError::Request("db down".into())));
    }
}
