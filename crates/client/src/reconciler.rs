//! # Mirror Reconciler
//!
//! After every successful (or likely-successful) mutation the reconciler
//! re-reads the stake record from the ledger and makes the mirror row
//! match it.
//!
//! ```text
//! reconcile(owner, mint, slot)
//!      │
//!      ├─ read stake record
//!      │     ├─ Some(principal > 0) ─► upsert(principal, record address)
//!      │     ├─ Some(principal = 0) ─► delete
//!      │     ├─ None                ─► delete
//!      │     └─ read error          ─► skip (logged)
//!      │
//!      └─ mirror error ─► MirrorWriteFailed, logged, swallowed
//! ```
//!
//! Values are always taken from the fresh read, never from the amount the
//! caller intended to move, so a partial fill or a concurrent change by
//! another session is mirrored correctly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;
use tracing::{debug, warn};

use crate::error::StakingError;
use crate::mirror::StakeMirror;
use crate::pool_reader::PoolReader;

/// What a reconcile pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Upserted { principal: u64, record_address: Pubkey },
    Deleted,
    /// Ledger read failed; mirror left as is.
    Skipped(String),
    /// Ledger read succeeded but the mirror write did not.
    MirrorFailed(StakingError),
}

/// Counters for observability.
#[derive(Debug, Default)]
pub struct ReconcileStats {
    pub upserts: AtomicU64,
    pub deletes: AtomicU64,
    pub skipped: AtomicU64,
    pub mirror_failures: AtomicU64,
}

pub struct MirrorReconciler {
    reader: Arc<PoolReader>,
    mirror: Arc<dyn StakeMirror>,
    stats: ReconcileStats,
}

impl MirrorReconciler {
    #[must_use]
    pub fn new(reader: Arc<PoolReader>, mirror: Arc<dyn StakeMirror>) -> Self {
        Self {
            reader,
            mirror,
            stats: ReconcileStats::default(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> &ReconcileStats {
        &self.stats
    }

    /// Never fails: every problem is logged and reported in the outcome.
    pub async fn reconcile(&self, owner: &Pubkey, mint: &Pubkey, pool_slot: u32) -> ReconcileOutcome {
        let stake = match self.reader.stake(mint, pool_slot, owner).await {
            Ok(stake) => stake,
            Err(e) => {
                warn!(%owner, %mint, pool_slot, error = %e, "stake read failed, mirror not reconciled");
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                return ReconcileOutcome::Skipped(e.to_string());
            }
        };

        match stake {
            Some((record_address, account)) if account.amount > 0 => {
                let principal = account.amount;
                match self
                    .mirror
                    .upsert_stake_record(owner, mint, pool_slot, principal, &record_address)
                    .await
                {
                    Ok(()) => {
                        debug!(%owner, %mint, pool_slot, principal, "mirror row upserted");
                        self.stats.upserts.fetch_add(1, Ordering::Relaxed);
                        ReconcileOutcome::Upserted { principal, record_address }
                    }
                    Err(e) => self.mirror_failed(owner, mint, pool_slot, e.to_string()),
                }
            }
            _ => match self.mirror.delete_stake_record(owner, mint, pool_slot).await {
                Ok(()) => {
                    debug!(%owner, %mint, pool_slot, "mirror row deleted");
                    self.stats.deletes.fetch_add(1, Ordering::Relaxed);
                    ReconcileOutcome::Deleted
                }
                Err(e) => self.mirror_failed(owner, mint, pool_slot, e.to_string()),
            },
        }
    }

    fn mirror_failed(&self, owner: &Pubkey, mint: &Pubkey, pool_slot: u32, reason: String) -> ReconcileOutcome {
        warn!(%owner, %mint, pool_slot, %reason, "mirror write failed (non-critical)");
        self.stats.mirror_failures.fetch_add(1, Ordering::Relaxed);
        ReconcileOutcome::MirrorFailed(StakingError::MirrorWriteFailed(reason))
    }
}
