//! # Pool Slot Allocator
//!
//! Finds the lowest pool slot for a mint that is free both on the ledger
//! and in the mirror.
//!
//! ```text
//! for slot in 0..max_slots:
//!     on-chain pool account exists?  ── yes ─► next
//!     mirror row (pending|active)?   ── yes ─► next
//!     └─► slot
//! SlotsExhausted
//! ```
//!
//! ## Races
//!
//! Two concurrent allocators can pick the same slot: the check is not
//! atomic with shell creation. The ledger rejects the second shell, and
//! provisioning re-allocates. The mirror's pending reservation narrows the
//! window but does not close it.
//!
//! Mirror lookups are best effort: a failing mirror is logged and treated
//! as empty, since the ledger check alone still prevents real collisions.

use std::collections::HashSet;
use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;
use staking_common::PoolAddresses;
use tracing::{debug, warn};

use crate::error::{StakingError, StakingResult};
use crate::ledger::LedgerReader;
use crate::mirror::StakeMirror;

/// First slot considered.
pub const BASE_SLOT: u32 = 0;

pub struct SlotAllocator {
    program_id: Pubkey,
    ledger: Arc<dyn LedgerReader>,
    mirror: Arc<dyn StakeMirror>,
}

impl SlotAllocator {
    #[must_use]
    pub fn new(program_id: Pubkey, ledger: Arc<dyn LedgerReader>, mirror: Arc<dyn StakeMirror>) -> Self {
        Self { program_id, ledger, mirror }
    }

    /// Lowest free slot in `BASE_SLOT..BASE_SLOT + max_slots`.
    pub async fn allocate(&self, mint: &Pubkey, max_slots: u32) -> StakingResult<u32> {
        self.allocate_excluding(mint, max_slots, &HashSet::new()).await
    }

    /// Like [`allocate`](Self::allocate) but also skips `excluded`, used when
    /// re-allocating after a lost race.
    pub async fn allocate_excluding(
        &self,
        mint: &Pubkey,
        max_slots: u32,
        excluded: &HashSet<u32>,
    ) -> StakingResult<u32> {
        let mirror_taken: HashSet<u32> = match self.mirror.find_pools_by_mint(mint).await {
            Ok(pools) => pools.into_iter().map(|p| p.pool_slot).collect(),
            Err(e) => {
                warn!(%mint, error = %e, "mirror lookup failed, using ledger only");
                HashSet::new()
            }
        };

        let end = BASE_SLOT.saturating_add(max_slots);
        for slot in BASE_SLOT..end {
            if excluded.contains(&slot) {
                continue;
            }
            let pool = PoolAddresses::derive(&self.program_id, mint, slot).pool;
            let on_chain = self.ledger.account_exists(&pool).await?;
            let in_mirror = mirror_taken.contains(&slot);
            if on_chain || in_mirror {
                debug!(%mint, slot, on_chain, in_mirror, "pool slot taken");
                continue;
            }
            debug!(%mint, slot, "pool slot free");
            return Ok(slot);
        }

        Err(StakingError::SlotsExhausted { mint: *mint, max_slots })
    }
}
