//! # Runtime Resolver
//!
//! Determines whether a mint lives under the classic or the extended token
//! program by reading the mint account's owner. One ledger read per mint
//! per resolver instance; the answer never changes for a mint, so it is
//! cached for the life of the session.
//!
//! ```text
//! resolve(mint)
//!      │
//!      ├─ cache hit ───────────────────────────► AssetIdentity
//!      │
//!      └─ get_account(mint)
//!            ├─ None                ─► AssetNotFound
//!            ├─ owner = token       ─► Classic   ─┐
//!            ├─ owner = token-2022  ─► Extended  ─┼─ cache ─► AssetIdentity
//!            └─ owner = other       ─► UnsupportedRuntime
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use solana_sdk::pubkey::Pubkey;
use staking_common::{AssetIdentity, RuntimeKind};
use tracing::debug;

use crate::error::{StakingError, StakingResult};
use crate::ledger::LedgerReader;

pub struct RuntimeResolver {
    ledger: Arc<dyn LedgerReader>,
    cache: RwLock<HashMap<Pubkey, RuntimeKind>>,
}

impl RuntimeResolver {
    #[must_use]
    pub fn new(ledger: Arc<dyn LedgerReader>) -> Self {
        Self {
            ledger,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn resolve(&self, mint: &Pubkey) -> StakingResult<AssetIdentity> {
        if let Some(kind) = self.cache.read().get(mint).copied() {
            return Ok(AssetIdentity::new(*mint, kind));
        }

        let account = self
            .ledger
            .get_account(mint)
            .await?
            .ok_or(StakingError::AssetNotFound { mint: *mint })?;

        let kind = RuntimeKind::from_owner(&account.owner).ok_or(
            StakingError::UnsupportedRuntime { mint: *mint, owner: account.owner },
        )?;

        debug!(%mint, runtime = %kind, "resolved token runtime");
        self.cache.write().insert(*mint, kind);
        Ok(AssetIdentity::new(*mint, kind))
    }

    /// Cached runtime, without touching the ledger.
    #[must_use]
    pub fn cached(&self, mint: &Pubkey) -> Option<AssetIdentity> {
        self.cache
            .read()
            .get(mint)
            .map(|kind| AssetIdentity::new(*mint, *kind))
    }
}
