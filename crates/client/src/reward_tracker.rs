//! # Reward Tracker
//!
//! Keeps one [`RewardInterpolator`] per tracked position so the UI can ask
//! for an estimate at any moment without touching the network.
//!
//! ```text
//! refresh(owner, mint, slot) ── read stake + pool ──► snapshot ──► interpolator
//!
//! estimated_reward(owner, mint, slot) ── cache + clock ──► u64   (no I/O)
//!
//! background loop: every refresh_interval ── refresh_all()
//!                  stop_refresh_loop()    ── exit
//! ```
//!
//! A failed refresh keeps the previous snapshot; estimates stay available
//! and keep rising from the last known state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use solana_sdk::pubkey::Pubkey;
use staking_common::{RewardInterpolator, RewardSnapshot};
use tokio::sync::Notify;
use tokio::time::interval;
use tracing::{debug, warn};

use crate::error::{StakingError, StakingResult};
use crate::pool_reader::PoolReader;

/// `(owner, mint, pool_slot)`.
pub type PositionKey = (Pubkey, Pubkey, u32);

pub struct RewardTracker {
    reader: Arc<PoolReader>,
    positions: RwLock<HashMap<PositionKey, RewardInterpolator>>,
    refresh_interval: Duration,
    running: AtomicBool,
    shutdown: Notify,
}

impl RewardTracker {
    #[must_use]
    pub fn new(reader: Arc<PoolReader>, refresh_interval: Duration) -> Self {
        Self {
            reader,
            positions: RwLock::new(HashMap::new()),
            refresh_interval,
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    /// Reads the position and replaces its snapshot. A closed stake is
    /// dropped from tracking and yields `None`.
    pub async fn refresh(
        &self,
        owner: &Pubkey,
        mint: &Pubkey,
        pool_slot: u32,
    ) -> StakingResult<Option<RewardSnapshot>> {
        let key = (*owner, *mint, pool_slot);
        let Some((_, stake)) = self.reader.stake(mint, pool_slot, owner).await? else {
            self.positions.write().remove(&key);
            debug!(%owner, %mint, pool_slot, "no stake, position untracked");
            return Ok(None);
        };
        let project = self.reader.require_project(mint, pool_slot).await?;
        let snapshot = RewardSnapshot::from_accounts(&stake, &project);

        let mut positions = self.positions.write();
        match positions.get_mut(&key) {
            Some(interpolator) if interpolator.snapshot() == &snapshot => {}
            Some(interpolator) => interpolator.reset(snapshot),
            None => {
                positions.insert(key, RewardInterpolator::new(snapshot));
            }
        }
        Ok(Some(snapshot))
    }

    /// Refreshes every tracked position. Returns how many succeeded.
    pub async fn refresh_all(&self) -> usize {
        let keys: Vec<PositionKey> = self.positions.read().keys().copied().collect();
        let mut refreshed = 0;
        for (owner, mint, pool_slot) in keys {
            match self.refresh(&owner, &mint, pool_slot).await {
                Ok(_) => refreshed += 1,
                Err(e) => warn!(%owner, %mint, pool_slot, error = %e, "reward refresh failed, keeping last snapshot"),
            }
        }
        refreshed
    }

    pub fn untrack(&self, owner: &Pubkey, mint: &Pubkey, pool_slot: u32) {
        self.positions.write().remove(&(*owner, *mint, pool_slot));
    }

    #[must_use]
    pub fn tracked(&self) -> usize {
        self.positions.read().len()
    }

    /// Estimate at the current wall clock. `None` for untracked positions.
    #[must_use]
    pub fn estimated_reward(&self, owner: &Pubkey, mint: &Pubkey, pool_slot: u32) -> Option<u64> {
        self.estimate_at(owner, mint, pool_slot, Utc::now().timestamp())
    }

    #[must_use]
    pub fn estimate_at(&self, owner: &Pubkey, mint: &Pubkey, pool_slot: u32, now: i64) -> Option<u64> {
        self.positions
            .write()
            .get_mut(&(*owner, *mint, pool_slot))
            .map(|interpolator| interpolator.estimate(now))
    }

    // ────────────────────────────────────────────────────────────────────
    // Background refresh
    // ────────────────────────────────────────────────────────────────────

    /// Spawns the periodic refresh. Fails if already running.
    pub fn start_refresh_loop(self: &Arc<Self>) -> StakingResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(StakingError::Config("reward refresh loop already running".to_string()));
        }

        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(tracker.refresh_interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let refreshed = tracker.refresh_all().await;
                        debug!(refreshed, "reward snapshots refreshed");
                    }
                    _ = tracker.shutdown.notified() => {
                        tracker.running.store(false, Ordering::SeqCst);
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    /// Signals the loop to exit. Returns immediately.
    pub fn stop_refresh_loop(&self) {
        if self.running.load(Ordering::SeqCst) {
            self.shutdown.notify_one();
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MockLedger;
    use solana_sdk::account::Account;
    use staking_common::{PoolAddresses, ProgramAccount, ProjectAccount, StakeAccount};

    const T0: i64 = 1_700_000_000;

    struct Fixture {
        program: Pubkey,
        ledger: Arc<MockLedger>,
        tracker: Arc<RewardTracker>,
        mint: Pubkey,
        owner: Pubkey,
    }

    fn fixture(rate: u64) -> Fixture {
        let program = Pubkey::new_unique();
        let ledger = Arc::new(MockLedger::new());
        let mint = Pubkey::new_unique();
        let addrs = PoolAddresses::derive(&program, &mint, 0);
        let mut project = ProjectAccount::shell(Pubkey::new_unique(), mint, 0, addrs.staking_vault, addrs.reward_vault);
        project.reward_rate_per_second = rate;
        project.is_initialized = true;
        ledger.set_account(addrs.pool, owned(program, project.encode()));
        let reader = Arc::new(PoolReader::new(program, ledger.clone()));
        Fixture {
            program,
            ledger,
            tracker: Arc::new(RewardTracker::new(reader, Duration::from_secs(12))),
            mint,
            owner: Pubkey::new_unique(),
        }
    }

    fn owned(program: Pubkey, data: Vec<u8>) -> Account {
        Account { lamports: 1, data, owner: program, executable: false, rent_epoch: 0 }
    }

    impl Fixture {
        fn set_stake(&self, amount: u64, pending: u64, at: i64) {
            let addrs = PoolAddresses::derive(&self.program, &self.mint, 0);
            let mut stake = StakeAccount::opened(self.owner, addrs.pool, amount, at);
            stake.rewards_pending = pending;
            self.ledger
                .set_account(addrs.stake_record(&self.program, &self.owner), owned(self.program, stake.encode()));
        }
    }

    // ── Test 1: estimate grows between refreshes ────────────────────────

    #[tokio::test]
    async fn estimate_interpolates_from_snapshot() {
        // 1e9 principal at 1e9-scaled rate 1_000 accrues 1_000 per second.
        let f = fixture(1_000);
        f.set_stake(1_000_000_000, 50, T0);
        f.tracker.refresh(&f.owner, &f.mint, 0).await.unwrap();

        assert_eq!(f.tracker.estimate_at(&f.owner, &f.mint, 0, T0), Some(50));
        assert_eq!(f.tracker.estimate_at(&f.owner, &f.mint, 0, T0 + 10), Some(10_050));
        // Clock stepping back never lowers the figure.
        assert_eq!(f.tracker.estimate_at(&f.owner, &f.mint, 0, T0 + 9), Some(10_050));
    }

    #[tokio::test]
    async fn untracked_position_is_none() {
        let f = fixture(1);
        assert_eq!(f.tracker.estimated_reward(&f.owner, &f.mint, 0), None);
    }

    // ── Test 2: closed stake drops out ──────────────────────────────────

    #[tokio::test]
    async fn closed_stake_is_untracked() {
        let f = fixture(1);
        f.set_stake(10, 0, T0);
        f.tracker.refresh(&f.owner, &f.mint, 0).await.unwrap();
        assert_eq!(f.tracker.tracked(), 1);

        let addrs = PoolAddresses::derive(&f.program, &f.mint, 0);
        f.ledger.remove_account(&addrs.stake_record(&f.program, &f.owner));
        assert_eq!(f.tracker.refresh_all().await, 1);
        assert_eq!(f.tracker.tracked(), 0);
    }

    // ── Test 3: failed refresh keeps last snapshot ──────────────────────

    #[tokio::test]
    async fn failed_refresh_keeps_estimate() {
        let f = fixture(1_000);
        f.set_stake(1_000_000_000, 0, T0);
        f.tracker.refresh(&f.owner, &f.mint, 0).await.unwrap();
        f.ledger.set_read_failure(Some("timeout".into()));
        assert_eq!(f.tracker.refresh_all().await, 0);
        assert_eq!(f.tracker.estimate_at(&f.owner, &f.mint, 0, T0 + 1), Some(1_000));
    }

    // ── Test 4: background loop picks up new snapshots ──────────────────

    #[tokio::test(start_paused = true)]
    async fn refresh_loop_updates_and_stops() {
        let f = fixture(1_000);
        f.set_stake(1_000_000_000, 0, T0);
        f.tracker.refresh(&f.owner, &f.mint, 0).await.unwrap();
        f.tracker.start_refresh_loop().unwrap();
        assert!(f.tracker.start_refresh_loop().is_err());

        // Claim lands elsewhere: pending resets, timestamp moves.
        f.set_stake(1_000_000_000, 0, T0 + 100);
        tokio::time::sleep(Duration::from_secs(13)).await;
        assert_eq!(f.tracker.estimate_at(&f.owner, &f.mint, 0, T0 + 100), Some(0));

        f.tracker.stop_refresh_loop();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!f.tracker.is_running());
    }
}
