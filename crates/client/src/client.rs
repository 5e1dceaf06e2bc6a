//! # Staking Client
//!
//! The surface the UI talks to. Wires the components together and runs
//! every user action through the same pipeline:
//!
//! ```text
//! build ──► submit (idempotency) ──► ok ────────► reconcile mirror ─► refresh reward snapshot
//!                                   ├─ ambiguous ► reconcile mirror ─► error (verify balance)
//!                                   └─ rejected ─► error
//! ```
//!
//! The mirror is reconciled after any outcome that may have moved value,
//! always from a fresh ledger read.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use staking_common::interpolator::{dynamic_apr_percent, fixed_apy_percent};
use staking_common::{OperationEnvelope, PoolConfig, PoolDescriptor, RateMode, StakeRecord};
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::error::StakingResult;
use crate::journal::{JournalRecord, ProvisioningJournal};
use crate::ledger::{Ledger, LedgerReader};
use crate::mirror::StakeMirror;
use crate::operation_builder::{OperationBuilder, PreparedOperation};
use crate::pool_reader::PoolReader;
use crate::provisioning::{Provisioner, ProvisioningSettings};
use crate::reconciler::{MirrorReconciler, ReconcileOutcome};
use crate::reward_tracker::RewardTracker;
use crate::runtime_resolver::RuntimeResolver;
use crate::slot_allocator::SlotAllocator;
use crate::submission::{IdempotencyToken, ReceiptKind, SubmissionResolver};

/// Result of a completed user action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationReceipt {
    pub signature: Signature,
    pub kind: ReceiptKind,
    pub envelope: OperationEnvelope,
    pub reconcile: ReconcileOutcome,
}

/// Annual rate of a pool as shown to users.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolRate {
    pub mode: RateMode,
    /// `None` for a dynamic pool with nothing staked.
    pub annual_percent: Option<f64>,
    pub total_staked: u64,
}

pub struct StakingClient {
    config: ClientConfig,
    reader: Arc<PoolReader>,
    resolver: Arc<RuntimeResolver>,
    builder: Arc<OperationBuilder>,
    allocator: Arc<SlotAllocator>,
    submitter: Arc<SubmissionResolver>,
    reconciler: MirrorReconciler,
    provisioner: Provisioner,
    tracker: Arc<RewardTracker>,
    journal: Arc<dyn ProvisioningJournal>,
    refresh_nonce: AtomicU32,
}

impl StakingClient {
    pub fn new<L: Ledger + 'static>(
        config: ClientConfig,
        ledger: Arc<L>,
        mirror: Arc<dyn StakeMirror>,
        payer: Arc<Keypair>,
        journal: Arc<dyn ProvisioningJournal>,
    ) -> StakingResult<Self> {
        config.validate()?;
        let program_id = config.program_id;
        let read: Arc<dyn LedgerReader> = ledger.clone();
        let full: Arc<dyn Ledger> = ledger;

        let reader = Arc::new(PoolReader::new(program_id, read.clone()));
        let resolver = Arc::new(RuntimeResolver::new(read.clone()));
        let builder = Arc::new(OperationBuilder::new(reader.clone(), resolver.clone()));
        let allocator = Arc::new(SlotAllocator::new(program_id, read, mirror.clone()));
        let submitter = Arc::new(SubmissionResolver::new(full, payer));
        let reconciler = MirrorReconciler::new(reader.clone(), mirror.clone());
        let settings = ProvisioningSettings {
            max_pool_slots: config.max_pool_slots,
            shell_poll_attempts: config.shell_poll_attempts,
            shell_poll_interval: config.shell_poll_interval(),
            max_reallocations: config.max_reallocations,
            creation_fee_lamports: config.pool_creation_fee,
            fee_recipient: config.pool_fee_recipient,
        };
        let provisioner = Provisioner::new(
            reader.clone(),
            resolver.clone(),
            builder.clone(),
            allocator.clone(),
            submitter.clone(),
            mirror,
            journal.clone(),
            settings,
        );
        let tracker = Arc::new(RewardTracker::new(reader.clone(), config.reward_refresh_interval()));

        Ok(Self {
            config,
            reader,
            resolver,
            builder,
            allocator,
            submitter,
            reconciler,
            provisioner,
            tracker,
            journal,
            refresh_nonce: AtomicU32::new(0),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Wallet that signs and owns every position of this client.
    #[must_use]
    pub fn wallet(&self) -> Pubkey {
        self.submitter.payer()
    }

    #[must_use]
    pub fn reconciler(&self) -> &MirrorReconciler {
        &self.reconciler
    }

    /// Forgets an ambiguous token after the caller verified that the
    /// earlier attempt did not land.
    pub fn release_token(&self, token: &IdempotencyToken) {
        self.submitter.release(token);
    }

    // ────────────────────────────────────────────────────────────────────
    // Pipeline
    // ────────────────────────────────────────────────────────────────────

    async fn execute(
        &self,
        mut op: PreparedOperation,
        token: Option<&IdempotencyToken>,
        moves_principal: bool,
    ) -> StakingResult<OperationReceipt> {
        let owner = self.wallet();
        let (mint, slot, kind) = (op.envelope.mint, op.envelope.pool_slot, op.envelope.kind);
        op.envelope.idempotency_hint = token.map(ToString::to_string);

        match self.submitter.submit(&op.instructions, token).await {
            Ok(receipt) => {
                info!(%mint, slot, operation = %kind, signature = %receipt.signature, "operation succeeded");
                let reconcile = self.after_success(&owner, &mint, slot, moves_principal).await;
                Ok(OperationReceipt {
                    signature: receipt.signature,
                    kind: receipt.kind,
                    envelope: op.envelope,
                    reconcile,
                })
            }
            Err(e) if e.is_ambiguous() => {
                warn!(%mint, slot, operation = %kind, error = %e, "operation outcome unknown");
                self.after_success(&owner, &mint, slot, moves_principal).await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn after_success(
        &self,
        owner: &Pubkey,
        mint: &Pubkey,
        pool_slot: u32,
        moves_principal: bool,
    ) -> ReconcileOutcome {
        let outcome = if moves_principal {
            self.reconciler.reconcile(owner, mint, pool_slot).await
        } else {
            ReconcileOutcome::Skipped("principal unchanged".to_string())
        };
        if let Err(e) = self.tracker.refresh(owner, mint, pool_slot).await {
            warn!(%mint, pool_slot, error = %e, "reward snapshot refresh failed");
        }
        outcome
    }

    // ────────────────────────────────────────────────────────────────────
    // User operations
    // ────────────────────────────────────────────────────────────────────

    /// `referrer` overrides the pool's referrer for the fee split.
    pub async fn stake(
        &self,
        mint: &Pubkey,
        amount: u64,
        pool_slot: u32,
        referrer: Option<Pubkey>,
        token: Option<&IdempotencyToken>,
    ) -> StakingResult<OperationReceipt> {
        let op = self.builder.stake(&self.wallet(), mint, pool_slot, amount, referrer).await?;
        self.execute(op, token, true).await
    }

    /// `amount = None` withdraws everything.
    pub async fn unstake(
        &self,
        mint: &Pubkey,
        pool_slot: u32,
        amount: Option<u64>,
        token: Option<&IdempotencyToken>,
    ) -> StakingResult<OperationReceipt> {
        let op = self.builder.unstake(&self.wallet(), mint, pool_slot, amount).await?;
        self.execute(op, token, true).await
    }

    pub async fn claim_reward(
        &self,
        mint: &Pubkey,
        pool_slot: u32,
        token: Option<&IdempotencyToken>,
    ) -> StakingResult<OperationReceipt> {
        let op = self.builder.claim_reward(&self.wallet(), mint, pool_slot).await?;
        self.execute(op, token, true).await
    }

    pub async fn claim_reflection(
        &self,
        mint: &Pubkey,
        pool_slot: u32,
        token: Option<&IdempotencyToken>,
    ) -> StakingResult<OperationReceipt> {
        let op = self.builder.claim_reflection(&self.wallet(), mint, pool_slot).await?;
        self.execute(op, token, false).await
    }

    pub async fn refresh_reflections(&self, mint: &Pubkey, pool_slot: u32) -> StakingResult<OperationReceipt> {
        let nonce = self.refresh_nonce.fetch_add(1, Ordering::Relaxed);
        let op = self
            .builder
            .refresh_reflections(&self.wallet(), mint, pool_slot, nonce)
            .await?;
        self.execute(op, None, false).await
    }

    // ────────────────────────────────────────────────────────────────────
    // Provisioning
    // ────────────────────────────────────────────────────────────────────

    pub async fn allocate_slot(&self, mint: &Pubkey) -> StakingResult<u32> {
        self.allocator.allocate(mint, self.config.max_pool_slots).await
    }

    pub async fn provision_pool(&self, mint: &Pubkey, config: PoolConfig) -> StakingResult<PoolDescriptor> {
        self.provisioner.provision(mint, config).await
    }

    pub async fn resume_provisioning(&self, mint: &Pubkey, pool_slot: u32) -> StakingResult<PoolDescriptor> {
        self.provisioner.resume(mint, pool_slot).await
    }

    /// Unfinished provisioning runs for `mint`.
    pub fn pending_provisioning(&self, mint: &Pubkey) -> StakingResult<Vec<JournalRecord>> {
        Ok(self
            .journal
            .list()?
            .into_iter()
            .filter(|record| record.mint == *mint && !record.is_finished())
            .collect())
    }

    // ────────────────────────────────────────────────────────────────────
    // Queries
    // ────────────────────────────────────────────────────────────────────

    /// Starts tracking the wallet's position and returns its snapshot
    /// estimate. Later calls to [`estimated_reward`](Self::estimated_reward)
    /// need no I/O.
    pub async fn track_position(&self, mint: &Pubkey, pool_slot: u32) -> StakingResult<Option<u64>> {
        let owner = self.wallet();
        self.tracker.refresh(&owner, mint, pool_slot).await?;
        Ok(self.tracker.estimated_reward(&owner, mint, pool_slot))
    }

    /// Non-blocking estimate. `None` until the position is tracked.
    #[must_use]
    pub fn estimated_reward(&self, mint: &Pubkey, pool_slot: u32) -> Option<u64> {
        self.tracker.estimated_reward(&self.wallet(), mint, pool_slot)
    }

    #[must_use]
    pub fn estimated_reward_at(&self, mint: &Pubkey, pool_slot: u32, now: i64) -> Option<u64> {
        self.tracker.estimate_at(&self.wallet(), mint, pool_slot, now)
    }

    pub fn start_reward_refresh(&self) -> StakingResult<()> {
        self.tracker.start_refresh_loop()
    }

    pub fn stop_reward_refresh(&self) {
        self.tracker.stop_refresh_loop();
    }

    pub async fn stake_info(&self, mint: &Pubkey, pool_slot: u32) -> StakingResult<Option<StakeRecord>> {
        self.reader.stake_record(mint, pool_slot, &self.wallet()).await
    }

    pub async fn pool_info(&self, mint: &Pubkey, pool_slot: u32) -> StakingResult<PoolDescriptor> {
        let asset = self.resolver.resolve(mint).await?;
        self.provisioner.describe(&asset, pool_slot).await
    }

    pub async fn pool_rate(&self, mint: &Pubkey, pool_slot: u32) -> StakingResult<PoolRate> {
        let project = self.reader.require_project(mint, pool_slot).await?;
        let mode = RateMode::from_u8(project.rate_mode);
        let annual_percent = match mode {
            RateMode::Fixed => Some(fixed_apy_percent(project.rate_bps_per_year)),
            RateMode::Dynamic => dynamic_apr_percent(project.reward_rate_per_second, project.total_staked),
        };
        Ok(PoolRate { mode, annual_percent, total_staked: project.total_staked })
    }
}

const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn check() {
        assert_send_sync::<StakingClient>();
    }
    let _ = check;
};
