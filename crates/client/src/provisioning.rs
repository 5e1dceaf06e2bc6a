//! # Pool Provisioning
//!
//! Creates a new pool for a mint as an explicit, resumable state machine.
//! Every step is recorded in the journal as soon as it completes.
//!
//! ```text
//!    balance check: reward reserve and creation fee (before any write)
//!  ┌───────────────┐  reserve in mirror (advisory)
//!  │ SlotAllocated │◄─────────────────────────────┐
//!  └──────┬────────┘                              │
//!         │ system transfer of the creation fee   │ slot taken by another
//!  ┌──────▼────────┐  (once per run, skipped at 0) │ creator (bounded)
//!  │    FeePaid    │                              │
//!  └──────┬────────┘                              │
//!         │ create_project                        │
//!  ┌──────▼────────┐  rejected, pool now exists ──┘
//!  │ ShellCreated  │
//!  └──────┬────────┘
//!         │ poll until shell decodes with expected mint / slot / admin
//!  ┌──────▼────────┐
//!  │ ShellVisible  │
//!  └──────┬────────┘
//!         │ initialize_pool          (skipped when already initialized)
//!  ┌──────▼───────────────┐
//!  │ParametersInitialized │
//!  └──────┬───────────────┘
//!         │ deposit_rewards          (skipped when reserve already funded)
//!  ┌──────▼──────────┐
//!  │ RewardsDeposited│
//!  └──────┬──────────┘
//!         │ mirror record_pool
//!  ┌──────▼─────────┐
//!  │ MirrorRecorded │
//!  └────────────────┘
//! ```
//!
//! ## Contract
//!
//! - Not atomic. A failure after the shell leaves a partial pool, reported
//!   as `ProvisioningIncomplete { last_completed }` and never rolled back.
//! - `resume` re-reads the ledger before each remaining step, so a step
//!   whose outcome was ambiguous is not applied twice.
//! - The fee is paid at most once per run; re-allocating after a lost slot
//!   race carries it over. An ambiguous fee transfer keeps its signature in
//!   the journal and `resume` settles it before paying again.
//! - The mirror write is last and non-gating: when it fails the pool is
//!   still returned, and a later `resume` retries only that write.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::system_instruction;
use staking_common::{AssetIdentity, PoolConfig, PoolDescriptor, ProjectAccount, NATIVE_MINT};
use tracing::{debug, info, warn};

use crate::config::DEFAULT_POOL_CREATION_FEE;
use crate::error::{StakingError, StakingResult};
use crate::ledger::SignatureState;
use crate::journal::{JournalRecord, ProvisioningJournal};
use crate::mirror::{MirrorError, StakeMirror};
use crate::operation_builder::OperationBuilder;
use crate::pool_reader::PoolReader;
use crate::runtime_resolver::RuntimeResolver;
use crate::slot_allocator::SlotAllocator;
use crate::submission::{IdempotencyToken, SubmissionResolver};

// ════════════════════════════════════════════════════════════════════════════════
// STEPS
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningStep {
    SlotAllocated,
    FeePaid,
    ShellCreated,
    ShellVisible,
    ParametersInitialized,
    RewardsDeposited,
    MirrorRecorded,
}

impl fmt::Display for ProvisioningStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SlotAllocated => "slot_allocated",
            Self::FeePaid => "fee_paid",
            Self::ShellCreated => "shell_created",
            Self::ShellVisible => "shell_visible",
            Self::ParametersInitialized => "parameters_initialized",
            Self::RewardsDeposited => "rewards_deposited",
            Self::MirrorRecorded => "mirror_recorded",
        };
        f.write_str(name)
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// SETTINGS
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvisioningSettings {
    pub max_pool_slots: u32,
    pub shell_poll_attempts: u32,
    pub shell_poll_interval: Duration,
    pub max_reallocations: u32,
    /// Lamports paid by the admin before the shell is created.
    pub creation_fee_lamports: u64,
    /// Fee recipient; the platform admin when unset.
    pub fee_recipient: Option<Pubkey>,
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self {
            max_pool_slots: 10,
            shell_poll_attempts: 10,
            shell_poll_interval: Duration::from_millis(1_000),
            max_reallocations: 3,
            creation_fee_lamports: DEFAULT_POOL_CREATION_FEE,
            fee_recipient: None,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// PROVISIONER
// ════════════════════════════════════════════════════════════════════════════════

pub struct Provisioner {
    reader: Arc<PoolReader>,
    resolver: Arc<RuntimeResolver>,
    builder: Arc<OperationBuilder>,
    allocator: Arc<SlotAllocator>,
    submitter: Arc<SubmissionResolver>,
    mirror: Arc<dyn StakeMirror>,
    journal: Arc<dyn ProvisioningJournal>,
    settings: ProvisioningSettings,
}

fn incomplete(record: &JournalRecord, reason: impl ToString) -> StakingError {
    StakingError::ProvisioningIncomplete {
        pool_slot: record.pool_slot,
        last_completed: record.last_completed,
        reason: reason.to_string(),
    }
}

fn step_token(record: &JournalRecord, step: ProvisioningStep) -> IdempotencyToken {
    IdempotencyToken::new(format!("provision:{}:{}:{step}", record.mint, record.pool_slot))
}

impl Provisioner {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        reader: Arc<PoolReader>,
        resolver: Arc<RuntimeResolver>,
        builder: Arc<OperationBuilder>,
        allocator: Arc<SlotAllocator>,
        submitter: Arc<SubmissionResolver>,
        mirror: Arc<dyn StakeMirror>,
        journal: Arc<dyn ProvisioningJournal>,
        settings: ProvisioningSettings,
    ) -> Self {
        Self { reader, resolver, builder, allocator, submitter, mirror, journal, settings }
    }

    fn checkpoint(&self, record: &JournalRecord) -> StakingResult<()> {
        self.journal.save(record).map_err(|e| incomplete(record, e))
    }

    /// Provisions a new pool for `mint` in the lowest free slot.
    pub async fn provision(&self, mint: &Pubkey, config: PoolConfig) -> StakingResult<PoolDescriptor> {
        if config.referrer_split_bps.is_some_and(|bps| bps > 10_000) {
            return Err(StakingError::InvalidAmount("referrer split above 10000 bps".into()));
        }
        let asset = self.resolver.resolve(mint).await?;
        let admin = self.submitter.payer();
        self.check_funds(&asset, &admin, &config).await?;
        let mut excluded = HashSet::new();
        let mut paid_fee: Option<Option<String>> = None;

        for attempt in 0..=self.settings.max_reallocations {
            let slot = self
                .allocator
                .allocate_excluding(mint, self.settings.max_pool_slots, &excluded)
                .await?;

            match self.mirror.reserve_pool_slot(mint, slot, &admin).await {
                Ok(()) => {}
                Err(MirrorError::Status { status: 409, .. }) => {
                    info!(%mint, slot, "slot reserved by another creator, re-allocating");
                    excluded.insert(slot);
                    continue;
                }
                Err(e) => warn!(%mint, slot, error = %e, "slot reservation failed (advisory, continuing)"),
            }

            let mut record = JournalRecord::new(*mint, slot, admin, config.clone());
            record.complete(ProvisioningStep::SlotAllocated, None);
            if let Some(signature) = paid_fee.clone() {
                record.complete(ProvisioningStep::FeePaid, signature);
            }
            self.checkpoint(&record)?;
            info!(%mint, slot, attempt, "pool slot allocated");

            if !record.is_done(ProvisioningStep::FeePaid) {
                let signature = self.pay_creation_fee(&mut record).await?;
                record.complete(ProvisioningStep::FeePaid, signature.clone());
                self.checkpoint(&record)?;
                paid_fee = Some(signature);
            }

            let shell = self.builder.create_pool_shell(&admin, &asset, slot);
            let token = step_token(&record, ProvisioningStep::ShellCreated);
            match self.submitter.submit(&shell.instructions, Some(&token)).await {
                Ok(receipt) => {
                    record.complete(ProvisioningStep::ShellCreated, Some(receipt.signature.to_string()));
                    self.checkpoint(&record)?;
                    info!(%mint, slot, signature = %receipt.signature, "pool shell created");
                    return self.run(&asset, record).await;
                }
                Err(StakingError::Rejected(reason)) => {
                    self.submitter.release(&token);
                    if self.taken_by_other(mint, slot, &admin).await {
                        warn!(%mint, slot, %reason, "lost slot race, re-allocating");
                        excluded.insert(slot);
                        continue;
                    }
                    return Err(incomplete(&record, reason));
                }
                Err(e) => return Err(incomplete(&record, e)),
            }
        }

        Err(StakingError::ProvisioningIncomplete {
            pool_slot: excluded.iter().copied().max().unwrap_or_default(),
            last_completed: None,
            reason: format!(
                "slot taken by another creator {} times",
                self.settings.max_reallocations + 1
            ),
        })
    }

    /// Continues an interrupted run from its journal record.
    pub async fn resume(&self, mint: &Pubkey, pool_slot: u32) -> StakingResult<PoolDescriptor> {
        let mut record = self
            .journal
            .load(mint, pool_slot)?
            .ok_or_else(|| StakingError::Journal(format!("no provisioning record for {mint} slot {pool_slot}")))?;
        let asset = self.resolver.resolve(mint).await?;
        info!(%mint, pool_slot, last = ?record.last_completed, "resuming provisioning");

        if !record.is_done(ProvisioningStep::FeePaid) {
            let signature = match self.reader.project(mint, pool_slot).await {
                Ok(Some(project)) if project.admin == record.owner => {
                    debug!(%mint, pool_slot, "shell on-chain, fee already settled");
                    None
                }
                Ok(Some(project)) => {
                    return Err(incomplete(
                        &record,
                        format!("slot taken by another creator ({})", project.admin),
                    ));
                }
                Ok(None) => self.settle_creation_fee(&mut record).await?,
                Err(e) => return Err(incomplete(&record, e)),
            };
            record.complete(ProvisioningStep::FeePaid, signature);
            self.checkpoint(&record)?;
        }

        if !record.is_done(ProvisioningStep::ShellCreated) {
            match self.reader.project(mint, pool_slot).await {
                Ok(Some(project)) if project.admin == record.owner => {
                    debug!(%mint, pool_slot, "shell already on-chain");
                    record.complete(ProvisioningStep::ShellCreated, None);
                }
                Ok(Some(project)) => {
                    return Err(incomplete(
                        &record,
                        format!("slot taken by another creator ({})", project.admin),
                    ));
                }
                Ok(None) => {
                    let shell = self.builder.create_pool_shell(&record.owner, &asset, pool_slot);
                    let token = step_token(&record, ProvisioningStep::ShellCreated);
                    let receipt = self
                        .submitter
                        .submit(&shell.instructions, Some(&token))
                        .await
                        .map_err(|e| incomplete(&record, e))?;
                    record.complete(ProvisioningStep::ShellCreated, Some(receipt.signature.to_string()));
                }
                Err(e) => return Err(incomplete(&record, e)),
            }
            self.checkpoint(&record)?;
        }

        self.run(&asset, record).await
    }

    /// Fails with `InsufficientFunds` before anything is reserved or sent.
    async fn check_funds(&self, asset: &AssetIdentity, admin: &Pubkey, config: &PoolConfig) -> StakingResult<()> {
        let fee = self.settings.creation_fee_lamports;
        let reward = config.reward_amount;
        let mut fee_checked = false;

        if reward > 0 {
            let available = self.reader.holding_balance(asset, admin).await?;
            let required = if asset.is_native() {
                fee_checked = true;
                reward.saturating_add(fee)
            } else {
                reward
            };
            if available < required {
                return Err(StakingError::InsufficientFunds { mint: asset.mint, required, available });
            }
        }

        if fee > 0 && !fee_checked {
            let available = self.reader.ledger().get_balance(admin).await?;
            if available < fee {
                return Err(StakingError::InsufficientFunds { mint: NATIVE_MINT, required: fee, available });
            }
        }
        Ok(())
    }

    /// Transfers the creation fee. `Ok(None)` when no fee is configured.
    /// An ambiguous transfer leaves its signature in the journal.
    async fn pay_creation_fee(&self, record: &mut JournalRecord) -> StakingResult<Option<String>> {
        let fee = self.settings.creation_fee_lamports;
        if fee == 0 {
            return Ok(None);
        }
        let recipient = match self.settings.fee_recipient {
            Some(recipient) => recipient,
            None => self.reader.platform().await.map_err(|e| incomplete(record, e))?.admin,
        };

        let transfer = system_instruction::transfer(&record.owner, &recipient, fee);
        let token = step_token(record, ProvisioningStep::FeePaid);
        match self.submitter.submit(&[transfer], Some(&token)).await {
            Ok(receipt) => {
                info!(
                    mint = %record.mint,
                    slot = record.pool_slot,
                    fee,
                    %recipient,
                    signature = %receipt.signature,
                    "pool creation fee paid"
                );
                Ok(Some(receipt.signature.to_string()))
            }
            Err(StakingError::Rejected(reason)) => {
                self.submitter.release(&token);
                Err(incomplete(record, reason))
            }
            Err(e) => {
                if let StakingError::AmbiguousOutcome { signature: Some(signature) } = &e {
                    record.signatures.insert(ProvisioningStep::FeePaid, signature.to_string());
                    self.checkpoint(record)?;
                }
                Err(incomplete(record, e))
            }
        }
    }

    /// Resolves a fee transfer left ambiguous by an earlier run, paying
    /// only when it provably did not land.
    async fn settle_creation_fee(&self, record: &mut JournalRecord) -> StakingResult<Option<String>> {
        let Some(pending) = record.signatures.get(&ProvisioningStep::FeePaid).cloned() else {
            return self.pay_creation_fee(record).await;
        };
        let signature: Signature = pending
            .parse()
            .map_err(|_| incomplete(record, format!("malformed fee signature {pending}")))?;
        match self.reader.ledger().signature_status(&signature).await {
            Ok(SignatureState::Succeeded) => {
                debug!(mint = %record.mint, slot = record.pool_slot, %signature, "earlier fee transfer landed");
                Ok(Some(pending))
            }
            Ok(SignatureState::Failed(reason)) => {
                info!(mint = %record.mint, slot = record.pool_slot, %signature, %reason, "earlier fee transfer failed");
                record.signatures.remove(&ProvisioningStep::FeePaid);
                self.submitter.release(&step_token(record, ProvisioningStep::FeePaid));
                self.pay_creation_fee(record).await
            }
            Ok(SignatureState::Unknown) => Err(incomplete(
                record,
                format!("fee transfer {signature} outcome unknown, verify the admin balance"),
            )),
            Err(e) => Err(incomplete(record, e)),
        }
    }

    /// True when the slot's pool exists and belongs to someone else.
    async fn taken_by_other(&self, mint: &Pubkey, pool_slot: u32, admin: &Pubkey) -> bool {
        match self.reader.project(mint, pool_slot).await {
            Ok(Some(project)) => project.admin != *admin,
            Ok(None) => false,
            Err(e) => {
                warn!(%mint, pool_slot, error = %e, "could not check slot owner");
                false
            }
        }
    }

    /// Polls until the shell is readable and matches what was requested.
    async fn await_shell(&self, record: &JournalRecord) -> StakingResult<ProjectAccount> {
        let attempts = self.settings.shell_poll_attempts.max(1);
        for attempt in 1..=attempts {
            match self.reader.project(&record.mint, record.pool_slot).await {
                Ok(Some(project)) => {
                    if project.token_mint != record.mint
                        || project.pool_id != u64::from(record.pool_slot)
                        || project.admin != record.owner
                    {
                        return Err(incomplete(record, "pool shell does not match the request"));
                    }
                    return Ok(project);
                }
                Ok(None) => debug!(mint = %record.mint, slot = record.pool_slot, attempt, "shell not visible yet"),
                Err(e) => warn!(mint = %record.mint, slot = record.pool_slot, attempt, error = %e, "shell read failed"),
            }
            if attempt < attempts {
                tokio::time::sleep(self.settings.shell_poll_interval).await;
            }
        }
        Err(incomplete(record, format!("pool shell not visible after {attempts} attempts")))
    }

    /// Runs every step after the shell that is not yet done.
    async fn run(&self, asset: &AssetIdentity, mut record: JournalRecord) -> StakingResult<PoolDescriptor> {
        let (mint, slot, admin) = (record.mint, record.pool_slot, record.owner);

        if !record.is_done(ProvisioningStep::ShellVisible) {
            self.await_shell(&record).await?;
            record.complete(ProvisioningStep::ShellVisible, None);
            self.checkpoint(&record)?;
        }

        if !record.is_done(ProvisioningStep::ParametersInitialized) {
            let project = self
                .reader
                .require_project(&mint, slot)
                .await
                .map_err(|e| incomplete(&record, e))?;
            if project.is_initialized {
                debug!(%mint, slot, "parameters already initialized");
                record.complete(ProvisioningStep::ParametersInitialized, None);
            } else {
                let op = self
                    .builder
                    .initialize_pool(&admin, asset, slot, &record.config)
                    .await
                    .map_err(|e| incomplete(&record, e))?;
                let token = step_token(&record, ProvisioningStep::ParametersInitialized);
                let receipt = self
                    .submitter
                    .submit(&op.instructions, Some(&token))
                    .await
                    .map_err(|e| incomplete(&record, e))?;
                info!(%mint, slot, signature = %receipt.signature, "pool parameters initialized");
                record.complete(ProvisioningStep::ParametersInitialized, Some(receipt.signature.to_string()));
            }
            self.checkpoint(&record)?;
        }

        if !record.is_done(ProvisioningStep::RewardsDeposited) {
            let amount = record.config.reward_amount;
            let project = self
                .reader
                .require_project(&mint, slot)
                .await
                .map_err(|e| incomplete(&record, e))?;
            if amount == 0 || project.total_rewards_deposited >= amount {
                debug!(%mint, slot, amount, "reward reserve already in place");
                record.complete(ProvisioningStep::RewardsDeposited, None);
            } else {
                let op = self
                    .builder
                    .deposit_rewards(&admin, asset, slot, amount)
                    .map_err(|e| incomplete(&record, e))?;
                let token = step_token(&record, ProvisioningStep::RewardsDeposited);
                let receipt = self
                    .submitter
                    .submit(&op.instructions, Some(&token))
                    .await
                    .map_err(|e| incomplete(&record, e))?;
                info!(%mint, slot, amount, signature = %receipt.signature, "reward reserve deposited");
                record.complete(ProvisioningStep::RewardsDeposited, Some(receipt.signature.to_string()));
            }
            self.checkpoint(&record)?;
        }

        let descriptor = self.describe(asset, slot).await.map_err(|e| incomplete(&record, e))?;

        if !record.is_done(ProvisioningStep::MirrorRecorded) {
            match self.mirror.record_pool(&descriptor).await {
                Ok(()) => {
                    record.complete(ProvisioningStep::MirrorRecorded, None);
                    self.checkpoint(&record)?;
                    info!(%mint, slot, pool = %descriptor.addresses.pool, "pool provisioned");
                }
                Err(e) => {
                    warn!(%mint, slot, error = %e, "pool mirror write failed (non-critical), resume to retry");
                }
            }
        }

        Ok(descriptor)
    }

    /// Descriptor of an existing pool, read from the ledger.
    pub async fn describe(&self, asset: &AssetIdentity, pool_slot: u32) -> StakingResult<PoolDescriptor> {
        let project = self.reader.require_project(&asset.mint, pool_slot).await?;
        let reflection_asset = match project.reflection_token {
            Some(reflection_mint) => Some(self.resolver.resolve(&reflection_mint).await?),
            None => None,
        };
        Ok(PoolDescriptor::from_project(
            *asset,
            pool_slot,
            self.reader.addresses(&asset.mint, pool_slot),
            &project,
            reflection_asset,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::MemoryJournal;
    use crate::ledger::{MockLedger, SendBehavior};
    use crate::mirror::MemoryMirror;
    use crate::simulator::ProgramSimulator;
    use solana_sdk::account::Account;
    use spl_token::solana_program::program_pack::Pack;
    use solana_sdk::signature::{Keypair, Signer};
    use solana_sdk::system_program;
    use spl_token::state::{Account as TokenAccount, AccountState};
    use staking_common::{PoolAddresses, ProgramAccount, RateMode, RuntimeKind};

    const ADMIN_LAMPORTS: u64 = 10 * DEFAULT_POOL_CREATION_FEE;
    const FEE: u64 = 1_000;

    struct Fixture {
        program: Pubkey,
        ledger: Arc<MockLedger>,
        mirror: Arc<MemoryMirror>,
        journal: Arc<MemoryJournal>,
        admin: Pubkey,
        mint: Pubkey,
        fee_recipient: Pubkey,
        provisioner: Provisioner,
    }

    fn fixture() -> Fixture {
        fixture_with(None, FEE)
    }

    fn fixture_with_allocator_view(allocator_view: Option<Arc<MockLedger>>) -> Fixture {
        fixture_with(allocator_view, FEE)
    }

    /// `allocator_view` lets the allocator see a stale ledger, which is how
    /// a lost slot race looks from the client.
    fn fixture_with(allocator_view: Option<Arc<MockLedger>>, fee: u64) -> Fixture {
        let program = Pubkey::new_unique();
        let ledger = Arc::new(MockLedger::new());
        ledger.set_hook(Arc::new(ProgramSimulator::new(program, 1_700_000_000)));
        let mint = Pubkey::new_unique();
        ledger.set_account(
            mint,
            Account { lamports: 1, data: vec![0; 82], owner: spl_token::ID, executable: false, rent_epoch: 0 },
        );
        let mirror = Arc::new(MemoryMirror::new());
        let journal = Arc::new(MemoryJournal::new());
        let payer = Arc::new(Keypair::new());
        let admin = payer.pubkey();
        ledger.set_account(
            admin,
            Account { lamports: ADMIN_LAMPORTS, data: Vec::new(), owner: system_program::ID, executable: false, rent_epoch: 0 },
        );
        fund_holding(&ledger, &mint, &admin, 1_000_000);
        let fee_recipient = Pubkey::new_unique();

        let reader = Arc::new(PoolReader::new(program, ledger.clone()));
        let resolver = Arc::new(RuntimeResolver::new(ledger.clone()));
        let builder = Arc::new(OperationBuilder::new(reader.clone(), resolver.clone()));
        let allocator_ledger = allocator_view.unwrap_or_else(|| ledger.clone());
        let allocator = Arc::new(SlotAllocator::new(program, allocator_ledger, mirror.clone()));
        let submitter = Arc::new(SubmissionResolver::new(ledger.clone(), payer));
        let settings = ProvisioningSettings {
            shell_poll_interval: Duration::from_millis(1),
            creation_fee_lamports: fee,
            fee_recipient: Some(fee_recipient),
            ..ProvisioningSettings::default()
        };
        let provisioner = Provisioner::new(
            reader,
            resolver,
            builder,
            allocator,
            submitter,
            mirror.clone(),
            journal.clone(),
            settings,
        );
        Fixture { program, ledger, mirror, journal, admin, mint, fee_recipient, provisioner }
    }

    fn fund_holding(ledger: &MockLedger, mint: &Pubkey, wallet: &Pubkey, amount: u64) {
        let holding = AssetIdentity::new(*mint, RuntimeKind::Classic).holding_address(wallet);
        let state = TokenAccount {
            mint: *mint,
            owner: *wallet,
            amount,
            state: AccountState::Initialized,
            ..TokenAccount::default()
        };
        let mut data = vec![0; TokenAccount::LEN];
        TokenAccount::pack(state, &mut data).unwrap();
        ledger.set_account(
            holding,
            Account { lamports: 1, data, owner: spl_token::ID, executable: false, rent_epoch: 0 },
        );
    }

    impl Fixture {
        fn occupy(&self, slot: u32, admin: Pubkey) {
            let addrs = PoolAddresses::derive(&self.program, &self.mint, slot);
            let shell = ProjectAccount::shell(admin, self.mint, slot, addrs.staking_vault, addrs.reward_vault);
            self.ledger.set_account(
                addrs.pool,
                Account { lamports: 1, data: shell.encode(), owner: self.program, executable: false, rent_epoch: 0 },
            );
        }

        fn project(&self, slot: u32) -> ProjectAccount {
            let addrs = PoolAddresses::derive(&self.program, &self.mint, slot);
            let account = self.ledger.account(&addrs.pool).expect("pool account exists");
            ProjectAccount::decode(&account.data).unwrap()
        }
    }

    // ── Test 1: happy path ──────────────────────────────────────────────

    #[tokio::test]
    async fn provisions_lowest_free_slot() {
        let f = fixture();
        f.occupy(0, Pubkey::new_unique());
        let descriptor = f
            .provisioner
            .provision(&f.mint, PoolConfig::dynamic(30, 5_000))
            .await
            .unwrap();

        assert_eq!(descriptor.pool_slot, 1);
        assert_eq!(descriptor.rate_mode, RateMode::Dynamic);
        let project = f.project(1);
        assert!(project.is_initialized);
        assert_eq!(project.total_rewards_deposited, 5_000);
        assert!(f.mirror.pool(&f.mint, 1).is_some_and(|row| !row.pending()));

        let record = f.journal.load(&f.mint, 1).unwrap();
        assert!(record.is_some_and(|r| r.is_finished() && r.signatures.len() == 4));
        assert_eq!(f.ledger.account(&f.fee_recipient).map(|a| a.lamports), Some(FEE));
        assert_eq!(f.ledger.account(&f.admin).map(|a| a.lamports), Some(ADMIN_LAMPORTS - FEE));
    }

    // ── Test 2: failure after shell is resumable ────────────────────────

    #[tokio::test]
    async fn initialize_failure_reports_step_and_resumes() {
        let f = fixture();
        f.ledger.push_behavior(SendBehavior::Land);
        f.ledger.push_behavior(SendBehavior::Land);
        f.ledger.push_behavior(SendBehavior::Reject("node unhealthy".into()));

        let err = f.provisioner.provision(&f.mint, PoolConfig::dynamic(7, 100)).await;
        assert_eq!(
            err.as_ref().err().and_then(|e| match e {
                StakingError::ProvisioningIncomplete { last_completed, .. } => *last_completed,
                _ => None,
            }),
            Some(ProvisioningStep::ShellVisible)
        );
        assert!(!f.project(0).is_initialized);

        let descriptor = f.provisioner.resume(&f.mint, 0).await.unwrap();
        assert_eq!(descriptor.pool_slot, 0);
        assert!(f.project(0).is_initialized);
        assert_eq!(f.project(0).total_rewards_deposited, 100);
    }

    // ── Test 3: ambiguous deposit is not repeated on resume ─────────────

    #[tokio::test]
    async fn resume_skips_applied_deposit() {
        let f = fixture();
        f.ledger.push_behavior(SendBehavior::Land);
        f.ledger.push_behavior(SendBehavior::Land);
        f.ledger.push_behavior(SendBehavior::Land);
        f.ledger.push_behavior(SendBehavior::ConfirmTimeout { landed: true });

        let err = f.provisioner.provision(&f.mint, PoolConfig::dynamic(7, 100)).await;
        assert!(matches!(
            err,
            Err(StakingError::ProvisioningIncomplete {
                last_completed: Some(ProvisioningStep::ParametersInitialized),
                ..
            })
        ));
        let sent_before = f.ledger.sent_count();

        f.provisioner.resume(&f.mint, 0).await.unwrap();
        assert_eq!(f.ledger.sent_count(), sent_before);
        assert_eq!(f.project(0).total_rewards_deposited, 100);
    }

    // ── Test 4: lost race re-allocates ──────────────────────────────────

    #[tokio::test]
    async fn rejected_shell_on_taken_slot_reallocates() {
        let f = fixture_with_allocator_view(Some(Arc::new(MockLedger::new())));
        let racer = Pubkey::new_unique();
        f.occupy(0, racer);

        let descriptor = f
            .provisioner
            .provision(&f.mint, PoolConfig::dynamic(1, 0))
            .await
            .unwrap();
        assert_eq!(descriptor.pool_slot, 1);
        assert_eq!(descriptor.admin, f.admin);
        assert_eq!(f.project(0).admin, racer);
    }

    #[tokio::test]
    async fn rejected_shell_on_own_slot_is_incomplete() {
        let f = fixture();
        f.ledger.push_behavior(SendBehavior::Land);
        f.ledger.push_behavior(SendBehavior::Reject("insufficient funds for fee".into()));
        let err = f.provisioner.provision(&f.mint, PoolConfig::dynamic(1, 0)).await;
        assert!(matches!(
            err,
            Err(StakingError::ProvisioningIncomplete {
                last_completed: Some(ProvisioningStep::FeePaid),
                ..
            })
        ));
    }

    // ── Test 5: journal-less resume ─────────────────────────────────────

    #[tokio::test]
    async fn resume_without_record_is_journal_error() {
        let f = fixture();
        assert!(matches!(f.provisioner.resume(&f.mint, 4).await, Err(StakingError::Journal(_))));
    }

    // ── Test 6: shell that never shows up ───────────────────────────────

    #[tokio::test]
    async fn invisible_shell_is_incomplete() {
        let f = fixture();
        f.ledger.push_behavior(SendBehavior::Land);
        f.ledger.push_behavior(SendBehavior::AlreadyProcessed { landed: false, with_signature: true });
        let err = f.provisioner.provision(&f.mint, PoolConfig::dynamic(1, 0)).await;
        assert!(matches!(
            err,
            Err(StakingError::ProvisioningIncomplete {
                pool_slot: 0,
                last_completed: Some(ProvisioningStep::ShellCreated),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn mirror_failure_does_not_fail_provisioning() {
        let f = fixture();
        f.mirror.set_write_failure(Some("mirror down".into()));
        let descriptor = f
            .provisioner
            .provision(&f.mint, PoolConfig::dynamic(1, 10))
            .await
            .unwrap();
        let record = f.journal.load(&f.mint, descriptor.pool_slot).unwrap();
        assert_eq!(record.and_then(|r| r.last_completed), Some(ProvisioningStep::RewardsDeposited));

        f.mirror.set_write_failure(None);
        f.provisioner.resume(&f.mint, descriptor.pool_slot).await.unwrap();
        assert!(f.mirror.pool(&f.mint, descriptor.pool_slot).is_some_and(|row| !row.pending()));
    }

    // ── Test 7: creation fee and balance check ──────────────────────────

    #[tokio::test]
    async fn lost_race_pays_the_fee_once() {
        let f = fixture_with_allocator_view(Some(Arc::new(MockLedger::new())));
        f.occupy(0, Pubkey::new_unique());

        let descriptor = f
            .provisioner
            .provision(&f.mint, PoolConfig::dynamic(1, 0))
            .await
            .unwrap();
        assert_eq!(descriptor.pool_slot, 1);
        assert_eq!(f.ledger.account(&f.fee_recipient).map(|a| a.lamports), Some(FEE));
    }

    #[tokio::test]
    async fn short_reward_balance_fails_before_any_write() {
        let f = fixture();
        let err = f.provisioner.provision(&f.mint, PoolConfig::dynamic(1, 2_000_000)).await;
        assert!(matches!(
            err,
            Err(StakingError::InsufficientFunds { required: 2_000_000, available: 1_000_000, .. })
        ));
        assert_eq!(f.ledger.sent_count(), 0);
        assert!(f.mirror.pool(&f.mint, 0).is_none());
        assert!(f.journal.load(&f.mint, 0).unwrap().is_none());
    }

    #[tokio::test]
    async fn short_lamports_for_fee_fails_before_any_write() {
        let f = fixture_with(None, ADMIN_LAMPORTS + 1);
        let err = f.provisioner.provision(&f.mint, PoolConfig::dynamic(1, 10)).await;
        assert!(matches!(
            err,
            Err(StakingError::InsufficientFunds { mint, available: ADMIN_LAMPORTS, .. }) if mint == NATIVE_MINT
        ));
        assert_eq!(f.ledger.sent_count(), 0);
    }

    #[tokio::test]
    async fn zero_fee_skips_the_transfer() {
        let f = fixture_with(None, 0);
        f.provisioner.provision(&f.mint, PoolConfig::dynamic(1, 10)).await.unwrap();

        let record = f.journal.load(&f.mint, 0).unwrap().expect("record saved");
        assert!(record.is_finished());
        assert!(!record.signatures.contains_key(&ProvisioningStep::FeePaid));
        assert!(f.ledger.account(&f.fee_recipient).is_none());
    }

    #[tokio::test]
    async fn ambiguous_fee_is_settled_on_resume_without_paying_twice() {
        let f = fixture();
        f.ledger.push_behavior(SendBehavior::ConfirmTimeout { landed: true });

        let err = f.provisioner.provision(&f.mint, PoolConfig::dynamic(1, 10)).await;
        assert!(matches!(
            err,
            Err(StakingError::ProvisioningIncomplete {
                last_completed: Some(ProvisioningStep::SlotAllocated),
                ..
            })
        ));
        let record = f.journal.load(&f.mint, 0).unwrap().expect("record saved");
        assert!(record.signatures.contains_key(&ProvisioningStep::FeePaid));

        f.provisioner.resume(&f.mint, 0).await.unwrap();
        assert_eq!(f.ledger.account(&f.fee_recipient).map(|a| a.lamports), Some(FEE));
        assert!(f.project(0).is_initialized);
    }

    #[tokio::test]
    async fn refused_fee_is_paid_on_resume() {
        let f = fixture();
        f.ledger.push_behavior(SendBehavior::Reject("blockhash not found".into()));

        assert!(f.provisioner.provision(&f.mint, PoolConfig::dynamic(1, 10)).await.is_err());
        assert!(f.ledger.account(&f.fee_recipient).is_none());

        f.provisioner.resume(&f.mint, 0).await.unwrap();
        assert_eq!(f.ledger.account(&f.fee_recipient).map(|a| a.lamports), Some(FEE));
    }

    #[test]
    fn step_display_is_snake_case() {
        assert_eq!(ProvisioningStep::ParametersInitialized.to_string(), "parameters_initialized");
        assert_eq!(ProvisioningStep::FeePaid.to_string(), "fee_paid");
        assert!(ProvisioningStep::SlotAllocated < ProvisioningStep::FeePaid);
        assert!(ProvisioningStep::FeePaid < ProvisioningStep::ShellCreated);
        assert!(ProvisioningStep::SlotAllocated < ProvisioningStep::MirrorRecorded);
    }
}
