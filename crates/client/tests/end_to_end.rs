//! End-to-end flows through `StakingClient` over the mock ledger with the
//! program simulator applying instruction effects.

use std::sync::Arc;

use solana_sdk::account::Account;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::system_program;
use spl_token::solana_program::program_pack::Pack;
use spl_token::state::{Account as TokenAccount, AccountState};
use staking_client::{
    ClientConfig, IdempotencyToken, MemoryJournal, MemoryMirror, MockLedger, ProgramSimulator,
    ProvisioningJournal, ReceiptKind, ReconcileOutcome, SendBehavior, StakeMirror, StakingClient,
    StakingError,
};
use staking_common::{
    platform_address, AssetIdentity, PlatformAccount, PoolAddresses, PoolConfig, ProgramAccount,
    ProjectAccount, RuntimeKind,
};

const T0: i64 = 1_700_000_000;
const WALLET_LAMPORTS: u64 = 5_000_000_000;

struct Harness {
    program: Pubkey,
    ledger: Arc<MockLedger>,
    sim: Arc<ProgramSimulator>,
    mirror: Arc<MemoryMirror>,
    journal: Arc<MemoryJournal>,
    client: StakingClient,
    mint: Pubkey,
    platform_admin: Pubkey,
}

fn owned_by(owner: Pubkey, data: Vec<u8>) -> Account {
    Account { lamports: 1_000_000, data, owner, executable: false, rent_epoch: 0 }
}

fn harness() -> Harness {
    let program = Pubkey::new_unique();
    let ledger = Arc::new(MockLedger::new());
    let sim = Arc::new(ProgramSimulator::new(program, T0));
    ledger.set_hook(sim.clone());

    let platform = PlatformAccount {
        admin: Pubkey::new_unique(),
        fee_collector: Pubkey::new_unique(),
        platform_token_fee_bps: 0,
        platform_sol_fee: 0,
        is_initialized: true,
        bump: 255,
    };
    ledger.set_account(platform_address(&program), owned_by(program, platform.encode()));

    let mint = Pubkey::new_unique();
    ledger.set_account(mint, owned_by(spl_token::ID, vec![0; 82]));

    let payer = Arc::new(Keypair::new());
    let wallet = payer.pubkey();
    ledger.set_account(
        wallet,
        Account { lamports: WALLET_LAMPORTS, data: Vec::new(), owner: system_program::ID, executable: false, rent_epoch: 0 },
    );
    let holding = AssetIdentity::new(mint, RuntimeKind::Classic).holding_address(&wallet);
    let state = TokenAccount {
        mint,
        owner: wallet,
        amount: 1_000_000_000,
        state: AccountState::Initialized,
        ..TokenAccount::default()
    };
    let mut data = vec![0; TokenAccount::LEN];
    TokenAccount::pack(state, &mut data).unwrap();
    ledger.set_account(holding, owned_by(spl_token::ID, data));

    let mirror = Arc::new(MemoryMirror::new());
    let journal = Arc::new(MemoryJournal::new());
    let config = ClientConfig {
        program_id: program,
        shell_poll_interval_ms: 1,
        ..ClientConfig::default()
    };
    let mirror_dyn: Arc<dyn StakeMirror> = mirror.clone();
    let journal_dyn: Arc<dyn ProvisioningJournal> = journal.clone();
    let client = StakingClient::new(config, ledger.clone(), mirror_dyn, payer, journal_dyn).unwrap();

    Harness { program, ledger, sim, mirror, journal, client, mint, platform_admin: platform.admin }
}

impl Harness {
    fn occupy_on_chain(&self, slot: u32) {
        let addrs = PoolAddresses::derive(&self.program, &self.mint, slot);
        let shell = ProjectAccount::shell(Pubkey::new_unique(), self.mint, slot, addrs.staking_vault, addrs.reward_vault);
        self.ledger.set_account(addrs.pool, owned_by(self.program, shell.encode()));
    }

    fn project(&self, slot: u32) -> ProjectAccount {
        let pool = PoolAddresses::derive(&self.program, &self.mint, slot).pool;
        let account = self.ledger.account(&pool).expect("pool account exists");
        ProjectAccount::decode(&account.data).unwrap()
    }

    fn set_rate(&self, slot: u32, rate_per_second: u64) {
        let mut project = self.project(slot);
        project.reward_rate_per_second = rate_per_second;
        project.pool_end_time = 0;
        let pool = PoolAddresses::derive(&self.program, &self.mint, slot).pool;
        self.ledger.set_account(pool, owned_by(self.program, project.encode()));
    }

    async fn provision(&self) -> u32 {
        self.client
            .provision_pool(&self.mint, PoolConfig::dynamic(30, 1_000_000))
            .await
            .unwrap()
            .pool_slot
    }

    fn mirror_principal(&self, slot: u32) -> Option<u64> {
        self.mirror
            .stake(&self.client.wallet(), &self.mint, slot)
            .map(|row| row.principal)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// SLOT ALLOCATION + PROVISIONING
// ════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn allocation_skips_on_chain_pools_and_advances_after_provisioning() {
    let h = harness();
    for slot in 0..3 {
        h.occupy_on_chain(slot);
    }

    assert_eq!(h.client.allocate_slot(&h.mint).await, Ok(3));

    let slot = h.provision().await;
    assert_eq!(slot, 3);
    assert!(h.project(3).is_initialized);
    assert_eq!(h.project(3).admin, h.client.wallet());

    assert_eq!(h.client.allocate_slot(&h.mint).await, Ok(4));
    assert!(h.client.pending_provisioning(&h.mint).map(|p| p.is_empty()).unwrap_or(false));
}

#[tokio::test]
async fn provisioning_pays_the_creation_fee_to_the_platform_admin() {
    let h = harness();
    let fee = ClientConfig::default().pool_creation_fee;
    h.provision().await;

    assert_eq!(h.ledger.account(&h.platform_admin).map(|a| a.lamports), Some(fee));
    assert_eq!(
        h.ledger.account(&h.client.wallet()).map(|a| a.lamports),
        Some(WALLET_LAMPORTS - fee)
    );
}

#[tokio::test]
async fn provisioning_without_reward_balance_sends_nothing() {
    let h = harness();
    let result = h
        .client
        .provision_pool(&h.mint, PoolConfig::dynamic(30, 2_000_000_000))
        .await;
    assert!(matches!(result, Err(StakingError::InsufficientFunds { available: 1_000_000_000, .. })));
    assert_eq!(h.ledger.sent_count(), 0);
    assert!(h.client.pending_provisioning(&h.mint).map(|p| p.is_empty()).unwrap_or(false));
}

#[tokio::test]
async fn exhausted_slots_are_reported() {
    let h = harness();
    for slot in 0..10 {
        h.occupy_on_chain(slot);
    }
    assert!(matches!(
        h.client.allocate_slot(&h.mint).await,
        Err(StakingError::SlotsExhausted { max_slots: 10, .. })
    ));
}

#[tokio::test]
async fn interrupted_provisioning_resumes_from_journal() {
    let h = harness();
    h.ledger.push_behavior(SendBehavior::Land);
    h.ledger.push_behavior(SendBehavior::Land);
    h.ledger.push_behavior(SendBehavior::Land);
    h.ledger.push_behavior(SendBehavior::Reject("blockhash not found".into()));

    let err = h
        .client
        .provision_pool(&h.mint, PoolConfig::dynamic(30, 500))
        .await
        .err()
        .expect("expected failure");
    assert!(err.user_message().contains("parameters_initialized"));

    let pending = h.client.pending_provisioning(&h.mint).unwrap();
    assert_eq!(pending.len(), 1);

    let descriptor = h
        .client
        .resume_provisioning(&h.mint, pending[0].pool_slot)
        .await
        .unwrap();
    assert_eq!(h.project(descriptor.pool_slot).total_rewards_deposited, 500);
    let record = h.journal.load(&h.mint, descriptor.pool_slot).unwrap();
    assert!(record.is_some_and(|r| r.is_finished()));
}

// ════════════════════════════════════════════════════════════════════════════
// STAKE / UNSTAKE + MIRROR
// ════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn stake_and_unstake_keep_mirror_in_step() {
    let h = harness();
    let slot = h.provision().await;

    let receipt = h
        .client
        .stake(&h.mint, 1_000_000, slot, None, None)
        .await
        .unwrap();
    assert_eq!(receipt.kind, ReceiptKind::Confirmed);
    // The fee collector holding did not exist yet.
    assert_eq!(receipt.envelope.required_auxiliary_accounts.len(), 1);
    assert_eq!(h.mirror_principal(slot), Some(1_000_000));

    // Partial unstake updates the row.
    let receipt = h
        .client
        .unstake(&h.mint, slot, Some(400_000), None)
        .await
        .unwrap();
    assert!(matches!(receipt.reconcile, ReconcileOutcome::Upserted { principal: 600_000, .. }));
    assert_eq!(h.mirror_principal(slot), Some(600_000));

    // Full unstake deletes it.
    let receipt = h
        .client
        .unstake(&h.mint, slot, None, None)
        .await
        .unwrap();
    assert_eq!(receipt.envelope.amount, Some(600_000));
    assert_eq!(receipt.reconcile, ReconcileOutcome::Deleted);
    assert_eq!(h.mirror_principal(slot), None);
    assert_eq!(h.client.stake_info(&h.mint, slot).await, Ok(None));
}

#[tokio::test]
async fn mirror_outage_does_not_block_staking() {
    let h = harness();
    let slot = h.provision().await;
    h.mirror.set_write_failure(Some("connection refused".into()));

    let receipt = h
        .client
        .stake(&h.mint, 10, slot, None, None)
        .await
        .unwrap();
    assert!(matches!(receipt.reconcile, ReconcileOutcome::MirrorFailed(_)));
    assert_eq!(
        h.client.stake_info(&h.mint, slot).await.map(|s| s.map(|r| r.principal)),
        Ok(Some(10))
    );
}

// ════════════════════════════════════════════════════════════════════════════
// AMBIGUOUS OUTCOMES
// ════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn ambiguous_stake_is_reconciled_and_never_resent() {
    let h = harness();
    let slot = h.provision().await;
    let token = IdempotencyToken::new("stake-1");

    h.ledger.push_behavior(SendBehavior::ConfirmTimeout { landed: true });
    let err = h
        .client
        .stake(&h.mint, 250, slot, None, Some(&token))
        .await
        .err()
        .expect("expected ambiguity");
    assert!(err.is_ambiguous());
    // It did land, and the mirror followed the ledger.
    assert_eq!(h.mirror_principal(slot), Some(250));

    let sent = h.ledger.sent_count();
    let receipt = h
        .client
        .stake(&h.mint, 250, slot, None, Some(&token))
        .await
        .unwrap();
    assert_eq!(receipt.kind, ReceiptKind::Recovered);
    assert_eq!(h.ledger.sent_count(), sent);
    assert_eq!(h.mirror_principal(slot), Some(250));
}

#[tokio::test]
async fn already_processed_without_signature_is_ambiguous() {
    let h = harness();
    let slot = h.provision().await;
    h.ledger.push_behavior(SendBehavior::AlreadyProcessed { landed: true, with_signature: false });

    let result = h.client.stake(&h.mint, 5, slot, None, None).await;
    assert!(matches!(result, Err(StakingError::AmbiguousOutcome { signature: None })));
}

#[tokio::test]
async fn already_processed_with_signature_is_success() {
    let h = harness();
    let slot = h.provision().await;
    h.ledger.push_behavior(SendBehavior::AlreadyProcessed { landed: true, with_signature: true });

    let receipt = h
        .client
        .stake(&h.mint, 5, slot, None, None)
        .await
        .unwrap();
    assert_eq!(receipt.kind, ReceiptKind::AlreadyProcessed);
    assert_eq!(h.mirror_principal(slot), Some(5));
}

#[tokio::test]
async fn insufficient_stake_is_rejected() {
    let h = harness();
    let slot = h.provision().await;
    h.client.stake(&h.mint, 100, slot, None, None).await.unwrap();

    let result = h.client.unstake(&h.mint, slot, Some(1_000), None).await;
    assert!(matches!(result, Err(StakingError::Rejected(_))));
    assert_eq!(h.mirror_principal(slot), Some(100));
}

// ════════════════════════════════════════════════════════════════════════════
// REWARDS
// ════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn reward_estimate_interpolates_between_snapshots() {
    let h = harness();
    let slot = h.provision().await;
    // 1e6 principal × 10_000 / 1e9 scale = 10 per second.
    h.set_rate(slot, 10_000);

    h.client.stake(&h.mint, 1_000_000, slot, None, None).await.unwrap();
    assert_eq!(h.client.estimated_reward_at(&h.mint, slot, T0), Some(0));
    assert_eq!(h.client.estimated_reward_at(&h.mint, slot, T0 + 100), Some(1_000));
    // Jitter backwards never shows a smaller figure.
    assert_eq!(h.client.estimated_reward_at(&h.mint, slot, T0 + 99), Some(1_000));

    // Claim materializes and resets.
    h.sim.advance(100);
    h.client.claim_reward(&h.mint, slot, None).await.unwrap();
    assert_eq!(h.client.estimated_reward_at(&h.mint, slot, T0 + 100), Some(0));
    assert_eq!(h.client.estimated_reward_at(&h.mint, slot, T0 + 150), Some(500));
}

#[tokio::test]
async fn pool_queries_report_rate() {
    let h = harness();
    // One day, 1_000 per second pool-wide.
    let slot = h
        .client
        .provision_pool(&h.mint, PoolConfig::dynamic(1, 86_400_000))
        .await
        .unwrap()
        .pool_slot;

    let rate = h.client.pool_rate(&h.mint, slot).await.unwrap();
    assert_eq!(rate.total_staked, 0);
    assert_eq!(rate.annual_percent, None);

    h.client.stake(&h.mint, 1_000, slot, None, None).await.unwrap();
    let rate = h.client.pool_rate(&h.mint, slot).await.unwrap();
    assert!(rate.annual_percent.is_some_and(|pct| pct > 0.0));

    let info = h.client.pool_info(&h.mint, slot).await.unwrap();
    assert_eq!(info.pool_slot, slot);
    assert_eq!(info.reflection_asset, None);
}

#[tokio::test]
async fn reflections_require_reflection_asset() {
    let h = harness();
    let slot = h.provision().await;
    h.client.stake(&h.mint, 1_000, slot, None, None).await.unwrap();
    assert!(matches!(
        h.client.claim_reflection(&h.mint, slot, None).await,
        Err(StakingError::ReflectionsDisabled { .. })
    ));
}
