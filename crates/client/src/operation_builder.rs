//! # Operation Builder
//!
//! Turns one user action into an ordered instruction list. Missing
//! auxiliary holding accounts are created in the SAME transaction as the
//! core instruction, never in a separate one, so a half-prepared state
//! cannot be left behind.
//!
//! ```text
//! stake(owner, mint, slot, amount)
//!      │
//!      ├─ resolve runtime (once)                 ─► AssetIdentity
//!      ├─ derive pool / vaults / stake record
//!      ├─ read platform (fee collector) + pool (referrer, reflection vault)
//!      ├─ owner holding exists?          no ─► AccountSpec
//!      ├─ fee collector holding exists?  no ─► AccountSpec
//!      │
//!      ▼
//! [compute limit]? + [create holding]* + deposit
//! ```
//!
//! The native mint never gets a holding account: the wallet itself is the
//! holding location.

use std::sync::Arc;

use solana_sdk::compute_budget::ComputeBudgetInstruction;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use spl_associated_token_account::instruction::create_associated_token_account_idempotent;
use staking_common::instruction::{
    self as program_ix, InitializePoolParams, ReflectionClaimAccounts, ReflectionSetup,
    UserPoolAccounts,
};
use staking_common::{
    platform_address, AccountSpec, AssetIdentity, OperationEnvelope, OperationKind, PoolConfig,
    PoolAddresses, ProjectAccount,
};
use tracing::debug;

use crate::error::{StakingError, StakingResult};
use crate::pool_reader::PoolReader;
use crate::runtime_resolver::RuntimeResolver;

/// Compute limit requested when auxiliary accounts are created alongside
/// the core instruction.
pub const AUX_COMPUTE_UNIT_LIMIT: u32 = 400_000;

/// Base compute limit for reflection refreshes. A per-call offset keeps
/// otherwise identical refresh transactions distinct.
pub const REFRESH_COMPUTE_UNIT_BASE: u32 = 200_000;

/// Instructions ready for submission plus the envelope that describes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedOperation {
    pub envelope: OperationEnvelope,
    pub instructions: Vec<Instruction>,
}

pub struct OperationBuilder {
    reader: Arc<PoolReader>,
    resolver: Arc<RuntimeResolver>,
}

impl OperationBuilder {
    #[must_use]
    pub fn new(reader: Arc<PoolReader>, resolver: Arc<RuntimeResolver>) -> Self {
        Self { reader, resolver }
    }

    fn program_id(&self) -> Pubkey {
        self.reader.program_id()
    }

    // ────────────────────────────────────────────────────────────────────
    // Shared steps
    // ────────────────────────────────────────────────────────────────────

    /// Holding location of `asset` for `wallet`, recording it in `missing`
    /// if it does not exist yet.
    async fn ensure_holding(
        &self,
        asset: &AssetIdentity,
        wallet: &Pubkey,
        missing: &mut Vec<AccountSpec>,
    ) -> StakingResult<Pubkey> {
        let address = asset.holding_address(wallet);
        if asset.is_native() {
            return Ok(address);
        }
        if !self.reader.ledger().account_exists(&address).await? {
            debug!(%address, owner = %wallet, mint = %asset.mint, "holding account missing");
            if !missing.iter().any(|spec| spec.address == address) {
                missing.push(AccountSpec {
                    address,
                    owner: *wallet,
                    mint: asset.mint,
                    runtime: asset.runtime,
                });
            }
        }
        Ok(address)
    }

    /// `referrer` overrides the pool's configured referrer; with neither,
    /// the owner fills the slot.
    fn user_accounts(
        &self,
        asset: &AssetIdentity,
        pool: PoolAddresses,
        owner: &Pubkey,
        fee_collector: Pubkey,
        project: &ProjectAccount,
        referrer: Option<Pubkey>,
    ) -> UserPoolAccounts {
        UserPoolAccounts {
            platform: platform_address(&self.program_id()),
            pool,
            stake: pool.stake_record(&self.program_id(), owner),
            mint: asset.mint,
            user: *owner,
            token_program: asset.token_program(),
            fee_collector,
            referrer: referrer.or(project.referrer).unwrap_or(*owner),
        }
    }

    /// Prefixes creation instructions for every missing account.
    fn assemble(payer: &Pubkey, envelope: OperationEnvelope, core: Vec<Instruction>) -> PreparedOperation {
        let mut instructions = Vec::with_capacity(core.len() + envelope.required_auxiliary_accounts.len() + 1);
        if !envelope.required_auxiliary_accounts.is_empty() {
            instructions.push(ComputeBudgetInstruction::set_compute_unit_limit(AUX_COMPUTE_UNIT_LIMIT));
        }
        for spec in &envelope.required_auxiliary_accounts {
            instructions.push(create_associated_token_account_idempotent(
                payer,
                &spec.owner,
                &spec.mint,
                &spec.runtime.program_id(),
            ));
        }
        instructions.extend(core);
        PreparedOperation { envelope, instructions }
    }

    fn require_amount(amount: u64) -> StakingResult<()> {
        if amount == 0 {
            return Err(StakingError::InvalidAmount("amount must be greater than zero".into()));
        }
        Ok(())
    }

    // ────────────────────────────────────────────────────────────────────
    // User operations
    // ────────────────────────────────────────────────────────────────────

    /// Pools with a configured referrer only accept that referrer; an
    /// override that differs is refused by the program.
    pub async fn stake(
        &self,
        owner: &Pubkey,
        mint: &Pubkey,
        pool_slot: u32,
        amount: u64,
        referrer: Option<Pubkey>,
    ) -> StakingResult<PreparedOperation> {
        Self::require_amount(amount)?;
        let asset = self.resolver.resolve(mint).await?;
        let pool = self.reader.addresses(mint, pool_slot);
        let project = self.reader.require_project(mint, pool_slot).await?;
        let platform = self.reader.platform().await?;

        let mut missing = Vec::new();
        let user_holding = self.ensure_holding(&asset, owner, &mut missing).await?;
        let fee_holding = self
            .ensure_holding(&asset, &platform.fee_collector, &mut missing)
            .await?;

        let accounts = self.user_accounts(&asset, pool, owner, platform.fee_collector, &project, referrer);
        let reflection_vault = project.reflection_vault.unwrap_or(pool.staking_vault);
        let core = program_ix::deposit(
            &self.program_id(),
            &accounts,
            pool_slot,
            &user_holding,
            &fee_holding,
            &reflection_vault,
            amount,
        );

        let mut envelope = OperationEnvelope::new(OperationKind::Stake, *mint, pool_slot);
        envelope.amount = Some(amount);
        envelope.required_auxiliary_accounts = missing;
        Ok(Self::assemble(owner, envelope, vec![core]))
    }

    /// `amount = None` withdraws the full principal.
    pub async fn unstake(
        &self,
        owner: &Pubkey,
        mint: &Pubkey,
        pool_slot: u32,
        amount: Option<u64>,
    ) -> StakingResult<PreparedOperation> {
        if let Some(amount) = amount {
            Self::require_amount(amount)?;
        }
        let asset = self.resolver.resolve(mint).await?;
        let pool = self.reader.addresses(mint, pool_slot);
        let project = self.reader.require_project(mint, pool_slot).await?;
        let (_, stake) = self.reader.require_stake(mint, pool_slot, owner).await?;
        let amount = amount.unwrap_or(stake.amount);
        Self::require_amount(amount)?;
        let platform = self.reader.platform().await?;

        let mut missing = Vec::new();
        let withdrawal_holding = self
            .ensure_holding(&asset, &stake.withdrawal_wallet, &mut missing)
            .await?;
        let fee_holding = self
            .ensure_holding(&asset, &platform.fee_collector, &mut missing)
            .await?;

        let accounts = self.user_accounts(&asset, pool, owner, platform.fee_collector, &project, None);
        let reflection_vault = project.reflection_vault.unwrap_or(pool.staking_vault);
        let core = program_ix::withdraw(
            &self.program_id(),
            &accounts,
            pool_slot,
            &withdrawal_holding,
            &fee_holding,
            &reflection_vault,
            amount,
        );

        let mut envelope = OperationEnvelope::new(OperationKind::Unstake, *mint, pool_slot);
        envelope.amount = Some(amount);
        envelope.required_auxiliary_accounts = missing;
        Ok(Self::assemble(owner, envelope, vec![core]))
    }

    pub async fn claim_reward(
        &self,
        owner: &Pubkey,
        mint: &Pubkey,
        pool_slot: u32,
    ) -> StakingResult<PreparedOperation> {
        let asset = self.resolver.resolve(mint).await?;
        let pool = self.reader.addresses(mint, pool_slot);
        let project = self.reader.require_project(mint, pool_slot).await?;
        let (_, stake) = self.reader.require_stake(mint, pool_slot, owner).await?;
        let platform = self.reader.platform().await?;

        let mut missing = Vec::new();
        let withdrawal_holding = self
            .ensure_holding(&asset, &stake.withdrawal_wallet, &mut missing)
            .await?;

        let accounts = self.user_accounts(&asset, pool, owner, platform.fee_collector, &project, None);
        let core = program_ix::claim(&self.program_id(), &accounts, pool_slot, &withdrawal_holding);

        let mut envelope = OperationEnvelope::new(OperationKind::ClaimReward, *mint, pool_slot);
        envelope.required_auxiliary_accounts = missing;
        Ok(Self::assemble(owner, envelope, vec![core]))
    }

    /// Claims accumulated reflections. The reflection asset is resolved on
    /// its own, so its runtime may differ from the staked asset's.
    pub async fn claim_reflection(
        &self,
        owner: &Pubkey,
        mint: &Pubkey,
        pool_slot: u32,
    ) -> StakingResult<PreparedOperation> {
        let pool = self.reader.addresses(mint, pool_slot);
        let project = self.reader.require_project(mint, pool_slot).await?;
        let (reflection_vault, reflection_mint) =
            match (project.reflection_vault, project.reflection_token) {
                (Some(vault), Some(token)) => (vault, token),
                _ => return Err(StakingError::ReflectionsDisabled { pool: pool.pool }),
            };
        let (stake_address, stake) = self.reader.require_stake(mint, pool_slot, owner).await?;
        let reflection_asset = self.resolver.resolve(&reflection_mint).await?;

        let mut missing = Vec::new();
        let user_reflection = self
            .ensure_holding(&reflection_asset, &stake.withdrawal_wallet, &mut missing)
            .await?;

        let core = program_ix::claim_reflections(
            &self.program_id(),
            mint,
            pool_slot,
            &ReflectionClaimAccounts {
                pool,
                stake: stake_address,
                reflection_vault,
                user_reflection_account: user_reflection,
                reflection_mint,
                user: *owner,
                reflection_token_program: reflection_asset.token_program(),
            },
        );

        let mut envelope = OperationEnvelope::new(OperationKind::ClaimReflection, *mint, pool_slot);
        envelope.required_auxiliary_accounts = missing;
        Ok(Self::assemble(owner, envelope, vec![core]))
    }

    /// Recomputes reflections for `owner`. `nonce` varies the compute
    /// limit so repeated refreshes are distinct transactions.
    pub async fn refresh_reflections(
        &self,
        owner: &Pubkey,
        mint: &Pubkey,
        pool_slot: u32,
        nonce: u32,
    ) -> StakingResult<PreparedOperation> {
        let pool = self.reader.addresses(mint, pool_slot);
        let project = self.reader.require_project(mint, pool_slot).await?;
        let reflection_vault = project
            .reflection_vault
            .ok_or(StakingError::ReflectionsDisabled { pool: pool.pool })?;
        let (stake_address, _) = self.reader.require_stake(mint, pool_slot, owner).await?;

        let instructions = vec![
            ComputeBudgetInstruction::set_compute_unit_limit(
                REFRESH_COMPUTE_UNIT_BASE + nonce % 1_000,
            ),
            program_ix::refresh_reflections(
                &self.program_id(),
                &pool,
                mint,
                pool_slot,
                &stake_address,
                &reflection_vault,
                owner,
            ),
        ];
        Ok(PreparedOperation {
            envelope: OperationEnvelope::new(OperationKind::RefreshReflections, *mint, pool_slot),
            instructions,
        })
    }

    // ────────────────────────────────────────────────────────────────────
    // Provisioning steps
    // ────────────────────────────────────────────────────────────────────

    /// Step 2: pool shell. No reads.
    #[must_use]
    pub fn create_pool_shell(
        &self,
        admin: &Pubkey,
        asset: &AssetIdentity,
        pool_slot: u32,
    ) -> PreparedOperation {
        let pool = self.reader.addresses(&asset.mint, pool_slot);
        let core = program_ix::create_project(
            &self.program_id(),
            &pool,
            &asset.mint,
            pool_slot,
            admin,
            &asset.token_program(),
        );
        PreparedOperation {
            envelope: OperationEnvelope::new(OperationKind::CreatePoolShell, asset.mint, pool_slot),
            instructions: vec![core],
        }
    }

    /// Step 4: parameters. Resolves the reflection asset when configured.
    pub async fn initialize_pool(
        &self,
        admin: &Pubkey,
        asset: &AssetIdentity,
        pool_slot: u32,
        config: &PoolConfig,
    ) -> StakingResult<PreparedOperation> {
        let pool = self.reader.addresses(&asset.mint, pool_slot);
        let reflection = match config.reflection_mint {
            Some(reflection_mint) => {
                let reflection_asset = self.resolver.resolve(&reflection_mint).await?;
                Some(ReflectionSetup {
                    reflection_mint,
                    reflection_account: reflection_asset.holding_address(&pool.staking_vault),
                    reflection_token_program: reflection_asset.token_program(),
                })
            }
            None => None,
        };

        let params = InitializePoolParams {
            rate_bps_per_year: config.rate_bps_per_year,
            rate_mode: config.rate_mode.as_u8(),
            lockup_seconds: config.lockup_seconds,
            pool_duration_seconds: config.pool_duration_seconds,
            referrer: config.referrer,
            referrer_split_bps: config.referrer_split_bps,
            enable_reflections: config.reflection_mint.is_some(),
            reflection_token: config.reflection_mint,
        };
        let core = program_ix::initialize_pool(
            &self.program_id(),
            &pool,
            &asset.mint,
            pool_slot,
            admin,
            &asset.token_program(),
            params,
            reflection,
        );
        Ok(PreparedOperation {
            envelope: OperationEnvelope::new(OperationKind::InitializePool, asset.mint, pool_slot),
            instructions: vec![core],
        })
    }

    /// Step 5: reward reserve.
    pub fn deposit_rewards(
        &self,
        admin: &Pubkey,
        asset: &AssetIdentity,
        pool_slot: u32,
        amount: u64,
    ) -> StakingResult<PreparedOperation> {
        Self::require_amount(amount)?;
        let pool = self.reader.addresses(&asset.mint, pool_slot);
        let core = program_ix::deposit_rewards(
            &self.program_id(),
            &pool,
            &asset.mint,
            pool_slot,
            admin,
            &asset.holding_address(admin),
            &asset.token_program(),
            amount,
        );
        let mut envelope = OperationEnvelope::new(OperationKind::DepositRewards, asset.mint, pool_slot);
        envelope.amount = Some(amount);
        Ok(PreparedOperation { envelope, instructions: vec![core] })
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MockLedger;
    use solana_sdk::account::Account;
    use staking_common::instruction::names;
    use staking_common::{
        PlatformAccount, ProgramAccount, RuntimeKind, StakeAccount, NATIVE_MINT,
        TOKEN_2022_PROGRAM_ID,
    };

    struct Fixture {
        program: Pubkey,
        ledger: Arc<MockLedger>,
        builder: OperationBuilder,
        fee_collector: Pubkey,
    }

    fn account(owner: Pubkey, data: Vec<u8>) -> Account {
        Account { lamports: 1_000_000, data, owner, executable: false, rent_epoch: 0 }
    }

    fn fixture() -> Fixture {
        let program = Pubkey::new_unique();
        let ledger = Arc::new(MockLedger::new());
        let fee_collector = Pubkey::new_unique();
        let platform = PlatformAccount {
            admin: Pubkey::new_unique(),
            fee_collector,
            platform_token_fee_bps: 100,
            platform_sol_fee: 0,
            is_initialized: true,
            bump: 255,
        };
        ledger.set_account(platform_address(&program), account(program, platform.encode()));

        let reader = Arc::new(PoolReader::new(program, ledger.clone()));
        let resolver = Arc::new(RuntimeResolver::new(ledger.clone()));
        Fixture {
            program,
            ledger,
            builder: OperationBuilder::new(reader, resolver),
            fee_collector,
        }
    }

    impl Fixture {
        fn add_mint(&self, owner: Pubkey) -> Pubkey {
            let mint = Pubkey::new_unique();
            self.ledger.set_account(mint, account(owner, vec![0; 82]));
            mint
        }

        fn add_pool(&self, mint: &Pubkey, slot: u32) -> ProjectAccount {
            let addrs = PoolAddresses::derive(&self.program, mint, slot);
            let mut project = ProjectAccount::shell(
                Pubkey::new_unique(),
                *mint,
                slot,
                addrs.staking_vault,
                addrs.reward_vault,
            );
            project.is_initialized = true;
            self.ledger.set_account(addrs.pool, account(self.program, project.encode()));
            project
        }

        fn put_project(&self, mint: &Pubkey, slot: u32, project: &ProjectAccount) {
            let addrs = PoolAddresses::derive(&self.program, mint, slot);
            self.ledger.set_account(addrs.pool, account(self.program, project.encode()));
        }

        fn add_stake(&self, mint: &Pubkey, slot: u32, owner: &Pubkey, amount: u64) -> StakeAccount {
            let addrs = PoolAddresses::derive(&self.program, mint, slot);
            let stake = StakeAccount::opened(*owner, addrs.pool, amount, 1_000);
            self.ledger.set_account(
                addrs.stake_record(&self.program, owner),
                account(self.program, stake.encode()),
            );
            stake
        }

        fn add_holding(&self, asset: &AssetIdentity, wallet: &Pubkey) {
            self.ledger.set_account(
                asset.holding_address(wallet),
                account(asset.token_program(), vec![0; 165]),
            );
        }
    }

    fn core_name(op: &PreparedOperation) -> &'static str {
        let last = op.instructions.last().expect("no instructions");
        program_ix::identify(&last.data)
            .map(|(name, _)| name)
            .expect("unknown core instruction")
    }

    // ── Test 1: stake with all accounts present ─────────────────────────

    #[tokio::test]
    async fn stake_with_existing_accounts_is_single_instruction() {
        let f = fixture();
        let mint = f.add_mint(spl_token::ID);
        f.add_pool(&mint, 0);
        let owner = Pubkey::new_unique();
        let asset = AssetIdentity::new(mint, RuntimeKind::Classic);
        f.add_holding(&asset, &owner);
        f.add_holding(&asset, &f.fee_collector);

        let op = f.builder.stake(&owner, &mint, 0, 1_000, None).await.unwrap();
        assert_eq!(op.instructions.len(), 1);
        assert!(op.envelope.required_auxiliary_accounts.is_empty());
        assert_eq!(op.envelope.amount, Some(1_000));
        assert_eq!(core_name(&op), names::DEPOSIT);
    }

    // ── Test 2: missing holdings prefixed, same transaction ─────────────

    #[tokio::test]
    async fn stake_creates_missing_holdings_first() {
        let f = fixture();
        let mint = f.add_mint(TOKEN_2022_PROGRAM_ID);
        f.add_pool(&mint, 1);
        let owner = Pubkey::new_unique();

        let op = f.builder.stake(&owner, &mint, 1, 5, None).await.unwrap();
        let specs = &op.envelope.required_auxiliary_accounts;
        assert_eq!(specs.len(), 2);
        assert!(specs.iter().all(|s| s.runtime == RuntimeKind::Extended));
        assert_eq!(specs[0].owner, owner);
        assert_eq!(specs[1].owner, f.fee_collector);

        // compute limit + 2 creates + deposit
        assert_eq!(op.instructions.len(), 4);
        assert_eq!(op.instructions[1].program_id, spl_associated_token_account::ID);
        assert_eq!(op.instructions[2].program_id, spl_associated_token_account::ID);
        assert_eq!(core_name(&op), names::DEPOSIT);
    }

    // ── Test 3: native mint never creates holdings ──────────────────────

    #[tokio::test]
    async fn native_mint_uses_wallet() {
        let f = fixture();
        f.ledger.set_account(NATIVE_MINT, account(spl_token::ID, vec![0; 82]));
        f.add_pool(&NATIVE_MINT, 0);
        let owner = Pubkey::new_unique();

        let op = f.builder.stake(&owner, &NATIVE_MINT, 0, 10, None).await.unwrap();
        assert!(op.envelope.required_auxiliary_accounts.is_empty());
        assert_eq!(op.instructions.len(), 1);
        // user token account slot carries the wallet itself
        assert_eq!(op.instructions[0].accounts[4].pubkey, owner);
    }

    // ── Test 4: referrer selection ──────────────────────────────────────

    const REFERRER_META: usize = 7;

    #[tokio::test]
    async fn stake_referrer_prefers_override_then_pool_then_owner() {
        let f = fixture();
        let mint = f.add_mint(spl_token::ID);
        let mut project = f.add_pool(&mint, 0);
        let owner = Pubkey::new_unique();
        let asset = AssetIdentity::new(mint, RuntimeKind::Classic);
        f.add_holding(&asset, &owner);
        f.add_holding(&asset, &f.fee_collector);

        let op = f.builder.stake(&owner, &mint, 0, 10, None).await.unwrap();
        assert_eq!(op.instructions[0].accounts[REFERRER_META].pubkey, owner);
        // No reflections: the staking vault fills the reflection vault slot.
        let staking_vault = PoolAddresses::derive(&f.program, &mint, 0).staking_vault;
        assert_eq!(op.instructions[0].accounts[REFERRER_META + 1].pubkey, staking_vault);

        let pool_referrer = Pubkey::new_unique();
        project.referrer = Some(pool_referrer);
        project.referrer_split_bps = 2_500;
        f.put_project(&mint, 0, &project);
        let op = f.builder.stake(&owner, &mint, 0, 10, None).await.unwrap();
        assert_eq!(op.instructions[0].accounts[REFERRER_META].pubkey, pool_referrer);

        let chosen = Pubkey::new_unique();
        let op = f.builder.stake(&owner, &mint, 0, 10, Some(chosen)).await.unwrap();
        assert_eq!(op.instructions[0].accounts[REFERRER_META].pubkey, chosen);
    }

    // ── Test 4b: zero amount rejected before I/O ─────────────────────────

    #[tokio::test]
    async fn zero_amount_rejected_without_reads() {
        let f = fixture();
        let result = f.builder.stake(&Pubkey::new_unique(), &Pubkey::new_unique(), 0, 0, None).await;
        assert!(matches!(result, Err(StakingError::InvalidAmount(_))));
        assert_eq!(f.ledger.read_count(), 0);
    }

    // ── Test 5: unknown mint / pool ─────────────────────────────────────

    #[tokio::test]
    async fn unknown_mint_is_asset_not_found() {
        let f = fixture();
        let mint = Pubkey::new_unique();
        let result = f.builder.stake(&Pubkey::new_unique(), &mint, 0, 1, None).await;
        assert_eq!(result, Err(StakingError::AssetNotFound { mint }));
    }

    #[tokio::test]
    async fn unknown_pool_is_pool_not_found() {
        let f = fixture();
        let mint = f.add_mint(spl_token::ID);
        let result = f.builder.stake(&Pubkey::new_unique(), &mint, 4, 1, None).await;
        assert_eq!(result, Err(StakingError::PoolNotFound { mint, pool_slot: 4 }));
    }

    // ── Test 6: unstake defaults to full principal ──────────────────────

    #[tokio::test]
    async fn unstake_defaults_to_full_principal() {
        let f = fixture();
        let mint = f.add_mint(spl_token::ID);
        f.add_pool(&mint, 0);
        let owner = Pubkey::new_unique();
        f.add_stake(&mint, 0, &owner, 750);

        let op = f.builder.unstake(&owner, &mint, 0, None).await.unwrap();
        assert_eq!(op.envelope.amount, Some(750));
        assert_eq!(core_name(&op), names::WITHDRAW);
    }

    #[tokio::test]
    async fn unstake_without_stake_is_stake_not_found() {
        let f = fixture();
        let mint = f.add_mint(spl_token::ID);
        f.add_pool(&mint, 0);
        let result = f.builder.unstake(&Pubkey::new_unique(), &mint, 0, Some(1)).await;
        assert!(matches!(result, Err(StakingError::StakeNotFound { .. })));
    }

    // ── Test 7: claim targets withdrawal wallet ─────────────────────────

    #[tokio::test]
    async fn claim_creates_withdrawal_holding() {
        let f = fixture();
        let mint = f.add_mint(spl_token::ID);
        f.add_pool(&mint, 0);
        let owner = Pubkey::new_unique();
        let mut stake = f.add_stake(&mint, 0, &owner, 10);
        let withdrawal = Pubkey::new_unique();
        stake.withdrawal_wallet = withdrawal;
        let addrs = PoolAddresses::derive(&f.program, &mint, 0);
        f.ledger.set_account(addrs.stake_record(&f.program, &owner), account(f.program, stake.encode()));

        let op = f.builder.claim_reward(&owner, &mint, 0).await.unwrap();
        assert_eq!(op.envelope.required_auxiliary_accounts.len(), 1);
        assert_eq!(op.envelope.required_auxiliary_accounts[0].owner, withdrawal);
        assert_eq!(core_name(&op), names::CLAIM);
    }

    // ── Test 8: reflections ─────────────────────────────────────────────

    #[tokio::test]
    async fn claim_reflection_requires_reflection_asset() {
        let f = fixture();
        let mint = f.add_mint(spl_token::ID);
        f.add_pool(&mint, 0);
        let owner = Pubkey::new_unique();
        f.add_stake(&mint, 0, &owner, 10);
        let result = f.builder.claim_reflection(&owner, &mint, 0).await;
        assert!(matches!(result, Err(StakingError::ReflectionsDisabled { .. })));
    }

    #[tokio::test]
    async fn claim_reflection_uses_reflection_runtime() {
        let f = fixture();
        let mint = f.add_mint(spl_token::ID);
        let reflection_mint = f.add_mint(TOKEN_2022_PROGRAM_ID);
        let mut project = f.add_pool(&mint, 0);
        project.reflection_vault = Some(Pubkey::new_unique());
        project.reflection_token = Some(reflection_mint);
        f.put_project(&mint, 0, &project);
        let owner = Pubkey::new_unique();
        f.add_stake(&mint, 0, &owner, 10);

        let op = f.builder.claim_reflection(&owner, &mint, 0).await.unwrap();
        let specs = &op.envelope.required_auxiliary_accounts;
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].mint, reflection_mint);
        assert_eq!(specs[0].runtime, RuntimeKind::Extended);

        let core = op.instructions.last().expect("empty");
        assert_eq!(core.accounts[7].pubkey, TOKEN_2022_PROGRAM_ID);
        assert_eq!(core_name(&op), names::CLAIM_REFLECTIONS);
    }

    #[tokio::test]
    async fn refresh_nonce_changes_instructions() {
        let f = fixture();
        let mint = f.add_mint(spl_token::ID);
        let mut project = f.add_pool(&mint, 0);
        project.reflection_vault = Some(Pubkey::new_unique());
        f.put_project(&mint, 0, &project);
        let owner = Pubkey::new_unique();
        f.add_stake(&mint, 0, &owner, 10);

        let a = f.builder.refresh_reflections(&owner, &mint, 0, 1).await.unwrap();
        let b = f.builder.refresh_reflections(&owner, &mint, 0, 2).await.unwrap();
        assert_ne!(a.instructions[0], b.instructions[0]);
        assert_eq!(a.instructions[1], b.instructions[1]);
    }

    // ── Test 9: provisioning steps ──────────────────────────────────────

    #[tokio::test]
    async fn provisioning_steps_use_asset_runtime() {
        let f = fixture();
        let mint = f.add_mint(TOKEN_2022_PROGRAM_ID);
        let asset = AssetIdentity::new(mint, RuntimeKind::Extended);
        let admin = Pubkey::new_unique();

        let shell = f.builder.create_pool_shell(&admin, &asset, 3);
        assert_eq!(core_name(&shell), names::CREATE_PROJECT);
        assert_eq!(shell.instructions[0].accounts[5].pubkey, TOKEN_2022_PROGRAM_ID);

        let init = f
            .builder
            .initialize_pool(&admin, &asset, 3, &PoolConfig::dynamic(7, 1_000))
            .await
            .unwrap();
        assert_eq!(core_name(&init), names::INITIALIZE_POOL);

        let deposit = f.builder.deposit_rewards(&admin, &asset, 3, 1_000).unwrap();
        assert_eq!(core_name(&deposit), names::DEPOSIT_REWARDS);
        assert_eq!(deposit.instructions[0].accounts[2].pubkey, asset.holding_address(&admin));
    }
}
