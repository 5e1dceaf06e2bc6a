//! Command line interface of `staking-cli`.
//!
//! Connection flags override the matching `STAKING_*` variables; every
//! other setting comes from the environment (see [`ClientConfig`]).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{read_keypair_file, Keypair};
use staking_common::{PoolConfig, PoolDescriptor, RateMode};
use tracing::{info, warn};

use crate::client::{OperationReceipt, StakingClient};
use crate::config::ClientConfig;
use crate::error::StakingError;
use crate::http_mirror::HttpMirror;
use crate::journal::FileJournal;
use crate::mirror::{MemoryMirror, StakeMirror};
use crate::rpc_ledger::RpcLedger;
use crate::submission::IdempotencyToken;

const SECONDS_PER_DAY: u64 = 86_400;

#[derive(Parser, Debug)]
#[command(name = "staking-cli", version, about = "Stake, claim and provision pools on the staking program")]
pub struct Cli {
    /// Overrides STAKING_RPC_URL.
    #[arg(long, global = true)]
    pub rpc_url: Option<String>,

    /// Overrides STAKING_PROGRAM_ID.
    #[arg(long, global = true)]
    pub program_id: Option<Pubkey>,

    /// Overrides STAKING_MIRROR_URL. Without any, an in-memory mirror is used.
    #[arg(long, global = true)]
    pub mirror_url: Option<String>,

    /// Overrides STAKING_KEYPAIR_PATH.
    #[arg(long, global = true)]
    pub keypair: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Fixed,
    Dynamic,
}

impl From<ModeArg> for RateMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Fixed => RateMode::Fixed,
            ModeArg::Dynamic => RateMode::Dynamic,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    // ═══════════════════════════════════════════════════════════
    // USER OPERATIONS
    // ═══════════════════════════════════════════════════════════

    /// Stake `amount` base units of `mint`
    Stake {
        mint: Pubkey,
        amount: u64,
        #[arg(long, default_value_t = 0)]
        slot: u32,
        /// Referrer wallet; defaults to the pool's referrer.
        #[arg(long)]
        referrer: Option<Pubkey>,
        /// Idempotency token; reuse it when retrying the same action.
        #[arg(long)]
        token: Option<String>,
    },

    /// Withdraw principal (everything when --amount is omitted)
    Unstake {
        mint: Pubkey,
        #[arg(long, default_value_t = 0)]
        slot: u32,
        #[arg(long)]
        amount: Option<u64>,
        #[arg(long)]
        token: Option<String>,
    },

    /// Claim accrued rewards
    Claim {
        mint: Pubkey,
        #[arg(long, default_value_t = 0)]
        slot: u32,
        #[arg(long)]
        token: Option<String>,
    },

    /// Claim accumulated reflections
    ClaimReflection {
        mint: Pubkey,
        #[arg(long, default_value_t = 0)]
        slot: u32,
        #[arg(long)]
        token: Option<String>,
    },

    /// Recompute reflections for the wallet's stake
    RefreshReflections {
        mint: Pubkey,
        #[arg(long, default_value_t = 0)]
        slot: u32,
    },

    // ═══════════════════════════════════════════════════════════
    // POOLS
    // ═══════════════════════════════════════════════════════════

    /// Create a new pool for `mint` in the lowest free slot
    Provision {
        mint: Pubkey,
        #[arg(long, value_enum, default_value_t = ModeArg::Dynamic)]
        mode: ModeArg,
        /// Annual rate in basis points (fixed mode).
        #[arg(long, default_value_t = 0)]
        rate_bps: u64,
        #[arg(long, default_value_t = 30)]
        duration_days: u64,
        /// Defaults to the pool duration.
        #[arg(long)]
        lockup_days: Option<u64>,
        /// Reward reserve deposited after initialization.
        #[arg(long, default_value_t = 0)]
        reward_amount: u64,
        #[arg(long)]
        reflection_mint: Option<Pubkey>,
        #[arg(long)]
        referrer: Option<Pubkey>,
        #[arg(long)]
        referrer_split_bps: Option<u64>,
    },

    /// Finish an interrupted provisioning run (all unfinished runs for the
    /// mint when --slot is omitted)
    Resume {
        mint: Pubkey,
        #[arg(long)]
        slot: Option<u32>,
    },

    /// Show the slot the next pool for `mint` would get
    Allocate { mint: Pubkey },

    /// Show pool parameters and current rate
    Pool {
        mint: Pubkey,
        #[arg(long, default_value_t = 0)]
        slot: u32,
    },

    /// Estimate pending rewards of the wallet's stake
    Estimate {
        mint: Pubkey,
        #[arg(long, default_value_t = 0)]
        slot: u32,
        /// Keep printing every N seconds until Ctrl-C.
        #[arg(long)]
        watch: Option<u64>,
    },
}

// ════════════════════════════════════════════════════════════════════════════
// SETUP
// ════════════════════════════════════════════════════════════════════════════

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = ClientConfig::from_env()?;
    if let Some(url) = &cli.rpc_url {
        config.rpc_url = url.clone();
    }
    if let Some(program_id) = cli.program_id {
        config.program_id = program_id;
    }
    if let Some(url) = &cli.mirror_url {
        config.mirror_url = Some(url.clone());
    }
    if let Some(path) = &cli.keypair {
        config.keypair_path = Some(path.clone());
    }
    Ok(config)
}

fn load_keypair(config: &ClientConfig) -> Result<Keypair> {
    let path = config
        .keypair_path
        .as_ref()
        .ok_or_else(|| anyhow!("no keypair: pass --keypair or set STAKING_KEYPAIR_PATH"))?;
    read_keypair_file(path).map_err(|e| anyhow!("cannot read keypair {}: {e}", path.display()))
}

fn build_client(config: ClientConfig) -> Result<StakingClient> {
    let payer = Arc::new(load_keypair(&config)?);
    let ledger = Arc::new(RpcLedger::new(config.rpc_url.clone(), config.confirm_timeout()));
    let mirror: Arc<dyn StakeMirror> = match &config.mirror_url {
        Some(url) => Arc::new(HttpMirror::new(url.clone(), config.mirror_timeout())?),
        None => {
            warn!("no mirror configured, using in-memory mirror");
            Arc::new(MemoryMirror::new())
        }
    };
    let journal = Arc::new(
        FileJournal::open(&config.journal_dir)
            .with_context(|| format!("journal dir {}", config.journal_dir.display()))?,
    );
    info!(rpc = %config.rpc_url, program = %config.program_id, "client ready");
    Ok(StakingClient::new(config, ledger, mirror, payer, journal)?)
}

// ════════════════════════════════════════════════════════════════════════════
// OUTPUT
// ════════════════════════════════════════════════════════════════════════════

fn print_receipt(receipt: &OperationReceipt) {
    println!("✅ {} confirmed", receipt.envelope.kind);
    println!("   signature: {}", receipt.signature);
    if let Some(amount) = receipt.envelope.amount {
        println!("   amount:    {amount}");
    }
    if !receipt.envelope.required_auxiliary_accounts.is_empty() {
        println!("   created {} holding account(s)", receipt.envelope.required_auxiliary_accounts.len());
    }
}

fn print_pool(descriptor: &PoolDescriptor) {
    println!("Pool {} (slot {})", descriptor.addresses.pool, descriptor.pool_slot);
    println!("   mint:          {} ({})", descriptor.asset.mint, descriptor.asset.runtime);
    println!("   admin:         {}", descriptor.admin);
    println!("   rate mode:     {:?}", descriptor.rate_mode);
    println!("   rate (bps/yr): {}", descriptor.rate_bps_per_year);
    println!("   lockup:        {}s", descriptor.lockup_seconds);
    println!("   duration:      {}s", descriptor.pool_duration_seconds);
    if let Some(reflection) = &descriptor.reflection_asset {
        println!("   reflections:   {}", reflection.mint);
    }
}

/// Turns a client error into the user-facing message.
fn user_error(e: StakingError) -> anyhow::Error {
    anyhow!(e.user_message())
}

// ════════════════════════════════════════════════════════════════════════════
// RUN
// ════════════════════════════════════════════════════════════════════════════

pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let client = build_client(config)?;
    let token = |t: &Option<String>| t.as_deref().map(IdempotencyToken::new);

    match cli.cmd {
        Command::Stake { mint, amount, slot, referrer, token: t } => {
            let receipt = client
                .stake(&mint, amount, slot, referrer, token(&t).as_ref())
                .await
                .map_err(user_error)?;
            print_receipt(&receipt);
        }
        Command::Unstake { mint, slot, amount, token: t } => {
            let receipt = client
                .unstake(&mint, slot, amount, token(&t).as_ref())
                .await
                .map_err(user_error)?;
            print_receipt(&receipt);
        }
        Command::Claim { mint, slot, token: t } => {
            let receipt = client.claim_reward(&mint, slot, token(&t).as_ref()).await.map_err(user_error)?;
            print_receipt(&receipt);
        }
        Command::ClaimReflection { mint, slot, token: t } => {
            let receipt = client
                .claim_reflection(&mint, slot, token(&t).as_ref())
                .await
                .map_err(user_error)?;
            print_receipt(&receipt);
        }
        Command::RefreshReflections { mint, slot } => {
            let receipt = client.refresh_reflections(&mint, slot).await.map_err(user_error)?;
            print_receipt(&receipt);
        }
        Command::Provision {
            mint,
            mode,
            rate_bps,
            duration_days,
            lockup_days,
            reward_amount,
            reflection_mint,
            referrer,
            referrer_split_bps,
        } => {
            let duration = duration_days.saturating_mul(SECONDS_PER_DAY);
            let config = PoolConfig {
                rate_mode: mode.into(),
                rate_bps_per_year: rate_bps,
                lockup_seconds: lockup_days.map_or(duration, |d| d.saturating_mul(SECONDS_PER_DAY)),
                pool_duration_seconds: duration,
                reward_amount,
                reflection_mint,
                referrer,
                referrer_split_bps,
            };
            let descriptor = client.provision_pool(&mint, config).await.map_err(user_error)?;
            print_pool(&descriptor);
        }
        Command::Resume { mint, slot } => {
            let slots = match slot {
                Some(slot) => vec![slot],
                None => client.pending_provisioning(&mint)?.iter().map(|r| r.pool_slot).collect(),
            };
            if slots.is_empty() {
                println!("No unfinished provisioning for {mint}");
            }
            for slot in slots {
                let descriptor = client.resume_provisioning(&mint, slot).await.map_err(user_error)?;
                print_pool(&descriptor);
            }
        }
        Command::Allocate { mint } => {
            let slot = client.allocate_slot(&mint).await.map_err(user_error)?;
            println!("Next free slot for {mint}: {slot}");
        }
        Command::Pool { mint, slot } => {
            let descriptor = client.pool_info(&mint, slot).await.map_err(user_error)?;
            print_pool(&descriptor);
            let rate = client.pool_rate(&mint, slot).await.map_err(user_error)?;
            match rate.annual_percent {
                Some(pct) => println!("   annual rate:   {pct:.2}%"),
                None => println!("   annual rate:   n/a (nothing staked)"),
            }
            println!("   total staked:  {}", rate.total_staked);
        }
        Command::Estimate { mint, slot, watch } => {
            let Some(stake) = client.stake_info(&mint, slot).await.map_err(user_error)? else {
                println!("No stake in slot {slot} of {mint}");
                return Ok(());
            };
            println!("Principal: {}", stake.principal);
            let estimate = client.track_position(&mint, slot).await.map_err(user_error)?;
            println!("Estimated reward: {}", estimate.unwrap_or_default());

            if let Some(secs) = watch {
                client.start_reward_refresh()?;
                let mut ticker = tokio::time::interval(Duration::from_secs(secs.max(1)));
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            println!("Estimated reward: {}", client.estimated_reward(&mint, slot).unwrap_or_default());
                        }
                        _ = tokio::signal::ctrl_c() => break,
                    }
                }
                client.stop_reward_refresh();
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stake_with_defaults() {
        let mint = Pubkey::new_unique();
        let cli = Cli::try_parse_from(["staking-cli", "stake", &mint.to_string(), "500"])
            .unwrap();
        match cli.cmd {
            Command::Stake { mint: m, amount, slot, referrer, token } => {
                assert_eq!(m, mint);
                assert_eq!(amount, 500);
                assert_eq!(slot, 0);
                assert_eq!(referrer, None);
                assert_eq!(token, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_stake_referrer() {
        let mint = Pubkey::new_unique();
        let referrer = Pubkey::new_unique();
        let cli = Cli::try_parse_from([
            "staking-cli",
            "stake",
            &mint.to_string(),
            "10",
            "--referrer",
            &referrer.to_string(),
        ])
        .unwrap();
        assert!(matches!(cli.cmd, Command::Stake { referrer: Some(r), .. } if r == referrer));
    }

    #[test]
    fn parses_provision_flags() {
        let mint = Pubkey::new_unique();
        let cli = Cli::try_parse_from([
            "staking-cli",
            "--rpc-url",
            "http://localhost:8899",
            "provision",
            &mint.to_string(),
            "--mode",
            "fixed",
            "--rate-bps",
            "1200",
        ])
        .unwrap();
        assert_eq!(cli.rpc_url.as_deref(), Some("http://localhost:8899"));
        assert!(matches!(
            cli.cmd,
            Command::Provision { mode: ModeArg::Fixed, rate_bps: 1200, duration_days: 30, .. }
        ));
    }

    #[test]
    fn rejects_bad_pubkey() {
        assert!(Cli::try_parse_from(["staking-cli", "allocate", "not-a-key"]).is_err());
    }
}
