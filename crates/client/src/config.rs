//! Client configuration.
//!
//! Values come from the process environment, optionally seeded from an
//! env file (see [`load_env_file`]). Every setting has a default except
//! the ones that only the CLI needs (keypair path).
//!
//! | Variable                         | Default                      |
//! |----------------------------------|------------------------------|
//! | `STAKING_RPC_URL`                | `http://127.0.0.1:8899`      |
//! | `STAKING_PROGRAM_ID`             | deployed program id          |
//! | `STAKING_MIRROR_URL`             | unset (in-memory mirror)     |
//! | `STAKING_KEYPAIR_PATH`           | unset                        |
//! | `STAKING_MAX_POOL_SLOTS`         | 10                           |
//! | `STAKING_CONFIRM_TIMEOUT_MS`     | 30000                        |
//! | `STAKING_SHELL_POLL_ATTEMPTS`    | 10                           |
//! | `STAKING_SHELL_POLL_INTERVAL_MS` | 1000                         |
//! | `STAKING_REWARD_REFRESH_SECS`    | 12                           |
//! | `STAKING_JOURNAL_DIR`            | `.staking-journal`           |
//! | `STAKING_MAX_REALLOCATIONS`      | 3                            |
//! | `STAKING_MIRROR_TIMEOUT_MS`      | 10000                        |
//! | `STAKING_POOL_CREATION_FEE`      | 1000000000 (lamports)        |
//! | `STAKING_POOL_FEE_RECIPIENT`     | unset (platform admin)       |

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use solana_sdk::pubkey::Pubkey;

use crate::error::StakingError;

/// Pool creation fee, in lamports (1 SOL).
pub const DEFAULT_POOL_CREATION_FEE: u64 = 1_000_000_000;

/// Deployed staking program.
pub const DEFAULT_PROGRAM_ID: Pubkey = solana_sdk::pubkey!("7uKLyDU3tS6daQ9ic18gjoxkxBYuhTjswHiG6pD4R9fa");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub rpc_url: String,
    pub program_id: Pubkey,
    pub mirror_url: Option<String>,
    pub keypair_path: Option<PathBuf>,
    pub max_pool_slots: u32,
    pub confirm_timeout_ms: u64,
    pub shell_poll_attempts: u32,
    pub shell_poll_interval_ms: u64,
    pub reward_refresh_secs: u64,
    pub journal_dir: PathBuf,
    pub max_reallocations: u32,
    pub mirror_timeout_ms: u64,
    /// Lamports paid before a pool shell is created. Zero skips the step.
    pub pool_creation_fee: u64,
    /// Receives the creation fee; `None` pays the platform admin.
    pub pool_fee_recipient: Option<Pubkey>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8899".to_string(),
            program_id: DEFAULT_PROGRAM_ID,
            mirror_url: None,
            keypair_path: None,
            max_pool_slots: 10,
            confirm_timeout_ms: 30_000,
            shell_poll_attempts: 10,
            shell_poll_interval_ms: 1_000,
            reward_refresh_secs: 12,
            journal_dir: PathBuf::from(".staking-journal"),
            max_reallocations: 3,
            mirror_timeout_ms: 10_000,
            pool_creation_fee: DEFAULT_POOL_CREATION_FEE,
            pool_fee_recipient: None,
        }
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, StakingError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| StakingError::Config(format!("{key} invalid: '{value}'")))
}

impl ClientConfig {
    /// Reads configuration from the process environment.
    pub fn from_env() -> Result<Self, StakingError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads configuration through `lookup`. Unset keys keep defaults;
    /// set-but-invalid keys are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, StakingError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(v) = lookup("STAKING_RPC_URL") {
            cfg.rpc_url = v;
        }
        if let Some(v) = lookup("STAKING_PROGRAM_ID") {
            cfg.program_id = parse("STAKING_PROGRAM_ID", &v)?;
        }
        cfg.mirror_url = lookup("STAKING_MIRROR_URL").filter(|v| !v.trim().is_empty());
        cfg.keypair_path = lookup("STAKING_KEYPAIR_PATH").map(PathBuf::from);
        if let Some(v) = lookup("STAKING_MAX_POOL_SLOTS") {
            cfg.max_pool_slots = parse("STAKING_MAX_POOL_SLOTS", &v)?;
        }
        if let Some(v) = lookup("STAKING_CONFIRM_TIMEOUT_MS") {
            cfg.confirm_timeout_ms = parse("STAKING_CONFIRM_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("STAKING_SHELL_POLL_ATTEMPTS") {
            cfg.shell_poll_attempts = parse("STAKING_SHELL_POLL_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("STAKING_SHELL_POLL_INTERVAL_MS") {
            cfg.shell_poll_interval_ms = parse("STAKING_SHELL_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("STAKING_REWARD_REFRESH_SECS") {
            cfg.reward_refresh_secs = parse("STAKING_REWARD_REFRESH_SECS", &v)?;
        }
        if let Some(v) = lookup("STAKING_JOURNAL_DIR") {
            cfg.journal_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("STAKING_MAX_REALLOCATIONS") {
            cfg.max_reallocations = parse("STAKING_MAX_REALLOCATIONS", &v)?;
        }
        if let Some(v) = lookup("STAKING_MIRROR_TIMEOUT_MS") {
            cfg.mirror_timeout_ms = parse("STAKING_MIRROR_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("STAKING_POOL_CREATION_FEE") {
            cfg.pool_creation_fee = parse("STAKING_POOL_CREATION_FEE", &v)?;
        }
        if let Some(v) = lookup("STAKING_POOL_FEE_RECIPIENT").filter(|v| !v.trim().is_empty()) {
            cfg.pool_fee_recipient = Some(parse("STAKING_POOL_FEE_RECIPIENT", &v)?);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), StakingError> {
        if self.max_pool_slots == 0 {
            return Err(StakingError::Config("STAKING_MAX_POOL_SLOTS must be > 0".into()));
        }
        if self.shell_poll_attempts == 0 {
            return Err(StakingError::Config("STAKING_SHELL_POLL_ATTEMPTS must be > 0".into()));
        }
        if self.reward_refresh_secs == 0 {
            return Err(StakingError::Config("STAKING_REWARD_REFRESH_SECS must be > 0".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }

    #[must_use]
    pub fn shell_poll_interval(&self) -> Duration {
        Duration::from_millis(self.shell_poll_interval_ms)
    }

    #[must_use]
    pub fn reward_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.reward_refresh_secs)
    }

    #[must_use]
    pub fn mirror_timeout(&self) -> Duration {
        Duration::from_millis(self.mirror_timeout_ms)
    }
}

/// Loads an env file before config is read.
///
/// Order: `$STAKING_ENV_FILE`, then `.env` in the working directory. A
/// missing file is not an error. Returns the loaded path so the caller can
/// log it once tracing is up.
pub fn load_env_file() -> Option<PathBuf> {
    let env_file = env::var("STAKING_ENV_FILE").unwrap_or_else(|_| ".env".to_string());
    if !Path::new(&env_file).exists() {
        return None;
    }
    match dotenvy::from_filename(&env_file) {
        Ok(path) => Some(path),
        Err(e) => {
            // tracing is not initialized yet
            eprintln!("warning: failed to load {env_file}: {e}");
            None
        }
    }
}
