//! Error taxonomy of the staking client.
//!
//! | Kind                     | Surfaced to user | Retry            |
//! |--------------------------|------------------|------------------|
//! | `Rejected`               | yes              | caller may retry |
//! | `AssetNotFound`          | yes              | no               |
//! | `AmbiguousOutcome`       | "verify balance" | never silently   |
//! | `MirrorWriteFailed`      | no, logged only  | next reconcile   |
//! | `ProvisioningIncomplete` | yes, with step   | `resume`         |

use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use staking_common::AccountDecodeError;
use thiserror::Error;

use crate::journal::JournalError;
use crate::ledger::LedgerError;
use crate::provisioning::ProvisioningStep;

pub type StakingResult<T> = Result<T, StakingError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StakingError {
    #[error("asset {mint} not found on the ledger")]
    AssetNotFound { mint: Pubkey },

    #[error("asset {mint} is owned by {owner}, which is not a token program")]
    UnsupportedRuntime { mint: Pubkey, owner: Pubkey },

    #[error("all {max_slots} pool slots for {mint} are taken")]
    SlotsExhausted { mint: Pubkey, max_slots: u32 },

    #[error("transaction rejected: {0}")]
    Rejected(String),

    #[error("transaction outcome unknown (signature: {})", display_signature(.signature))]
    AmbiguousOutcome { signature: Option<Signature> },

    #[error("mirror write failed: {0}")]
    MirrorWriteFailed(String),

    #[error(
        "provisioning of slot {pool_slot} incomplete after {}: {reason}",
        display_step(.last_completed)
    )]
    ProvisioningIncomplete {
        pool_slot: u32,
        last_completed: Option<ProvisioningStep>,
        reason: String,
    },

    #[error("pool {pool_slot} for {mint} not found")]
    PoolNotFound { mint: Pubkey, pool_slot: u32 },

    #[error("platform config not found at {0}")]
    PlatformNotFound(Pubkey),

    #[error("no stake for {owner} in pool {pool}")]
    StakeNotFound { owner: Pubkey, pool: Pubkey },

    #[error("pool {pool} has no reflection asset")]
    ReflectionsDisabled { pool: Pubkey },

    #[error("insufficient balance of {mint}: {available} available, {required} required")]
    InsufficientFunds { mint: Pubkey, required: u64, available: u64 },

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("operation with token {0} is already in flight")]
    InFlight(String),

    #[error("ledger read failed: {0}")]
    Ledger(String),

    #[error("account decode failed: {0}")]
    Decode(#[from] AccountDecodeError),

    #[error("journal: {0}")]
    Journal(String),

    #[error("config: {0}")]
    Config(String),
}

fn display_signature(signature: &Option<Signature>) -> String {
    signature.map_or_else(|| "unknown".to_string(), |s| s.to_string())
}

fn display_step(step: &Option<ProvisioningStep>) -> String {
    step.map_or_else(|| "no step".to_string(), |s| s.to_string())
}

impl StakingError {
    /// True when value may have moved and the caller must verify before
    /// acting again.
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::AmbiguousOutcome { .. })
    }

    /// Message suitable for an end user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::AmbiguousOutcome { .. } => {
                "The transaction may have succeeded. Please verify your balance before retrying."
                    .to_string()
            }
            Self::Rejected(details) => format!("Transaction failed: {details}"),
            Self::AssetNotFound { .. } => "Token not found.".to_string(),
            Self::InsufficientFunds { required, available, .. } => {
                format!("Insufficient balance. You have {available} but need {required}.")
            }
            Self::ProvisioningIncomplete { last_completed, .. } => format!(
                "Pool setup stopped after {}. Resume to finish.",
                display_step(last_completed)
            ),
            other => other.to_string(),
        }
    }
}

impl From<LedgerError> for StakingError {
    fn from(e: LedgerError) -> Self {
        Self::Ledger(e.to_string())
    }
}

impl From<JournalError> for StakingError {
    fn from(e: JournalError) -> Self {
        Self::Journal(e.to_string())
    }
}
