//! # Token Runtimes
//!
//! An asset's balances live under exactly one of two token programs. The
//! runtime is resolved once per asset (see the client's runtime resolver)
//! and then carried inside [`AssetIdentity`] so every address derivation
//! and instruction in a single operation agrees on it.
//!
//! ```text
//! mint account owner
//!      │
//!      ├─ spl_token::ID            → RuntimeKind::Classic
//!      ├─ TOKEN_2022_PROGRAM_ID    → RuntimeKind::Extended
//!      └─ anything else            → not a token mint
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use solana_program::pubkey::Pubkey;

/// Token-2022 program id.
pub const TOKEN_2022_PROGRAM_ID: Pubkey = solana_program::pubkey!("TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb");

/// Mint address of the wrapped native currency.
pub const NATIVE_MINT: Pubkey = spl_token::native_mint::ID;

// ════════════════════════════════════════════════════════════════════════════════
// RUNTIME KIND
// ════════════════════════════════════════════════════════════════════════════════

/// Which token program owns an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// The original SPL Token program.
    Classic,
    /// Token-2022 (extensions).
    Extended,
}

impl RuntimeKind {
    /// Program id that owns mints and token accounts of this runtime.
    #[must_use]
    pub fn program_id(self) -> Pubkey {
        match self {
            Self::Classic => spl_token::ID,
            Self::Extended => TOKEN_2022_PROGRAM_ID,
        }
    }

    /// Classifies a mint by its owning program. `None` when the owner is
    /// not a token program.
    #[must_use]
    pub fn from_owner(owner: &Pubkey) -> Option<Self> {
        if *owner == spl_token::ID {
            Some(Self::Classic)
        } else if *owner == TOKEN_2022_PROGRAM_ID {
            Some(Self::Extended)
        } else {
            None
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Classic => write!(f, "classic"),
            Self::Extended => write!(f, "extended"),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// ASSET IDENTITY
// ════════════════════════════════════════════════════════════════════════════════

/// A mint together with its resolved runtime.
///
/// Builder functions take `&AssetIdentity` rather than a bare mint so a
/// runtime can never be re-guessed halfway through an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetIdentity {
    pub mint: Pubkey,
    pub runtime: RuntimeKind,
}

impl AssetIdentity {
    #[must_use]
    pub fn new(mint: Pubkey, runtime: RuntimeKind) -> Self {
        Self { mint, runtime }
    }

    /// True for the wrapped native mint. Native value is held by the
    /// wallet itself, so no token account is ever created for it.
    #[must_use]
    pub fn is_native(&self) -> bool {
        self.mint == NATIVE_MINT
    }

    #[must_use]
    pub fn token_program(&self) -> Pubkey {
        self.runtime.program_id()
    }

    /// Location that holds this asset for `wallet`: the wallet itself for
    /// the native mint, otherwise the associated token account under the
    /// asset's runtime.
    #[must_use]
    pub fn holding_address(&self, wallet: &Pubkey) -> Pubkey {
        if self.is_native() {
            *wallet
        } else {
            spl_associated_token_account::get_associated_token_address_with_program_id(
                wallet,
                &self.mint,
                &self.token_program(),
            )
        }
    }
}

impl fmt::Display for AssetIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.mint, self.runtime)
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════
