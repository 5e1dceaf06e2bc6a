//! # Staking Common
//!
//! Pure building blocks for the staking client: nothing in this crate
//! performs I/O.
//!
//! ## Modules
//! - `runtime`: token runtime kinds and [`AssetIdentity`]
//! - `address`: deterministic program address derivation
//! - `accounts`: borsh layouts of the program's accounts
//! - `instruction`: program instruction encoders
//! - `interpolator`: reward estimation between snapshots
//! - `types`: pool, stake and operation types
//!
//! ```text
//!            ┌──────────────┐
//!            │   runtime    │
//!            └──────┬───────┘
//!                   │
//!     ┌─────────────┼───────────────┐
//!     │             │               │
//! ┌───▼────┐  ┌─────▼──────┐  ┌─────▼───────┐
//! │address │  │instruction │  │ accounts    │
//! └───┬────┘  └────────────┘  └─────┬───────┘
//!     │                             │
//!     └──────────► types ◄──────────┤
//!                                   ▼
//!                             interpolator
//! ```

pub mod accounts;
pub mod address;
pub mod instruction;
pub mod interpolator;
pub mod runtime;
pub mod types;

pub use accounts::{AccountDecodeError, PlatformAccount, ProgramAccount, ProjectAccount, StakeAccount};
pub use address::{derive, platform_address, AddressKind, PoolAddresses};
pub use interpolator::{interpolate, RewardInterpolator, RewardSnapshot, REWARD_RATE_SCALE};
pub use runtime::{AssetIdentity, RuntimeKind, NATIVE_MINT, TOKEN_2022_PROGRAM_ID};
pub use types::{
    AccountSpec, OperationEnvelope, OperationKind, PoolConfig, PoolDescriptor, PoolSummary,
    RateMode, StakeRecord,
};

pub use solana_program::pubkey::Pubkey;
