//! # Staking Client
//!
//! Transaction orchestration for the staking program: builds operations,
//! submits them through one idempotent chokepoint, provisions pools, and
//! keeps an off-chain mirror eventually consistent with the ledger.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           StakingClient                              │
//! │                                                                      │
//! │  ┌────────────────┐   ┌──────────────────┐   ┌────────────────────┐  │
//! │  │RuntimeResolver │──▶│ OperationBuilder │──▶│ SubmissionResolver │  │
//! │  │ (cached/mint)  │   │ (aux accounts)   │   │ (idempotency)      │  │
//! │  └────────────────┘   └──────────────────┘   └─────────┬──────────┘  │
//! │                                                        │             │
//! │  ┌────────────────┐   ┌──────────────────┐             ▼             │
//! │  │ SlotAllocator  │◀──│   Provisioner    │      ┌─────────────┐      │
//! │  └────────────────┘   │  (journaled)     │      │   Ledger    │      │
//! │                       └──────────────────┘      └──────┬──────┘      │
//! │                                                        │ re-read     │
//! │  ┌────────────────┐   ┌──────────────────┐             ▼             │
//! │  │ RewardTracker  │   │MirrorReconciler  │──────▶ StakeMirror        │
//! │  │ (interpolated) │   │ (after success)  │      (never authoritative)│
//! │  └────────────────┘   └──────────────────┘                           │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module             | Role                                              |
//! |--------------------|---------------------------------------------------|
//! | `ledger`           | ledger traits, mock ledger                        |
//! | `rpc_ledger`       | JSON-RPC ledger                                   |
//! | `simulator`        | program effects for the mock ledger               |
//! | `mirror`           | mirror trait, in-memory mirror                    |
//! | `http_mirror`      | mirror over HTTP                                  |
//! | `runtime_resolver` | classic vs extended token runtime                 |
//! | `slot_allocator`   | lowest free pool slot                             |
//! | `pool_reader`      | typed account reads                               |
//! | `operation_builder`| instruction lists per user action                 |
//! | `submission`       | send, confirm, classify, idempotency              |
//! | `reconciler`       | mirror follows the ledger                         |
//! | `journal`          | persisted provisioning progress                   |
//! | `provisioning`     | pool provisioning state machine                   |
//! | `reward_tracker`   | non-blocking reward estimates                     |
//! | `client`           | the facade                                        |
//! | `cli`              | `staking-cli` commands                            |

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod http_mirror;
pub mod journal;
pub mod ledger;
pub mod mirror;
pub mod operation_builder;
pub mod pool_reader;
pub mod provisioning;
pub mod reconciler;
pub mod reward_tracker;
pub mod rpc_ledger;
pub mod runtime_resolver;
pub mod simulator;
pub mod slot_allocator;
pub mod submission;

pub use client::{OperationReceipt, PoolRate, StakingClient};
pub use config::ClientConfig;
pub use error::{StakingError, StakingResult};
pub use journal::{FileJournal, JournalRecord, MemoryJournal, ProvisioningJournal};
pub use ledger::{Ledger, LedgerReader, LedgerWriter, MockLedger, SendBehavior};
pub use mirror::{MemoryMirror, StakeMirror};
pub use provisioning::ProvisioningStep;
pub use reconciler::ReconcileOutcome;
pub use simulator::ProgramSimulator;
pub use submission::{IdempotencyToken, ReceiptKind};
