//! # Ledger Interface
//!
//! Read and write access to the ledger, split into two async traits so
//! read-only components (resolver, allocator, tracker) cannot send.
//!
//! ```text
//!            ┌──────────────┐      ┌──────────────┐
//!            │ LedgerReader │      │ LedgerWriter │
//!            └──────┬───────┘      └──────┬───────┘
//!                   └──────────┬──────────┘
//!                         Ledger (blanket)
//!                              │
//!                  ┌───────────┴───────────┐
//!               RpcLedger              MockLedger
//! ```
//!
//! ## Contract
//!
//! - An absent account is `Ok(None)`, never an error.
//! - Implementations MUST NOT retry sends internally. Duplicate
//!   suppression belongs to the submission resolver.
//! - When a send fails as "already processed", implementations attach the
//!   transaction's signature to the error only if the ledger reports that
//!   signature as known.
//! - A send error is [`LedgerError::Refused`] only when the ledger answered
//!   and turned the transaction away (preflight, simulation, signature
//!   checks). Transport failures may have reached the ledger, so they are
//!   reported as [`LedgerError::Timeout`] or [`LedgerError::Transport`] and
//!   the caller must treat the outcome as unknown.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use solana_sdk::account::Account;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use thiserror::Error;

// ════════════════════════════════════════════════════════════════════════════════
// TYPES
// ════════════════════════════════════════════════════════════════════════════════

/// Durability level a confirmation waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Durability {
    Processed,
    #[default]
    Confirmed,
    Finalized,
}

impl Durability {
    #[must_use]
    pub fn commitment(self) -> CommitmentConfig {
        match self {
            Self::Processed => CommitmentConfig::processed(),
            Self::Confirmed => CommitmentConfig::confirmed(),
            Self::Finalized => CommitmentConfig::finalized(),
        }
    }
}

/// Result of waiting for a sent transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// Landed without error at the requested durability.
    Landed,
    /// Landed, but the program returned an error.
    Failed(String),
    /// Not observed within the wait window. Outcome unknown.
    TimedOut,
}

/// Point-in-time status of a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureState {
    Unknown,
    Succeeded,
    Failed(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("rpc error: {message}")]
    Rpc {
        message: String,
        /// Signature recovered from the failure context, if any.
        signature: Option<Signature>,
    },

    /// The ledger answered and did not accept the transaction.
    #[error("transaction refused: {0}")]
    Refused(String),

    /// The request may or may not have reached the ledger.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("ledger request timed out")]
    Timeout,
}

impl LedgerError {
    #[must_use]
    pub fn rpc(message: impl Into<String>) -> Self {
        Self::Rpc { message: message.into(), signature: None }
    }

    #[must_use]
    pub fn signature(&self) -> Option<Signature> {
        match self {
            Self::Rpc { signature, .. } => *signature,
            Self::Refused(_) | Self::Transport(_) | Self::Timeout => None,
        }
    }

    /// The ledger refused the transaction because it has already seen it.
    #[must_use]
    pub fn is_already_processed(&self) -> bool {
        match self {
            Self::Rpc { message, .. } | Self::Refused(message) => is_already_processed_message(message),
            Self::Transport(_) | Self::Timeout => false,
        }
    }

    /// The send provably did not get the transaction accepted.
    #[must_use]
    pub fn is_refusal(&self) -> bool {
        matches!(self, Self::Refused(_)) && !self.is_already_processed()
    }
}

/// Matches both the error variant name and its rendered message.
#[must_use]
pub fn is_already_processed_message(message: &str) -> bool {
    message.contains("AlreadyProcessed") || message.contains("already been processed")
}

// ════════════════════════════════════════════════════════════════════════════════
// TRAITS
// ════════════════════════════════════════════════════════════════════════════════

#[async_trait]
pub trait LedgerReader: Send + Sync {
    /// `Ok(None)` when the account does not exist.
    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>, LedgerError>;

    async fn get_balance(&self, address: &Pubkey) -> Result<u64, LedgerError>;

    async fn latest_blockhash(&self) -> Result<Hash, LedgerError>;

    async fn signature_status(&self, signature: &Signature) -> Result<SignatureState, LedgerError>;

    async fn account_exists(&self, address: &Pubkey) -> Result<bool, LedgerError> {
        Ok(self.get_account(address).await?.is_some())
    }
}

#[async_trait]
pub trait LedgerWriter: Send + Sync {
    /// Sends a signed transaction. Single attempt.
    async fn send_transaction(&self, transaction: &Transaction) -> Result<Signature, LedgerError>;

    /// Waits (bounded) for `signature` to reach `durability`.
    async fn confirm_transaction(
        &self,
        signature: &Signature,
        durability: Durability,
    ) -> Result<Confirmation, LedgerError>;
}

/// Full read/write access.
pub trait Ledger: LedgerReader + LedgerWriter {}

impl<T: LedgerReader + LedgerWriter> Ledger for T {}

// ════════════════════════════════════════════════════════════════════════════════
// MOCK LEDGER
// ════════════════════════════════════════════════════════════════════════════════

/// Applies a landed transaction to mock state. Returning `Err` makes the
/// transaction fail on-chain (confirmation reports `Failed`).
pub trait TransactionHook: Send + Sync {
    fn apply(
        &self,
        transaction: &Transaction,
        accounts: &mut HashMap<Pubkey, Account>,
    ) -> Result<(), String>;
}

/// Scripted behavior for the next send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendBehavior {
    /// Land, apply the hook, confirm.
    Land,
    /// Refuse before landing.
    Reject(String),
    /// Land, but the program errors.
    FailOnChain(String),
    /// Send errors as "already processed". When `landed`, the hook runs.
    /// `with_signature` controls whether the error carries the signature.
    AlreadyProcessed { landed: bool, with_signature: bool },
    /// Send succeeds; confirmation never arrives. When `landed`, the hook
    /// runs and a later status lookup reports success.
    ConfirmTimeout { landed: bool },
    /// The send request times out on the wire. When `landed`, the ledger
    /// got it anyway and the hook runs.
    SendTimeout { landed: bool },
}

/// In-memory ledger for tests.
///
/// Sends are consumed FIFO from a behavior queue; when the queue is empty
/// every send lands.
pub struct MockLedger {
    accounts: RwLock<HashMap<Pubkey, Account>>,
    behaviors: Mutex<VecDeque<SendBehavior>>,
    statuses: Mutex<HashMap<Signature, SignatureState>>,
    timed_out: Mutex<Vec<Signature>>,
    sent: Mutex<Vec<Transaction>>,
    hook: RwLock<Option<Arc<dyn TransactionHook>>>,
    fail_reads: RwLock<Option<String>>,
    reads: Mutex<u64>,
}

impl MockLedger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            behaviors: Mutex::new(VecDeque::new()),
            statuses: Mutex::new(HashMap::new()),
            timed_out: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            hook: RwLock::new(None),
            fail_reads: RwLock::new(None),
            reads: Mutex::new(0),
        }
    }

    pub fn set_hook(&self, hook: Arc<dyn TransactionHook>) {
        *self.hook.write() = Some(hook);
    }

    pub fn set_account(&self, address: Pubkey, account: Account) {
        self.accounts.write().insert(address, account);
    }

    pub fn remove_account(&self, address: &Pubkey) {
        self.accounts.write().remove(address);
    }

    #[must_use]
    pub fn account(&self, address: &Pubkey) -> Option<Account> {
        self.accounts.read().get(address).cloned()
    }

    /// Appends a behavior for a future send (FIFO).
    pub fn push_behavior(&self, behavior: SendBehavior) {
        self.behaviors.lock().push_back(behavior);
    }

    /// Makes every read fail with `message` until cleared with `None`.
    pub fn set_read_failure(&self, message: Option<String>) {
        *self.fail_reads.write() = message;
    }

    /// Transactions accepted by `send_transaction` so far, including ones
    /// that later failed on-chain.
    #[must_use]
    pub fn sent(&self) -> Vec<Transaction> {
        self.sent.lock().clone()
    }

    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    #[must_use]
    pub fn read_count(&self) -> u64 {
        *self.reads.lock()
    }

    fn check_read(&self) -> Result<(), LedgerError> {
        *self.reads.lock() += 1;
        match self.fail_reads.read().as_ref() {
            Some(message) => Err(LedgerError::rpc(message.clone())),
            None => Ok(()),
        }
    }

    /// Runs the hook and records the resulting status.
    fn land(&self, transaction: &Transaction, signature: Signature) -> SignatureState {
        let hook = self.hook.read().clone();
        let state = match hook {
            Some(hook) => {
                let mut accounts = self.accounts.write();
                // Apply to a scratch copy so a failing transaction has no effect.
                let mut scratch = accounts.clone();
                match hook.apply(transaction, &mut scratch) {
                    Ok(()) => {
                        *accounts = scratch;
                        SignatureState::Succeeded
                    }
                    Err(e) => SignatureState::Failed(e),
                }
            }
            None => SignatureState::Succeeded,
        };
        self.statuses.lock().insert(signature, state.clone());
        state
    }
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerReader for MockLedger {
    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>, LedgerError> {
        self.check_read()?;
        Ok(self.accounts.read().get(address).cloned())
    }

    async fn get_balance(&self, address: &Pubkey) -> Result<u64, LedgerError> {
        self.check_read()?;
        Ok(self.accounts.read().get(address).map_or(0, |a| a.lamports))
    }

    async fn latest_blockhash(&self) -> Result<Hash, LedgerError> {
        Ok(Hash::new_unique())
    }

    async fn signature_status(&self, signature: &Signature) -> Result<SignatureState, LedgerError> {
        self.check_read()?;
        Ok(self
            .statuses
            .lock()
            .get(signature)
            .cloned()
            .unwrap_or(SignatureState::Unknown))
    }
}

#[async_trait]
impl LedgerWriter for MockLedger {
    async fn send_transaction(&self, transaction: &Transaction) -> Result<Signature, LedgerError> {
        let signature = transaction.signatures.first().copied().unwrap_or_default();
        let behavior = self.behaviors.lock().pop_front().unwrap_or(SendBehavior::Land);

        match behavior {
            SendBehavior::Land => {
                self.sent.lock().push(transaction.clone());
                self.land(transaction, signature);
                Ok(signature)
            }
            SendBehavior::Reject(message) => Err(LedgerError::Refused(message)),
            SendBehavior::FailOnChain(message) => {
                self.sent.lock().push(transaction.clone());
                self.statuses
                    .lock()
                    .insert(signature, SignatureState::Failed(message));
                Ok(signature)
            }
            SendBehavior::AlreadyProcessed { landed, with_signature } => {
                if landed {
                    self.sent.lock().push(transaction.clone());
                    self.land(transaction, signature);
                }
                Err(LedgerError::Rpc {
                    message: "Transaction simulation failed: This transaction has already been processed"
                        .to_string(),
                    signature: with_signature.then_some(signature),
                })
            }
            SendBehavior::ConfirmTimeout { landed } => {
                self.sent.lock().push(transaction.clone());
                if landed {
                    self.land(transaction, signature);
                }
                self.timed_out.lock().push(signature);
                Ok(signature)
            }
            SendBehavior::SendTimeout { landed } => {
                if landed {
                    self.sent.lock().push(transaction.clone());
                    self.land(transaction, signature);
                }
                Err(LedgerError::Timeout)
            }
        }
    }

    async fn confirm_transaction(
        &self,
        signature: &Signature,
        _durability: Durability,
    ) -> Result<Confirmation, LedgerError> {
        if self.timed_out.lock().contains(signature) {
            return Ok(Confirmation::TimedOut);
        }
        let status = self.statuses.lock().get(signature).cloned();
        Ok(match status {
            Some(SignatureState::Succeeded) => Confirmation::Landed,
            Some(SignatureState::Failed(e)) => Confirmation::Failed(e),
            Some(SignatureState::Unknown) | None => Confirmation::TimedOut,
        })
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// COMPILE-TIME ASSERTIONS
// ════════════════════════════════════════════════════════════════════════════════

const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn check() {
        assert_send_sync::<MockLedger>();
    }
    let _ = check;
};

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════
