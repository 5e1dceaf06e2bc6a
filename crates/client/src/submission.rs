//! # Submission & Idempotency Resolver
//!
//! Single chokepoint through which every transaction is signed, sent and
//! confirmed. It classifies the outcome and remembers it per idempotency
//! token, so a repeated user action never moves value twice.
//!
//! ## Classification
//!
//! ```text
//! send ──► Ok(sig) ──► confirm ──► Landed        ─► Confirmed(sig)
//!   │                         ├─► Failed(e)     ─► Rejected(e)
//!   │                         └─► TimedOut/Err  ─► AmbiguousOutcome(sig)
//!   │
//!   └─► Err(e) ── "already processed"? ── sig in context ─► AlreadyProcessed(sig)
//!                      │                 └─ no sig        ─► AmbiguousOutcome(None)
//!                      ├─ refused by the ledger           ─► Rejected(e)
//!                      └─ transport / timeout / other     ─► AmbiguousOutcome(sig)
//! ```
//!
//! ## Idempotency
//!
//! | Token state          | Repeated submit                               |
//! |----------------------|-----------------------------------------------|
//! | in flight            | `InFlight` error                              |
//! | succeeded            | cached signature, nothing sent                |
//! | ambiguous            | signature status lookup, nothing sent         |
//! | rejected             | token released, fresh submit allowed          |
//!
//! ## No Implicit Retry
//!
//! Nothing here resends on its own. An ambiguous token stays ambiguous
//! until a status lookup settles it or the caller calls
//! [`SubmissionResolver::release`] after verifying balances.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
use solana_sdk::transaction::Transaction;
use tracing::{debug, info, warn};

use crate::error::{StakingError, StakingResult};
use crate::ledger::{Confirmation, Durability, Ledger, SignatureState};

// ════════════════════════════════════════════════════════════════════════════════
// TOKEN
// ════════════════════════════════════════════════════════════════════════════════

/// Caller-chosen key identifying one logical user action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyToken(String);

static TOKEN_COUNTER: AtomicU64 = AtomicU64::new(0);

impl IdempotencyToken {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Fresh process-unique token.
    #[must_use]
    pub fn generate() -> Self {
        let n = TOKEN_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("op-{}-{}", Utc::now().timestamp_millis(), n))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// RECEIPT
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptKind {
    /// Sent and confirmed in this call.
    Confirmed,
    /// The ledger had already processed it; signature from error context.
    AlreadyProcessed,
    /// Token already succeeded earlier; nothing sent.
    Cached,
    /// An earlier ambiguous attempt turned out to have landed.
    Recovered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub signature: Signature,
    pub kind: ReceiptKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenState {
    InFlight,
    Succeeded(Signature),
    /// Outcome unknown. Holds the signature of the attempt, for lookups.
    Ambiguous(Signature),
}

// ════════════════════════════════════════════════════════════════════════════════
// RESOLVER
// ════════════════════════════════════════════════════════════════════════════════

pub struct SubmissionResolver {
    ledger: Arc<dyn Ledger>,
    payer: Arc<Keypair>,
    durability: Durability,
    tokens: Mutex<HashMap<IdempotencyToken, TokenState>>,
}

/// Leaves a token ambiguous if the submitting future is dropped midway.
struct InFlightGuard<'a> {
    tokens: &'a Mutex<HashMap<IdempotencyToken, TokenState>>,
    token: Option<IdempotencyToken>,
    attempt: Option<Signature>,
}

impl InFlightGuard<'_> {
    fn settle(mut self, state: Option<TokenState>) {
        if let Some(token) = self.token.take() {
            let mut tokens = self.tokens.lock();
            match state {
                Some(state) => {
                    tokens.insert(token, state);
                }
                None => {
                    tokens.remove(&token);
                }
            }
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            let mut tokens = self.tokens.lock();
            match self.attempt {
                Some(signature) => {
                    tokens.insert(token, TokenState::Ambiguous(signature));
                }
                // Nothing was signed yet, so nothing can have landed.
                None => {
                    tokens.remove(&token);
                }
            }
        }
    }
}

impl SubmissionResolver {
    #[must_use]
    pub fn new(ledger: Arc<dyn Ledger>, payer: Arc<Keypair>) -> Self {
        Self {
            ledger,
            payer,
            durability: Durability::Confirmed,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }

    #[must_use]
    pub fn payer(&self) -> Pubkey {
        self.payer.pubkey()
    }

    /// Signs, sends and confirms `instructions` as one transaction.
    pub async fn submit(
        &self,
        instructions: &[Instruction],
        token: Option<&IdempotencyToken>,
    ) -> StakingResult<SubmissionReceipt> {
        let Some(token) = token else {
            return self.send_once(instructions, &mut None).await;
        };

        let previous = {
            let mut tokens = self.tokens.lock();
            match tokens.get(token).cloned() {
                None => {
                    tokens.insert(token.clone(), TokenState::InFlight);
                    None
                }
                Some(state) => Some(state),
            }
        };

        match previous {
            None => {}
            Some(TokenState::InFlight) => return Err(StakingError::InFlight(token.to_string())),
            Some(TokenState::Succeeded(signature)) => {
                debug!(%token, %signature, "idempotent replay, returning cached signature");
                return Ok(SubmissionReceipt { signature, kind: ReceiptKind::Cached });
            }
            Some(TokenState::Ambiguous(signature)) => {
                return self.settle_ambiguous(token, signature).await;
            }
        }

        let mut guard = InFlightGuard {
            tokens: &self.tokens,
            token: Some(token.clone()),
            attempt: None,
        };
        let result = self.send_once(instructions, &mut guard.attempt).await;
        let state = match (&result, guard.attempt) {
            (Ok(receipt), _) => Some(TokenState::Succeeded(receipt.signature)),
            (Err(StakingError::AmbiguousOutcome { .. }), Some(attempt)) => {
                Some(TokenState::Ambiguous(attempt))
            }
            _ => None,
        };
        guard.settle(state);
        result
    }

    /// Looks up an earlier ambiguous attempt without resending.
    async fn settle_ambiguous(
        &self,
        token: &IdempotencyToken,
        signature: Signature,
    ) -> StakingResult<SubmissionReceipt> {
        match self.ledger.signature_status(&signature).await {
            Ok(SignatureState::Succeeded) => {
                info!(%token, %signature, "ambiguous submission confirmed as landed");
                self.tokens
                    .lock()
                    .insert(token.clone(), TokenState::Succeeded(signature));
                Ok(SubmissionReceipt { signature, kind: ReceiptKind::Recovered })
            }
            Ok(SignatureState::Failed(reason)) => {
                info!(%token, %signature, %reason, "ambiguous submission failed on-chain, token released");
                self.tokens.lock().remove(token);
                Err(StakingError::Rejected(reason))
            }
            Ok(SignatureState::Unknown) => {
                Err(StakingError::AmbiguousOutcome { signature: Some(signature) })
            }
            Err(e) => {
                warn!(%token, %signature, error = %e, "status lookup failed");
                Err(StakingError::AmbiguousOutcome { signature: Some(signature) })
            }
        }
    }

    /// Forgets a token so the caller may submit again. Only call after
    /// verifying that the earlier attempt did not land.
    pub fn release(&self, token: &IdempotencyToken) {
        self.tokens.lock().remove(token);
    }

    /// One send attempt. `attempt` receives the signature as soon as the
    /// transaction is signed.
    async fn send_once(
        &self,
        instructions: &[Instruction],
        attempt: &mut Option<Signature>,
    ) -> StakingResult<SubmissionReceipt> {
        let blockhash = self
            .ledger
            .latest_blockhash()
            .await
            .map_err(|e| StakingError::Rejected(format!("could not fetch blockhash: {e}")))?;

        let payer = self.payer.pubkey();
        let transaction = Transaction::new_signed_with_payer(
            instructions,
            Some(&payer),
            &[self.payer.as_ref()],
            blockhash,
        );
        *attempt = transaction.signatures.first().copied();

        match self.ledger.send_transaction(&transaction).await {
            Ok(signature) => match self.ledger.confirm_transaction(&signature, self.durability).await {
                Ok(Confirmation::Landed) => {
                    debug!(%signature, "transaction confirmed");
                    Ok(SubmissionReceipt { signature, kind: ReceiptKind::Confirmed })
                }
                Ok(Confirmation::Failed(reason)) => {
                    warn!(%signature, %reason, "transaction failed on-chain");
                    Err(StakingError::Rejected(reason))
                }
                Ok(Confirmation::TimedOut) => {
                    warn!(%signature, "confirmation timed out, outcome unknown");
                    Err(StakingError::AmbiguousOutcome { signature: Some(signature) })
                }
                Err(e) => {
                    warn!(%signature, error = %e, "confirmation failed, outcome unknown");
                    Err(StakingError::AmbiguousOutcome { signature: Some(signature) })
                }
            },
            Err(e) if e.is_already_processed() => match e.signature() {
                Some(signature) => {
                    info!(%signature, "transaction already processed, treating as success");
                    Ok(SubmissionReceipt { signature, kind: ReceiptKind::AlreadyProcessed })
                }
                None => {
                    warn!(error = %e, "already processed without recoverable signature");
                    Err(StakingError::AmbiguousOutcome { signature: None })
                }
            },
            Err(e) if e.is_refusal() => {
                // Refused before execution; nothing can have moved.
                *attempt = None;
                Err(StakingError::Rejected(e.to_string()))
            }
            Err(e) => {
                let signature = transaction.signatures.first().copied();
                warn!(signature = ?signature, error = %e, "send failed in transit, outcome unknown");
                Err(StakingError::AmbiguousOutcome { signature })
            }
        }
    }
}

const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn check() {
        assert_send_sync::<SubmissionResolver>();
    }
    let _ = check;
};

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════
