//! JSON-RPC ledger backed by `solana-client`'s nonblocking client.

use std::time::Duration;

use async_trait::async_trait;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_request::RpcError;
use solana_sdk::account::Account;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::ledger::{
    is_already_processed_message, Confirmation, Durability, LedgerError, LedgerReader,
    LedgerWriter, SignatureState,
};

/// Interval between signature status polls while confirming.
const CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct RpcLedger {
    client: RpcClient,
    confirm_timeout: Duration,
}

impl RpcLedger {
    /// Reads at `confirmed` commitment.
    #[must_use]
    pub fn new(rpc_url: impl Into<String>, confirm_timeout: Duration) -> Self {
        Self {
            client: RpcClient::new_with_commitment(rpc_url.into(), CommitmentConfig::confirmed()),
            confirm_timeout,
        }
    }

    #[must_use]
    pub fn url(&self) -> String {
        self.client.url()
    }
}

fn rpc_error(e: impl std::fmt::Display) -> LedgerError {
    LedgerError::rpc(e.to_string())
}

/// Maps a failed `sendTransaction` to a ledger error. Only answers from the
/// node (preflight, simulation, signing) prove the transaction was not
/// accepted; anything lost in transit may still have landed.
fn classify_send_error(e: &ClientError) -> LedgerError {
    let message = e.to_string();
    match e.kind() {
        ClientErrorKind::RpcError(RpcError::RpcResponseError { .. })
        | ClientErrorKind::TransactionError(_)
        | ClientErrorKind::SigningError(_) => LedgerError::Refused(message),
        ClientErrorKind::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => LedgerError::Timeout,
        ClientErrorKind::Reqwest(r) if r.is_timeout() => LedgerError::Timeout,
        _ => LedgerError::Transport(message),
    }
}

#[async_trait]
impl LedgerReader for RpcLedger {
    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>, LedgerError> {
        let response = self
            .client
            .get_account_with_commitment(address, self.client.commitment())
            .await
            .map_err(rpc_error)?;
        Ok(response.value)
    }

    async fn get_balance(&self, address: &Pubkey) -> Result<u64, LedgerError> {
        self.client.get_balance(address).await.map_err(rpc_error)
    }

    async fn latest_blockhash(&self) -> Result<Hash, LedgerError> {
        self.client.get_latest_blockhash().await.map_err(rpc_error)
    }

    async fn signature_status(&self, signature: &Signature) -> Result<SignatureState, LedgerError> {
        let status = self
            .client
            .get_signature_status_with_commitment(signature, self.client.commitment())
            .await
            .map_err(rpc_error)?;
        Ok(match status {
            None => SignatureState::Unknown,
            Some(Ok(())) => SignatureState::Succeeded,
            Some(Err(e)) => SignatureState::Failed(e.to_string()),
        })
    }
}

#[async_trait]
impl LedgerWriter for RpcLedger {
    async fn send_transaction(&self, transaction: &Transaction) -> Result<Signature, LedgerError> {
        match self.client.send_transaction(transaction).await {
            Ok(signature) => Ok(signature),
            Err(e) => {
                let message = e.to_string();
                if !is_already_processed_message(&message) {
                    let classified = classify_send_error(&e);
                    debug!(error = %classified, "send failed");
                    return Err(classified);
                }
                // The error itself carries no signature. Attach ours only if
                // the ledger has actually seen it.
                let signature = match transaction.signatures.first() {
                    Some(sig) => match self.signature_status(sig).await {
                        Ok(SignatureState::Succeeded) => Some(*sig),
                        Ok(state) => {
                            debug!(signature = %sig, ?state, "already-processed signature not confirmed");
                            None
                        }
                        Err(lookup) => {
                            warn!(signature = %sig, error = %lookup, "status lookup after already-processed failed");
                            None
                        }
                    },
                    None => None,
                };
                Err(LedgerError::Rpc { message, signature })
            }
        }
    }

    async fn confirm_transaction(
        &self,
        signature: &Signature,
        durability: Durability,
    ) -> Result<Confirmation, LedgerError> {
        let deadline = Instant::now() + self.confirm_timeout;
        loop {
            let status = self
                .client
                .get_signature_status_with_commitment(signature, durability.commitment())
                .await
                .map_err(rpc_error)?;
            match status {
                Some(Ok(())) => return Ok(Confirmation::Landed),
                Some(Err(e)) => return Ok(Confirmation::Failed(e.to_string())),
                None if Instant::now() >= deadline => return Ok(Confirmation::TimedOut),
                None => sleep(CONFIRM_POLL_INTERVAL).await,
            }
        }
    }
}

const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn check() {
        assert_send_sync::<RpcLedger>();
    }
    let _ = check;
};
