//! Transaction submitter: envelope, signature, submission and the terminal
//! record for one queued request.

use relay_store::DocumentStore;
use relay_tx::{EventStream, Ledger, LedgerEvent, SignedTx, Signer, TxEnvelope};
use relay_types::{Hex, Outcome, QueueRecord, RelayError, Result, TerminalRecord};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::transitions;
use crate::QueueConfig;

/// Result of one submission attempt.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// A terminal record was written for the request.
    Finalized(TerminalRecord),
    /// Nothing reached the ledger (gas price lookup or signing failed); the
    /// record is still Queued.
    NotSent(RelayError),
}

/// Submits queued requests from the custodial account.
pub struct Submitter {
    store: Arc<dyn DocumentStore>,
    signer: Arc<dyn Signer>,
    ledger: Arc<dyn Ledger>,
    config: QueueConfig,
}

impl Submitter {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        signer: Arc<dyn Signer>,
        ledger: Arc<dyn Ledger>,
        config: QueueConfig,
    ) -> Self {
        Self { store, signer, ledger, config }
    }

    /// Envelope for a record: fixed sender, contract and gas limit; the
    /// payload is passed through verbatim.
    pub fn build_envelope(&self, record: &QueueRecord, gas_price: u128) -> TxEnvelope {
        TxEnvelope {
            from: self.config.custodial_account.clone(),
            to: self.config.relay_contract.clone(),
            gas: self.config.gas_limit,
            gas_price,
            data: record.request.payload.clone(),
        }
    }

    async fn gas_price(&self) -> Result<u128> {
        match self.config.gas_price {
            Some(price) => Ok(price as u128),
            None => self.ledger.gas_price().await,
        }
    }

    async fn sign(&self, record: &QueueRecord) -> Result<SignedTx> {
        let gas_price = self.gas_price().await?;
        let envelope = self.build_envelope(record, gas_price);
        self.signer.sign(&envelope).await
    }

    /// Submit one record and wait for its terminal outcome.
    ///
    /// Returns `Err` only when writing the terminal record failed; the Queued
    /// record then remains and is submitted again on a later tick.
    pub async fn submit(&self, record: &QueueRecord) -> Result<SubmitOutcome> {
        let request_id = &record.request.request_id;

        let signed = match self.sign(record).await {
            Ok(signed) => signed,
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Signing failed, record stays queued");
                return Ok(SubmitOutcome::NotSent(e));
            }
        };

        info!(request_id = %request_id, owner = %record.request.owner, "Submitting relay transaction");
        let outcome = match self.ledger.submit(&signed).await {
            Ok(events) => self.await_outcome(record, events, signed.hash).await,
            Err(e) => Outcome::Failed { error: e.to_string(), tx_hash: signed.hash },
        };

        match transitions::finalize(self.store.as_ref(), record, outcome).await {
            Ok(terminal) => Ok(SubmitOutcome::Finalized(terminal)),
            Err(e) => {
                error!(request_id = %request_id, error = %e, "Failed to record outcome");
                Err(e)
            }
        }
    }

    /// Follow lifecycle events until a terminal one arrives or the timeout
    /// expires; on expiry fall back to a receipt lookup.
    async fn await_outcome(
        &self,
        record: &QueueRecord,
        mut events: EventStream,
        mut tx_hash: Option<Hex>,
    ) -> Outcome {
        let request_id = &record.request.request_id;
        let timeout = Duration::from_millis(self.config.submission_timeout_ms);
        let deadline = Instant::now() + timeout;

        loop {
            match tokio::time::timeout_at(deadline, events.recv()).await {
                Ok(Some(LedgerEvent::TransactionHash(hash))) => {
                    info!(request_id = %request_id, tx_hash = %hash, "Transaction accepted");
                    tx_hash = Some(hash);
                }
                Ok(Some(LedgerEvent::Receipt(receipt))) => {
                    info!(
                        request_id = %request_id,
                        tx_hash = %receipt.transaction_hash,
                        block = receipt.block_number,
                        "Transaction mined"
                    );
                    return Outcome::Committed { receipt };
                }
                Ok(Some(LedgerEvent::Error(message))) => {
                    warn!(request_id = %request_id, error = %message, "Transaction failed");
                    return Outcome::Failed { error: message, tx_hash };
                }
                Ok(None) => {
                    warn!(request_id = %request_id, "Event stream closed without a terminal event");
                    break;
                }
                Err(_) => {
                    warn!(request_id = %request_id, timeout_ms = self.config.submission_timeout_ms, "Submission timed out");
                    break;
                }
            }
        }
        drop(events);

        self.requery(request_id, tx_hash, timeout).await
    }

    /// Ask the ledger directly before declaring a silent submission failed.
    async fn requery(&self, request_id: &str, tx_hash: Option<Hex>, waited: Duration) -> Outcome {
        let Some(hash) = tx_hash else {
            return Outcome::Failed {
                error: "no terminal event and no transaction hash".into(),
                tx_hash: None,
            };
        };

        match self.ledger.receipt(&hash).await {
            Ok(Some(receipt)) => {
                info!(request_id = %request_id, tx_hash = %hash, "Receipt found on requery");
                Outcome::Committed { receipt }
            }
            Ok(None) => Outcome::Failed {
                error: format!("no receipt after {}ms", waited.as_millis()),
                tx_hash: Some(hash),
            },
            Err(e) => Outcome::Failed {
                error: format!("receipt lookup failed: {}", e),
                tx_hash: Some(hash),
            },
        }
    }
}
