//! Ethereum JSON-RPC ledger client.
//!
//! Methods:
//! - eth_gasPrice
//! - eth_sendRawTransaction
//! - eth_getTransactionReceipt (polled until the transaction is mined)

use async_trait::async_trait;
use serde::Deserialize;
use relay_types::{Hex, Result, TxReceipt};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{parse_quantity, EventStream, Ledger, LedgerEvent, JsonRpcClient, SignedTx};

/// Receipt object as returned by `eth_getTransactionReceipt`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: Hex,
    block_number: Option<Hex>,
    block_hash: Option<Hex>,
    status: Option<Hex>,
    gas_used: Option<Hex>,
}

impl RpcReceipt {
    /// `None` while the receipt has no block yet.
    fn into_receipt(self) -> Result<Option<TxReceipt>> {
        let block_number = match self.block_number {
            Some(n) => parse_quantity(&n)? as u64,
            None => return Ok(None),
        };
        let status = match self.status {
            Some(s) => Some(parse_quantity(&s)? == 1),
            None => None,
        };
        let gas_used = match self.gas_used {
            Some(g) => Some(parse_quantity(&g)? as u64),
            None => None,
        };
        Ok(Some(TxReceipt {
            transaction_hash: self.transaction_hash,
            block_number,
            block_hash: self.block_hash,
            status,
            gas_used,
        }))
    }
}

/// Ledger client speaking Ethereum JSON-RPC.
pub struct JsonRpcLedger {
    client: JsonRpcClient,
    poll_interval: Duration,
}

impl JsonRpcLedger {
    pub fn new(client: JsonRpcClient, poll_interval_ms: u64) -> Self {
        Self {
            client,
            poll_interval: Duration::from_millis(poll_interval_ms),
        }
    }
}

async fn fetch_receipt(client: &JsonRpcClient, tx_hash: &str) -> Result<Option<TxReceipt>> {
    let receipt: Option<RpcReceipt> = client
        .call("eth_getTransactionReceipt", serde_json::json!([tx_hash]))
        .await?;
    match receipt {
        Some(r) => r.into_receipt(),
        None => Ok(None),
    }
}

#[async_trait]
impl Ledger for JsonRpcLedger {
    async fn gas_price(&self) -> Result<u128> {
        let price: Hex = self.client.call("eth_gasPrice", serde_json::json!([])).await?;
        parse_quantity(&price)
    }

    /// Broadcast and follow the transaction in a background task.
    ///
    /// The task stops as soon as the receiver is dropped, so an abandoned
    /// submission does not poll forever.
    async fn submit(&self, tx: &SignedTx) -> Result<EventStream> {
        let (events, stream) = mpsc::channel(4);
        let client = self.client.clone();
        let poll_interval = self.poll_interval;
        let raw = tx.raw.clone();

        tokio::spawn(async move {
            let hash: Hex = match client
                .call("eth_sendRawTransaction", serde_json::json!([raw]))
                .await
            {
                Ok(hash) => hash,
                Err(e) => {
                    let _ = events.send(LedgerEvent::Error(e.to_string())).await;
                    return;
                }
            };
            if events.send(LedgerEvent::TransactionHash(hash.clone())).await.is_err() {
                return;
            }

            loop {
                tokio::select! {
                    _ = events.closed() => {
                        debug!(tx_hash = %hash, "Submission abandoned, stopping receipt polling");
                        return;
                    }
                    _ = tokio::time::sleep(poll_interval) => {}
                }

                match fetch_receipt(&client, &hash).await {
                    Ok(Some(receipt)) => {
                        let _ = events.send(LedgerEvent::Receipt(receipt)).await;
                        return;
                    }
                    Ok(None) => {}
                    Err(e) => warn!(tx_hash = %hash, error = %e, "Receipt poll failed"),
                }
            }
        });

        Ok(stream)
    }

    async fn receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>> {
        fetch_receipt(&self.client, tx_hash).await
    }
}
