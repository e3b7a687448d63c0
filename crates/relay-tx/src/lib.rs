//! Transaction envelope, signing and ledger submission.
//!
//! - Build the raw envelope for a relayed payload
//! - Sign it through a `Signer`
//! - Submit it through a `Ledger` and follow its lifecycle events

use async_trait::async_trait;
use relay_types::{Hex, RelayError, Result, TxReceipt};
use tokio::sync::mpsc;

pub mod ledger;
pub mod rpc_client;
pub mod signer;

#[cfg(test)]
mod test_server;

pub use ledger::JsonRpcLedger;
pub use rpc_client::JsonRpcClient;
pub use signer::JsonRpcSigner;

/// Unsigned transaction envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxEnvelope {
    pub from: Hex,
    pub to: Hex,
    pub gas: u64,
    pub gas_price: u128,
    pub data: Hex,
}

impl TxEnvelope {
    /// JSON-RPC transaction object (`eth_signTransaction` params).
    pub fn to_rpc(&self) -> serde_json::Value {
        serde_json::json!({
            "from": self.from,
            "to": self.to,
            "gas": to_quantity(self.gas as u128),
            "gasPrice": to_quantity(self.gas_price),
            "data": self.data,
        })
    }
}

/// Signed envelope ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    pub raw: Hex,
    pub hash: Option<Hex>,
}

/// Lifecycle events of one submission.
///
/// Delivered in the order `TransactionHash -> (Receipt | Error)`; at most one
/// terminal event is sent, after which the stream closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    /// The network accepted the transaction for propagation.
    TransactionHash(Hex),
    /// The transaction was mined.
    Receipt(TxReceipt),
    /// The transaction failed to propagate or to mine.
    Error(String),
}

/// Receiving end of a submission's lifecycle events.
pub type EventStream = mpsc::Receiver<LedgerEvent>;

/// Holds the custodial key and signs envelopes.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, envelope: &TxEnvelope) -> Result<SignedTx>;
}

/// Submits signed transactions and reports their lifecycle.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Current network gas price in wei.
    async fn gas_price(&self) -> Result<u128>;

    /// Submit a signed transaction and return its event stream.
    async fn submit(&self, tx: &SignedTx) -> Result<EventStream>;

    /// One-shot receipt lookup; `None` while the transaction is unknown or pending.
    async fn receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>>;
}

/// Parse a 0x-prefixed hex quantity.
pub fn parse_quantity(s: &str) -> Result<u128> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| RelayError::InvalidHex(format!("{}: {}", s, e)))
}

/// Format a hex quantity (no leading zeros, `0x0` for zero).
pub fn to_quantity(v: u128) -> String {
    format!("{:#x}", v)
}
