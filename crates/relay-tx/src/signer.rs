//! Remote signer: the custodial key lives in a node or signing daemon that
//! exposes `eth_signTransaction`.

use async_trait::async_trait;
use serde::Deserialize;
use relay_types::{Hex, RelayError, Result};

use crate::{JsonRpcClient, SignedTx, Signer, TxEnvelope};

/// `eth_signTransaction` result. Geth returns `{raw, tx}`, some signers
/// return the raw transaction alone.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignResult {
    Full { raw: Hex, tx: Option<SignedFields> },
    Raw(Hex),
}

#[derive(Debug, Deserialize)]
struct SignedFields {
    hash: Option<Hex>,
}

impl From<SignResult> for SignedTx {
    fn from(result: SignResult) -> Self {
        match result {
            SignResult::Full { raw, tx } => SignedTx {
                raw,
                hash: tx.and_then(|t| t.hash),
            },
            SignResult::Raw(raw) => SignedTx { raw, hash: None },
        }
    }
}

/// Signer backed by a JSON-RPC endpoint holding the custodial key.
pub struct JsonRpcSigner {
    client: JsonRpcClient,
}

impl JsonRpcSigner {
    pub fn new(client: JsonRpcClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Signer for JsonRpcSigner {
    async fn sign(&self, envelope: &TxEnvelope) -> Result<SignedTx> {
        let result: SignResult = self
            .client
            .call("eth_signTransaction", serde_json::json!([envelope.to_rpc()]))
            .await
            .map_err(|e| RelayError::Signing(e.to_string()))?;
        Ok(result.into())
    }
}
