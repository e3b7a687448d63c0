//! Shared types for the relay queue.
//!
//! Request records move through the store collections
//! `Requested -> Queued -> {Committed | Failed | DeadLetter}`; the types here
//! describe each stage and the persisted document shapes.

use serde::{Deserialize, Deserializer, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;
use thiserror::Error;

/// 0x-prefixed hex string (e.g. "0x1234...").
pub type Hex = String;

/// Relay queue error types.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid relay request: {0}")]
    InvalidRequest(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("revision conflict on {collection}/{id}")]
    Conflict { collection: Collection, id: String },

    #[error("record not found: {collection}/{id}")]
    NotFound { collection: Collection, id: String },

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;

/// The persisted collections a request record can live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Requested,
    Queued,
    Committed,
    Failed,
    DeadLetter,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Requested,
        Collection::Queued,
        Collection::Committed,
        Collection::Failed,
        Collection::DeadLetter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Requested => "requested",
            Collection::Queued => "queued",
            Collection::Committed => "committed",
            Collection::Failed => "failed",
            Collection::DeadLetter => "dead_letter",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store-assigned identity of a document: id plus revision token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub id: String,
    pub rev: String,
}

/// A stored document: identity plus its JSON body (without `_id`/`_rev`).
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub meta: DocumentMeta,
    pub body: serde_json::Value,
}

/// Current field name and its older spelling.
const LEGACY_FIELDS: [(&str, &str); 3] =
    [("stake", "staek"), ("payload", "data"), ("dateCreated", "createdAt")];

/// A pre-signed relay request as written by the intake adapter.
///
/// Older documents used `staek`, `data`, `createdAt` and numeric stakes;
/// they decode into the same shape. When a body carries both spellings of a
/// field the current one wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    #[serde(default)]
    pub request_id: Hex,
    pub owner: String,
    #[serde(alias = "staek", deserialize_with = "string_or_number")]
    pub stake: String,
    #[serde(alias = "data")]
    pub payload: Hex,
    #[serde(rename = "dateCreated", alias = "createdAt")]
    pub created_at: u64,
}

impl RelayRequest {
    pub fn new(owner: &str, stake: &str, payload: &str, created_at: u64) -> Self {
        Self {
            request_id: derive_request_id(owner, stake, payload, created_at),
            owner: owner.to_string(),
            stake: stake.to_string(),
            payload: payload.to_string(),
            created_at,
        }
    }

    /// Decode a request from a stored document body.
    ///
    /// Bodies that already carry an outcome marker (`receipt` or `error`) are
    /// rejected: they are processed records, not actionable requests.
    pub fn from_document(body: &serde_json::Value) -> Result<Self> {
        let obj = body
            .as_object()
            .ok_or_else(|| RelayError::InvalidRequest("document body is not an object".into()))?;
        for marker in ["receipt", "error"] {
            if obj.contains_key(marker) {
                return Err(RelayError::InvalidRequest(format!(
                    "document already carries `{}`",
                    marker
                )));
            }
        }

        let mut fields = obj.clone();
        for (current, legacy) in LEGACY_FIELDS {
            if fields.contains_key(current) {
                fields.remove(legacy);
            }
        }

        let mut request: RelayRequest = serde_json::from_value(serde_json::Value::Object(fields))
            .map_err(|e| RelayError::InvalidRequest(e.to_string()))?;
        if request.owner.is_empty() || request.payload.is_empty() {
            return Err(RelayError::InvalidRequest("missing owner or payload".into()));
        }
        if request.request_id.is_empty() {
            request.request_id = derive_request_id(
                &request.owner,
                &request.stake,
                &request.payload,
                request.created_at,
            );
        }
        Ok(request)
    }

    /// The body written to the Requested and Queued collections.
    pub fn to_document(&self) -> serde_json::Value {
        serde_json::json!({
            "requestId": self.request_id,
            "owner": self.owner,
            "stake": self.stake,
            "payload": self.payload,
            "dateCreated": self.created_at,
        })
    }
}

/// A request that has been inserted into the Queued collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRecord {
    pub meta: DocumentMeta,
    pub request: RelayRequest,
}

/// Receipt of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub transaction_hash: Hex,
    pub block_number: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<Hex>,
    /// `None` for pre-Byzantium receipts that carry no status field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<u64>,
}

/// Final outcome of a queued request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Committed { receipt: TxReceipt },
    Failed { error: String, tx_hash: Option<Hex> },
    DeadLettered { error: String, attempts: u32 },
}

impl Outcome {
    pub fn collection(&self) -> Collection {
        match self {
            Outcome::Committed { .. } => Collection::Committed,
            Outcome::Failed { .. } => Collection::Failed,
            Outcome::DeadLettered { .. } => Collection::DeadLetter,
        }
    }
}

/// A queue record together with its terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalRecord {
    pub record: QueueRecord,
    pub outcome: Outcome,
}

impl TerminalRecord {
    pub fn collection(&self) -> Collection {
        self.outcome.collection()
    }

    /// The persisted body for the terminal collection.
    pub fn to_document(&self) -> serde_json::Value {
        let req = &self.record.request;
        let mut doc = serde_json::json!({
            "requestId": req.request_id,
            "owner": req.owner,
            "stake": req.stake,
            "payload": req.payload,
            "dateCreated": req.created_at,
        });
        match &self.outcome {
            Outcome::Committed { receipt } => {
                doc["receipt"] = serde_json::to_value(receipt).unwrap_or_default();
            }
            Outcome::Failed { error, tx_hash } => {
                doc["txHash"] = tx_hash.clone().into();
                doc["error"] = error.clone().into();
            }
            Outcome::DeadLettered { error, attempts } => {
                doc["error"] = error.clone().into();
                doc["attempts"] = (*attempts).into();
            }
        }
        doc
    }
}

/// Stable request identifier: Keccak-256 over owner, stake, payload and
/// creation time. Identical signed payloads submitted in the same second
/// collapse into one request.
pub fn derive_request_id(owner: &str, stake: &str, payload: &str, created_at: u64) -> Hex {
    let mut hasher = Keccak256::new();
    hasher.update(owner.to_ascii_lowercase().as_bytes());
    hasher.update([0u8]);
    hasher.update(stake.as_bytes());
    hasher.update([0u8]);
    hasher.update(payload.to_ascii_lowercase().as_bytes());
    hasher.update([0u8]);
    hasher.update(created_at.to_be_bytes());
    bytes_to_hex(&hasher.finalize())
}

/// Convert bytes to a 0x-prefixed hex string.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Current unix time in seconds.
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Amount {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Amount::deserialize(deserializer)? {
        Amount::Text(s) => s,
        Amount::Number(n) => n.to_string(),
    })
}
