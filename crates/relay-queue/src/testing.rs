//! In-process fakes shared by the queue tests.

use async_trait::async_trait;
use relay_store::{DocumentStore, MemoryStore};
use relay_tx::{EventStream, Ledger, LedgerEvent, SignedTx, Signer, TxEnvelope};
use relay_types::{
    Collection, Document, DocumentMeta, Hex, RelayError, RelayRequest, Result, TxReceipt,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::{Dispatcher, QueueConfig, Submitter};

pub(crate) const CUSTODIAN: &str = "0xc0ffee";
pub(crate) const CONTRACT: &str = "0x5e1f";

pub(crate) fn test_config() -> QueueConfig {
    QueueConfig {
        tick_interval_ms: 10,
        submission_timeout_ms: 200,
        max_sign_attempts: 3,
        gas_limit: 300_000,
        gas_price: Some(1_000_000_000),
        custodial_account: CUSTODIAN.into(),
        relay_contract: CONTRACT.into(),
    }
}

// --- Signer ---

pub(crate) struct FakeSigner {
    fail_first: u32,
    calls: AtomicU32,
    pub(crate) signed: Mutex<Vec<TxEnvelope>>,
}

impl FakeSigner {
    pub(crate) fn new() -> Self {
        Self::failing(0)
    }

    /// Fails the first `n` signing calls.
    pub(crate) fn failing(n: u32) -> Self {
        Self { fail_first: n, calls: AtomicU32::new(0), signed: Mutex::new(Vec::new()) }
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Signer for FakeSigner {
    async fn sign(&self, envelope: &TxEnvelope) -> Result<SignedTx> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.fail_first {
            return Err(RelayError::Signing("signer unavailable".into()));
        }
        self.signed.lock().unwrap().push(envelope.clone());
        Ok(SignedTx { raw: format!("0xsigned{}", &envelope.data[2..]), hash: None })
    }
}

// --- Ledger ---

/// What the fake ledger does with the next submission.
#[derive(Debug, Clone)]
pub(crate) enum Script {
    Receipt { block: u64 },
    ReceiptAfter { block: u64, delay: Duration },
    Error(String),
    /// Accepts the transaction and never reports a terminal event.
    Silent,
}

/// Ledger whose submissions follow a script. Hashes are `0x1`, `0x2`, ... in
/// submission order; an exhausted script mines immediately.
pub(crate) struct FakeLedger {
    script: Mutex<VecDeque<Script>>,
    submissions: AtomicU32,
    in_flight: Arc<AtomicU32>,
    max_in_flight: Arc<AtomicU32>,
    mined: Mutex<HashMap<Hex, TxReceipt>>,
    pub(crate) raw: Mutex<Vec<Hex>>,
}

impl FakeLedger {
    pub(crate) fn new() -> Self {
        Self::scripted(Vec::new())
    }

    pub(crate) fn scripted(script: Vec<Script>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            submissions: AtomicU32::new(0),
            in_flight: Arc::new(AtomicU32::new(0)),
            max_in_flight: Arc::new(AtomicU32::new(0)),
            mined: Mutex::new(HashMap::new()),
            raw: Mutex::new(Vec::new()),
        }
    }

    /// Make `tx_hash` visible to one-shot receipt lookups.
    pub(crate) fn mine_later(&self, tx_hash: &str, block: u64) {
        self.mined.lock().unwrap().insert(tx_hash.to_string(), receipt(tx_hash, block));
    }

    pub(crate) fn submissions(&self) -> u32 {
        self.submissions.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

pub(crate) fn receipt(tx_hash: &str, block: u64) -> TxReceipt {
    TxReceipt {
        transaction_hash: tx_hash.to_string(),
        block_number: block,
        block_hash: None,
        status: Some(true),
        gas_used: None,
    }
}

#[async_trait]
impl Ledger for FakeLedger {
    async fn gas_price(&self) -> Result<u128> {
        Ok(7_000_000_000)
    }

    async fn submit(&self, tx: &SignedTx) -> Result<EventStream> {
        let n = self.submissions.fetch_add(1, Ordering::SeqCst) + 1;
        self.raw.lock().unwrap().push(tx.raw.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let hash = format!("0x{:x}", n);
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Receipt { block: 100 + n as u64 });
        let in_flight = Arc::clone(&self.in_flight);
        let (events, stream) = mpsc::channel(4);

        tokio::spawn(async move {
            let _ = events.send(LedgerEvent::TransactionHash(hash.clone())).await;
            let terminal = match step {
                Script::Receipt { block } => Some(LedgerEvent::Receipt(receipt(&hash, block))),
                Script::ReceiptAfter { block, delay } => {
                    tokio::time::sleep(delay).await;
                    Some(LedgerEvent::Receipt(receipt(&hash, block)))
                }
                Script::Error(message) => Some(LedgerEvent::Error(message)),
                Script::Silent => None,
            };
            match terminal {
                Some(event) => {
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    let _ = events.send(event).await;
                }
                None => {
                    events.closed().await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            }
        });

        Ok(stream)
    }

    async fn receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>> {
        Ok(self.mined.lock().unwrap().get(tx_hash).cloned())
    }
}

// --- Store ---

/// Memory store that can fail the next `put` or `destroy` on a collection,
/// standing in for a crash between the two steps of a transition.
pub(crate) struct FaultyStore {
    inner: MemoryStore,
    fail_put: Mutex<Option<Collection>>,
    fail_destroy: Mutex<Option<Collection>>,
}

impl FaultyStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_put: Mutex::new(None),
            fail_destroy: Mutex::new(None),
        }
    }

    pub(crate) fn fail_next_put(&self, collection: Collection) {
        *self.fail_put.lock().unwrap() = Some(collection);
    }

    pub(crate) fn fail_next_destroy(&self, collection: Collection) {
        *self.fail_destroy.lock().unwrap() = Some(collection);
    }

    fn trip(slot: &Mutex<Option<Collection>>, collection: Collection) -> bool {
        let mut slot = slot.lock().unwrap();
        if *slot == Some(collection) {
            *slot = None;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl DocumentStore for FaultyStore {
    async fn list(&self, collection: Collection) -> Result<Vec<Document>> {
        self.inner.list(collection).await
    }

    async fn insert(&self, collection: Collection, body: &serde_json::Value) -> Result<DocumentMeta> {
        self.inner.insert(collection, body).await
    }

    async fn put(
        &self,
        collection: Collection,
        id: &str,
        body: &serde_json::Value,
    ) -> Result<DocumentMeta> {
        if Self::trip(&self.fail_put, collection) {
            return Err(RelayError::Store(format!("injected put failure on {}", collection)));
        }
        self.inner.put(collection, id, body).await
    }

    async fn destroy(&self, collection: Collection, id: &str, rev: &str) -> Result<()> {
        if Self::trip(&self.fail_destroy, collection) {
            return Err(RelayError::Store(format!("injected destroy failure on {}", collection)));
        }
        self.inner.destroy(collection, id, rev).await
    }
}

// --- Helpers ---

/// Write a request in the intake shape straight into Requested.
pub(crate) async fn seed_request(
    store: &dyn DocumentStore,
    owner: &str,
    payload: &str,
    created_at: u64,
) -> RelayRequest {
    let body = serde_json::json!({
        "owner": owner,
        "stake": "0",
        "payload": payload,
        "createdAt": created_at,
    });
    store.insert(Collection::Requested, &body).await.unwrap();
    RelayRequest::new(owner, "0", payload, created_at)
}

pub(crate) async fn count(store: &dyn DocumentStore, collection: Collection) -> usize {
    store.list(collection).await.unwrap().len()
}

/// Collections currently holding a document for `request_id`.
pub(crate) async fn locate(store: &dyn DocumentStore, request_id: &str) -> Vec<Collection> {
    let mut found = Vec::new();
    for collection in Collection::ALL {
        let docs = store.list(collection).await.unwrap();
        let holds = |d: &Document| {
            d.body["requestId"] == request_id
                || RelayRequest::from_document(&d.body)
                    .map(|r| r.request_id == request_id)
                    .unwrap_or(false)
        };
        if docs.iter().any(holds) {
            found.push(collection);
        }
    }
    found
}

pub(crate) fn submitter(
    store: Arc<dyn DocumentStore>,
    signer: Arc<FakeSigner>,
    ledger: Arc<FakeLedger>,
) -> Submitter {
    Submitter::new(store, signer, ledger, test_config())
}

pub(crate) fn dispatcher(
    store: Arc<dyn DocumentStore>,
    signer: Arc<FakeSigner>,
    ledger: Arc<FakeLedger>,
) -> Dispatcher {
    let submitter = submitter(Arc::clone(&store), signer, ledger);
    Dispatcher::new(store, submitter, test_config(), None)
}
