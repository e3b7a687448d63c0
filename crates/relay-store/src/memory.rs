//! In-memory document store for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::*;
use relay_types::RelayError;

/// In-memory document store (for testing and ephemeral use).
///
/// Listing returns documents in insertion order.
pub struct MemoryStore {
    collections: Mutex<HashMap<Collection, Vec<Document>>>,
    sequence: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            collections: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    fn next_seq(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn store_new(&self, collection: Collection, id: String, body: &serde_json::Value) -> DocumentMeta {
        let meta = DocumentMeta {
            id,
            rev: format!("1-{:016x}", self.next_seq()),
        };
        let mut collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        collections.entry(collection).or_default().push(Document {
            meta: meta.clone(),
            body: body.clone(),
        });
        meta
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn list(&self, collection: Collection) -> Result<Vec<Document>> {
        let collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        Ok(collections.get(&collection).cloned().unwrap_or_default())
    }

    async fn insert(&self, collection: Collection, body: &serde_json::Value) -> Result<DocumentMeta> {
        let id = format!("{:032x}", self.next_seq());
        Ok(self.store_new(collection, id, body))
    }

    async fn put(
        &self,
        collection: Collection,
        id: &str,
        body: &serde_json::Value,
    ) -> Result<DocumentMeta> {
        {
            let collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(existing) = collections
                .get(&collection)
                .and_then(|docs| docs.iter().find(|d| d.meta.id == id))
            {
                return Ok(existing.meta.clone());
            }
        }
        Ok(self.store_new(collection, id.to_string(), body))
    }

    async fn destroy(&self, collection: Collection, id: &str, rev: &str) -> Result<()> {
        let mut collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        let docs = collections.entry(collection).or_default();
        let pos = docs
            .iter()
            .position(|d| d.meta.id == id)
            .ok_or_else(|| RelayError::NotFound { collection, id: id.to_string() })?;
        if docs[pos].meta.rev != rev {
            return Err(RelayError::Conflict { collection, id: id.to_string() });
        }
        docs.remove(pos);
        Ok(())
    }
}
