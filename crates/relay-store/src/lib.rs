//! Document store trait and implementations for the relay queue.
//!
//! Defines the `DocumentStore` trait that all storage backends must implement.
//! Provides a `MemoryStore` for testing and a `CouchStore` backed by CouchDB.

use async_trait::async_trait;
use relay_types::{Collection, Document, DocumentMeta, Result};

pub mod couch;
pub mod memory;

#[cfg(test)]
mod test_server;

pub use couch::{CouchConfig, CouchStore, DatabaseNames};
pub use memory::MemoryStore;

/// The core document store trait.
///
/// Collections are independent: there is no cross-collection transaction, so
/// callers order their inserts and deletes to get the consistency they need.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    // --- Lifecycle ---
    async fn init(&self) -> Result<()> { Ok(()) }
    async fn close(&self) -> Result<()> { Ok(()) }

    /// List every document in a collection, in store order.
    async fn list(&self, collection: Collection) -> Result<Vec<Document>>;

    /// Insert a document under a store-assigned id.
    async fn insert(&self, collection: Collection, body: &serde_json::Value) -> Result<DocumentMeta>;

    /// Insert a document under a caller-chosen id.
    ///
    /// Idempotent: if the id already exists the existing `{id, rev}` is
    /// returned and the stored body is left untouched.
    async fn put(
        &self,
        collection: Collection,
        id: &str,
        body: &serde_json::Value,
    ) -> Result<DocumentMeta>;

    /// Delete a document at a known revision.
    ///
    /// Fails with `Conflict` when the revision is stale and `NotFound` when the
    /// document is already gone.
    async fn destroy(&self, collection: Collection, id: &str, rev: &str) -> Result<()>;
}
