//! Store transitions between collections.
//!
//! There is no cross-collection transaction. Each transition is two steps and
//! the step order fixes which failure a crash in between produces:
//!
//! - `Requested -> Queued` deletes first, then inserts. A crash in between
//!   loses the request but can never queue it twice.
//! - `Queued -> terminal` inserts first, then deletes. A crash in between
//!   leaves the Queued record behind and it is submitted again.
//!
//! Inserts are keyed by the request id and deletes of missing records count
//! as done, so replaying either step is harmless.

use relay_store::DocumentStore;
use relay_types::{
    Collection, Document, Outcome, QueueRecord, RelayError, RelayRequest, Result, TerminalRecord,
};
use tracing::{debug, info};

/// Move a Requested document into Queued.
pub async fn promote(
    store: &dyn DocumentStore,
    doc: &Document,
    request: RelayRequest,
) -> Result<QueueRecord> {
    match store.destroy(Collection::Requested, &doc.meta.id, &doc.meta.rev).await {
        Ok(()) => {}
        Err(RelayError::NotFound { .. }) => {
            debug!(id = %doc.meta.id, "Requested record already removed");
        }
        Err(e) => return Err(e),
    }

    let meta = store
        .put(Collection::Queued, &request.request_id, &request.to_document())
        .await?;
    info!(request_id = %request.request_id, owner = %request.owner, queue_id = %meta.id, "Request queued");
    Ok(QueueRecord { meta, request })
}

/// Write the terminal record for a Queued record, then remove it from Queued.
///
/// If the delete fails the terminal record is already written and the error
/// is returned; the Queued record stays and will be picked up again.
pub async fn finalize(
    store: &dyn DocumentStore,
    record: &QueueRecord,
    outcome: Outcome,
) -> Result<TerminalRecord> {
    let terminal = TerminalRecord { record: record.clone(), outcome };
    let collection = terminal.collection();
    store
        .put(collection, &record.request.request_id, &terminal.to_document())
        .await?;

    match store.destroy(Collection::Queued, &record.meta.id, &record.meta.rev).await {
        Ok(()) => {}
        Err(RelayError::NotFound { .. }) => {
            debug!(id = %record.meta.id, "Queued record already removed");
        }
        Err(e) => return Err(e),
    }

    info!(request_id = %record.request.request_id, %collection, "Request finalized");
    Ok(terminal)
}
