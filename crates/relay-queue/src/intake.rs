//! Intake adapter: formats an external relay call as a Requested document.
//!
//! Owner and payload are stored as given. Checking that they are
//! well-formed is up to the caller; only blank values are refused, since a
//! document without them cannot be decoded later.

use relay_store::DocumentStore;
use relay_types::{now_secs, Collection, DocumentMeta, RelayError, RelayRequest, Result};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// A relay call as received from a client.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelaySubmission {
    pub owner: String,
    #[serde(default)]
    pub stake: String,
    pub payload: String,
}

/// An accepted submission.
#[derive(Debug, Clone)]
pub struct Accepted {
    pub meta: DocumentMeta,
    pub request: RelayRequest,
}

pub struct RelayIntake {
    store: Arc<dyn DocumentStore>,
    wake: Option<mpsc::Sender<()>>,
}

impl RelayIntake {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store, wake: None }
    }

    /// Wake the dispatcher after every accepted submission.
    pub fn with_wake(mut self, wake: mpsc::Sender<()>) -> Self {
        self.wake = Some(wake);
        self
    }

    pub async fn submit(&self, submission: RelaySubmission) -> Result<Accepted> {
        self.submit_at(submission, now_secs()).await
    }

    pub async fn submit_at(&self, submission: RelaySubmission, created_at: u64) -> Result<Accepted> {
        let RelaySubmission { owner, stake, payload } = &submission;
        if owner.trim().is_empty() {
            return Err(RelayError::InvalidRequest("owner is required".into()));
        }
        if payload.trim().is_empty() {
            return Err(RelayError::InvalidRequest("payload is required".into()));
        }
        let stake = match stake.trim() {
            "" => "0",
            _ => stake.as_str(),
        };

        let request = RelayRequest::new(owner, stake, payload, created_at);
        let meta = self.store.insert(Collection::Requested, &request.to_document()).await?;
        info!(request_id = %request.request_id, owner = %request.owner, "Relay request accepted");

        if let Some(ref wake) = self.wake {
            // A full slot already holds a pending wake.
            if wake.try_send(()).is_err() {
                debug!("Dispatcher wake already pending");
            }
        }

        Ok(Accepted { meta, request })
    }
}
