//! The dispatcher loop.
//!
//! Each tick drains Requested into Queued, reconciles the in-memory backlog
//! with the Queued collection and submits at most one record. The next tick
//! is scheduled only after the previous one has finished, so the custodial
//! account never has two submissions in flight.

use relay_store::DocumentStore;
use relay_types::{Collection, Document, Outcome, QueueRecord, RelayError, RelayRequest};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::submitter::{SubmitOutcome, Submitter};
use crate::transitions;
use crate::QueueConfig;

const DESIGN_PREFIX: &str = "_design/";

/// Dispatcher event for progress reporting.
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    Queued { request_id: String },
    Skipped { id: String, reason: String },
    SignFailed { request_id: String, attempts: u32 },
    Finalized { request_id: String, collection: Collection },
    Error { message: String },
}

/// Callback type for dispatcher events.
pub type DispatchEventHandler = Box<dyn Fn(DispatchEvent) + Send + Sync>;

/// What a single tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub migrated: usize,
    pub skipped: usize,
    pub reconciled: usize,
    /// A record was taken from the head of the backlog.
    pub dispatched: bool,
    /// Collection the dispatched record ended up in, if it left Queued.
    pub finalized: Option<Collection>,
    /// Records still waiting after the tick.
    pub backlog: usize,
}

/// Single consumer of the relay queue.
pub struct Dispatcher {
    store: Arc<dyn DocumentStore>,
    submitter: Submitter,
    config: QueueConfig,
    on_event: Option<DispatchEventHandler>,
    backlog: VecDeque<QueueRecord>,
    sign_failures: HashMap<String, u32>,
}

/// Channel used by intake to start the next tick early. One slot is enough:
/// pending wakes coalesce.
pub fn wake_channel() -> (mpsc::Sender<()>, mpsc::Receiver<()>) {
    mpsc::channel(1)
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        submitter: Submitter,
        config: QueueConfig,
        on_event: Option<DispatchEventHandler>,
    ) -> Self {
        Self {
            store,
            submitter,
            config,
            on_event,
            backlog: VecDeque::new(),
            sign_failures: HashMap::new(),
        }
    }

    fn emit(&self, event: DispatchEvent) {
        if let Some(ref handler) = self.on_event {
            handler(event);
        }
    }

    /// Request ids waiting in the in-memory backlog, head first.
    pub fn backlog(&self) -> Vec<String> {
        self.backlog.iter().map(|r| r.request.request_id.clone()).collect()
    }

    /// Run ticks until `cancel` fires. One tick runs immediately; after that
    /// the loop waits for the interval or a wake signal, whichever is first.
    pub async fn run(mut self, mut wake: mpsc::Receiver<()>, cancel: CancellationToken) {
        let interval = Duration::from_millis(self.config.tick_interval_ms);
        info!(interval_ms = self.config.tick_interval_ms, "Dispatcher started");

        loop {
            let report = self.tick().await;
            debug!(?report, "Tick complete");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Dispatcher shutting down");
                    return;
                }
                Some(()) = wake.recv() => {
                    debug!("Woken by intake");
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// One pass: migrate, reconcile, then submit the head of the backlog.
    /// Errors are logged and never abort the loop.
    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        self.migrate(&mut report).await;
        self.reconcile(&mut report).await;

        match self.backlog.pop_front() {
            Some(record) => {
                report.dispatched = true;
                report.finalized = self.dispatch(record).await;
            }
            None => debug!("Queue empty"),
        }

        report.backlog = self.backlog.len();
        report
    }

    fn is_pending(&self, request_id: &str) -> bool {
        self.backlog.iter().any(|r| r.request.request_id == request_id)
    }

    /// Move every actionable Requested document into Queued.
    async fn migrate(&mut self, report: &mut TickReport) {
        let docs = match self.store.list(Collection::Requested).await {
            Ok(docs) => docs,
            Err(e) => {
                error!(error = %e, "Failed to list requested");
                self.emit(DispatchEvent::Error { message: e.to_string() });
                return;
            }
        };

        for doc in docs {
            let Some(request) = self.actionable(&doc, report) else {
                continue;
            };
            match transitions::promote(self.store.as_ref(), &doc, request).await {
                Ok(record) => {
                    report.migrated += 1;
                    let request_id = record.request.request_id.clone();
                    if !self.is_pending(&request_id) {
                        self.backlog.push_back(record);
                    }
                    self.emit(DispatchEvent::Queued { request_id });
                }
                Err(e) => {
                    error!(id = %doc.meta.id, error = %e, "Failed to queue request");
                    self.emit(DispatchEvent::Error { message: e.to_string() });
                }
            }
        }
    }

    fn actionable(&self, doc: &Document, report: &mut TickReport) -> Option<RelayRequest> {
        if doc.meta.id.starts_with(DESIGN_PREFIX) {
            report.skipped += 1;
            return None;
        }
        match RelayRequest::from_document(&doc.body) {
            Ok(request) => Some(request),
            Err(e) => {
                warn!(id = %doc.meta.id, error = %e, "Skipping requested document");
                report.skipped += 1;
                self.emit(DispatchEvent::Skipped { id: doc.meta.id.clone(), reason: e.to_string() });
                None
            }
        }
    }

    /// Append Queued records the backlog does not hold yet, oldest first.
    /// Entries already pending are left as they are.
    async fn reconcile(&mut self, report: &mut TickReport) {
        let docs = match self.store.list(Collection::Queued).await {
            Ok(docs) => docs,
            Err(e) => {
                error!(error = %e, "Failed to list queued");
                self.emit(DispatchEvent::Error { message: e.to_string() });
                return;
            }
        };

        let mut missing = Vec::new();
        for doc in docs {
            if doc.meta.id.starts_with(DESIGN_PREFIX) {
                continue;
            }
            let request = match RelayRequest::from_document(&doc.body) {
                Ok(request) => request,
                Err(e) => {
                    warn!(id = %doc.meta.id, error = %e, "Undecodable queued document");
                    continue;
                }
            };
            if !self.is_pending(&request.request_id) {
                missing.push(QueueRecord { meta: doc.meta, request });
            }
        }

        missing.sort_by_key(|r| r.request.created_at);
        report.reconciled = missing.len();
        for record in missing {
            if !self.is_pending(&record.request.request_id) {
                info!(request_id = %record.request.request_id, "Recovered queued record");
                self.backlog.push_back(record);
            }
        }
    }

    async fn dispatch(&mut self, record: QueueRecord) -> Option<Collection> {
        let request_id = record.request.request_id.clone();

        match self.submitter.submit(&record).await {
            Ok(SubmitOutcome::Finalized(terminal)) => {
                self.sign_failures.remove(&request_id);
                let collection = terminal.collection();
                self.emit(DispatchEvent::Finalized { request_id, collection });
                Some(collection)
            }
            Ok(SubmitOutcome::NotSent(e)) => self.sign_failed(record, e).await,
            Err(e) => {
                // The Queued record survives and is picked up by reconcile.
                self.emit(DispatchEvent::Error { message: e.to_string() });
                None
            }
        }
    }

    async fn sign_failed(&mut self, record: QueueRecord, e: RelayError) -> Option<Collection> {
        let request_id = record.request.request_id.clone();
        let attempts = self.sign_failures.get(&request_id).copied().unwrap_or(0) + 1;
        self.emit(DispatchEvent::SignFailed { request_id: request_id.clone(), attempts });

        if attempts < self.config.max_sign_attempts {
            self.sign_failures.insert(request_id, attempts);
            self.backlog.push_front(record);
            return None;
        }

        warn!(request_id = %request_id, attempts, "Signing attempts exhausted, dead-lettering");
        let outcome = Outcome::DeadLettered { error: e.to_string(), attempts };
        match transitions::finalize(self.store.as_ref(), &record, outcome).await {
            Ok(terminal) => {
                self.sign_failures.remove(&request_id);
                let collection = terminal.collection();
                self.emit(DispatchEvent::Finalized { request_id, collection });
                Some(collection)
            }
            Err(e) => {
                error!(request_id = %request_id, error = %e, "Failed to dead-letter record");
                self.sign_failures.insert(request_id, attempts);
                self.emit(DispatchEvent::Error { message: e.to_string() });
                None
            }
        }
    }
}
