//! Relay queue daemon.

mod settings;

use relay_queue::{wake_channel, Dispatcher, Submitter};
use relay_store::{CouchStore, DocumentStore};
use relay_tx::{JsonRpcClient, JsonRpcLedger, JsonRpcSigner};
use settings::Settings;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting relay node");

    let settings = Settings::load().map_err(|e| {
        error!(error = %e, "Config error, check relay.toml and RELAY_* variables");
        e
    })?;
    settings.queue.validate()?;

    let couch = settings.store.couch_config();
    info!(
        store = %couch.url,
        requested = %couch.databases.requested,
        ledger = %settings.ledger.rpc_url,
        custodian = %settings.queue.custodial_account,
        contract = %settings.queue.relay_contract,
        "Configuration loaded"
    );

    let store: Arc<dyn DocumentStore> = Arc::new(CouchStore::new(couch)?);
    store.init().await?;

    let ledger = JsonRpcLedger::new(
        JsonRpcClient::new(&settings.ledger.rpc_url, Some(settings.ledger.timeout_ms)),
        settings.ledger.poll_interval_ms,
    );
    let signer = JsonRpcSigner::new(JsonRpcClient::new(
        settings.signer_url(),
        Some(settings.ledger.timeout_ms),
    ));

    let submitter = Submitter::new(
        Arc::clone(&store),
        Arc::new(signer),
        Arc::new(ledger),
        settings.queue.clone(),
    );
    let dispatcher = Dispatcher::new(Arc::clone(&store), submitter, settings.queue, None);

    // Intake runs out of process here, so ticks follow the interval only.
    let (_wake, wake_rx) = wake_channel();
    let cancel = CancellationToken::new();
    let worker = tokio::spawn(dispatcher.run(wake_rx, cancel.clone()));

    shutdown_signal().await;
    cancel.cancel();
    info!("Waiting for the current tick to finish");
    worker.await?;

    store.close().await?;
    info!("Relay node shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
