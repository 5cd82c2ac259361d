pub mod channel;
pub mod engine;
pub mod error;
pub mod models;
pub mod response;
pub mod services;
pub mod storage;
pub mod template;

use crate::channel::ChannelRegistry;
use crate::engine::{ActionDispatcher, CronReconciler, EventIngestor};
use crate::storage::Storage;
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Shared application state: storage plus the engine components built on it.
/// Services take this by reference; background loops are spawned from it.
pub struct AppCore {
    pub storage: Arc<Storage>,
    pub channels: Arc<ChannelRegistry>,
    pub dispatcher: Arc<ActionDispatcher>,
    pub ingestor: Arc<EventIngestor>,
}

impl AppCore {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let storage = Arc::new(Storage::new(db_path)?);
        let config = storage.config.current();

        let channels = Arc::new(ChannelRegistry::with_defaults(
            config.smtp_host.clone(),
            config.smtp_from.clone(),
        ));
        let dispatcher = Arc::new(ActionDispatcher::new(
            storage.clone(),
            channels.clone(),
            Duration::from_secs(config.dispatch_timeout_seconds),
        ));
        let ingestor = Arc::new(EventIngestor::new(storage.clone(), dispatcher.clone()));

        Ok(Self {
            storage,
            channels,
            dispatcher,
            ingestor,
        })
    }

    /// Spawn the ingest worker pool.
    pub fn start_ingestion(&self) {
        let prefetch = self.storage.config.current().prefetch;
        self.ingestor.start(prefetch);
    }

    /// Spawn the cron reconciliation loop.
    pub async fn start_reconciler(&self) -> Result<()> {
        let interval = Duration::from_secs(self.storage.config.current().reconcile_interval_seconds);
        let reconciler = CronReconciler::new(self.storage.clone(), interval).await?;
        tokio::spawn(reconciler.run());
        Ok(())
    }

    /// Spawn the stalled-delivery recovery loop: deliveries orphaned in the
    /// processing table by a dead worker get requeued after the stall timeout.
    pub fn start_stall_recovery(&self) {
        let storage = self.storage.clone();
        let stall_timeout = self.storage.config.current().stall_timeout_seconds;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(stall_timeout.max(1)));
            loop {
                ticker.tick().await;
                match storage.events.recover_stalled(stall_timeout as i64) {
                    Ok(0) => {}
                    Ok(recovered) => info!(recovered, "stalled deliveries requeued"),
                    Err(e) => error!(error = ?e, "stall recovery failed"),
                }
            }
        });
        info!(stall_timeout_seconds = stall_timeout, "stall recovery started");
    }

    /// Spawn the delayed-action due poller.
    pub fn start_due_poller(&self) {
        let dispatcher = self.dispatcher.clone();
        let interval = Duration::from_secs(self.storage.config.current().due_poll_interval_seconds);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let now = chrono::Utc::now().timestamp();
                if let Err(e) = dispatcher.run_due(now).await {
                    error!(error = ?e, "due poll failed");
                }
            }
        });
        info!(interval_seconds = interval.as_secs(), "due poller started");
    }
}
