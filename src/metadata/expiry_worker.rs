//! Background expiry worker for metadata backends
//!
//! Expired keys already read as absent; this worker periodically removes
//! keys nobody touches again so the backend does not grow without bound.

use crate::metadata::MetadataBackend;
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

/// Periodically purges expired metadata keys
pub struct ExpiryWorker {
    backend: Arc<dyn MetadataBackend>,
    interval: Duration,
}

impl ExpiryWorker {
    pub fn new(backend: Arc<dyn MetadataBackend>, interval: Duration) -> Self {
        Self { backend, interval }
    }

    /// Run forever, purging once per interval
    pub async fn start(&self) {
        info!(
            "Starting {} metadata expiry worker with {}s interval",
            self.backend.name(),
            self.interval.as_secs()
        );

        let mut interval = time::interval(self.interval);
        loop {
            interval.tick().await;
            self.run_once().await;
        }
    }

    /// Purge once, returning the number of keys removed
    pub async fn run_once(&self) -> usize {
        let backend = Arc::clone(&self.backend);
        match tokio::task::spawn_blocking(move || backend.purge_expired()).await {
            Ok(Ok(purged)) => {
                if purged > 0 {
                    info!("Expiry worker removed {} metadata keys", purged);
                }
                purged
            }
            Ok(Err(e)) => {
                error!("Error purging expired metadata: {}", e);
                0
            }
            Err(e) => {
                error!("Expiry worker task failed: {}", e);
                0
            }
        }
    }
}

/// Start the expiry worker in the background
pub fn spawn_expiry_worker(backend: Arc<dyn MetadataBackend>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let worker = ExpiryWorker::new(backend, interval);
        worker.start().await;
    })
}
