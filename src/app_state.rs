//! Application State Management
//!
//! Builds the object protocol and its stores from configuration and hands
//! them to the HTTP layer. Dependencies are injected here; nothing else in
//! the crate holds global state.

use std::io;
use std::path::Path;
use std::sync::Arc;

use log::{info, warn};

use crate::config::{AppConfig, MetadataBackendKind};
use crate::metadata::memory_store::MemoryBackend;
use crate::metadata::sqlite_store::SqliteBackend;
use crate::metadata::MetadataStore;
use crate::protocol::{ObjectProtocol, PassthroughHeaders};
use crate::storage::ChunkedFileStore;

/// Application state shared by all workers
#[derive(Clone)]
pub struct AppState {
    pub protocol: Arc<ObjectProtocol>,
    pub config: AppConfig,
}

impl AppState {
    /// Create application state from configuration.
    ///
    /// A metadata backend that cannot be opened leaves the store in
    /// degraded mode instead of failing startup.
    pub fn from_config(config: AppConfig) -> io::Result<Self> {
        info!("Initializing application state with configuration");

        let metadata = match config.metadata.backend {
            MetadataBackendKind::Sqlite => {
                info!("Using SQLite metadata backend with db_path: {}", config.metadata.db_path);
                match SqliteBackend::open(Path::new(&config.metadata.db_path)) {
                    Ok(backend) => MetadataStore::new(Arc::new(backend)),
                    Err(e) => {
                        warn!("Cannot open metadata database, running without metadata: {}", e);
                        MetadataStore::disabled()
                    }
                }
            }
            MetadataBackendKind::Memory => {
                info!("Using in-memory metadata backend");
                MetadataStore::new(Arc::new(MemoryBackend::new()))
            }
            MetadataBackendKind::Disabled => {
                warn!("Metadata backend disabled, serving whole files only");
                MetadataStore::disabled()
            }
        };

        let state = Self::with_metadata(config, metadata)?;
        info!("Application state initialized successfully");
        Ok(state)
    }

    /// Create application state around an already built metadata store
    pub fn with_metadata(config: AppConfig, metadata: MetadataStore) -> io::Result<Self> {
        let files = ChunkedFileStore::new(&config.storage)?;
        let passthrough = PassthroughHeaders::new(&config.passthrough_headers);
        let protocol = Arc::new(ObjectProtocol::new(files, metadata, passthrough));

        Ok(Self {
            protocol,
            config,
        })
    }
}
