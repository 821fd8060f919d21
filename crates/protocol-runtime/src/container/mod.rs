//! # Protocol Container
//!
//! Builds the protocol manager and its collaborators from a [`RuntimeConfig`].
//!
//! State survives restarts through the optional state file: the store is
//! imported from it at startup and exported to it on shutdown.

pub mod config;

pub use config::{RuntimeConfig, RuntimeConfigError};

use protocol_manager::adapters::{
    EventBusNotifier, InMemoryContactDirectory, MemoryStore, OutboxChannelSender,
    ScriptedStepEngine,
};
use protocol_manager::{ConfigError, ProtocolManagerService, StoreError};
use shared_bus::InMemoryEventBus;
use shared_types::{OsPrng, SystemTimeSource, TimeSource};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Runtime construction and persistence errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] RuntimeConfigError),

    #[error(transparent)]
    Manager(#[from] ConfigError),

    #[error("Could not read state file {path}: {source}")]
    StateRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Could not write state file {path}: {source}")]
    StateWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Snapshot(#[from] StoreError),
}

/// Every collaborator of the running protocol manager.
pub struct ProtocolContainer {
    pub config: RuntimeConfig,
    pub event_bus: Arc<InMemoryEventBus>,
    pub store: MemoryStore,
    pub contacts: Arc<InMemoryContactDirectory>,
    /// Concrete protocols register their steps here.
    pub step_engine: Arc<ScriptedStepEngine>,
    pub manager: ProtocolManagerService,
}

impl ProtocolContainer {
    /// Validate `config`, restore the store and build the manager.
    pub async fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        config.validate()?;

        let store = match &config.state_file {
            Some(path) => load_store(path).await?,
            None => MemoryStore::new(),
        };
        let event_bus = Arc::new(InMemoryEventBus::with_capacity(
            config.manager.event_bus_capacity,
        ));
        let contacts = Arc::new(InMemoryContactDirectory::new());
        let step_engine = Arc::new(ScriptedStepEngine::new());
        let clock: Arc<dyn TimeSource> = Arc::new(SystemTimeSource);

        let manager = ProtocolManagerService::builder(config.manager.clone())
            .context_creator(Arc::new(store.clone()))
            .channel_sender(Arc::new(OutboxChannelSender::new(Arc::clone(&clock))))
            .step_engine(step_engine.clone())
            .contact_directory(contacts.clone())
            .notifier(Arc::new(EventBusNotifier::new(Arc::clone(&event_bus))))
            .prng(Arc::new(OsPrng))
            .clock(clock)
            .build()?;

        Ok(Self {
            config,
            event_bus,
            store,
            contacts,
            step_engine,
            manager,
        })
    }

    /// Write the committed store to the state file, if one is configured.
    pub async fn persist_state(&self) -> Result<(), RuntimeError> {
        let Some(path) = &self.config.state_file else {
            return Ok(());
        };
        let json = self.store.export_json().await?;
        tokio::fs::write(path, json)
            .await
            .map_err(|source| RuntimeError::StateWrite {
                path: path.clone(),
                source,
            })?;
        info!(path = %path.display(), "Protocol state saved");
        Ok(())
    }
}

async fn load_store(path: &Path) -> Result<MemoryStore, RuntimeError> {
    match tokio::fs::read_to_string(path).await {
        Ok(json) => {
            let store = MemoryStore::import_json(&json)?;
            info!(path = %path.display(), "Protocol state restored");
            Ok(store)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "No saved protocol state, starting empty");
            Ok(MemoryStore::new())
        }
        Err(source) => Err(RuntimeError::StateRead {
            path: path.to_path_buf(),
            source,
        }),
    }
}
