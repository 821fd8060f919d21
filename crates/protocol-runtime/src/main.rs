//! # Protocol Runtime
//!
//! Hosts the protocol manager of the engine.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration (from env) and initialize logging
//! 2. Build the container, restoring saved state
//! 3. Start the event router
//! 4. Announce the first appearance on screen (startup reconciliation)
//! 5. Run until Ctrl+C, then drain queued work and save state

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use protocol_manager::ProtocolManagerApi;
use protocol_runtime::{EventRouter, ProtocolContainer, RuntimeConfig};
use shared_bus::{EventPublisher, ProtocolEvent};
use shared_types::FlowId;

/// The running protocol manager and its event router.
struct ProtocolRuntime {
    container: Arc<ProtocolContainer>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

impl ProtocolRuntime {
    fn new(container: ProtocolContainer) -> Self {
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        Self {
            container: Arc::new(container),
            shutdown_tx,
            shutdown_rx,
        }
    }

    async fn start(&self) -> Result<()> {
        info!("===========================================");
        info!("  Protocol Runtime v{}", env!("CARGO_PKG_VERSION"));
        info!("===========================================");

        let router = EventRouter::new(Arc::new(self.container.manager.clone()));
        let subscription = self.container.event_bus.subscribe(EventRouter::filter());
        tokio::spawn(router.run(subscription, self.shutdown_rx.clone()));

        self.container
            .event_bus
            .publish(ProtocolEvent::ApplicationAppearedOnScreen {
                first_time: true,
                flow_id: FlowId::new(),
            })
            .await;

        info!(
            max_concurrent_steps = self.container.config.manager.max_concurrent_steps,
            state_file = ?self.container.config.state_file,
            "Protocol runtime started"
        );
        Ok(())
    }

    /// ## Shutdown Sequence
    ///
    /// 1. Stop the event router
    /// 2. Wait for queued work (with timeout)
    /// 3. Save state
    async fn shutdown(&self) -> Result<()> {
        info!("Initiating graceful shutdown...");

        if let Err(e) = self.shutdown_tx.send(true) {
            error!("Failed to send shutdown signal: {}", e);
        }

        let timeout = self.container.config.shutdown_timeout;
        if tokio::time::timeout(timeout, self.container.manager.wait_until_idle())
            .await
            .is_err()
        {
            warn!(?timeout, "Queued protocol work did not finish before shutdown");
        }

        self.container
            .persist_state()
            .await
            .context("Failed to save protocol state")?;

        info!("Shutdown complete");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = RuntimeConfig::from_env();
    protocol_telemetry::init_logging(&config.telemetry).context("Failed to initialize logging")?;

    let container = ProtocolContainer::new(config)
        .await
        .context("Failed to build protocol container")?;

    let runtime = ProtocolRuntime::new(container);
    runtime.start().await?;

    info!("Protocol runtime is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    runtime.shutdown().await
}
