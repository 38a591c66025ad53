//! Application wiring
//!
//! Opens the configured store once and hands the same `SharedStore` to every
//! component the CLI needs.

pub mod config;
pub mod loader;

pub use config::AppConfig;
pub use loader::load_config;

use anyhow::{Context, Result};
use paygate_core::{
    AccessGuard, AccessListener, ApprovalConsole, EventBus, IdentityCell, PlanCatalog,
    RequestWriter, SharedStore,
};
use std::sync::Arc;
use tracing::debug;

/// Store plus validated configuration
pub struct App {
    pub config: AppConfig,
    pub store: SharedStore,
    pub catalog: Arc<PlanCatalog>,
    pub events: EventBus,
}

impl App {
    /// Validate the configuration and open the store
    pub async fn init(config: AppConfig) -> Result<Self> {
        let catalog = config
            .pipeline()
            .catalog()
            .context("Invalid pipeline configuration")?;
        let store = paygate_store::open(&config.store)
            .await
            .context("Failed to open access store")?;
        debug!(backend = ?config.store.backend, plans = catalog.plans().len(), "app initialized");

        Ok(Self {
            config,
            store,
            catalog: Arc::new(catalog),
            events: EventBus::default(),
        })
    }

    pub fn writer(&self) -> RequestWriter {
        RequestWriter::new(
            self.store.clone(),
            self.config.paths.clone(),
            self.catalog.clone(),
            &self.config.client,
        )
        .with_event_bus(self.events.clone())
    }

    pub async fn console(&self) -> Result<ApprovalConsole> {
        let console = ApprovalConsole::open(
            self.store.clone(),
            self.config.paths.clone(),
            self.config.console.clone(),
        )
        .await
        .context("Failed to open approval console")?;
        Ok(console.with_event_bus(self.events.clone()))
    }

    pub fn listener(&self) -> AccessListener {
        AccessListener::new(
            self.store.clone(),
            self.config.paths.clone(),
            self.config.listener.clone(),
        )
    }

    pub fn guard(&self, identity: IdentityCell) -> AccessGuard {
        AccessGuard::new(self.store.clone(), self.config.paths.clone(), identity)
    }
}
