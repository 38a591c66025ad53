//! Paygate Store - `AccessStore` adapters
//!
//! - `MemoryStore`: process-local, for tests and single-process demos
//! - `SqliteStore`: a file shared by every actor on the machine
//!
//! Both implement the same contract: atomic `transact`, and subscriptions
//! that deliver the current value first and every later change after it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod feed;
pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::{SqliteStore, DEFAULT_POLL_INTERVAL_MS};

use paygate_core::{SharedStore, StoreResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Which adapter to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Process-local store; nothing survives the process
    Memory,
    /// SQLite file
    #[default]
    Sqlite,
}

/// `[store]` configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Adapter
    #[serde(default)]
    pub backend: Backend,
    /// SQLite file; defaults to ~/.paygate/access.db
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Subscription poll interval for SQLite
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            path: None,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Open the configured adapter
///
/// # Errors
///
/// Returns error if the SQLite file cannot be opened or migrated.
pub async fn open(config: &StoreConfig) -> StoreResult<SharedStore> {
    match config.backend {
        Backend::Memory => {
            info!("using in-memory access store");
            Ok(Arc::new(MemoryStore::new()))
        }
        Backend::Sqlite => {
            let path = match &config.path {
                Some(path) => path.clone(),
                None => SqliteStore::default_path()?,
            };
            let poll = Duration::from_millis(config.poll_interval_ms.max(1));
            Ok(Arc::new(SqliteStore::with_options(path, poll).await?))
        }
    }
}
