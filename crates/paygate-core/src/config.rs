//! Component configuration
//!
//! Deserialized from the `[paths]`, `[client]`, `[listener]`, `[console]` and
//! `[[plans]]` sections of the application config.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;
use crate::path::PathScheme;
use crate::plans::{Plan, PlanCatalog};

/// What `deny` does to an existing grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DenyPolicy {
    /// Write `canDownload: false` in the same transaction as the status
    #[default]
    Revoke,
    /// Only change the request status; leave any grant as it is
    Preserve,
}

/// Client-side settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Recorded as `originDevice` on every request
    #[serde(default = "default_origin_device")]
    pub origin_device: String,
}

fn default_origin_device() -> String {
    "Web Client".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            origin_device: default_origin_device(),
        }
    }
}

/// Access listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Delay between APPROVED and handing off to the download view
    #[serde(default = "default_handoff_delay_ms")]
    pub handoff_delay_ms: u64,
}

fn default_handoff_delay_ms() -> u64 {
    1500
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            handoff_delay_ms: default_handoff_delay_ms(),
        }
    }
}

impl ListenerConfig {
    /// Hand-off delay as a `Duration`
    #[must_use]
    pub fn handoff_delay(&self) -> Duration {
        Duration::from_millis(self.handoff_delay_ms)
    }
}

/// Approval console settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    /// Grant handling on deny
    #[serde(default)]
    pub deny_policy: DenyPolicy,
    /// Recorded in decision events and logs
    #[serde(default = "default_operator_id")]
    pub operator_id: String,
}

fn default_operator_id() -> String {
    "operator".to_string()
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            deny_policy: DenyPolicy::default(),
            operator_id: default_operator_id(),
        }
    }
}

/// Everything the pipeline components need
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Record location scheme
    #[serde(default)]
    pub paths: PathScheme,
    /// Client settings
    #[serde(default)]
    pub client: ClientConfig,
    /// Listener settings
    #[serde(default)]
    pub listener: ListenerConfig,
    /// Console settings
    #[serde(default)]
    pub console: ConsoleConfig,
    /// Plan catalog; empty means the built-in catalog
    #[serde(default)]
    pub plans: Vec<Plan>,
}

impl PipelineConfig {
    /// Validate paths and build the plan catalog
    pub fn catalog(&self) -> Result<PlanCatalog> {
        self.paths.validate()?;
        if self.plans.is_empty() {
            Ok(PlanCatalog::default())
        } else {
            PlanCatalog::new(self.plans.clone())
        }
    }
}
