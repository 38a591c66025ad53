//! Application configuration types

use paygate_core::{
    ClientConfig, ConsoleConfig, ListenerConfig, PathScheme, PipelineConfig, Plan,
};
use paygate_store::StoreConfig;
use serde::{Deserialize, Serialize};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub paths: PathScheme,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub console: ConsoleConfig,
    #[serde(default)]
    pub plans: Vec<Plan>,
}

impl AppConfig {
    /// Component settings without the store section
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            paths: self.paths.clone(),
            client: self.client.clone(),
            listener: self.listener.clone(),
            console: self.console.clone(),
            plans: self.plans.clone(),
        }
    }
}
