//! Runtime system configuration

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::MachineLearningConfig;

/// The mutable part of the configuration, changeable without a restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemConfig {
    pub machine_learning: MachineLearningConfig,
}

#[async_trait]
pub trait ConfigRepository: Send + Sync + 'static {
    async fn get_config(&self) -> Result<SystemConfig>;

    /// Replace the machine learning section, returning the new config
    async fn update_machine_learning(&self, config: MachineLearningConfig) -> Result<SystemConfig>;
}

/// In-memory config seeded from the config file
pub struct SystemConfigStore {
    current: RwLock<SystemConfig>,
}

impl SystemConfigStore {
    pub fn new(machine_learning: MachineLearningConfig) -> Self {
        Self {
            current: RwLock::new(SystemConfig { machine_learning }),
        }
    }
}

#[async_trait]
impl ConfigRepository for SystemConfigStore {
    async fn get_config(&self) -> Result<SystemConfig> {
        Ok(self.current.read().clone())
    }

    async fn update_machine_learning(&self, config: MachineLearningConfig) -> Result<SystemConfig> {
        let mut current = self.current.write();
        current.machine_learning = config;
        info!(
            "Machine learning config updated (enabled: {}, clip model: {})",
            current.machine_learning.enabled, current.machine_learning.clip.model_name
        );
        Ok(current.clone())
    }
}
