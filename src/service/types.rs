//! Service layer types

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::config_store::SystemConfig;
use crate::jobs::QueueStats;
use crate::ml::WeaponDetection;
use crate::storage::Asset;

/// Where the embedding dimension migration stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DimensionState {
    /// Queue running, dimension fixed
    Stable,
    /// Queue paused, waiting for running jobs
    Draining,
    /// Dimension lock held, embeddings being reconfigured
    Migrating,
}

/// Weapon detection result for one asset; never persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeaponsDetectResponse {
    pub id: String,
    pub data: Vec<WeaponDetection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartSearchHit {
    pub asset: Asset,
    pub similarity: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartSearchResponse {
    pub items: Vec<SmartSearchHit>,
}

/// Result of replacing the machine learning config
#[derive(Debug, Clone)]
pub struct ConfigUpdate {
    pub config: SystemConfig,
    pub clip_model_changed: bool,
}

/// Health check result
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResult {
    pub healthy: bool,
    pub version: String,
    pub machine_learning_enabled: bool,
    pub dimension_state: DimensionState,
    pub queues: HashMap<String, QueueStats>,
}
