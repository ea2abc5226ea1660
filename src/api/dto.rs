//! REST API request/response data transfer objects

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::jobs::QueueStats;
use crate::service::DimensionState;

/// Smart search query string
#[derive(Debug, Deserialize)]
pub struct SmartSearchQuery {
    pub query: String,
    pub limit: Option<usize>,
}

/// Job trigger query string
#[derive(Debug, Default, Deserialize)]
pub struct QueueJobQuery {
    pub force: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct JobQueuedResponse {
    pub queued: bool,
    pub force: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: String,
    pub machine_learning_enabled: bool,
    pub dimension_state: DimensionState,
    pub queues: HashMap<String, QueueStats>,
    pub uptime_seconds: u64,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(error: &str, code: &str) -> Self {
        Self {
            error: error.to_string(),
            code: code.to_string(),
        }
    }
}
