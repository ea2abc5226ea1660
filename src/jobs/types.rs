//! Job queue types

use std::fmt;

use serde::{Deserialize, Serialize};

/// Named background queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueName {
    SmartSearch,
}

impl QueueName {
    pub const ALL: [QueueName; 1] = [QueueName::SmartSearch];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::SmartSearch => "smart-search",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobName {
    QueueSmartSearch,
    SmartSearch,
}

/// A job together with its payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "data", rename_all = "kebab-case")]
pub enum JobItem {
    /// Fan out one `SmartSearch` job per asset needing an embedding
    QueueSmartSearch { force: bool },
    /// Compute and store the embedding of one asset
    SmartSearch { id: String },
}

impl JobItem {
    pub fn name(&self) -> JobName {
        match self {
            JobItem::QueueSmartSearch { .. } => JobName::QueueSmartSearch,
            JobItem::SmartSearch { .. } => JobName::SmartSearch,
        }
    }

    pub fn queue(&self) -> QueueName {
        match self {
            JobItem::QueueSmartSearch { .. } | JobItem::SmartSearch { .. } => QueueName::SmartSearch,
        }
    }
}

/// Outcome of a handled job. Errors are reported separately and retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    Success,
    /// Feature disabled; nothing to do
    Skipped,
    /// A prerequisite (e.g. the resized image) is missing; a later pass will pick it up
    NotReady,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub active: usize,
    pub paused: bool,
}
