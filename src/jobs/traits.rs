//! Job queue abstraction traits

use anyhow::Result;
use async_trait::async_trait;

use super::types::{JobItem, JobStatus, QueueName, QueueStats};

/// Queue control surface used by services.
/// Delivery is at-least-once with no ordering between jobs.
#[async_trait]
pub trait JobRepository: Send + Sync + 'static {
    async fn queue(&self, item: JobItem) -> Result<()>;

    async fn queue_all(&self, items: Vec<JobItem>) -> Result<()>;

    /// Stop dispatching new jobs. Running jobs are not cancelled.
    async fn pause(&self, queue: QueueName) -> Result<()>;

    async fn resume(&self, queue: QueueName) -> Result<()>;

    /// Resolve once no job of `queue` is running
    async fn wait_for_queue_completion(&self, queue: QueueName) -> Result<()>;

    async fn queue_stats(&self, _queue: QueueName) -> Result<QueueStats> {
        Ok(QueueStats::default())
    }
}

/// Executes jobs pulled from a queue
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, item: JobItem) -> Result<JobStatus>;
}
