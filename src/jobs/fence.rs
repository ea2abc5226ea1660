//! Pause, drain, mutate, resume
//!
//! A queue is paused, then drained of running jobs, and only then is the
//! caller's mutation allowed to run. Each step consumes the previous one so the
//! order cannot be skipped. Whatever happens after the pause, the queue is
//! resumed: explicitly by [`DrainedQueue::run`], or in the background if a
//! [`PausedQueue`] or [`DrainedQueue`] is dropped mid-way.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};

use super::traits::JobRepository;
use super::types::QueueName;

struct ResumeOnDrop {
    jobs: Arc<dyn JobRepository>,
    queue: QueueName,
    armed: bool,
}

impl ResumeOnDrop {
    async fn resume(mut self) -> Result<()> {
        self.armed = false;
        self.jobs.resume(self.queue).await?;
        info!("Resumed queue {}", self.queue);
        Ok(())
    }
}

impl Drop for ResumeOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let jobs = self.jobs.clone();
        let queue = self.queue;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("Queue {} released without resume, resuming in background", queue);
                handle.spawn(async move {
                    if let Err(e) = jobs.resume(queue).await {
                        error!("Failed to resume queue {}: {:#}", queue, e);
                    }
                });
            }
            Err(_) => error!("Queue {} left paused: no runtime to resume it", queue),
        }
    }
}

pub struct QueueFence;

impl QueueFence {
    pub async fn pause(jobs: Arc<dyn JobRepository>, queue: QueueName) -> Result<PausedQueue> {
        jobs.pause(queue).await?;
        info!("Paused queue {}", queue);
        Ok(PausedQueue {
            guard: ResumeOnDrop {
                jobs,
                queue,
                armed: true,
            },
        })
    }
}

/// No new jobs are dispatched; running ones may still be in flight
pub struct PausedQueue {
    guard: ResumeOnDrop,
}

impl PausedQueue {
    pub fn queue(&self) -> QueueName {
        self.guard.queue
    }

    /// Wait until no job of the queue is running
    pub async fn drain(self) -> Result<DrainedQueue> {
        let guard = self.guard;
        let drained = guard.jobs.wait_for_queue_completion(guard.queue).await;
        match drained {
            Ok(()) => Ok(DrainedQueue { guard }),
            Err(e) => {
                if let Err(resume_err) = guard.resume().await {
                    error!("Failed to resume queue after drain error: {:#}", resume_err);
                }
                Err(e)
            }
        }
    }

    pub async fn resume(self) -> Result<()> {
        self.guard.resume().await
    }
}

/// Paused with nothing running
pub struct DrainedQueue {
    guard: ResumeOnDrop,
}

impl DrainedQueue {
    pub fn queue(&self) -> QueueName {
        self.guard.queue
    }

    /// Run `f`, then resume the queue whether or not `f` succeeded.
    /// An error from `f` wins over a resume error.
    pub async fn run<F, Fut, T, E>(self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<anyhow::Error>,
    {
        let result = f().await;
        let resumed = self.guard.resume().await;
        match (result, resumed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(E::from(e)),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(resume_err)) => {
                error!("Failed to resume queue after failed update: {:#}", resume_err);
                Err(e)
            }
        }
    }
}
