//! In-process job queue
//!
//! One lane per [`QueueName`], each drained by a fixed number of worker tasks.
//! Lanes can be paused (running jobs finish, nothing new is dispatched) and
//! observed until their active count reaches zero. Failed jobs are re-enqueued
//! until `max_attempts` is reached.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::traits::{JobHandler, JobRepository};
use super::types::{JobItem, JobStatus, QueueName, QueueStats};
use crate::config::JobsConfig;

struct Attempt {
    item: JobItem,
    attempt: u32,
}

#[derive(Default)]
struct LaneState {
    pending: VecDeque<Attempt>,
    paused: bool,
}

/// Pending jobs and worker bookkeeping for one queue
struct Lane {
    name: QueueName,
    state: Mutex<LaneState>,
    work: Notify,
    /// Number of jobs currently running
    active: watch::Sender<usize>,
}

impl Lane {
    fn new(name: QueueName) -> Self {
        Self {
            name,
            state: Mutex::new(LaneState::default()),
            work: Notify::new(),
            active: watch::channel(0).0,
        }
    }

    fn push(&self, attempts: impl IntoIterator<Item = Attempt>) {
        self.state.lock().pending.extend(attempts);
        self.work.notify_waiters();
    }

    /// Pop the next job and mark it active, unless paused
    fn take(&self) -> Option<Attempt> {
        let mut state = self.state.lock();
        if state.paused {
            return None;
        }
        let next = state.pending.pop_front()?;
        self.active.send_modify(|active| *active += 1);
        Some(next)
    }

    fn finish(&self) {
        self.active.send_modify(|active| *active = active.saturating_sub(1));
    }

    fn set_paused(&self, paused: bool) {
        self.state.lock().paused = paused;
        if !paused {
            self.work.notify_waiters();
        }
    }

    fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            pending: state.pending.len(),
            active: *self.active.borrow(),
            paused: state.paused,
        }
    }
}

pub struct InMemoryJobQueue {
    lanes: HashMap<QueueName, Arc<Lane>>,
    concurrency: usize,
    max_attempts: u32,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl InMemoryJobQueue {
    pub fn new(config: &JobsConfig) -> Self {
        let lanes = QueueName::ALL
            .iter()
            .map(|name| (*name, Arc::new(Lane::new(*name))))
            .collect();

        Self {
            lanes,
            concurrency: config.concurrency.max(1),
            max_attempts: config.max_attempts.max(1),
            shutdown: watch::channel(false).0,
            workers: Mutex::new(Vec::new()),
        }
    }

    fn lane(&self, queue: QueueName) -> Result<&Arc<Lane>> {
        self.lanes
            .get(&queue)
            .ok_or_else(|| anyhow!("Unknown queue {}", queue))
    }

    /// Spawn the workers of every lane
    pub fn start(&self, handler: Arc<dyn JobHandler>) {
        let mut workers = self.workers.lock();
        for lane in self.lanes.values() {
            info!(
                "Starting {} workers for queue {}",
                self.concurrency, lane.name
            );
            for _ in 0..self.concurrency {
                workers.push(tokio::spawn(run_worker(
                    lane.clone(),
                    handler.clone(),
                    self.max_attempts,
                    self.shutdown.subscribe(),
                )));
            }
        }
    }

    pub fn stats(&self) -> HashMap<QueueName, QueueStats> {
        self.lanes
            .iter()
            .map(|(name, lane)| (*name, lane.stats()))
            .collect()
    }

    /// Stop all workers once their current job finishes
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.await;
        }
        info!("Job queue stopped");
    }
}

impl Drop for InMemoryJobQueue {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

#[async_trait]
impl JobRepository for InMemoryJobQueue {
    async fn queue(&self, item: JobItem) -> Result<()> {
        self.queue_all(vec![item]).await
    }

    async fn queue_all(&self, items: Vec<JobItem>) -> Result<()> {
        let mut grouped: HashMap<QueueName, Vec<Attempt>> = HashMap::new();
        for item in items {
            grouped
                .entry(item.queue())
                .or_default()
                .push(Attempt { item, attempt: 1 });
        }
        for (queue, attempts) in grouped {
            debug!("Queueing {} jobs on {}", attempts.len(), queue);
            self.lane(queue)?.push(attempts);
        }
        Ok(())
    }

    async fn pause(&self, queue: QueueName) -> Result<()> {
        self.lane(queue)?.set_paused(true);
        Ok(())
    }

    async fn resume(&self, queue: QueueName) -> Result<()> {
        self.lane(queue)?.set_paused(false);
        Ok(())
    }

    async fn wait_for_queue_completion(&self, queue: QueueName) -> Result<()> {
        let mut active = self.lane(queue)?.active.subscribe();
        active
            .wait_for(|count| *count == 0)
            .await
            .map_err(|_| anyhow!("Queue {} was dropped", queue))?;
        Ok(())
    }

    async fn queue_stats(&self, queue: QueueName) -> Result<QueueStats> {
        Ok(self.lane(queue)?.stats())
    }
}

async fn run_worker(
    lane: Arc<Lane>,
    handler: Arc<dyn JobHandler>,
    max_attempts: u32,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        // register before checking so a push between take() and select! is not lost
        let notified = lane.work.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if let Some(attempt) = lane.take() {
            run_job(&lane, &handler, attempt, max_attempts).await;
            lane.finish();
            continue;
        }

        tokio::select! {
            _ = &mut notified => {}
            _ = shutdown.changed() => {}
        }
    }
    debug!("Worker for queue {} shutting down", lane.name);
}

async fn run_job(lane: &Lane, handler: &Arc<dyn JobHandler>, attempt: Attempt, max_attempts: u32) {
    let name = attempt.item.name();
    let task = {
        let handler = handler.clone();
        let item = attempt.item.clone();
        tokio::spawn(async move { handler.handle(item).await })
    };

    let failure = match task.await {
        Ok(Ok(status)) => {
            if status == JobStatus::Failed {
                warn!("Job {:?} on {} reported failure", name, lane.name);
            } else {
                debug!("Job {:?} on {} finished: {:?}", name, lane.name, status);
            }
            return;
        }
        Ok(Err(e)) => format!("{:#}", e),
        Err(e) => format!("job task aborted: {}", e),
    };

    if attempt.attempt < max_attempts {
        warn!(
            "Job {:?} on {} failed (attempt {}/{}): {}",
            name, lane.name, attempt.attempt, max_attempts, failure
        );
        lane.push([Attempt {
            item: attempt.item,
            attempt: attempt.attempt + 1,
        }]);
    } else {
        error!(
            "Job {:?} on {} failed after {} attempts: {}",
            name, lane.name, attempt.attempt, failure
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{mpsc, Semaphore};

    /// Reports every handled job and optionally blocks until a permit is released
    struct TestHandler {
        seen: mpsc::UnboundedSender<JobItem>,
        gate: Option<Arc<Semaphore>>,
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler for TestHandler {
        async fn handle(&self, item: JobItem) -> Result<JobStatus> {
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            let _ = self.seen.send(item);
            let fail = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if fail {
                anyhow::bail!("flaky");
            }
            Ok(JobStatus::Success)
        }
    }

    fn handler(
        gate: Option<Arc<Semaphore>>,
        failures: usize,
    ) -> (Arc<TestHandler>, mpsc::UnboundedReceiver<JobItem>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = Arc::new(TestHandler {
            seen: tx,
            gate,
            failures_left: AtomicUsize::new(failures),
        });
        (handler, rx)
    }

    fn config(concurrency: usize, max_attempts: u32) -> JobsConfig {
        JobsConfig {
            concurrency,
            max_attempts,
            ..JobsConfig::default()
        }
    }

    fn smart_search(id: &str) -> JobItem {
        JobItem::SmartSearch { id: id.to_string() }
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<JobItem>) -> JobItem {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("job not handled in time")
            .expect("handler dropped")
    }

    #[tokio::test]
    async fn test_queue_all_dispatches_every_job() {
        let queue = InMemoryJobQueue::new(&config(2, 1));
        let (handler, mut rx) = handler(None, 0);
        queue.start(handler);

        queue
            .queue_all(vec![smart_search("a"), smart_search("b"), smart_search("c")])
            .await
            .unwrap();

        let mut ids = Vec::new();
        for _ in 0..3 {
            if let JobItem::SmartSearch { id } = recv(&mut rx).await {
                ids.push(id);
            }
        }
        ids.sort();
        assert_eq!(ids, vec!["a", "b", "c"]);

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_pause_holds_new_jobs_until_resume() {
        let queue = InMemoryJobQueue::new(&config(1, 1));
        let (handler, mut rx) = handler(None, 0);
        queue.start(handler);

        queue.pause(QueueName::SmartSearch).await.unwrap();
        queue.queue(smart_search("held")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
        let stats = queue.stats()[&QueueName::SmartSearch].clone();
        assert!(stats.paused);
        assert_eq!(stats.pending, 1);

        queue.resume(QueueName::SmartSearch).await.unwrap();
        assert_eq!(recv(&mut rx).await, smart_search("held"));

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_wait_for_completion_waits_for_running_job() {
        let queue = Arc::new(InMemoryJobQueue::new(&config(1, 1)));
        let gate = Arc::new(Semaphore::new(0));
        let (handler, mut rx) = handler(Some(gate.clone()), 0);
        queue.start(handler);

        queue.queue(smart_search("slow")).await.unwrap();
        while queue.stats()[&QueueName::SmartSearch].active == 0 {
            tokio::task::yield_now().await;
        }

        // pausing does not cancel the running job
        queue.pause(QueueName::SmartSearch).await.unwrap();
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.wait_for_queue_completion(QueueName::SmartSearch).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        gate.add_permits(1);
        assert_eq!(recv(&mut rx).await, smart_search("slow"));
        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(queue.stats()[&QueueName::SmartSearch].active, 0);

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_job_is_retried_until_max_attempts() {
        let queue = InMemoryJobQueue::new(&config(1, 3));
        let (handler, mut rx) = handler(None, 5);
        queue.start(handler);

        queue.queue(smart_search("flaky")).await.unwrap();
        for _ in 0..3 {
            assert_eq!(recv(&mut rx).await, smart_search("flaky"));
        }

        // no fourth attempt
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(queue.stats()[&QueueName::SmartSearch].pending, 0);

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failure() {
        let queue = InMemoryJobQueue::new(&config(1, 3));
        let (handler, mut rx) = handler(None, 1);
        queue.start(handler);

        queue.queue(smart_search("once")).await.unwrap();
        recv(&mut rx).await;
        recv(&mut rx).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_wait_for_completion_on_idle_queue() {
        let queue = InMemoryJobQueue::new(&config(1, 1));
        tokio::time::timeout(
            Duration::from_secs(1),
            queue.wait_for_queue_completion(QueueName::SmartSearch),
        )
        .await
        .unwrap()
        .unwrap();
    }
}
