//! # Local round — in-process execution with batched draining
//!
//! ## Responsibility
//! Run one job's local slice on the shared worker pool and stream results
//! to the job's listener in accumulated batches. Completed tasks flow
//! through a completion channel fed by the pool; the drain loop blocks
//! only when its batch is empty and nothing has completed, then keeps
//! collecting ready results until the accumulation window elapses or the
//! batch reaches its size cap, and flushes.
//!
//! After each flush the round feeds `(batch_size, elapsed-since-previous-
//! flush)` to the LOCAL bundler.
//!
//! ## Guarantees
//! - Within the slice, tasks are submitted in their original relative order.
//! - A failing task never aborts the round (see: wrapper.rs); only a pool
//!   failure does, and that is captured as the round's terminal error.
//! - The dispatcher's "locally executing" flag is reset when the round
//!   exits, success or failure.
//!
//! ## NOT Responsible For
//! - Choosing the slice (see: dispatcher.rs)
//! - Remote delivery (see: remote.rs)

use crate::dispatcher::{Channel, RoundStats};
use crate::job::{DataProvider, ResultListener, Task, TaskResult};
use crate::wrapper;
use crate::{Bundler, GridError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Everything one local round needs, bundled for the spawned round task.
pub(crate) struct LocalRound {
    /// Uuid of the job being executed.
    pub job_id: Uuid,
    /// The local slice, in original relative order.
    pub tasks: Vec<Task>,
    /// The job's shared context, attached to every task.
    pub data: Arc<DataProvider>,
    /// The job's listener.
    pub listener: Arc<dyn ResultListener>,
    /// The LOCAL channel's bundler, fed once per flushed batch.
    pub bundler: Arc<dyn Bundler>,
    /// The shared worker pool, bounded by permits.
    pub pool: Arc<Semaphore>,
    /// Maximum results per flushed batch.
    pub accumulation_cap: usize,
    /// Length of the accumulation window.
    pub accumulation_window: Duration,
    /// Dispatcher bookkeeping flag, reset when the round exits.
    pub locally_executing: Arc<AtomicBool>,
}

/// Resets the "locally executing" flag when the round exits by any path.
struct ActiveFlag(Arc<AtomicBool>);

impl ActiveFlag {
    fn raise(flag: Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for ActiveFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl LocalRound {
    /// Run the round to completion and report its stats.
    pub(crate) async fn run(self) -> RoundStats {
        let _active = ActiveFlag::raise(Arc::clone(&self.locally_executing));
        let total = self.tasks.len();
        info!(
            job_id = %self.job_id,
            channel = Channel::Local.as_str(),
            tasks = total,
            "local round started"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        for task in &self.tasks {
            let tx = tx.clone();
            let pool = Arc::clone(&self.pool);
            let data = Arc::clone(&self.data);
            let position = task.position();
            let payload = task.payload();
            tokio::spawn(async move {
                let message = match pool.acquire_owned().await {
                    Ok(_permit) => {
                        let outcome = wrapper::run_guarded(position, payload, data).await;
                        Ok(TaskResult { position, outcome })
                    }
                    Err(_) => Err(GridError::PoolClosed),
                };
                // Receiver gone means the round already failed; nothing to do.
                let _ = tx.send(message);
            });
        }
        drop(tx);

        let mut stats = RoundStats::new(Channel::Local, total);
        match self.drain(rx, total, &mut stats).await {
            Ok(()) => {
                info!(
                    job_id = %self.job_id,
                    channel = Channel::Local.as_str(),
                    delivered = stats.delivered,
                    "local round completed"
                );
            }
            Err(e) => {
                error!(
                    job_id = %self.job_id,
                    channel = Channel::Local.as_str(),
                    error = %e,
                    "local round failed"
                );
                self.listener.on_failure(e.clone()).await;
                stats.error = Some(e);
            }
        }
        stats
    }

    /// Drain completed tasks from the pool into listener batches.
    ///
    /// Blocks only when the batch is empty and no task has completed.
    async fn drain(
        &self,
        mut rx: mpsc::UnboundedReceiver<Result<TaskResult, GridError>>,
        total: usize,
        stats: &mut RoundStats,
    ) -> Result<(), GridError> {
        let mut received = 0usize;
        let mut window_start = Instant::now();

        while received < total {
            let first = match rx.recv().await {
                Some(message) => message?,
                // All senders gone before the slice was accounted for.
                None => return Err(GridError::PoolClosed),
            };
            received += 1;
            let mut batch = vec![first];
            let mut failure = None;

            while received < total
                && batch.len() < self.accumulation_cap
                && window_start.elapsed() < self.accumulation_window
            {
                match rx.try_recv() {
                    Ok(Ok(result)) => {
                        batch.push(result);
                        received += 1;
                    }
                    Ok(Err(e)) => {
                        failure = Some(e);
                        break;
                    }
                    Err(_) => break,
                }
            }

            // Tasks that completed before a failure still deliver their
            // results; only the undelivered remainder is reported failed.
            let elapsed = window_start.elapsed();
            let batch_size = batch.len();
            debug!(
                job_id = %self.job_id,
                batch_size,
                first_position = batch[0].position,
                duration_ms = elapsed.as_millis() as u64,
                "flushing local batch"
            );
            stats.delivered += batch_size;
            self.listener.on_results(batch).await;
            self.bundler.feedback(batch_size, elapsed);
            window_start = Instant::now();

            if let Some(e) = failure {
                return Err(e);
            }
        }

        Ok(())
    }
}
