//! # Remote round — dispatch over a persistent connection
//!
//! ## Responsibility
//! Send one job's remote slice to the compute tier as a single bundle,
//! then receive result batches until the slice is fully accounted for,
//! delivering each batch to the listener immediately — the transport
//! already batches, so no client-side accumulation happens here.
//!
//! The round operates on a transient copy of the job's metadata so the
//! caller's job object is never mutated while the round is in flight;
//! tasks are re-added to the copy with their original positions preserved.
//!
//! ## Guarantees
//! - The connection's status is restored from `Executing` to `Active`
//!   when the round exits, success or failure.
//! - The REMOTE bundler receives exactly one feedback call per round,
//!   with the actually delivered count.
//!
//! ## NOT Responsible For
//! - Wire format or transport (see: connection.rs)
//! - Retrying failed rounds — resubmission belongs to an outer layer.

use crate::connection::{Connection, ConnectionStatus, ResultBatch, TaskBundle};
use crate::dispatcher::{Channel, RoundStats};
use crate::job::{Job, ResultListener, Task};
use crate::{Bundler, GridError};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Everything one remote round needs, bundled for the spawned round task.
pub(crate) struct RemoteRound {
    /// The caller's job, used only to build the transient metadata copy.
    pub job: Job,
    /// The remote slice, positions already assigned by the dispatcher.
    pub tasks: Vec<Task>,
    /// The REMOTE channel's bundler, fed once when the round ends.
    pub bundler: Arc<dyn Bundler>,
    /// The connection to the remote tier.
    pub connection: Arc<dyn Connection>,
}

impl RemoteRound {
    /// Run the round to completion and report its stats.
    pub(crate) async fn run(self) -> RoundStats {
        let start = Instant::now();
        let total = self.tasks.len();
        let listener = self.job.listener();
        let mut stats = RoundStats::new(Channel::Remote, total);

        info!(
            job_id = %self.job.id(),
            channel = Channel::Remote.as_str(),
            tasks = total,
            "remote round started"
        );

        // Transient copy: the in-flight round must never mutate the
        // caller's job, and re-added tasks keep their original positions.
        let mut shadow = self.job.metadata_copy();
        for task in &self.tasks {
            shadow.add_task_preserving_position(task.clone());
        }

        self.connection.set_status(ConnectionStatus::Executing);

        let (delivered, failure) = self.exchange(&shadow, &listener, total).await;
        stats.delivered = delivered;

        let elapsed = start.elapsed();
        self.bundler.feedback(delivered, elapsed);
        // Cleanup path runs on every outcome so other jobs can reuse the
        // connection.
        self.connection.set_status(ConnectionStatus::Active);

        match failure {
            None => {
                info!(
                    job_id = %self.job.id(),
                    channel = Channel::Remote.as_str(),
                    delivered,
                    duration_ms = elapsed.as_millis() as u64,
                    "remote round completed"
                );
            }
            Some(e) => {
                error!(
                    job_id = %self.job.id(),
                    channel = Channel::Remote.as_str(),
                    delivered,
                    error = %e,
                    "remote round failed"
                );
                listener.on_failure(e.clone()).await;
                stats.error = Some(e);
            }
        }
        stats
    }

    /// Send the bundle and drive the receive loop.
    ///
    /// Returns the number of results actually delivered alongside the
    /// terminal failure, if any.
    async fn exchange(
        &self,
        shadow: &Job,
        listener: &Arc<dyn ResultListener>,
        total: usize,
    ) -> (usize, Option<GridError>) {
        let bundle = TaskBundle {
            job_id: shadow.id(),
            tasks: shadow.tasks().to_vec(),
            data: shadow.data_provider(),
        };

        if let Err(e) = self.connection.send_tasks(bundle).await {
            return (0, Some(e));
        }

        let mut delivered = 0usize;
        while delivered < total {
            let ResultBatch {
                results,
                start_position,
            } = match self.connection.receive_results().await {
                Ok(batch) => batch,
                Err(e) => return (delivered, Some(e)),
            };

            debug!(
                job_id = %shadow.id(),
                batch_size = results.len(),
                start_position,
                "received remote batch"
            );
            delivered += results.len();
            // No extra client-side batching: deliver as received.
            listener.on_results(results).await;
        }

        (delivered, None)
    }
}
