//! # Connection — remote execution seam
//!
//! ## Responsibility
//! Define the contract the dispatcher consumes to reach the remote compute
//! tier: send one bundle of tasks, receive result batches until the round
//! is fully accounted for, and flip the connection's status between
//! [`ConnectionStatus::Active`] and [`ConnectionStatus::Executing`].
//!
//! Wire serialization and the socket transport live behind this trait and
//! are out of scope for the engine.
//!
//! ## Guarantees
//! - The remote round restores status to `Active` unconditionally when it
//!   finishes, success or failure, so other jobs can reuse the connection.
//!
//! ## NOT Responsible For
//! - Byte layout of the remote protocol
//! - Reconnection or retry policy

use crate::job::{DataProvider, Task, TaskResult};
use crate::GridError;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// Connection lifecycle states observed by the remote round.
///
/// The machine is `Active → Executing` when a round goes in flight, then
/// back to `Active` via the round's cleanup path regardless of outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Idle and available for the next job.
    Active,
    /// A round is currently in flight on this connection.
    Executing,
}

/// One outbound bundle: a contiguous slice of a job's tasks dispatched
/// together to the remote channel.
#[derive(Clone)]
pub struct TaskBundle {
    /// Uuid of the job the slice belongs to.
    pub job_id: Uuid,
    /// The tasks of the slice, positions preserved from the original job.
    pub tasks: Vec<Task>,
    /// The job's shared read-only context.
    pub data: Arc<DataProvider>,
}

impl std::fmt::Debug for TaskBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskBundle")
            .field("job_id", &self.job_id)
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

/// One inbound batch of results from the remote tier.
///
/// The transport already batches; the remote round delivers each batch to
/// the listener as-is, without further client-side accumulation.
#[derive(Debug, Clone)]
pub struct ResultBatch {
    /// The completed tasks in this batch.
    pub results: Vec<TaskResult>,
    /// Position of the batch's first task in the original job.
    pub start_position: usize,
}

/// Persistent connection to the remote compute tier.
///
/// Implementations must be thread-safe; the engine calls `receive_results`
/// in a loop from the remote round's task while other jobs may inspect
/// status concurrently.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Send one bundle of tasks for execution on the remote tier.
    ///
    /// # Errors
    ///
    /// Any transport failure; the round captures it as its terminal error.
    async fn send_tasks(&self, bundle: TaskBundle) -> Result<(), GridError>;

    /// Receive the next batch of results. Blocks until a batch arrives or
    /// the connection fails.
    ///
    /// # Errors
    ///
    /// Any transport failure; the round captures it as its terminal error.
    async fn receive_results(&self) -> Result<ResultBatch, GridError>;

    /// Set the connection's lifecycle status.
    fn set_status(&self, status: ConnectionStatus);

    /// The connection's current lifecycle status.
    fn status(&self) -> ConnectionStatus;
}
