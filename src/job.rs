//! # Job and task model
//!
//! ## Responsibility
//! Define the units of work the dispatcher operates on: a [`Job`] is a
//! uuid-identified, ordered collection of [`Task`]s plus a shared
//! [`DataProvider`] and a [`ResultListener`]. A task's `position` is its
//! 0-based index in the job's original task list; positions are the sole
//! mechanism downstream code may use to reconstruct submission order from
//! two independently-completing channels.
//!
//! ## Guarantees
//! - A task's position is immutable once assigned by the dispatcher.
//! - A job's task ordering is never mutated after submission.
//! - The DataProvider is shared read-only context, passed unchanged to
//!   every task of the job.
//!
//! ## NOT Responsible For
//! - Splitting tasks between channels (see: dispatcher.rs)
//! - Executing task payloads (see: local.rs, remote.rs, wrapper.rs)

use crate::GridError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Opaque, shared, read-only context passed unchanged to every task of a job.
///
/// Values are arbitrary JSON so callers can attach whatever context their
/// payloads need without the engine interpreting it.
#[derive(Debug, Clone, Default)]
pub struct DataProvider {
    values: HashMap<String, serde_json::Value>,
}

impl DataProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value under `key`, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.values.insert(key.into(), value);
    }

    /// Look up the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    /// Number of values held by this provider.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether this provider holds no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// User work executed for one task.
///
/// Implementations must be thread-safe (`Send + Sync`) — the same payload
/// object may be shipped to the remote tier or run on the local pool.
/// The trait is object-safe to allow dynamic dispatch via
/// `Arc<dyn TaskPayload>`.
#[async_trait]
pub trait TaskPayload: Send + Sync {
    /// Run this task's user code with the job's shared context.
    ///
    /// # Errors
    ///
    /// Any error returned here becomes the task's terminal outcome; it is
    /// captured by the safety wrapper and never aborts the round.
    async fn run(&self, data: &DataProvider) -> Result<serde_json::Value, GridError>;
}

/// Terminal outcome of one task: a result value or a captured failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The task's user code completed and produced this value.
    Completed(serde_json::Value),
    /// The task's user code failed; the captured failure message.
    Failed(String),
}

impl TaskOutcome {
    /// Whether this outcome is a successful completion.
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed(_))
    }
}

/// One unit of user work with a fixed position in its job.
///
/// The position is assigned once, at the start of `Dispatcher::execute`,
/// and never reassigned afterwards.
#[derive(Clone)]
pub struct Task {
    position: usize,
    payload: Arc<dyn TaskPayload>,
}

impl Task {
    /// Create a task for the given payload. The position is provisional
    /// until the dispatcher assigns the definitive one at execute time.
    pub fn new(payload: Arc<dyn TaskPayload>) -> Self {
        Self {
            position: 0,
            payload,
        }
    }

    /// This task's 0-based index in the job's original task list.
    pub fn position(&self) -> usize {
        self.position
    }

    /// The user payload to execute.
    pub fn payload(&self) -> Arc<dyn TaskPayload> {
        Arc::clone(&self.payload)
    }

    pub(crate) fn set_position(&mut self, position: usize) {
        self.position = position;
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

/// A delivered result: one task's identity plus its terminal outcome.
#[derive(Debug, Clone)]
pub struct TaskResult {
    /// Position of the task this result belongs to.
    pub position: usize,
    /// The task's terminal outcome.
    pub outcome: TaskOutcome,
}

/// Receives result batches and failure events for one job.
///
/// Both rounds of a job call the same listener concurrently; there is no
/// ordering guarantee between local and remote deliveries.
#[async_trait]
pub trait ResultListener: Send + Sync {
    /// One batch of completed tasks, in channel-relative order.
    async fn on_results(&self, batch: Vec<TaskResult>);

    /// A round-level failure covering that round's undelivered remainder.
    ///
    /// Distinct from per-task failures, which arrive through
    /// [`ResultListener::on_results`] as [`TaskOutcome::Failed`] entries.
    async fn on_failure(&self, error: GridError);
}

/// A uuid-identified, ordered collection of tasks submitted as one unit.
pub struct Job {
    id: Uuid,
    tasks: Vec<Task>,
    data: Arc<DataProvider>,
    listener: Arc<dyn ResultListener>,
    blocking: bool,
}

impl Job {
    /// Create an empty blocking job with a fresh uuid and empty context.
    pub fn new(listener: Arc<dyn ResultListener>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tasks: Vec::new(),
            data: Arc::new(DataProvider::new()),
            listener,
            blocking: true,
        }
    }

    /// This job's unique identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The job's tasks in submission order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// The shared read-only context for this job's tasks.
    pub fn data_provider(&self) -> Arc<DataProvider> {
        Arc::clone(&self.data)
    }

    /// Replace the job's shared context.
    pub fn set_data_provider(&mut self, data: Arc<DataProvider>) {
        self.data = data;
    }

    /// The job's result listener.
    pub fn listener(&self) -> Arc<dyn ResultListener> {
        Arc::clone(&self.listener)
    }

    /// Whether `execute` joins both rounds before returning.
    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Set the blocking flag. Non-blocking jobs deliver asynchronously.
    pub fn set_blocking(&mut self, blocking: bool) {
        self.blocking = blocking;
    }

    /// Append a task; its provisional position is the current task count.
    pub fn add_task(&mut self, payload: Arc<dyn TaskPayload>) {
        let mut task = Task::new(payload);
        task.set_position(self.tasks.len());
        self.tasks.push(task);
    }

    /// Append an existing task while keeping its original position.
    ///
    /// [`Job::add_task`] assigns a fresh position; an in-flight round
    /// building a transient copy of a job must override that so results
    /// coming back from the remote tier still map to the caller's order.
    pub fn add_task_preserving_position(&mut self, task: Task) {
        self.tasks.push(task);
    }

    /// Build a transient copy of this job's metadata with no tasks.
    ///
    /// The copy shares uuid, context, listener, and blocking flag. Rounds
    /// populate it via [`Job::add_task_preserving_position`] so the
    /// caller's job object is never mutated while a round is in flight.
    pub fn metadata_copy(&self) -> Job {
        Job {
            id: self.id,
            tasks: Vec::new(),
            data: Arc::clone(&self.data),
            listener: Arc::clone(&self.listener),
            blocking: self.blocking,
        }
    }

    pub(crate) fn take_tasks(&mut self) -> Vec<Task> {
        std::mem::take(&mut self.tasks)
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("tasks", &self.tasks.len())
            .field("blocking", &self.blocking)
            .finish_non_exhaustive()
    }
}
