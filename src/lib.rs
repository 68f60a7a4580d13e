//! # taskgrid
//!
//! Adaptive load-balancing dispatch engine for a distributed task grid.
//!
//! Clients submit jobs — ordered collections of independent tasks — that are
//! executed either in-process ("local") or on a remote compute tier
//! ("remote") reached through a [`Connection`]. The [`Dispatcher`] decides,
//! per job, how many tasks go to each channel, runs both rounds
//! concurrently, and continuously re-tunes the split from observed
//! throughput feedback via one [`Bundler`] per channel.
//!
//! ## Architecture
//!
//! ```text
//! caller → Dispatcher::execute(job, connection)
//!            ├── split computed from both Bundlers
//!            ├── local round  → worker pool → batched results → LOCAL feedback
//!            └── remote round → connection  → result batches  → REMOTE feedback
//! ```
//!
//! There is no ordering guarantee between the two rounds' deliveries;
//! callers reconstruct the original order from each task's `position`.

// ── Lint policy (aerospace-grade) ─────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod bundler;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod job;

mod local;
mod remote;
mod wrapper;

// Re-exports for convenience
pub use bundler::{proportional::ProportionalBundler, Bundler, TuneProfile};
pub use config::{BalancerConfig, LocalExecutionConfig, TimeUnit};
pub use connection::{Connection, ConnectionStatus, ResultBatch, TaskBundle};
pub use dispatcher::{Channel, Dispatcher, ExecutionHandle, ExecutionReport, RoundStats};
pub use job::{DataProvider, Job, ResultListener, Task, TaskOutcome, TaskPayload, TaskResult};

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"` — structured JSON output for production log aggregators
/// - anything else (including unset) — human-readable pretty output
///   for local development
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`GridError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Panics
///
/// This function never panics.
pub fn init_tracing() -> Result<(), GridError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| GridError::Other(format!("tracing init failed: {e}")))
}

/// Top-level dispatch-engine errors.
///
/// Every error surface in the engine maps to a variant here. Individual
/// task failures are **not** errors — they are captured per task as a
/// [`TaskOutcome::Failed`] and delivered like any other result.
///
/// All variants implement `std::error::Error` via [`thiserror`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GridError {
    /// No execution channel is available: the connection is absent and
    /// local execution is disabled.
    #[error("no driver connection and local execution is disabled")]
    NoChannel,

    /// The job carries no tasks; there is nothing to dispatch.
    #[error("job has no tasks")]
    EmptyJob,

    /// The shared worker pool has been shut down and no longer accepts work.
    #[error("local worker pool is closed")]
    PoolClosed,

    /// The remote connection failed while a round was in flight.
    #[error("connection failure: {0}")]
    Connection(String),

    /// A task's user code failed (returned an error or panicked).
    ///
    /// Only produced inside the safety wrapper; never escapes a round.
    #[error("task failed: {0}")]
    Task(String),

    /// A configuration value is missing or invalid.
    ///
    /// Returned at construction time so that misconfiguration surfaces
    /// immediately rather than at the first dispatch.
    #[error("configuration error: {0}")]
    Config(String),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}
