//! # Dispatcher — adaptive local/remote split
//!
//! ## Responsibility
//! Own one [`Bundler`] per channel and the shared local worker pool;
//! compute, for each job, how many tasks go to the local channel versus
//! the remote channel; launch both rounds concurrently; and surface each
//! round's terminal error to the caller.
//!
//! ## Guarantees
//! - The two bundles of one split partition the job's `n` positions
//!   exactly: no overlap, no gap.
//! - When both channels are available at least one task is reserved for
//!   the remote channel to keep it warm.
//! - The bundler pair's tuning state is shared across all jobs this
//!   dispatcher processes; it is a process-wide learned model.
//! - A blocking job returns only after both rounds have fully completed,
//!   success or failure.
//!
//! ## NOT Responsible For
//! - Retrying failed rounds — resubmission is an outer-layer concern.
//! - Job queuing, SLA, or cancellation semantics.

use crate::bundler::proportional::ProportionalBundler;
use crate::config::BalancerConfig;
use crate::connection::Connection;
use crate::job::Job;
use crate::local::LocalRound;
use crate::remote::RemoteRound;
use crate::{Bundler, GridError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// An execution path for a bundle: the in-process pool or the connection.
///
/// Exactly these two channels exist client-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// In-process worker pool.
    Local,
    /// Remote compute tier behind a [`Connection`].
    Remote,
}

impl Channel {
    /// Lowercase name for structured log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Local => "local",
            Channel::Remote => "remote",
        }
    }
}

/// Outcome of one completed round.
#[derive(Debug, Clone)]
pub struct RoundStats {
    /// Which channel the round ran on.
    pub channel: Channel,
    /// Number of tasks dispatched to the round.
    pub dispatched: usize,
    /// Number of results actually delivered to the listener.
    pub delivered: usize,
    /// The round's terminal error, if it failed.
    pub error: Option<GridError>,
}

impl RoundStats {
    pub(crate) fn new(channel: Channel, dispatched: usize) -> Self {
        Self {
            channel,
            dispatched,
            delivered: 0,
            error: None,
        }
    }
}

/// Aggregated outcome of a job's rounds, available once all have finished.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    /// One entry per round that was started, in launch order.
    pub rounds: Vec<RoundStats>,
}

impl ExecutionReport {
    /// Stats for the local round, if one was started.
    pub fn local(&self) -> Option<&RoundStats> {
        self.rounds.iter().find(|r| r.channel == Channel::Local)
    }

    /// Stats for the remote round, if one was started.
    pub fn remote(&self) -> Option<&RoundStats> {
        self.rounds.iter().find(|r| r.channel == Channel::Remote)
    }

    /// Whether every round completed without a terminal error.
    pub fn is_success(&self) -> bool {
        self.rounds.iter().all(|r| r.error.is_none())
    }
}

enum HandleState {
    /// Rounds still in flight (non-blocking job).
    Running(Vec<JoinHandle<RoundStats>>),
    /// Rounds already joined (blocking job).
    Completed(ExecutionReport),
}

/// Handle to a job's in-flight or completed rounds.
///
/// For blocking jobs `Dispatcher::execute` joins both rounds before
/// returning, so the handle resolves immediately; for non-blocking jobs
/// [`ExecutionHandle::join`] awaits the rounds.
pub struct ExecutionHandle {
    state: HandleState,
}

impl ExecutionHandle {
    fn running(handles: Vec<JoinHandle<RoundStats>>) -> Self {
        Self {
            state: HandleState::Running(handles),
        }
    }

    fn completed(report: ExecutionReport) -> Self {
        Self {
            state: HandleState::Completed(report),
        }
    }

    /// Whether the job's rounds have already fully completed.
    pub fn is_completed(&self) -> bool {
        matches!(self.state, HandleState::Completed(_))
    }

    /// Wait for all rounds to finish and collect their stats.
    ///
    /// A round task that panicked (which the engine never does on its own)
    /// is reported as a round with a terminal error rather than a panic.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub async fn join(self) -> ExecutionReport {
        match self.state {
            HandleState::Completed(report) => report,
            HandleState::Running(handles) => join_rounds(handles).await,
        }
    }
}

async fn join_rounds(handles: Vec<JoinHandle<RoundStats>>) -> ExecutionReport {
    let mut report = ExecutionReport::default();
    for handle in handles {
        match handle.await {
            Ok(stats) => report.rounds.push(stats),
            Err(e) => {
                warn!(error = %e, "round task failed to join");
                let mut stats = RoundStats::new(Channel::Local, 0);
                stats.error = Some(GridError::Other(format!("round join failed: {e}")));
                report.rounds.push(stats);
            }
        }
    }
    report
}

/// Compute the per-job split of `n` tasks from the two bundlers' current
/// recommendations.
///
/// At least one task is reserved for the remote channel (the local hint is
/// clamped to `n - 1`), and any remainder left after clamping both hints
/// goes to the remote channel — the deterministic reference policy.
pub(crate) fn compute_split(n: usize, local_hint: usize, remote_hint: usize) -> (usize, usize) {
    let n_local = local_hint.min(n.saturating_sub(1));
    let mut n_remote = remote_hint.min(n - n_local);
    if n_local + n_remote < n {
        // Remainder policy: top up the remote side.
        n_remote = n - n_local;
    }
    (n_local, n_remote)
}

/// Adaptive load balancer splitting each job between the local worker pool
/// and a remote connection, re-tuned from observed throughput feedback.
///
/// One dispatcher instance owns one worker pool and one bundler per
/// channel, shared across all jobs it processes.
pub struct Dispatcher {
    config: BalancerConfig,
    local_enabled: AtomicBool,
    pool: Arc<Semaphore>,
    local_bundler: Arc<dyn Bundler>,
    remote_bundler: Arc<dyn Bundler>,
    locally_executing: Arc<AtomicBool>,
}

impl Dispatcher {
    /// Create a dispatcher with [`ProportionalBundler`]s built from the
    /// config's tuning profile.
    ///
    /// # Errors
    ///
    /// [`GridError::Config`] if the configuration fails validation.
    pub fn new(config: BalancerConfig) -> Result<Self, GridError> {
        let profile = config.tuning;
        let local = Arc::new(ProportionalBundler::new(profile));
        let remote = Arc::new(ProportionalBundler::new(profile));
        Self::with_bundlers(config, local, remote)
    }

    /// Create a dispatcher with an injected bundler pair.
    ///
    /// The injected tuning context is what makes split policy testable and
    /// lets alternative algorithms plug in behind the [`Bundler`] trait.
    ///
    /// # Errors
    ///
    /// [`GridError::Config`] if the configuration fails validation.
    pub fn with_bundlers(
        config: BalancerConfig,
        local_bundler: Arc<dyn Bundler>,
        remote_bundler: Arc<dyn Bundler>,
    ) -> Result<Self, GridError> {
        config.validate()?;
        local_bundler.setup();
        remote_bundler.setup();
        info!(
            threads = config.local.threads,
            local_enabled = config.local.enabled,
            "dispatcher initialised"
        );
        Ok(Self {
            local_enabled: AtomicBool::new(config.local.enabled),
            pool: Arc::new(Semaphore::new(config.local.threads)),
            local_bundler,
            remote_bundler,
            locally_executing: Arc::new(AtomicBool::new(false)),
            config,
        })
    }

    /// Whether local execution is currently enabled.
    pub fn is_local_enabled(&self) -> bool {
        self.local_enabled.load(Ordering::SeqCst)
    }

    /// Enable or disable local execution for subsequent jobs.
    pub fn set_local_enabled(&self, enabled: bool) {
        self.local_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Whether a local round is currently executing.
    pub fn is_locally_executing(&self) -> bool {
        self.locally_executing.load(Ordering::SeqCst)
    }

    /// Shut down the worker pool. In-flight permits finish their tasks;
    /// subsequent local rounds fail with [`GridError::PoolClosed`].
    pub fn shutdown(&self) {
        info!("dispatcher shutting down worker pool");
        self.pool.close();
    }

    /// Dispatch one job across the available channels.
    ///
    /// Assigns each task its definitive position, computes the split from
    /// both bundlers, and launches up to two concurrent rounds. For
    /// blocking jobs the returned handle is already resolved; otherwise
    /// the rounds deliver asynchronously and the handle joins them.
    ///
    /// # Errors
    ///
    /// - [`GridError::EmptyJob`] when the job carries no tasks.
    /// - [`GridError::NoChannel`] when `connection` is `None` and local
    ///   execution is disabled.
    /// - [`GridError::Config`] never — validation happened at build time.
    pub async fn execute(
        &self,
        mut job: Job,
        connection: Option<Arc<dyn Connection>>,
    ) -> Result<ExecutionHandle, GridError> {
        let mut tasks = job.take_tasks();
        if tasks.is_empty() {
            return Err(GridError::EmptyJob);
        }
        // Positions are the sole mechanism for reconstructing submission
        // order from two independently-completing channels.
        for (position, task) in tasks.iter_mut().enumerate() {
            task.set_position(position);
        }
        let n = tasks.len();
        let blocking = job.is_blocking();
        let local_enabled = self.is_local_enabled();

        let mut handles = Vec::with_capacity(2);
        match (local_enabled, connection) {
            (false, Some(connection)) => {
                debug!(job_id = %job.id(), tasks = n, "local disabled, full remote dispatch");
                handles.push(self.spawn_remote(job, tasks, connection));
            }
            (false, None) => return Err(GridError::NoChannel),
            (true, None) => {
                debug!(job_id = %job.id(), tasks = n, "no connection, full local dispatch");
                handles.push(self.spawn_local(&job, tasks));
            }
            (true, Some(connection)) => {
                let (n_local, n_remote) = self.split(n);
                debug!(
                    job_id = %job.id(),
                    tasks = n,
                    n_local,
                    n_remote,
                    "split computed"
                );
                let remote_slice = tasks.split_off(n_local);
                debug_assert_eq!(tasks.len(), n_local);
                debug_assert_eq!(remote_slice.len(), n_remote);
                if !tasks.is_empty() {
                    handles.push(self.spawn_local(&job, tasks));
                }
                handles.push(self.spawn_remote(job, remote_slice, connection));
            }
        }

        if blocking {
            Ok(ExecutionHandle::completed(join_rounds(handles).await))
        } else {
            Ok(ExecutionHandle::running(handles))
        }
    }

    /// Compute the split for `n` tasks under the current tuning state.
    fn split(&self, n: usize) -> (usize, usize) {
        // Cap both bundlers for this job before reading them.
        self.local_bundler.set_max_size(n);
        self.remote_bundler.set_max_size(n);
        compute_split(
            n,
            self.local_bundler.bundle_size(),
            self.remote_bundler.bundle_size(),
        )
    }

    fn spawn_local(&self, job: &Job, tasks: Vec<crate::job::Task>) -> JoinHandle<RoundStats> {
        let round = LocalRound {
            job_id: job.id(),
            tasks,
            data: job.data_provider(),
            listener: job.listener(),
            bundler: Arc::clone(&self.local_bundler),
            pool: Arc::clone(&self.pool),
            accumulation_cap: self.config.local.accumulation_cap(),
            accumulation_window: self.config.local.accumulation_window(),
            locally_executing: Arc::clone(&self.locally_executing),
        };
        tokio::spawn(round.run())
    }

    fn spawn_remote(
        &self,
        job: Job,
        tasks: Vec<crate::job::Task>,
        connection: Arc<dyn Connection>,
    ) -> JoinHandle<RoundStats> {
        let round = RemoteRound {
            job,
            tasks,
            bundler: Arc::clone(&self.remote_bundler),
            connection,
        };
        tokio::spawn(round.run())
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("local_enabled", &self.is_local_enabled())
            .field("threads", &self.config.local.threads)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_partitions_exactly() {
        for n in 1..=50 {
            for local_hint in 0..=n + 5 {
                for remote_hint in 0..=n + 5 {
                    let (n_local, n_remote) = compute_split(n, local_hint, remote_hint);
                    assert_eq!(
                        n_local + n_remote,
                        n,
                        "split must partition n={n} (hints {local_hint}/{remote_hint})"
                    );
                }
            }
        }
    }

    #[test]
    fn test_split_reserves_one_task_for_remote() {
        let (n_local, n_remote) = compute_split(10, 10, 0);
        assert_eq!(n_local, 9);
        assert_eq!(n_remote, 1);
    }

    #[test]
    fn test_split_single_task_goes_remote() {
        let (n_local, n_remote) = compute_split(1, 5, 5);
        assert_eq!(n_local, 0);
        assert_eq!(n_remote, 1);
    }

    #[test]
    fn test_split_clamps_remote_to_remaining() {
        // Scenario C: both bundlers recommend 6 on a 10-task job.
        let (n_local, n_remote) = compute_split(10, 6, 6);
        assert_eq!((n_local, n_remote), (6, 4));
    }

    #[test]
    fn test_split_remainder_goes_to_remote() {
        let (n_local, n_remote) = compute_split(10, 2, 3);
        assert_eq!(n_local, 2);
        assert_eq!(n_remote, 8);
    }

    #[test]
    fn test_report_accessors() {
        let mut report = ExecutionReport::default();
        report.rounds.push(RoundStats::new(Channel::Local, 3));
        report.rounds.push(RoundStats::new(Channel::Remote, 7));
        assert_eq!(report.local().map(|r| r.dispatched), Some(3));
        assert_eq!(report.remote().map(|r| r.dispatched), Some(7));
        assert!(report.is_success());
    }

    #[test]
    fn test_report_failure_detection() {
        let mut report = ExecutionReport::default();
        let mut stats = RoundStats::new(Channel::Remote, 4);
        stats.error = Some(GridError::Connection("gone".to_string()));
        report.rounds.push(stats);
        assert!(!report.is_success());
    }

    #[test]
    fn test_channel_names() {
        assert_eq!(Channel::Local.as_str(), "local");
        assert_eq!(Channel::Remote.as_str(), "remote");
    }
}
