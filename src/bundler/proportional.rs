//! # ProportionalBundler — damped proportional tuning
//!
//! ## Responsibility
//! Reference [`Bundler`] implementation. Keeps a bounded window of
//! (size, elapsed) samples, maintains a moving throughput estimate
//! (mean of per-sample `size / time` over the window), and on each
//! feedback moves the current size estimate a fraction of the way toward
//! the size implied by that throughput. The damping fraction is
//! `1 / proportionality_factor`, which prevents oscillation between over-
//! and under-sized bundles when throughput is noisy.
//!
//! The implied size is the task count the channel sustains over one
//! reference round duration: a channel whose measured time-per-task
//! shrinks gradually receives more tasks relative to the other channel; a
//! channel that stalls gradually receives fewer, without violent swings
//! from any single outlier sample.
//!
//! ## Guarantees
//! - `bundle_size()` stays within `[1, max_size()]` for any history.
//! - Zero-size and zero-duration feedback samples are discarded; no
//!   division by zero, no estimate corruption.
//! - Repeated feedback at a constant (size, time) ratio converges the
//!   estimate to a stable value with no sustained oscillation.

use crate::bundler::{Bundler, TuneProfile};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, trace};

/// The round duration a bundle is sized for: the recommended size is the
/// task count the channel sustains over this window at its measured
/// throughput.
const REFERENCE_ROUND_SECS: f64 = 1.0;

/// One completed-bundle observation.
#[derive(Debug, Clone, Copy)]
struct Sample {
    size: usize,
    elapsed_secs: f64,
}

impl Sample {
    fn throughput(&self) -> f64 {
        self.size as f64 / self.elapsed_secs
    }
}

#[derive(Debug)]
struct State {
    samples: VecDeque<Sample>,
    estimate: f64,
    max_size: usize,
}

/// Concrete tuning algorithm built on a bounded performance history and a
/// damping factor. See the module docs for the update rule.
pub struct ProportionalBundler {
    profile: TuneProfile,
    state: Mutex<State>,
}

impl ProportionalBundler {
    /// Create a bundler for the given tuning profile.
    ///
    /// The initial size estimate is 1: an untrained channel starts small
    /// and earns larger bundles through feedback.
    pub fn new(profile: TuneProfile) -> Self {
        Self {
            profile,
            state: Mutex::new(State {
                samples: VecDeque::with_capacity(profile.performance_cache_size.min(4096)),
                estimate: 1.0,
                max_size: usize::MAX,
            }),
        }
    }

    /// The tuning profile this bundler was built from.
    pub fn profile(&self) -> TuneProfile {
        self.profile
    }

    /// Number of samples currently retained in the history window.
    pub fn sample_count(&self) -> usize {
        self.lock().samples.len()
    }

    /// Moving mean of per-sample throughput (tasks/sec) over the window.
    ///
    /// Zero when the history is empty.
    pub fn mean_throughput(&self) -> f64 {
        let state = self.lock();
        if state.samples.is_empty() {
            return 0.0;
        }
        state.samples.iter().map(Sample::throughput).sum::<f64>() / state.samples.len() as f64
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock means a panicking thread died mid-update; the
        // state itself is still a valid window of samples.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Bundler for ProportionalBundler {
    fn setup(&self) {
        let mut state = self.lock();
        state.samples.clear();
        state.estimate = 1.0;
    }

    fn bundle_size(&self) -> usize {
        let state = self.lock();
        let size = state.estimate.round() as usize;
        size.clamp(1, state.max_size.max(1))
    }

    fn feedback(&self, size: usize, elapsed: Duration) {
        let elapsed_secs = elapsed.as_secs_f64();
        if size == 0 || elapsed_secs <= 0.0 {
            trace!(size, elapsed_secs, "discarding degenerate feedback sample");
            return;
        }

        let mut state = self.lock();
        if state.samples.len() >= self.profile.performance_cache_size {
            state.samples.pop_front();
        }
        state.samples.push_back(Sample { size, elapsed_secs });

        let mean_throughput =
            state.samples.iter().map(Sample::throughput).sum::<f64>() / state.samples.len() as f64;
        let target = mean_throughput * REFERENCE_ROUND_SECS;

        let factor = f64::from(self.profile.proportionality_factor.max(1));
        state.estimate += (target - state.estimate) / factor;
        if state.estimate < 1.0 {
            state.estimate = 1.0;
        }

        debug!(
            size,
            elapsed_secs,
            mean_throughput,
            estimate = state.estimate,
            samples = state.samples.len(),
            "bundler feedback absorbed"
        );
    }

    fn set_max_size(&self, max: usize) {
        self.lock().max_size = max;
    }

    fn max_size(&self) -> usize {
        self.lock().max_size
    }

    fn copy(&self) -> Arc<dyn Bundler> {
        Arc::new(ProportionalBundler::new(self.profile))
    }
}

impl std::fmt::Debug for ProportionalBundler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ProportionalBundler")
            .field("profile", &self.profile)
            .field("estimate", &state.estimate)
            .field("max_size", &state.max_size)
            .field("samples", &state.samples.len())
            .finish()
    }
}
