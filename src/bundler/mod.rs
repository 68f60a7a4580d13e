//! # Bundler — per-channel adaptive bundle sizing
//!
//! ## Responsibility
//! A [`Bundler`] is a stateful strategy owned by the dispatcher, one per
//! channel, that recommends how many tasks the next dispatch on that
//! channel should carry and absorbs throughput feedback from completed
//! bundles. The bundler pair is a process-wide learned performance model:
//! its tuning state is shared across all jobs and outlives any one of them.
//!
//! ## Guarantees
//! - `bundle_size()` is always within `[1, max_size()]`, for any feedback
//!   history — including an empty one and pathological zero-time samples.
//! - All operations are safe to call concurrently: rounds from different
//!   jobs may finish near-simultaneously and feed the same channel's
//!   bundler from different tasks.
//!
//! ## NOT Responsible For
//! - Deciding which tasks land in a bundle (see: dispatcher.rs)
//! - Delivering results or feedback timing (see: local.rs, remote.rs)

pub mod proportional;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Default bounded history capacity for performance samples.
fn default_performance_cache_size() -> usize {
    2000
}

/// Default damping factor: move 1/4 of the way per feedback.
fn default_proportionality_factor() -> u32 {
    4
}

/// Value-type tuning profile for the proportional algorithm.
///
/// Loaded from configuration; both channels' bundlers are built from the
/// same profile but tune independently afterwards.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct TuneProfile {
    /// Capacity of the bounded (size, elapsed) sample history.
    #[serde(default = "default_performance_cache_size")]
    pub performance_cache_size: usize,
    /// Damping divisor: each feedback moves the size estimate
    /// `1 / proportionality_factor` of the way toward the value implied
    /// by the newest throughput sample.
    #[serde(default = "default_proportionality_factor")]
    pub proportionality_factor: u32,
}

impl Default for TuneProfile {
    fn default() -> Self {
        Self {
            performance_cache_size: default_performance_cache_size(),
            proportionality_factor: default_proportionality_factor(),
        }
    }
}

/// Stateful strategy computing the next bundle size for one channel.
///
/// Callers must call [`Bundler::bundle_size`] exactly once per dispatch and
/// [`Bundler::feedback`] exactly once per completed bundle, passing the
/// *actual* processed count — which may be less than requested if the round
/// failed partway.
///
/// Implementations must synchronise internally; see the module docs.
pub trait Bundler: Send + Sync {
    /// Initialise internal history storage. Called once before first use.
    fn setup(&self);

    /// Recommended task count for the next dispatch on this channel.
    ///
    /// Never less than 1 and never more than the current max-size cap.
    fn bundle_size(&self) -> usize;

    /// Record one completed-bundle observation.
    ///
    /// Zero-size and zero-duration samples are ignored rather than allowed
    /// to corrupt the estimate.
    fn feedback(&self, size: usize, elapsed: Duration);

    /// Set the cap that clamps [`Bundler::bundle_size`] for the current job.
    fn set_max_size(&self, max: usize);

    /// The current max-size cap.
    fn max_size(&self) -> usize;

    /// An independent bundler with the same tuning profile but fresh state.
    fn copy(&self) -> Arc<dyn Bundler>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_defaults() {
        let profile = TuneProfile::default();
        assert_eq!(profile.performance_cache_size, 2000);
        assert_eq!(profile.proportionality_factor, 4);
    }

    #[test]
    fn test_profile_deserializes_with_partial_fields() {
        let profile: TuneProfile = toml::from_str("proportionality_factor = 2").unwrap_or_default();
        assert_eq!(profile.proportionality_factor, 2);
        assert_eq!(profile.performance_cache_size, 2000);
    }
}
