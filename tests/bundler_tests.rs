//! Integration tests for the proportional bundle-sizing algorithm.
//!
//! The public contract under test: for ANY feedback history the
//! recommendation stays within `[1, max_size]`, converges under a steady
//! throughput, and tracks channel speed changes in the right direction.

use std::sync::Arc;
use std::time::Duration;
use taskgrid::{Bundler, ProportionalBundler, TuneProfile};

fn bundler() -> ProportionalBundler {
    ProportionalBundler::new(TuneProfile::default())
}

#[test]
fn test_fresh_bundler_recommends_one() {
    let b = bundler();
    assert_eq!(b.bundle_size(), 1);
}

#[test]
fn test_recommendation_bounded_for_arbitrary_histories() {
    let histories: Vec<Vec<(usize, Duration)>> = vec![
        vec![(1, Duration::from_nanos(1))],
        vec![(1_000_000, Duration::from_nanos(1))],
        vec![(1, Duration::from_secs(3600))],
        vec![(0, Duration::from_secs(1)), (10, Duration::ZERO)],
        (0..500).map(|i| (i % 7, Duration::from_millis(i as u64))).collect(),
    ];

    for history in histories {
        let b = bundler();
        b.set_max_size(64);
        for (size, elapsed) in history {
            b.feedback(size, elapsed);
            let rec = b.bundle_size();
            assert!((1..=64).contains(&rec), "recommendation {rec} out of bounds");
        }
    }
}

#[test]
fn test_zero_time_and_zero_size_samples_are_ignored() {
    let b = bundler();
    b.feedback(0, Duration::from_secs(1));
    b.feedback(10, Duration::ZERO);
    assert_eq!(b.sample_count(), 0);
    assert_eq!(b.bundle_size(), 1);
}

#[test]
fn test_converges_under_steady_throughput() {
    // A channel that processes 50 tasks per second should settle near a
    // 50-task recommendation (one reference round's worth of work).
    let b = bundler();
    b.set_max_size(1000);
    for _ in 0..80 {
        let rec = b.bundle_size();
        b.feedback(rec.max(1), Duration::from_millis(rec.max(1) as u64 * 20));
    }
    let rec = b.bundle_size();
    assert!(
        (40..=60).contains(&rec),
        "expected convergence near 50, got {rec}"
    );
}

#[test]
fn test_slower_channel_shrinks_recommendation() {
    let b = bundler();
    b.set_max_size(1000);
    // Fast phase: 100 tasks/second.
    for _ in 0..40 {
        b.feedback(100, Duration::from_secs(1));
    }
    let fast = b.bundle_size();

    // Slow phase: the same bundle size now takes ten times as long.
    for _ in 0..80 {
        b.feedback(100, Duration::from_secs(10));
    }
    let slow = b.bundle_size();

    assert!(
        slow < fast,
        "recommendation must shrink when the channel slows ({fast} -> {slow})"
    );
}

#[test]
fn test_faster_channel_grows_recommendation() {
    let b = bundler();
    b.set_max_size(1000);
    for _ in 0..40 {
        b.feedback(10, Duration::from_secs(1));
    }
    let before = b.bundle_size();

    for _ in 0..80 {
        b.feedback(10, Duration::from_millis(100));
    }
    let after = b.bundle_size();

    assert!(
        after > before,
        "recommendation must grow when the channel speeds up ({before} -> {after})"
    );
}

#[test]
fn test_max_size_caps_recommendation() {
    let b = bundler();
    b.set_max_size(5);
    for _ in 0..50 {
        b.feedback(1000, Duration::from_millis(10));
    }
    assert!(b.bundle_size() <= 5);
    assert_eq!(b.max_size(), 5);
}

#[test]
fn test_copy_starts_fresh_and_tunes_independently() {
    let original = bundler();
    for _ in 0..20 {
        original.feedback(100, Duration::from_secs(1));
    }
    let copied = original.copy();

    assert_eq!(copied.bundle_size(), 1, "a copy starts with no history");
    copied.feedback(5, Duration::from_secs(1));
    assert!(original.sample_count() >= 20);
}

#[test]
fn test_setup_resets_tuning_state() {
    let b = bundler();
    for _ in 0..30 {
        b.feedback(100, Duration::from_secs(1));
    }
    assert!(b.bundle_size() > 1);

    b.setup();
    assert_eq!(b.sample_count(), 0);
    assert_eq!(b.bundle_size(), 1);
}

#[test]
fn test_concurrent_feedback_keeps_history_bounded() {
    let profile = TuneProfile {
        performance_cache_size: 50,
        proportionality_factor: 4,
    };
    let b = Arc::new(ProportionalBundler::new(profile));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let b = Arc::clone(&b);
            std::thread::spawn(move || {
                for i in 0..200 {
                    b.feedback(t * 10 + i + 1, Duration::from_millis(5));
                    let rec = b.bundle_size();
                    assert!(rec >= 1);
                }
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.join().is_ok());
    }

    assert!(b.sample_count() <= 50);
}
