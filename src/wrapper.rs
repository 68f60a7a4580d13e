//! # Task safety wrapper
//!
//! ## Responsibility
//! Execute one task's user code and intercept anything that escapes it —
//! a returned error or a panic — storing it as that task's own outcome.
//! A single failing task never aborts the shared worker pool or the batch
//! draining loop.
//!
//! ## Guarantees
//! - Always produces a [`TaskOutcome`]; never propagates a panic.
//!
//! ## NOT Responsible For
//! - Round-level failures (pool shutdown, connection loss) — those are
//!   handled by the rounds themselves.

use crate::job::{DataProvider, TaskOutcome, TaskPayload};
use std::sync::Arc;
use tracing::warn;

/// Run one task's payload, capturing any failure as its terminal outcome.
///
/// The payload runs on its own spawned task so that a panic surfaces as a
/// `JoinError` here instead of unwinding into the caller.
pub(crate) async fn run_guarded(
    position: usize,
    payload: Arc<dyn TaskPayload>,
    data: Arc<DataProvider>,
) -> TaskOutcome {
    let guarded = tokio::spawn(async move { payload.run(&data).await });

    match guarded.await {
        Ok(Ok(value)) => TaskOutcome::Completed(value),
        Ok(Err(e)) => {
            warn!(position, error = %e, "task returned an error");
            TaskOutcome::Failed(e.to_string())
        }
        Err(join_error) if join_error.is_panic() => {
            let message = panic_message(join_error.into_panic());
            warn!(position, panic = %message, "task panicked");
            TaskOutcome::Failed(format!("task panicked: {message}"))
        }
        Err(join_error) => {
            warn!(position, error = %join_error, "task was cancelled");
            TaskOutcome::Failed(format!("task cancelled: {join_error}"))
        }
    }
}

/// Best-effort extraction of a human-readable message from a panic payload.
fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    // Deliberate panics are the subject under test here.
    #![allow(clippy::panic)]

    use super::*;
    use crate::GridError;
    use async_trait::async_trait;

    struct OkPayload;

    #[async_trait]
    impl TaskPayload for OkPayload {
        async fn run(&self, _data: &DataProvider) -> Result<serde_json::Value, GridError> {
            Ok(serde_json::json!("done"))
        }
    }

    struct ErrPayload;

    #[async_trait]
    impl TaskPayload for ErrPayload {
        async fn run(&self, _data: &DataProvider) -> Result<serde_json::Value, GridError> {
            Err(GridError::Task("deliberate failure".to_string()))
        }
    }

    struct PanicPayload;

    #[async_trait]
    impl TaskPayload for PanicPayload {
        async fn run(&self, _data: &DataProvider) -> Result<serde_json::Value, GridError> {
            panic!("deliberate panic");
        }
    }

    #[tokio::test]
    async fn test_successful_payload_yields_completed_outcome() {
        let outcome = run_guarded(0, Arc::new(OkPayload), Arc::new(DataProvider::new())).await;
        assert_eq!(outcome, TaskOutcome::Completed(serde_json::json!("done")));
    }

    #[tokio::test]
    async fn test_error_payload_is_captured_not_propagated() {
        let outcome = run_guarded(1, Arc::new(ErrPayload), Arc::new(DataProvider::new())).await;
        match outcome {
            TaskOutcome::Failed(msg) => assert!(msg.contains("deliberate failure")),
            other => assert!(false, "expected failure outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_panicking_payload_is_absorbed() {
        let outcome = run_guarded(2, Arc::new(PanicPayload), Arc::new(DataProvider::new())).await;
        match outcome {
            TaskOutcome::Failed(msg) => assert!(msg.contains("deliberate panic")),
            other => assert!(false, "expected failure outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_panic_message_extracts_string_payloads() {
        assert_eq!(panic_message(Box::new("static str")), "static str");
        assert_eq!(
            panic_message(Box::new("owned string".to_string())),
            "owned string"
        );
        assert_eq!(panic_message(Box::new(42u32)), "non-string panic payload");
    }
}
