//! The three-role agent control loop: Planner, Executor, Watchdog.
//!
//! The planner decomposes a goal and drives the executor; the executor runs
//! one-step browser actions against page snapshots; the watchdog screens
//! every executor step for intervention conditions. Both loops carry a hard
//! step budget of 15 and are cooperatively cancellable: every sleep, LLM
//! call, and driver wait races the task's cancellation token.

pub mod executor;
pub mod hooks;
pub mod planner;
pub mod prompts;
pub mod watchdog;

use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Hard iteration cap applied independently to the planner and executor
/// loops.
pub const MAX_STEPS: u32 = 15;

/// How a task run ended short of success.
///
/// Cancellation and failure are distinct terminal paths: a cancelled task is
/// never recorded as failed.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The user aborted the task or its verification wait.
    #[error("{0}")]
    Cancelled(String),
    /// Budget overrun, LLM fault, or unrecoverable driver fault.
    #[error("{0}")]
    Failed(String),
}

impl TaskError {
    pub fn aborted() -> Self {
        TaskError::Cancelled("User aborted".into())
    }

    pub fn verification_cancelled() -> Self {
        TaskError::Cancelled("User cancelled verification".into())
    }

    pub fn max_steps() -> Self {
        TaskError::Failed("max steps reached".into())
    }
}

/// The planner's successful result.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub answer: String,
    pub url: Option<String>,
}

/// Sleep that races the cancellation token. Returns `false` when the token
/// fired first.
pub(crate) async fn sleep_cancellable(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sleep_completes_when_not_cancelled() {
        let cancel = CancellationToken::new();
        assert!(sleep_cancellable(Duration::from_millis(5), &cancel).await);
    }

    #[tokio::test]
    async fn sleep_interrupted_by_cancel() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!sleep_cancellable(Duration::from_secs(60), &cancel).await);
    }

    #[test]
    fn error_messages() {
        assert_eq!(TaskError::aborted().to_string(), "User aborted");
        assert_eq!(
            TaskError::verification_cancelled().to_string(),
            "User cancelled verification"
        );
        assert_eq!(TaskError::max_steps().to_string(), "max steps reached");
    }
}
