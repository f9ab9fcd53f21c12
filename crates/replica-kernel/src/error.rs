//! Error types for the replica kernel
//!
//! One enum per concern:
//! - Seed derivation ([`SeedError`])
//! - Sandbox lifecycle ([`SandboxError`])
//! - Task lifecycle and model failures ([`TaskError`])
//! - Executor setup ([`ExecutorError`])

use crate::task::state::TaskState;
use std::path::PathBuf;

/// Seed derivation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SeedError {
    /// Negative or otherwise unusable spawn index
    #[error("invalid seed index {index} for child '{name}'")]
    InvalidSeedIndex {
        /// The rejected index
        index: i64,
        /// The child name it was paired with
        name: String,
    },
}

/// Sandbox lifecycle errors
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The sandbox directory could not be created
    #[error("failed to create sandbox {path}: {source}")]
    Create {
        /// Sandbox directory
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The template could not be materialized into the sandbox
    #[error("failed to copy template {template} into sandbox: {source}")]
    Copy {
        /// Template directory
        template: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The sandbox could not be torn down
    #[error("failed to remove sandbox {path}: {source}")]
    Remove {
        /// Sandbox directory
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

/// Task lifecycle and model errors
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// Model rejected its parameters or inputs
    #[error("model initialization failed: {0}")]
    ModelInit(String),

    /// Model failed while advancing
    #[error("model run failed at time {time}: {message}")]
    ModelRun {
        /// Requested horizon
        time: f64,
        /// Failure description
        message: String,
    },

    /// Lifecycle operation called out of order
    #[error("illegal task transition {from:?} -> {to:?}")]
    IllegalTransition {
        /// Current state
        from: TaskState,
        /// Requested state
        to: TaskState,
    },

    /// A binding required by the operation is missing
    #[error("task not ready: {0}")]
    NotReady(&'static str),

    /// Saving or restoring task state failed
    #[error("task snapshot failed: {0}")]
    Snapshot(#[from] serde_json::Error),

    /// Seed derivation failed inside the task
    #[error(transparent)]
    Seed(#[from] SeedError),

    /// Evaluation exceeded the executor's per-task budget
    #[error("task timed out after {elapsed_ms}ms (limit {limit_ms}ms)")]
    Timeout {
        /// Time actually spent
        elapsed_ms: u64,
        /// Configured limit
        limit_ms: u64,
    },

    /// Model code panicked
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Create a run error
    #[inline]
    pub fn run(time: f64, message: impl Into<String>) -> Self {
        Self::ModelRun {
            time,
            message: message.into(),
        }
    }

    /// Whether the failure is confined to one replicate and becomes NaN
    #[inline]
    #[must_use]
    pub fn degrades_to_nan(&self) -> bool {
        matches!(
            self,
            Self::ModelInit(_) | Self::ModelRun { .. } | Self::Timeout { .. } | Self::Panicked(_)
        )
    }
}

/// Executor setup errors
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The worker pool could not be started
    #[error("failed to start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}
