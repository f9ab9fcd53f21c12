//! Error types for Replica Core
//!
//! [`ReplicaError`] wraps the kernel errors that can escape an orchestration
//! round. Per-replicate model failures never appear here: they are folded
//! into NaN values inside the report.

use replica_kernel::{ExecutorError, SandboxError, SeedError, TaskError};

/// Main replica error type
#[derive(Debug, thiserror::Error)]
pub enum ReplicaError {
    /// No dataset has been registered
    #[error("no datasets registered")]
    NoDatasets,

    /// A dataset name was registered twice
    #[error("duplicate dataset name '{0}'")]
    DuplicateDataset(String),

    /// Datasets cannot change once tasks are assembled
    #[error("datasets are fixed once tasks are assembled")]
    Assembled,

    /// Configuration rejected
    #[error("configuration error: {0}")]
    Config(String),

    /// Seed derivation failed
    #[error("seed error: {0}")]
    Seed(#[from] SeedError),

    /// Sandbox isolation failed
    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    /// Task lifecycle failed outside model code
    #[error("task error: {0}")]
    Task(#[from] TaskError),

    /// Executor could not be started
    #[error("executor error: {0}")]
    Executor(#[from] ExecutorError),

    /// Reading or writing files failed
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Checkpoint or dataset encoding failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ReplicaError {
    /// Check if the error stems from caller input rather than the environment
    #[inline]
    #[must_use]
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::NoDatasets | Self::DuplicateDataset(_) | Self::Assembled | Self::Config(_)
        )
    }
}

impl From<toml::de::Error> for ReplicaError {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(ReplicaError::NoDatasets.is_usage_error());
        assert!(ReplicaError::Config("bad".into()).is_usage_error());
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert!(!ReplicaError::from(io).is_usage_error());
    }
}
