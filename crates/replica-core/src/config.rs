//! Orchestrator configuration
//!
//! Every recognised option is a field with a default; unknown keys are
//! rejected when loading from TOML.

use crate::error::ReplicaError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How replicate seeds are keyed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedKeying {
    /// `spawn(i, "R-" + name)` with `i` the post-sort dispatch position
    #[default]
    Position,
    /// `spawn(k, "R-" + name)` with `k` the dataset's registration index,
    /// so seeds survive changes in cost estimates
    Name,
}

/// Space in which replicate values are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineSpace {
    /// Sum of log-likelihoods
    Log,
    /// Product of likelihoods
    Linear,
}

impl CombineSpace {
    /// Space matching a likelihood's native output
    #[inline]
    #[must_use]
    pub fn native(log_space: bool) -> Self {
        if log_space {
            Self::Log
        } else {
            Self::Linear
        }
    }
}

/// Replicate orchestration configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReplicateConfig {
    /// Root of the seed tree
    pub root_seed: u64,
    /// Seed keying policy
    pub seed_keying: SeedKeying,
    /// Process-wide sandbox switch
    pub sandboxing: bool,
    /// Directory under which replicate sandboxes are created
    pub sandbox_root: Option<PathBuf>,
    /// Directory copied into each sandbox
    pub template: Option<PathBuf>,
    /// Retain sandboxes after each round
    pub trace: bool,
    /// Propagated to tasks on isolation
    pub verbosity: u8,
    /// Diagnostic detail level propagated to tasks on planting
    pub informative: u8,
    /// Combination space; the likelihood's native space when unset
    pub combine: Option<CombineSpace>,
    /// Executor workers; one means serial
    pub workers: usize,
    /// Per-task soft timeout in milliseconds
    pub task_timeout_ms: Option<u64>,
}

impl ReplicateConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from TOML text
    ///
    /// # Errors
    /// [`ReplicaError::Config`] on syntax errors, unknown keys or invalid values.
    pub fn from_toml_str(text: &str) -> Result<Self, ReplicaError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// [`ReplicaError::Io`] if the file cannot be read, otherwise as
    /// [`ReplicateConfig::from_toml_str`].
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ReplicaError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    /// [`ReplicaError::Config`] describing the first violation.
    pub fn validate(&self) -> Result<(), ReplicaError> {
        if self.sandboxing && self.sandbox_root.is_none() {
            return Err(ReplicaError::Config(
                "sandboxing requires sandbox_root".to_string(),
            ));
        }
        if self.template.is_some() && !self.sandboxing {
            tracing::warn!("template is ignored while sandboxing is disabled");
        }
        if self.task_timeout_ms == Some(0) {
            return Err(ReplicaError::Config(
                "task_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// With root seed
    #[inline]
    #[must_use]
    pub fn with_root_seed(mut self, seed: u64) -> Self {
        self.root_seed = seed;
        self
    }

    /// With seed keying policy
    #[inline]
    #[must_use]
    pub fn with_seed_keying(mut self, keying: SeedKeying) -> Self {
        self.seed_keying = keying;
        self
    }

    /// With combination space
    #[inline]
    #[must_use]
    pub fn with_combine(mut self, combine: CombineSpace) -> Self {
        self.combine = Some(combine);
        self
    }

    /// With worker count
    #[inline]
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// With trace retention
    #[inline]
    #[must_use]
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// With informative level
    #[inline]
    #[must_use]
    pub fn with_informative(mut self, informative: u8) -> Self {
        self.informative = informative;
        self
    }

    /// Per-task timeout
    #[inline]
    #[must_use]
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for ReplicateConfig {
    fn default() -> Self {
        Self {
            root_seed: 0,
            seed_keying: SeedKeying::Position,
            sandboxing: false,
            sandbox_root: None,
            template: None,
            trace: false,
            verbosity: 0,
            informative: 0,
            combine: None,
            workers: 1,
            task_timeout_ms: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(ReplicateConfig::from_toml_str("").unwrap(), ReplicateConfig::default());
    }

    #[test]
    fn parses_all_keys() {
        let config = ReplicateConfig::from_toml_str(
            r#"
            root_seed = 17
            seed_keying = "name"
            sandboxing = true
            sandbox_root = "/tmp/replica"
            trace = true
            verbosity = 2
            informative = 1
            combine = "linear"
            workers = 4
            task_timeout_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.root_seed, 17);
        assert_eq!(config.seed_keying, SeedKeying::Name);
        assert_eq!(config.combine, Some(CombineSpace::Linear));
        assert_eq!(config.workers, 4);
        assert_eq!(config.task_timeout(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = ReplicateConfig::from_toml_str("particles = 10").unwrap_err();
        assert!(matches!(err, ReplicaError::Config(_)));
    }

    #[test]
    fn sandboxing_needs_root() {
        let err = ReplicateConfig::from_toml_str("sandboxing = true").unwrap_err();
        assert!(err.to_string().contains("sandbox_root"));
    }
}
