//! Replica Core - Replicate Orchestration
//!
//! Evaluates a stochastic model's likelihood against several independent
//! datasets and combines the results into one score:
//! - Cost-ordered, reproducible dispatch of one task per dataset
//! - Per-replicate sandbox and seed derivation
//! - NaN-tolerant combination in log or linear space
//! - Adaptive per-replicate feedback across rounds
//!
//! # Example
//!
//! ```rust,ignore
//! use replica_core::prelude::*;
//! use std::sync::Arc;
//!
//! let likelihood = Arc::new(DirectLikelihood::new(ErrorScale::Fixed(0.5)));
//! let mut replicates = ReplicateOrchestrator::new(
//!     ReplicateConfig::new().with_root_seed(7),
//!     likelihood,
//!     |_| Box::new(RandomWalk::new()),
//! )?;
//! replicates.add_dataset(dataset_a, None)?;
//! replicates.add_dataset(dataset_b, None)?;
//!
//! let params = Parameters::new().with("drift", 0.1).with("sigma", 0.3);
//! let result = replicates.evaluate(&params)?;
//! println!("log-likelihood {}", result.value);
//! ```

#![warn(unreachable_pub)]

pub mod aggregate;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod report;

// Re-exports for convenience
pub use aggregate::{combine, Combined};
pub use config::{CombineSpace, ReplicateConfig, SeedKeying};
pub use error::ReplicaError;
pub use models::RandomWalk;
pub use orchestrator::{ModelFactory, ReplicateOrchestrator};
pub use report::{AggregationResult, PlanEntry};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Replica Core
    pub use crate::{
        AggregationResult, CombineSpace, PlanEntry, RandomWalk, ReplicaError, ReplicateConfig,
        ReplicateOrchestrator, SeedKeying,
    };
    pub use replica_kernel::prelude::*;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
