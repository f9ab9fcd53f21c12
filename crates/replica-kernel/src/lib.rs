//! Replica Kernel (replica-kernel)
//!
//! Per-replicate machinery for evaluating a stochastic model against
//! independent datasets:
//! 1. **Derivation**: deterministic seeds ([`seed`]) and isolated working
//!    directories ([`sandbox`]) for every replicate
//! 2. **Evaluation**: the [`task`] lifecycle driven by a [`likelihood`]
//! 3. **Execution**: serial or pooled [`executor`]s that keep output order
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use replica_kernel::prelude::*;
//!
//! let mut task = Task::new("A", dataset, None, Box::new(model));
//! task.isolate(None, 0, false)?;
//! task.plant(SeedTree::new(7).spawn(0, "R-A")?, 0)?;
//!
//! let mut executor = SerialExecutor::new();
//! let outcomes = executor.map(std::slice::from_mut(&mut task), &likelihood, &parameters);
//! ```

pub mod cost;
pub mod error;
pub mod executor;
pub mod likelihood;
pub mod sandbox;
pub mod seed;
pub mod task;
pub mod timing;
pub mod types;

// Re-exports
pub use error::*;
pub use types::*;

/// Commonly used types
pub mod prelude {
    pub use crate::cost::{CostEstimator, CostProfile, CostRecord};
    pub use crate::error::{ExecutorError, SandboxError, SeedError, TaskError};
    pub use crate::executor::{Executor, PoolExecutor, SerialExecutor, TaskOutcome};
    pub use crate::likelihood::{
        DirectLikelihood, EnsembleLikelihood, ErrorScale, Estimate, FeedbackCapable, Likelihood,
    };
    pub use crate::sandbox::{DirectorySandbox, Sandbox, SandboxState};
    pub use crate::seed::SeedTree;
    pub use crate::task::state::TaskState;
    pub use crate::task::{Model, ModelContext, Task, TaskSnapshot};
    pub use crate::timing::{ExecutorReport, TaskTiming, Timing};
    pub use crate::types::{Dataset, Info, InputSet, Observation, Parameters, Prediction};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
