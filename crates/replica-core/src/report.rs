//! Aggregation report

use indexmap::IndexMap;
use replica_kernel::timing::{ExecutorReport, TaskTiming, Timing};
use replica_kernel::types::Info;
use serde::{Deserialize, Serialize};

/// Result of one evaluation round
///
/// Per-replicate maps are keyed in dataset registration order and always
/// carry every registered name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationResult {
    /// Combined score (NaN when unsuccessful)
    pub value: f64,
    /// Raw per-replicate values, before NaN substitution
    pub evaluations: IndexMap<String, f64>,
    /// Per-replicate diagnostics
    pub infos: IndexMap<String, Info>,
    /// False when every replicate failed
    pub successful: bool,
    /// Replicates whose NaN was replaced by the mean of the others
    pub substituted: Vec<String>,
    /// Feedback per replicate for the next round (NaN without a hook)
    pub feedbacks: IndexMap<String, f64>,
    /// Dispatch order of this round
    pub order: Vec<String>,
    /// Orchestrator spans merged with the executor's
    pub timing: Timing,
    /// Per-task timings in dispatch order
    pub timings: Vec<TaskTiming>,
    /// Executor summary
    pub executor: ExecutorReport,
}

impl AggregationResult {
    /// Names of replicates that failed
    pub fn failed(&self) -> impl Iterator<Item = &str> {
        self.infos
            .iter()
            .filter(|(_, info)| !info.successful)
            .map(|(name, _)| name.as_str())
    }

    /// Render as pretty JSON
    ///
    /// Non-finite numbers are written as `null`.
    ///
    /// # Errors
    /// Returns the encoder error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// One entry of a dispatch plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    /// Dataset name
    pub name: String,
    /// Scheduling cost
    pub cost: u64,
    /// Index passed to the root seed's `spawn`
    pub seed_index: i64,
    /// Label passed to the root sandbox's `spawn`
    pub sandbox_label: String,
}
