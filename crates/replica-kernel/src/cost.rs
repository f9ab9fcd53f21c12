//! Relative evaluation cost
//!
//! Used only to order tasks before dispatch (largest first); never affects
//! results.

use crate::likelihood::Likelihood;
use crate::task::Task;
use serde::{Deserialize, Serialize};

/// Nested description of the work one evaluation performs
///
/// A likelihood estimator running `tasks` model trajectories wraps the model
/// leaf as its `inner` profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostProfile {
    /// Component role, e.g. "Likelihood" or "Model"
    pub component: String,
    /// Implementing type
    pub class_name: String,
    /// Number of inner work units this component launches
    pub tasks: u64,
    /// Wrapped sub-task
    pub inner: Option<Box<CostProfile>>,
}

impl CostProfile {
    /// Leaf component
    #[inline]
    #[must_use]
    pub fn leaf(component: impl Into<String>, class_name: impl Into<String>, tasks: u64) -> Self {
        Self {
            component: component.into(),
            class_name: class_name.into(),
            tasks,
            inner: None,
        }
    }

    /// Wrap an inner sub-task
    #[inline]
    #[must_use]
    pub fn wrapping(mut self, inner: CostProfile) -> Self {
        self.inner = Some(Box::new(inner));
        self
    }
}

/// Flattened cost of one nesting level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CostRecord<'a> {
    /// Component role
    pub component: &'a str,
    /// Implementing type
    pub class_name: &'a str,
    /// Work units launched at this level
    pub tasks: u64,
    /// Cost of one work unit (1 at the leaf)
    pub sizes: u64,
    /// `tasks * sizes`
    pub cumulative: u64,
}

/// Computes evaluation costs for scheduling
#[derive(Debug, Clone, Copy, Default)]
pub struct CostEstimator;

impl CostEstimator {
    /// Create a new estimator
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Cost records ordered outermost first
    ///
    /// Inner levels are resolved before their wrapper so the wrapper's
    /// cumulative cost is `tasks * inner.cumulative`.
    #[must_use]
    pub fn evaluations<'a>(&self, profile: &'a CostProfile) -> Vec<CostRecord<'a>> {
        let mut records = match &profile.inner {
            Some(inner) => self.evaluations(inner),
            None => Vec::new(),
        };
        let sizes = records.first().map_or(1, |inner| inner.cumulative);
        records.insert(
            0,
            CostRecord {
                component: &profile.component,
                class_name: &profile.class_name,
                tasks: profile.tasks,
                sizes,
                cumulative: profile.tasks.saturating_mul(sizes),
            },
        );
        records
    }

    /// Scheduling cost of a task: dataset length times the outermost
    /// cumulative cost
    #[must_use]
    pub fn task_cost(&self, task: &Task, likelihood: &dyn Likelihood) -> u64 {
        let profile = likelihood.cost(task.model());
        let per_snapshot = self
            .evaluations(&profile)
            .first()
            .map_or(1, |record| record.cumulative);
        (task.dataset().len() as u64).saturating_mul(per_snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_cost_is_tasks() {
        let profile = CostProfile::leaf("Model", "RandomWalk", 4);
        let records = CostEstimator::new().evaluations(&profile);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sizes, 1);
        assert_eq!(records[0].cumulative, 4);
    }

    #[test]
    fn nested_cost_multiplies() {
        let profile = CostProfile::leaf("Replicate", "Outer", 3).wrapping(
            CostProfile::leaf("Likelihood", "Ensemble", 10)
                .wrapping(CostProfile::leaf("Model", "RandomWalk", 1)),
        );
        let records = CostEstimator::new().evaluations(&profile);

        let components: Vec<_> = records.iter().map(|r| r.component).collect();
        assert_eq!(components, vec!["Replicate", "Likelihood", "Model"]);
        assert_eq!(records[2].cumulative, 1);
        assert_eq!(records[1].sizes, 1);
        assert_eq!(records[1].cumulative, 10);
        assert_eq!(records[0].sizes, 10);
        assert_eq!(records[0].cumulative, 30);
    }
}
