//! Replicate Orchestrator
//!
//! Combines one likelihood definition with N independent named datasets
//! into a single score per parameter set.
//!
//! # Workflow
//! 1. Assemble one task per dataset (once)
//! 2. Order tasks by cost, largest first, ties in registration order
//! 3. Derive each task's sandbox (by name) and seed (by position or name)
//! 4. Dispatch the batch to the executor
//! 5. Remove sandboxes unless tracing, then combine the values

use crate::aggregate::combine;
use crate::config::{CombineSpace, ReplicateConfig, SeedKeying};
use crate::error::ReplicaError;
use crate::report::{AggregationResult, PlanEntry};
use indexmap::IndexMap;
use replica_kernel::cost::CostEstimator;
use replica_kernel::executor::{self, Executor};
use replica_kernel::likelihood::Likelihood;
use replica_kernel::sandbox::{DirectorySandbox, Sandbox};
use replica_kernel::seed::SeedTree;
use replica_kernel::task::{Model, Task, TaskSnapshot};
use replica_kernel::timing::Timing;
use replica_kernel::types::{Dataset, Info, InputSet, Parameters};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Builds a fresh model for a dataset
pub type ModelFactory = Box<dyn Fn(&Dataset) -> Box<dyn Model> + Send + Sync>;

/// Prefix of per-replicate seed names and sandbox labels
const LABEL_PREFIX: &str = "R-";

/// Serialized orchestrator state
#[derive(Debug, Serialize, Deserialize)]
struct Checkpoint {
    root_seed: u64,
    tasks: Vec<TaskSnapshot>,
    feedbacks: IndexMap<String, Option<f64>>,
}

/// Evaluates a likelihood over a fixed set of replicate datasets
pub struct ReplicateOrchestrator {
    config: ReplicateConfig,
    likelihood: Arc<dyn Likelihood>,
    factory: ModelFactory,
    datasets: IndexMap<String, Arc<Dataset>>,
    inputsets: HashMap<String, Arc<InputSet>>,
    /// Tasks in the dispatch order of the latest round
    tasks: Vec<Task>,
    root_seed: SeedTree,
    root_sandbox: Option<Arc<dyn Sandbox>>,
    executor: Box<dyn Executor>,
    feedbacks: IndexMap<String, f64>,
    estimator: CostEstimator,
}

impl fmt::Debug for ReplicateOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicateOrchestrator")
            .field("config", &self.config)
            .field("likelihood", &self.likelihood)
            .field("datasets", &self.datasets.keys().collect::<Vec<_>>())
            .field("tasks", &self.tasks.len())
            .field("root_seed", &self.root_seed)
            .field("root_sandbox", &self.root_sandbox)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl ReplicateOrchestrator {
    /// Create an orchestrator from configuration
    ///
    /// The root sandbox and executor are built from `config`; both can be
    /// replaced with [`Self::with_sandbox`] and [`Self::with_executor`].
    ///
    /// # Errors
    /// - [`ReplicaError::Config`] if the configuration is inconsistent
    /// - [`ReplicaError::Sandbox`] if the sandbox root cannot be created
    /// - [`ReplicaError::Executor`] if the worker pool cannot start
    pub fn new<F>(
        config: ReplicateConfig,
        likelihood: Arc<dyn Likelihood>,
        factory: F,
    ) -> Result<Self, ReplicaError>
    where
        F: Fn(&Dataset) -> Box<dyn Model> + Send + Sync + 'static,
    {
        config.validate()?;
        let root_sandbox: Option<Arc<dyn Sandbox>> = match (config.sandboxing, &config.sandbox_root) {
            (true, Some(root)) => {
                let root: Arc<dyn Sandbox> =
                    Arc::new(DirectorySandbox::new(root.clone(), config.template.clone())?);
                Some(root)
            }
            _ => None,
        };
        let executor = executor::for_workers(config.workers, config.task_timeout())?;

        tracing::info!(
            "Replicate orchestrator: likelihood={} workers={} sandboxing={}",
            likelihood.class_name(),
            executor.workers(),
            root_sandbox.is_some()
        );

        Ok(Self {
            root_seed: SeedTree::new(config.root_seed),
            config,
            likelihood,
            factory: Box::new(factory),
            datasets: IndexMap::new(),
            inputsets: HashMap::new(),
            tasks: Vec::new(),
            root_sandbox,
            executor,
            feedbacks: IndexMap::new(),
            estimator: CostEstimator::new(),
        })
    }

    /// With an explicit root sandbox, enabling sandboxing
    #[inline]
    #[must_use]
    pub fn with_sandbox(mut self, sandbox: Arc<dyn Sandbox>) -> Self {
        self.config.sandboxing = true;
        self.root_sandbox = Some(sandbox);
        self
    }

    /// With an explicit executor
    #[inline]
    #[must_use]
    pub fn with_executor(mut self, executor: Box<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    /// Register a dataset and its optional auxiliary inputs
    ///
    /// # Errors
    /// - [`ReplicaError::Assembled`] once tasks exist
    /// - [`ReplicaError::DuplicateDataset`] if the name is taken
    pub fn add_dataset(
        &mut self,
        dataset: Dataset,
        inputset: Option<InputSet>,
    ) -> Result<(), ReplicaError> {
        if !self.tasks.is_empty() {
            return Err(ReplicaError::Assembled);
        }
        if self.datasets.contains_key(&dataset.name) {
            return Err(ReplicaError::DuplicateDataset(dataset.name));
        }
        if let Some(inputset) = inputset {
            self.inputsets.insert(dataset.name.clone(), Arc::new(inputset));
        }
        tracing::debug!("Registered dataset {} ({} rows)", dataset.name, dataset.len());
        self.datasets.insert(dataset.name.clone(), Arc::new(dataset));
        Ok(())
    }

    /// Create one task per dataset; later calls are no-ops
    ///
    /// # Errors
    /// [`ReplicaError::NoDatasets`] if nothing is registered.
    pub fn assemble(&mut self) -> Result<(), ReplicaError> {
        if !self.tasks.is_empty() {
            return Ok(());
        }
        if self.datasets.is_empty() {
            return Err(ReplicaError::NoDatasets);
        }
        self.tasks = self
            .datasets
            .iter()
            .map(|(name, dataset)| {
                Task::new(
                    name.clone(),
                    Arc::clone(dataset),
                    self.inputsets.get(name).cloned(),
                    (self.factory)(dataset),
                )
            })
            .collect();
        tracing::info!("Assembled {} replicate tasks", self.tasks.len());
        Ok(())
    }

    /// Dispatch plan the next round would use
    ///
    /// # Errors
    /// [`ReplicaError::NoDatasets`] if nothing is registered.
    pub fn plan(&mut self) -> Result<Vec<PlanEntry>, ReplicaError> {
        self.assemble()?;
        let mut keyed: Vec<(u64, usize, &Task)> = self
            .tasks
            .iter()
            .map(|task| {
                (
                    self.estimator.task_cost(task, self.likelihood.as_ref()),
                    self.registration_index(task.name()),
                    task,
                )
            })
            .collect();
        keyed.sort_by_key(|(cost, index, _)| (Reverse(*cost), *index));

        keyed
            .into_iter()
            .enumerate()
            .map(|(position, (cost, index, task))| {
                Ok(PlanEntry {
                    name: task.name().to_string(),
                    cost,
                    seed_index: seed_index(self.config.seed_keying, position, index)?,
                    sandbox_label: label(task.name()),
                })
            })
            .collect()
    }

    /// Evaluate one round
    ///
    /// Per-replicate failures are folded into the report; only setup
    /// failures (sandbox creation or copy, seed derivation) are returned as
    /// errors.
    ///
    /// # Errors
    /// - [`ReplicaError::NoDatasets`] if nothing is registered
    /// - [`ReplicaError::Sandbox`] if a replicate sandbox cannot be prepared
    /// - [`ReplicaError::Seed`] / [`ReplicaError::Task`] on lifecycle misuse
    pub fn evaluate(&mut self, parameters: &Parameters) -> Result<AggregationResult, ReplicaError> {
        let mut timing = Timing::new();
        timing.start("evaluate");

        timing.start("schedule");
        self.assemble()?;
        self.sort_tasks();
        timing.stop("schedule");

        timing.start("isolate");
        self.prepare_tasks()?;
        timing.stop("isolate");

        timing.start("map");
        let outcomes = self
            .executor
            .map(&mut self.tasks, self.likelihood.as_ref(), parameters);
        timing.stop("map");

        timing.start("cleanup");
        self.cleanup();
        timing.stop("cleanup");

        let order: Vec<String> = self.tasks.iter().map(|t| t.name().to_string()).collect();
        let mut by_name: HashMap<&str, usize> = HashMap::with_capacity(outcomes.len());
        for (position, outcome) in outcomes.iter().enumerate() {
            by_name.insert(outcome.timing.name.as_str(), position);
        }

        let mut evaluations = IndexMap::with_capacity(self.datasets.len());
        let mut infos = IndexMap::with_capacity(self.datasets.len());
        for name in self.datasets.keys() {
            let outcome = by_name.get(name.as_str()).map(|&i| &outcomes[i]);
            evaluations.insert(name.clone(), outcome.map_or(f64::NAN, |o| o.value));
            infos.insert(
                name.clone(),
                outcome.map_or_else(missing_outcome, |o| o.info.clone()),
            );
        }

        timing.start("aggregate");
        let space = self
            .config
            .combine
            .unwrap_or_else(|| CombineSpace::native(self.likelihood.log_space()));
        let combined = combine(&evaluations, self.likelihood.log_space(), space);
        let feedbacks = self.compute_feedbacks(&evaluations, &infos);
        timing.stop("aggregate");

        let mut task_timing = Timing::new();
        for outcome in &outcomes {
            task_timing.add(
                "tasks",
                Duration::from_secs_f64(outcome.timing.elapsed_ms.max(0.0) / 1000.0),
            );
        }
        timing += &task_timing;
        timing.stop("evaluate");

        if combined.successful {
            tracing::info!(
                "Evaluated {} replicates: value={} substituted={}",
                evaluations.len(),
                combined.value,
                combined.substituted.len()
            );
        } else {
            tracing::warn!("Evaluated {} replicates: all failed", evaluations.len());
        }

        Ok(AggregationResult {
            value: combined.value,
            evaluations,
            infos,
            successful: combined.successful,
            substituted: combined.substituted,
            feedbacks,
            order,
            timings: outcomes.into_iter().map(|o| o.timing).collect(),
            timing,
            executor: self.executor.report(),
        })
    }

    /// Serialize every task and the carried feedback
    ///
    /// # Errors
    /// - [`ReplicaError::NoDatasets`] if nothing is registered
    /// - [`ReplicaError::Task`] if a model cannot be saved
    pub fn checkpoint(&mut self) -> Result<Vec<u8>, ReplicaError> {
        self.assemble()?;
        let mut snapshots = self
            .tasks
            .iter()
            .map(Task::save)
            .collect::<Result<Vec<_>, _>>()?;
        snapshots.sort_by_key(|s| self.registration_index(&s.name));

        let checkpoint = Checkpoint {
            root_seed: self.config.root_seed,
            tasks: snapshots,
            feedbacks: self
                .feedbacks
                .iter()
                .map(|(name, v)| (name.clone(), (!v.is_nan()).then_some(*v)))
                .collect(),
        };
        Ok(serde_json::to_vec(&checkpoint)?)
    }

    /// Restore task state written by [`Self::checkpoint`]
    ///
    /// Tasks are re-isolated without a sandbox, loaded and left exited,
    /// ready for the next round to rebind them.
    ///
    /// # Errors
    /// - [`ReplicaError::Serialization`] if the bytes are not a checkpoint
    /// - [`ReplicaError::Config`] if it names an unknown dataset
    /// - [`ReplicaError::Task`] if a model rejects its state
    pub fn restore(&mut self, bytes: &[u8]) -> Result<(), ReplicaError> {
        let checkpoint: Checkpoint = serde_json::from_slice(bytes)?;
        self.assemble()?;
        if checkpoint.root_seed != self.config.root_seed {
            tracing::warn!(
                "Checkpoint root seed {} differs from configured {}",
                checkpoint.root_seed,
                self.config.root_seed
            );
        }

        for snapshot in checkpoint.tasks {
            let verbosity = self.config.verbosity;
            let trace = self.config.trace;
            let task = self
                .tasks
                .iter_mut()
                .find(|t| t.name() == snapshot.name)
                .ok_or_else(|| {
                    ReplicaError::Config(format!("checkpoint names unknown dataset '{}'", snapshot.name))
                })?;
            task.isolate(None, verbosity, trace)?;
            task.load(snapshot)?;
            task.exit();
        }
        self.feedbacks = checkpoint
            .feedbacks
            .into_iter()
            .map(|(name, v)| (name, v.unwrap_or(f64::NAN)))
            .collect();
        tracing::info!("Restored {} replicate tasks", self.tasks.len());
        Ok(())
    }

    /// Override the feedback carried into the next round
    pub fn set_feedback(&mut self, name: &str, feedback: f64) {
        self.feedbacks.insert(name.to_string(), feedback);
    }

    /// Feedback carried into the next round
    #[inline]
    #[must_use]
    pub fn feedbacks(&self) -> &IndexMap<String, f64> {
        &self.feedbacks
    }

    /// Registered dataset names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.datasets.keys().map(String::as_str)
    }

    /// Assembled tasks in latest dispatch order
    #[inline]
    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ReplicateConfig {
        &self.config
    }

    fn registration_index(&self, name: &str) -> usize {
        self.datasets.get_index_of(name).unwrap_or(usize::MAX)
    }

    /// Order tasks by cost, largest first; ties keep registration order
    fn sort_tasks(&mut self) {
        let likelihood = self.likelihood.as_ref();
        let estimator = self.estimator;
        let datasets = &self.datasets;
        self.tasks.sort_by_cached_key(|task| {
            (
                Reverse(estimator.task_cost(task, likelihood)),
                datasets.get_index_of(task.name()).unwrap_or(usize::MAX),
            )
        });
    }

    /// Bind per-round sandbox, seed and feedback to every task
    ///
    /// On failure every sandbox spawned this round is removed and the tasks
    /// are exited, so the next round starts from a clean slate.
    fn prepare_tasks(&mut self) -> Result<(), ReplicaError> {
        let registration: Vec<usize> = self
            .tasks
            .iter()
            .map(|t| self.registration_index(t.name()))
            .collect();
        let mut spawned: Vec<(String, Arc<dyn Sandbox>)> = Vec::new();
        let mut failure = None;

        for (position, task) in self.tasks.iter_mut().enumerate() {
            let feedback = self.feedbacks.get(task.name()).copied().unwrap_or(f64::NAN);
            let prepared = prepare_task(
                task,
                position,
                registration[position],
                &self.config,
                &self.root_seed,
                self.root_sandbox.as_deref(),
                feedback,
                &mut spawned,
            );
            if let Err(e) = prepared {
                tracing::error!("Preparing {} failed, releasing this round: {}", task.name(), e);
                failure = Some(e);
                break;
            }
        }

        match failure {
            Some(e) => {
                release(&spawned);
                for task in &mut self.tasks {
                    task.exit();
                }
                Err(e)
            }
            None => Ok(()),
        }
    }

    /// Remove every replicate sandbox unless tracing
    fn cleanup(&self) {
        if self.config.trace {
            return;
        }
        let bound: Vec<(String, Arc<dyn Sandbox>)> = self
            .tasks
            .iter()
            .filter_map(|task| Some((task.name().to_string(), Arc::clone(task.sandbox()?))))
            .collect();
        release(&bound);
    }

    fn compute_feedbacks(
        &mut self,
        evaluations: &IndexMap<String, f64>,
        infos: &IndexMap<String, Info>,
    ) -> IndexMap<String, f64> {
        let feedbacks: IndexMap<String, f64> = match self.likelihood.feedback_hook() {
            Some(hook) => evaluations
                .iter()
                .map(|(name, value)| {
                    let info = infos.get(name).cloned().unwrap_or_default();
                    (name.clone(), hook.feedback(*value, &info))
                })
                .collect(),
            None => evaluations.keys().map(|name| (name.clone(), f64::NAN)).collect(),
        };
        for task in &mut self.tasks {
            if let Some(feedback) = feedbacks.get(task.name()) {
                task.set_feedback(*feedback);
            }
        }
        self.feedbacks = feedbacks.clone();
        feedbacks
    }
}

#[allow(clippy::too_many_arguments)]
fn prepare_task(
    task: &mut Task,
    position: usize,
    registration: usize,
    config: &ReplicateConfig,
    root_seed: &SeedTree,
    root_sandbox: Option<&dyn Sandbox>,
    feedback: f64,
    spawned: &mut Vec<(String, Arc<dyn Sandbox>)>,
) -> Result<(), ReplicaError> {
    let label = label(task.name());
    let sandbox = match root_sandbox {
        Some(root) => {
            let sandbox = root.spawn(&label)?;
            spawned.push((task.name().to_string(), Arc::clone(&sandbox)));
            sandbox.copyin()?;
            Some(sandbox)
        }
        None => None,
    };
    let index = seed_index(config.seed_keying, position, registration)?;
    let seed = root_seed.spawn(index, &label)?;

    task.set_feedback(feedback);
    task.isolate(sandbox, config.verbosity, config.trace)?;
    task.plant(seed, config.informative)?;
    tracing::trace!("Prepared {} at position {} with seed {}", task.name(), position, seed);
    Ok(())
}

/// Remove sandboxes; failures are logged and skipped
fn release(sandboxes: &[(String, Arc<dyn Sandbox>)]) {
    for (name, sandbox) in sandboxes {
        if let Err(e) = sandbox.remove() {
            tracing::warn!("Sandbox cleanup for {} failed: {}", name, e);
        }
    }
}

fn label(name: &str) -> String {
    format!("{LABEL_PREFIX}{name}")
}

fn seed_index(keying: SeedKeying, position: usize, registration: usize) -> Result<i64, ReplicaError> {
    let index = match keying {
        SeedKeying::Position => position,
        SeedKeying::Name => registration,
    };
    i64::try_from(index).map_err(|_| ReplicaError::Config(format!("seed index {index} overflows")))
}

fn missing_outcome() -> Info {
    Info {
        successful: false,
        error: Some("executor returned no outcome".to_string()),
        fields: Default::default(),
    }
}
