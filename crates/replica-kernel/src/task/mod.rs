//! Task Module
//!
//! A [`Task`] is one replicate evaluation unit: a stochastic [`Model`] bound
//! to one dataset. Tasks are created once and reused across rounds; each
//! round rebinds a sandbox (`isolate`) and a seed (`plant`) derived from the
//! orchestration roots, so model randomness depends only on those roots.
//!
//! Every `init` and `run` draws a fresh child of the planted seed, keyed by
//! the number of draws since the last `plant`.

pub mod state;

use crate::error::TaskError;
use crate::sandbox::{Sandbox, SandboxState};
use crate::seed::SeedTree;
use crate::types::{Dataset, Info, InputSet, Parameters, Prediction};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use state::{plant_target, validate_transition, TaskState};
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

/// Stochastic model driven by a [`Task`]
pub trait Model: Send + Debug {
    /// Establish initial state from optional inputs and run parameters
    ///
    /// # Errors
    /// [`TaskError::ModelInit`] on invalid parameters or inputs.
    fn init(
        &mut self,
        ctx: &mut ModelContext<'_>,
        inputset: Option<&InputSet>,
        parameters: &Parameters,
    ) -> Result<(), TaskError>;

    /// Advance to `time` and predict
    ///
    /// # Errors
    /// [`TaskError::ModelRun`] on runtime failure.
    fn run(&mut self, ctx: &mut ModelContext<'_>, time: f64) -> Result<Prediction, TaskError>;

    /// Release external resources
    fn exit(&mut self) -> Result<(), TaskError> {
        Ok(())
    }

    /// Serialize model state
    ///
    /// # Errors
    /// [`TaskError::Snapshot`] if the state cannot be encoded.
    fn save(&self) -> Result<serde_json::Value, TaskError>;

    /// Restore model state written by [`Model::save`]
    ///
    /// # Errors
    /// [`TaskError::Snapshot`] if the state cannot be decoded.
    fn load(&mut self, state: serde_json::Value) -> Result<(), TaskError>;

    /// Name used in cost records and logs
    fn class_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Per-call environment handed to a model
pub struct ModelContext<'a> {
    /// Generator seeded from this call's child seed
    pub rng: StdRng,
    /// The child seed itself
    pub seed: SeedTree,
    /// Sandbox working directory, when sandboxing is enabled
    pub sandbox: Option<&'a Path>,
    /// Propagated verbosity
    pub verbosity: u8,
}

/// Serializable task state
///
/// Carries everything except the per-round bindings (sandbox handle, seed,
/// verbosity, trace), which `isolate` and `plant` supply again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Task (dataset) name
    pub name: String,
    /// Last feedback value
    pub feedback: Option<f64>,
    /// Last result value
    pub result: Option<f64>,
    /// Whether the last evaluation succeeded
    pub successful: bool,
    /// Model state
    pub model: serde_json::Value,
    /// Sandbox description, present when sandboxing is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<SandboxState>,
}

impl TaskSnapshot {
    /// Encode as bytes
    ///
    /// # Errors
    /// [`TaskError::Snapshot`] if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TaskError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from bytes
    ///
    /// # Errors
    /// [`TaskError::Snapshot`] if decoding fails.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TaskError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// One replicate evaluation unit
#[derive(Debug)]
pub struct Task {
    name: String,
    dataset: Arc<Dataset>,
    inputset: Option<Arc<InputSet>>,
    model: Box<dyn Model>,
    state: TaskState,
    sandbox: Option<Arc<dyn Sandbox>>,
    seed: Option<SeedTree>,
    draws: u64,
    verbosity: u8,
    trace: bool,
    informative: u8,
    feedback: f64,
    result: f64,
    info: Info,
}

impl Task {
    /// Create a task bound to `dataset`
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        dataset: Arc<Dataset>,
        inputset: Option<Arc<InputSet>>,
        model: Box<dyn Model>,
    ) -> Self {
        Self {
            name: name.into(),
            dataset,
            inputset,
            model,
            state: TaskState::Created,
            sandbox: None,
            seed: None,
            draws: 0,
            verbosity: 0,
            trace: false,
            informative: 0,
            feedback: f64::NAN,
            result: f64::NAN,
            info: Info::success(),
        }
    }

    /// Bind a sandbox (or none) and propagate verbosity and trace flags
    ///
    /// Calling again rebinds.
    ///
    /// # Errors
    /// [`TaskError::IllegalTransition`] if the task is mid-evaluation.
    pub fn isolate(
        &mut self,
        sandbox: Option<Arc<dyn Sandbox>>,
        verbosity: u8,
        trace: bool,
    ) -> Result<(), TaskError> {
        self.transition(TaskState::Isolated)?;
        self.sandbox = sandbox;
        self.verbosity = verbosity;
        self.trace = trace;
        self.seed = None;
        self.draws = 0;
        Ok(())
    }

    /// Bind a seed and the informative flag
    ///
    /// # Errors
    /// [`TaskError::IllegalTransition`] before `isolate` or after `exit`.
    pub fn plant(&mut self, seed: SeedTree, informative: u8) -> Result<(), TaskError> {
        let target = plant_target(self.state).ok_or(TaskError::IllegalTransition {
            from: self.state,
            to: TaskState::Planted,
        })?;
        self.state = target;
        self.seed = Some(seed);
        self.draws = 0;
        self.informative = informative;
        Ok(())
    }

    /// Initialize the model
    ///
    /// May be called again on an initialized task to restart the model from
    /// scratch with a fresh seed draw.
    ///
    /// # Errors
    /// [`TaskError::ModelInit`] from the model; the task is then `Failed`.
    pub fn init(&mut self, parameters: &Parameters) -> Result<(), TaskError> {
        validate_transition(self.state, TaskState::Initialized)?;
        let seed = self.next_seed("init")?;
        let mut ctx = context(&self.sandbox, self.verbosity, seed);
        match self.model.init(&mut ctx, self.inputset.as_deref(), parameters) {
            Ok(()) => {
                self.state = TaskState::Initialized;
                Ok(())
            }
            Err(e) => {
                self.state = TaskState::Failed;
                Err(e)
            }
        }
    }

    /// Advance the model to `time`
    ///
    /// # Errors
    /// [`TaskError::ModelRun`] from the model; the task is then `Failed`.
    pub fn run(&mut self, time: f64) -> Result<Prediction, TaskError> {
        validate_transition(self.state, TaskState::Ran)?;
        let seed = self.next_seed("run")?;
        let mut ctx = context(&self.sandbox, self.verbosity, seed);
        match self.model.run(&mut ctx, time) {
            Ok(prediction) => {
                self.state = TaskState::Ran;
                Ok(prediction)
            }
            Err(e) => {
                self.state = TaskState::Failed;
                Err(e)
            }
        }
    }

    /// Release model resources; failures are logged only
    pub fn exit(&mut self) {
        if self.state == TaskState::Exited {
            return;
        }
        if let Err(e) = self.model.exit() {
            tracing::warn!("Task {} exit failed: {}", self.name, e);
        }
        self.state = TaskState::Exited;
    }

    /// Mark the current evaluation as failed
    pub fn fail(&mut self) {
        if self.state != TaskState::Exited {
            self.state = TaskState::Failed;
        }
    }

    /// Snapshot model state and evaluation results
    ///
    /// # Errors
    /// [`TaskError::Snapshot`] if the model cannot be saved.
    pub fn save(&self) -> Result<TaskSnapshot, TaskError> {
        Ok(TaskSnapshot {
            name: self.name.clone(),
            feedback: finite(self.feedback),
            result: finite(self.result),
            successful: self.info.successful,
            model: self.model.save()?,
            sandbox: self.sandbox.as_ref().map(|s| s.state()),
        })
    }

    /// Restore from a snapshot instead of calling `init`
    ///
    /// Must follow `isolate`; the sandbox and seed bindings are not taken
    /// from the snapshot.
    ///
    /// # Errors
    /// [`TaskError::NotReady`] if the snapshot belongs to another task,
    /// [`TaskError::IllegalTransition`] if the task is not isolated.
    pub fn load(&mut self, snapshot: TaskSnapshot) -> Result<(), TaskError> {
        if snapshot.name != self.name {
            return Err(TaskError::NotReady("snapshot belongs to another task"));
        }
        if !matches!(self.state, TaskState::Isolated | TaskState::Planted) {
            return Err(TaskError::IllegalTransition {
                from: self.state,
                to: TaskState::Initialized,
            });
        }
        self.model.load(snapshot.model)?;
        self.feedback = snapshot.feedback.unwrap_or(f64::NAN);
        self.result = snapshot.result.unwrap_or(f64::NAN);
        self.info.successful = snapshot.successful;
        self.state = TaskState::Initialized;
        Ok(())
    }

    /// Store the outcome of the latest evaluation
    pub fn record(&mut self, value: f64, info: Info) {
        self.result = value;
        self.info = info;
    }

    /// Task name (dataset name)
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bound dataset
    #[inline]
    #[must_use]
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Shared handle to the bound dataset, for iterating while running
    #[inline]
    #[must_use]
    pub fn dataset_handle(&self) -> Arc<Dataset> {
        Arc::clone(&self.dataset)
    }

    /// Auxiliary input set
    #[inline]
    #[must_use]
    pub fn inputset(&self) -> Option<&InputSet> {
        self.inputset.as_deref()
    }

    /// Lifecycle state
    #[inline]
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Bound sandbox
    #[inline]
    #[must_use]
    pub fn sandbox(&self) -> Option<&Arc<dyn Sandbox>> {
        self.sandbox.as_ref()
    }

    /// Planted seed
    #[inline]
    #[must_use]
    pub fn seed(&self) -> Option<SeedTree> {
        self.seed
    }

    /// Feedback carried over from the previous round (NaN if none)
    #[inline]
    #[must_use]
    pub fn feedback(&self) -> f64 {
        self.feedback
    }

    /// Set feedback for the next round
    #[inline]
    pub fn set_feedback(&mut self, feedback: f64) {
        self.feedback = feedback;
    }

    /// Propagated verbosity
    #[inline]
    #[must_use]
    pub fn verbosity(&self) -> u8 {
        self.verbosity
    }

    /// Informative level for diagnostics
    #[inline]
    #[must_use]
    pub fn informative(&self) -> u8 {
        self.informative
    }

    /// Whether sandboxes are retained
    #[inline]
    #[must_use]
    pub fn trace(&self) -> bool {
        self.trace
    }

    /// Last result value (NaN before the first evaluation)
    #[inline]
    #[must_use]
    pub fn result(&self) -> f64 {
        self.result
    }

    /// Last diagnostic info
    #[inline]
    #[must_use]
    pub fn info(&self) -> &Info {
        &self.info
    }

    /// Wrapped model
    #[inline]
    #[must_use]
    pub fn model(&self) -> &dyn Model {
        self.model.as_ref()
    }

    fn transition(&mut self, to: TaskState) -> Result<(), TaskError> {
        validate_transition(self.state, to)?;
        self.state = to;
        Ok(())
    }

    fn next_seed(&mut self, label: &str) -> Result<SeedTree, TaskError> {
        let seed = self.seed.ok_or(TaskError::NotReady("no seed planted"))?;
        let index = i64::try_from(self.draws).unwrap_or(i64::MAX);
        let child = seed.spawn(index, label)?;
        self.draws += 1;
        Ok(child)
    }
}

fn context(sandbox: &Option<Arc<dyn Sandbox>>, verbosity: u8, seed: SeedTree) -> ModelContext<'_> {
    ModelContext {
        rng: seed.rng(),
        seed,
        sandbox: sandbox.as_ref().and_then(|s| s.path()),
        verbosity,
    }
}

fn finite(value: f64) -> Option<f64> {
    (!value.is_nan()).then_some(value)
}
