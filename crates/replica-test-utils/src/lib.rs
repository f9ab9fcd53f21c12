//! Testing utilities for the replica workspace
//!
//! Shared fixtures: scripted models and likelihoods, a recording sandbox
//! and dataset builders.

#![allow(missing_docs)]

use parking_lot::Mutex;
use rand::Rng;
use replica_kernel::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Dataset with `points` observations at times `1..=points`
pub fn dataset(name: &str, points: usize) -> Dataset {
    let observations = (1..=points)
        .map(|t| Observation::new(t as f64, vec![0.0]))
        .collect();
    Dataset::new(name, observations)
}

/// Datasets from `(name, points)` pairs
pub fn datasets(pairs: &[(&str, usize)]) -> Vec<Dataset> {
    pairs.iter().map(|(name, points)| dataset(name, *points)).collect()
}

/// Predicts parameter `level`, plus uniform noise of width `noise`
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ScriptedModel {
    pub level: f64,
    pub noise: f64,
    pub runs: u64,
}

impl Model for ScriptedModel {
    fn init(
        &mut self,
        _ctx: &mut ModelContext<'_>,
        _inputset: Option<&InputSet>,
        parameters: &Parameters,
    ) -> Result<(), TaskError> {
        self.level = parameters.require("level")?;
        self.noise = parameters.get("noise").unwrap_or(0.0);
        self.runs = 0;
        Ok(())
    }

    fn run(&mut self, ctx: &mut ModelContext<'_>, _time: f64) -> Result<Prediction, TaskError> {
        self.runs += 1;
        let jitter = self.noise * (ctx.rng.gen::<f64>() - 0.5);
        Ok(Prediction::new(vec![self.level + jitter]))
    }

    fn save(&self) -> Result<serde_json::Value, TaskError> {
        Ok(serde_json::to_value(self)?)
    }

    fn load(&mut self, state: serde_json::Value) -> Result<(), TaskError> {
        *self = serde_json::from_value(state)?;
        Ok(())
    }

    fn class_name(&self) -> &'static str {
        "ScriptedModel"
    }
}

/// Scripted per-task behaviour of [`FixedLikelihood`]
#[derive(Debug, Clone, PartialEq)]
pub enum Scripted {
    Value(f64),
    Fail,
    Panic,
    Sleep(Duration, f64),
}

/// Returns scripted values per task name and records what it saw
///
/// Tasks without a script evaluate to NaN.
#[derive(Debug, Default)]
pub struct FixedLikelihood {
    pub scripts: HashMap<String, Scripted>,
    pub log_space: bool,
    pub feedback_factor: Option<f64>,
    pub tasks_per_snapshot: u64,
    seen: Mutex<Vec<Seen>>,
}

/// One observed evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct Seen {
    pub name: String,
    pub seed: Option<SeedTree>,
    pub feedback: f64,
    pub sandbox: Option<String>,
}

impl FixedLikelihood {
    pub fn new(scripts: &[(&str, Scripted)]) -> Self {
        Self {
            scripts: scripts
                .iter()
                .map(|(name, s)| (name.to_string(), s.clone()))
                .collect(),
            log_space: true,
            feedback_factor: None,
            tasks_per_snapshot: 1,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn values(values: &[(&str, f64)]) -> Self {
        let scripts: Vec<(&str, Scripted)> = values
            .iter()
            .map(|(name, v)| (*name, Scripted::Value(*v)))
            .collect();
        Self::new(&scripts)
    }

    pub fn linear(mut self) -> Self {
        self.log_space = false;
        self
    }

    /// Advertise feedback `value * factor`
    pub fn with_feedback(mut self, factor: f64) -> Self {
        self.feedback_factor = Some(factor);
        self
    }

    pub fn with_tasks(mut self, tasks: u64) -> Self {
        self.tasks_per_snapshot = tasks;
        self
    }

    /// Evaluations seen so far, in evaluation order
    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().clone()
    }

    pub fn clear(&self) {
        self.seen.lock().clear();
    }
}

impl Likelihood for FixedLikelihood {
    fn class_name(&self) -> &'static str {
        "FixedLikelihood"
    }

    fn log_space(&self) -> bool {
        self.log_space
    }

    fn evaluate(&self, task: &mut Task, _parameters: &Parameters) -> Result<Estimate, TaskError> {
        self.seen.lock().push(Seen {
            name: task.name().to_string(),
            seed: task.seed(),
            feedback: task.feedback(),
            sandbox: task.sandbox().map(|s| s.label().to_string()),
        });
        match self.scripts.get(task.name()) {
            Some(Scripted::Value(v)) => Ok(Estimate::new(*v, Info::success())),
            Some(Scripted::Sleep(d, v)) => {
                std::thread::sleep(*d);
                Ok(Estimate::new(*v, Info::success()))
            }
            Some(Scripted::Fail) => Err(TaskError::run(0.0, "scripted failure")),
            Some(Scripted::Panic) => panic!("scripted panic in {}", task.name()),
            None => Ok(Estimate::new(f64::NAN, Info::success())),
        }
    }

    fn cost(&self, model: &dyn Model) -> CostProfile {
        CostProfile::leaf("Likelihood", self.class_name(), self.tasks_per_snapshot)
            .wrapping(CostProfile::leaf("Model", model.class_name(), 1))
    }

    fn feedback_hook(&self) -> Option<&dyn FeedbackCapable> {
        self.feedback_factor.map(|_| self as &dyn FeedbackCapable)
    }
}

impl FeedbackCapable for FixedLikelihood {
    fn feedback(&self, value: f64, _info: &Info) -> f64 {
        value * self.feedback_factor.unwrap_or(f64::NAN)
    }
}

/// Counters shared by a [`RecordingSandbox`] tree
#[derive(Debug, Default)]
pub struct SandboxLog {
    pub spawned: BTreeMap<String, usize>,
    pub copied: BTreeMap<String, usize>,
    pub removed: BTreeMap<String, usize>,
}

/// In-memory sandbox that counts every operation
#[derive(Debug, Clone)]
pub struct RecordingSandbox {
    label: String,
    log: Arc<Mutex<SandboxLog>>,
    fail_remove: bool,
    fail_copyin: Option<String>,
}

impl RecordingSandbox {
    pub fn root() -> Self {
        Self {
            label: "root".to_string(),
            log: Arc::new(Mutex::new(SandboxLog::default())),
            fail_remove: false,
            fail_copyin: None,
        }
    }

    /// Every `remove` fails
    pub fn failing_remove(mut self) -> Self {
        self.fail_remove = true;
        self
    }

    /// `copyin` fails for the sandbox spawned as `label`
    pub fn failing_copyin(mut self, label: &str) -> Self {
        self.fail_copyin = Some(label.to_string());
        self
    }

    pub fn removed(&self, label: &str) -> usize {
        self.log.lock().removed.get(label).copied().unwrap_or(0)
    }

    pub fn copied(&self, label: &str) -> usize {
        self.log.lock().copied.get(label).copied().unwrap_or(0)
    }

    pub fn spawned_labels(&self) -> Vec<String> {
        self.log.lock().spawned.keys().cloned().collect()
    }

    pub fn total_removed(&self) -> usize {
        self.log.lock().removed.values().sum()
    }
}

impl Sandbox for RecordingSandbox {
    fn label(&self) -> &str {
        &self.label
    }

    fn path(&self) -> Option<&Path> {
        None
    }

    fn spawn(&self, label: &str) -> Result<Arc<dyn Sandbox>, SandboxError> {
        *self.log.lock().spawned.entry(label.to_string()).or_default() += 1;
        Ok(Arc::new(Self {
            label: label.to_string(),
            log: Arc::clone(&self.log),
            fail_remove: self.fail_remove,
            fail_copyin: self.fail_copyin.clone(),
        }))
    }

    fn copyin(&self) -> Result<(), SandboxError> {
        *self.log.lock().copied.entry(self.label.clone()).or_default() += 1;
        if self.fail_copyin.as_deref() == Some(self.label.as_str()) {
            return Err(SandboxError::Copy {
                template: self.label.clone().into(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "scripted"),
            });
        }
        Ok(())
    }

    fn remove(&self) -> Result<(), SandboxError> {
        *self.log.lock().removed.entry(self.label.clone()).or_default() += 1;
        if self.fail_remove {
            return Err(SandboxError::Remove {
                path: self.label.clone().into(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "scripted"),
            });
        }
        Ok(())
    }

    fn state(&self) -> SandboxState {
        SandboxState {
            label: self.label.clone(),
            path: None,
            template: None,
        }
    }
}
