//! Likelihood Contract
//!
//! A [`Likelihood`] drives one [`Task`] through its dataset and scores the
//! model's predictions against the observations. The executor calls
//! [`Likelihood::evaluate`] once per task per round.
//!
//! Adaptive likelihoods additionally implement [`FeedbackCapable`] and
//! expose it through [`Likelihood::feedback_hook`]; the orchestrator checks
//! for the capability instead of probing for methods.

use crate::cost::CostProfile;
use crate::error::TaskError;
use crate::task::{Model, Task};
use crate::types::{Info, Parameters};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt::Debug;

/// Scalar estimate plus diagnostics for one task
#[derive(Debug, Clone, PartialEq)]
pub struct Estimate {
    /// Likelihood value, in the likelihood's native space
    pub value: f64,
    /// Diagnostics
    pub info: Info,
}

impl Estimate {
    /// Create an estimate
    #[inline]
    #[must_use]
    pub fn new(value: f64, info: Info) -> Self {
        Self { value, info }
    }
}

/// Scores a task's model against its dataset
pub trait Likelihood: Send + Sync + Debug {
    /// Name used in cost records and logs
    fn class_name(&self) -> &'static str;

    /// Whether [`Likelihood::evaluate`] returns log-likelihoods
    fn log_space(&self) -> bool;

    /// Evaluate a planted task
    ///
    /// # Errors
    /// Any [`TaskError`] raised by the model; the executor folds it into a
    /// NaN result.
    fn evaluate(&self, task: &mut Task, parameters: &Parameters) -> Result<Estimate, TaskError>;

    /// Nested work performed by one evaluation of a single snapshot
    fn cost(&self, model: &dyn Model) -> CostProfile;

    /// Adaptive feedback capability, if any
    fn feedback_hook(&self) -> Option<&dyn FeedbackCapable> {
        None
    }
}

/// Likelihoods that tune themselves between rounds
pub trait FeedbackCapable {
    /// Feedback for the next round from this round's value and diagnostics
    ///
    /// NaN means "no advice"; the task then falls back to its defaults.
    fn feedback(&self, value: f64, info: &Info) -> f64;
}

/// Observation error scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorScale {
    /// Constant standard deviation
    Fixed(f64),
    /// Standard deviation read from a named parameter
    Parameter(String),
}

impl ErrorScale {
    /// Resolve against the round's parameters
    ///
    /// # Errors
    /// [`TaskError::ModelInit`] if the scale is missing or not positive.
    pub fn resolve(&self, parameters: &Parameters) -> Result<f64, TaskError> {
        let scale = match self {
            Self::Fixed(scale) => *scale,
            Self::Parameter(name) => parameters.require(name)?,
        };
        if scale > 0.0 && scale.is_finite() {
            Ok(scale)
        } else {
            Err(TaskError::ModelInit(format!("error scale must be positive, got {scale}")))
        }
    }
}

impl Default for ErrorScale {
    fn default() -> Self {
        Self::Fixed(1.0)
    }
}

/// Sum of Gaussian log densities of `observed` around `predicted`
///
/// NaN observations are skipped; a NaN prediction for a present
/// observation yields NaN.
///
/// # Errors
/// [`TaskError::ModelRun`] when the two vectors differ in length.
pub fn gaussian_log_density(
    time: f64,
    observed: &[f64],
    predicted: &[f64],
    scale: f64,
) -> Result<f64, TaskError> {
    if observed.len() != predicted.len() {
        return Err(TaskError::run(
            time,
            format!(
                "prediction has {} values, observation has {}",
                predicted.len(),
                observed.len()
            ),
        ));
    }
    let norm = -0.5 * (2.0 * PI).ln() - scale.ln();
    Ok(observed
        .iter()
        .zip(predicted)
        .filter(|(y, _)| !y.is_nan())
        .map(|(y, mu)| {
            let z = (y - mu) / scale;
            norm - 0.5 * z * z
        })
        .sum())
}

/// `ln(mean(exp(values)))` over non-NaN values, computed without overflow
///
/// Returns NaN when no value is usable and `-inf` when every value is.
#[must_use]
pub fn log_mean_exp(values: &[f64]) -> f64 {
    let usable: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if usable.is_empty() {
        return f64::NAN;
    }
    let max = usable.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    let sum: f64 = usable.iter().map(|v| (v - max).exp()).sum();
    max + sum.ln() - (usable.len() as f64).ln()
}

/// Relative standard error of the Monte-Carlo mean of `exp(values)`
///
/// Computed on values rescaled by their maximum, so the ratio is exact
/// even when the likelihoods themselves underflow.
#[must_use]
pub fn relative_deviation(values: &[f64]) -> f64 {
    let usable: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if usable.len() < 2 {
        return f64::NAN;
    }
    let max = usable.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return f64::NAN;
    }
    let scaled: Vec<f64> = usable.iter().map(|v| (v - max).exp()).collect();
    let n = scaled.len() as f64;
    let mean = scaled.iter().sum::<f64>() / n;
    let variance = scaled.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (variance / n).sqrt() / mean
}

/// Runs the model once through every observation time
#[derive(Debug, Clone, Default)]
pub struct DirectLikelihood {
    error: ErrorScale,
}

impl DirectLikelihood {
    /// Create with an observation error scale
    #[inline]
    #[must_use]
    pub fn new(error: ErrorScale) -> Self {
        Self { error }
    }

    /// Observation error scale
    #[inline]
    #[must_use]
    pub fn error(&self) -> &ErrorScale {
        &self.error
    }
}

impl Likelihood for DirectLikelihood {
    fn class_name(&self) -> &'static str {
        "DirectLikelihood"
    }

    fn log_space(&self) -> bool {
        true
    }

    fn evaluate(&self, task: &mut Task, parameters: &Parameters) -> Result<Estimate, TaskError> {
        let scale = self.error.resolve(parameters)?;
        let trajectory = run_trajectory(task, parameters, scale)?;
        let value = trajectory.estimates.iter().sum();

        let mut info = Info::success().with("snapshots", trajectory.estimates.len());
        if task.informative() >= 1 {
            info.insert("estimates", &trajectory.estimates);
        }
        if task.informative() >= 2 {
            info.insert("predictions", &trajectory.predictions);
        }
        Ok(Estimate::new(value, info))
    }

    fn cost(&self, model: &dyn Model) -> CostProfile {
        CostProfile::leaf("Likelihood", self.class_name(), 1)
            .wrapping(CostProfile::leaf("Model", model.class_name(), 1))
    }
}

/// Monte-Carlo likelihood over an ensemble of independent trajectories
///
/// The ensemble size adapts between rounds through [`FeedbackCapable`]:
/// it doubles while the relative deviation of the estimate exceeds the
/// requested accuracy plus margin and halves while it stays below accuracy
/// minus margin.
#[derive(Debug, Clone)]
pub struct EnsembleLikelihood {
    error: ErrorScale,
    min_members: usize,
    max_members: usize,
    accuracy: f64,
    margin: f64,
    factor: usize,
}

impl EnsembleLikelihood {
    /// Create with a fixed ensemble size
    #[must_use]
    pub fn new(error: ErrorScale, members: usize) -> Self {
        let members = members.max(1);
        Self {
            error,
            min_members: members,
            max_members: members,
            accuracy: 0.1,
            margin: 0.05,
            factor: 2,
        }
    }

    /// Let the ensemble size adapt within `[min, max]`
    #[inline]
    #[must_use]
    pub fn with_range(mut self, min: usize, max: usize) -> Self {
        self.min_members = min.max(1);
        self.max_members = max.max(self.min_members);
        self
    }

    /// Requested relative accuracy and hysteresis margin
    #[inline]
    #[must_use]
    pub fn with_accuracy(mut self, accuracy: f64, margin: f64) -> Self {
        self.accuracy = accuracy;
        self.margin = margin;
        self
    }

    /// Smallest ensemble size
    #[inline]
    #[must_use]
    pub fn min_members(&self) -> usize {
        self.min_members
    }

    /// Largest ensemble size
    #[inline]
    #[must_use]
    pub fn max_members(&self) -> usize {
        self.max_members
    }

    /// Ensemble size for a task given its carried-over feedback
    #[must_use]
    pub fn members_for(&self, feedback: f64) -> usize {
        if feedback.is_finite() && feedback > 0.0 {
            (feedback as usize).clamp(self.min_members, self.max_members)
        } else {
            self.min_members
        }
    }

    fn upper(&self) -> f64 {
        (1.0 + self.accuracy + self.margin)
            .ln()
            .min(-(1.0 - self.accuracy - self.margin).ln())
    }

    fn lower(&self) -> f64 {
        (1.0 + self.accuracy - self.margin)
            .ln()
            .min(-(1.0 - self.accuracy + self.margin).ln())
    }
}

impl Likelihood for EnsembleLikelihood {
    fn class_name(&self) -> &'static str {
        "EnsembleLikelihood"
    }

    fn log_space(&self) -> bool {
        true
    }

    fn evaluate(&self, task: &mut Task, parameters: &Parameters) -> Result<Estimate, TaskError> {
        let scale = self.error.resolve(parameters)?;
        let members = self.members_for(task.feedback());

        let mut estimates = Vec::with_capacity(members);
        let mut failures = 0usize;
        let mut last_error = None;
        for member in 0..members {
            match run_trajectory(task, parameters, scale) {
                Ok(trajectory) => estimates.push(trajectory.estimates.iter().sum::<f64>()),
                Err(e) if e.degrades_to_nan() => {
                    tracing::debug!("Task {} member {} failed: {}", task.name(), member, e);
                    failures += 1;
                    last_error = Some(e);
                    estimates.push(f64::NAN);
                }
                Err(e) => return Err(e),
            }
        }
        if failures == members {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        let value = log_mean_exp(&estimates);
        let deviation = relative_deviation(&estimates);
        if value == f64::NEG_INFINITY {
            tracing::warn!("Task {}: every ensemble member has zero likelihood", task.name());
        }

        let mut info = Info::success()
            .with("members", members)
            .with("failures", failures)
            .with("deviation", deviation);
        if task.informative() >= 1 {
            info.insert("estimates", &estimates);
        }
        Ok(Estimate::new(value, info))
    }

    fn cost(&self, model: &dyn Model) -> CostProfile {
        CostProfile::leaf("Likelihood", self.class_name(), self.max_members as u64)
            .wrapping(CostProfile::leaf("Model", model.class_name(), 1))
    }

    fn feedback_hook(&self) -> Option<&dyn FeedbackCapable> {
        Some(self)
    }
}

impl FeedbackCapable for EnsembleLikelihood {
    fn feedback(&self, _value: f64, info: &Info) -> f64 {
        let (Some(deviation), Some(members)) = (info.get_f64("deviation"), info.get_f64("members"))
        else {
            return f64::NAN;
        };
        if deviation.is_nan() {
            return f64::NAN;
        }
        let members = members as usize;
        let next = if deviation > self.upper() {
            members * self.factor
        } else if deviation < self.lower() {
            members.div_ceil(self.factor).max(2)
        } else {
            members
        };
        next as f64
    }
}

struct Trajectory {
    estimates: Vec<f64>,
    predictions: Vec<Vec<f64>>,
}

/// Initialize the task and run it through every observation
fn run_trajectory(
    task: &mut Task,
    parameters: &Parameters,
    scale: f64,
) -> Result<Trajectory, TaskError> {
    let dataset = task.dataset_handle();
    task.init(parameters)?;

    let mut trajectory = Trajectory {
        estimates: Vec::with_capacity(dataset.len()),
        predictions: Vec::with_capacity(dataset.len()),
    };
    for observation in &dataset.observations {
        let prediction = task.run(observation.time)?;
        let estimate =
            gaussian_log_density(observation.time, &observation.values, &prediction.values, scale)?;
        tracing::trace!(
            "Task {} t={} log-density {}",
            task.name(),
            observation.time,
            estimate
        );
        trajectory.estimates.push(estimate);
        trajectory.predictions.push(prediction.values);
    }
    Ok(trajectory)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gaussian_density_at_mean() {
        let v = gaussian_log_density(0.0, &[1.0], &[1.0], 1.0).unwrap();
        assert!((v - (-0.5 * (2.0 * PI).ln())).abs() < 1e-12);
    }

    #[test]
    fn gaussian_density_skips_missing() {
        let both = gaussian_log_density(0.0, &[1.0, f64::NAN], &[1.0, 5.0], 1.0).unwrap();
        let one = gaussian_log_density(0.0, &[1.0], &[1.0], 1.0).unwrap();
        assert_eq!(both, one);
        assert!(gaussian_log_density(0.0, &[1.0], &[1.0, 2.0], 1.0).is_err());
    }

    #[test]
    fn log_mean_exp_matches_direct() {
        let values = [-1.0, -2.0, -3.0];
        let direct = (values.iter().map(|v: &f64| v.exp()).sum::<f64>() / 3.0).ln();
        assert!((log_mean_exp(&values) - direct).abs() < 1e-12);
        assert!((log_mean_exp(&[-1000.0, -1000.0]) + 1000.0).abs() < 1e-9);
        assert!(log_mean_exp(&[f64::NAN]).is_nan());
        assert_eq!(log_mean_exp(&[f64::NEG_INFINITY]), f64::NEG_INFINITY);
    }

    #[test]
    fn relative_deviation_of_identical_members_is_zero() {
        assert_eq!(relative_deviation(&[-5.0, -5.0, -5.0]), 0.0);
        assert!(relative_deviation(&[-5.0]).is_nan());
        assert!(relative_deviation(&[-5.0, -1.0]) > 0.0);
    }

    #[test]
    fn error_scale_resolution() {
        let params = Parameters::new().with("sigma_obs", 0.5).with("bad", -1.0);
        assert_eq!(ErrorScale::Fixed(2.0).resolve(&params).unwrap(), 2.0);
        assert_eq!(
            ErrorScale::Parameter("sigma_obs".into()).resolve(&params).unwrap(),
            0.5
        );
        assert!(ErrorScale::Parameter("bad".into()).resolve(&params).is_err());
        assert!(ErrorScale::Parameter("missing".into()).resolve(&params).is_err());
    }

    #[test]
    fn ensemble_feedback_adapts_members() {
        let ensemble = EnsembleLikelihood::new(ErrorScale::default(), 4).with_range(2, 64);
        let info = |deviation: f64| Info::success().with("members", 8).with("deviation", deviation);

        assert_eq!(ensemble.feedback(0.0, &info(0.5)), 16.0);
        assert_eq!(ensemble.feedback(0.0, &info(0.01)), 4.0);
        assert_eq!(ensemble.feedback(0.0, &info(0.1)), 8.0);
        assert!(ensemble.feedback(0.0, &Info::success()).is_nan());
    }

    #[test]
    fn ensemble_halving_stops_at_two() {
        let ensemble = EnsembleLikelihood::new(ErrorScale::default(), 2);
        let info = Info::success().with("members", 3).with("deviation", 0.0);
        assert_eq!(ensemble.feedback(0.0, &info), 2.0);
    }

    #[test]
    fn members_clamped_to_range() {
        let ensemble = EnsembleLikelihood::new(ErrorScale::default(), 4).with_range(4, 16);
        assert_eq!(ensemble.members_for(f64::NAN), 4);
        assert_eq!(ensemble.members_for(2.0), 4);
        assert_eq!(ensemble.members_for(8.0), 8);
        assert_eq!(ensemble.members_for(100.0), 16);
    }
}
