//! Reference stochastic model

use rand::Rng;
use rand_distr::StandardNormal;
use replica_kernel::error::TaskError;
use replica_kernel::task::{Model, ModelContext};
use replica_kernel::types::{InputSet, Parameters, Prediction};
use serde::{Deserialize, Serialize};

/// Gaussian random walk with drift
///
/// `x(t + dt) = x(t) + drift * dt + sigma * sqrt(dt) * N(0, 1)`
///
/// Parameters: `drift`, `sigma` and optionally `x0`. An `x0` number in the
/// input set takes precedence over the parameter; the default is zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RandomWalk {
    drift: f64,
    sigma: f64,
    time: f64,
    position: f64,
}

impl RandomWalk {
    /// Create an uninitialized walk
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current position
    #[inline]
    #[must_use]
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Current time
    #[inline]
    #[must_use]
    pub fn time(&self) -> f64 {
        self.time
    }
}

impl Model for RandomWalk {
    fn init(
        &mut self,
        _ctx: &mut ModelContext<'_>,
        inputset: Option<&InputSet>,
        parameters: &Parameters,
    ) -> Result<(), TaskError> {
        let drift = parameters.require("drift")?;
        let sigma = parameters.require("sigma")?;
        if sigma < 0.0 {
            return Err(TaskError::ModelInit(format!("sigma must be non-negative, got {sigma}")));
        }
        let x0 = match inputset.and_then(|inputs| inputs.get("x0")) {
            Some(value) => value
                .as_f64()
                .ok_or_else(|| TaskError::ModelInit("input x0 is not a number".to_string()))?,
            None => parameters.get("x0").unwrap_or(0.0),
        };

        *self = Self {
            drift,
            sigma,
            time: 0.0,
            position: x0,
        };
        Ok(())
    }

    fn run(&mut self, ctx: &mut ModelContext<'_>, time: f64) -> Result<Prediction, TaskError> {
        if time < self.time {
            return Err(TaskError::run(
                time,
                format!("cannot run backwards from {}", self.time),
            ));
        }
        let dt = time - self.time;
        if dt > 0.0 {
            let noise: f64 = ctx.rng.sample(StandardNormal);
            self.position += self.drift * dt + self.sigma * dt.sqrt() * noise;
            self.time = time;
        }
        if !self.position.is_finite() {
            return Err(TaskError::run(time, "walk diverged"));
        }
        Ok(Prediction::new(vec![self.position]))
    }

    fn save(&self) -> Result<serde_json::Value, TaskError> {
        Ok(serde_json::to_value(self)?)
    }

    fn load(&mut self, state: serde_json::Value) -> Result<(), TaskError> {
        *self = serde_json::from_value(state)?;
        Ok(())
    }

    fn class_name(&self) -> &'static str {
        "RandomWalk"
    }
}
