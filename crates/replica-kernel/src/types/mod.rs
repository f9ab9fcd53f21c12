//! Core data model
//!
//! - [`Parameters`]: named scalars shared by every task in a round
//! - [`Dataset`]: ordered, timestamped observations of one replicate
//! - [`Prediction`]: what a model returns when advanced to a time
//! - [`Info`]: per-task diagnostics

use crate::error::TaskError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Caller-supplied auxiliary inputs for a model, opaque to the kernel
pub type InputSet = serde_json::Value;

/// Named vector of scalars, read-only for the duration of a round
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(BTreeMap<String, f64>);

impl Parameters {
    /// Create empty parameters
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With a named value
    #[inline]
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    /// Look up a value
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    /// Look up a value a model cannot do without
    ///
    /// # Errors
    /// Returns [`TaskError::ModelInit`] if the value is missing or not finite.
    pub fn require(&self, name: &str) -> Result<f64, TaskError> {
        match self.get(name) {
            Some(v) if v.is_finite() => Ok(v),
            Some(v) => Err(TaskError::ModelInit(format!("parameter '{name}' is {v}"))),
            None => Err(TaskError::ModelInit(format!("missing parameter '{name}'"))),
        }
    }

    /// Iterate in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Number of values
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no values
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// One timestamped observation row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Observation time
    pub time: f64,
    /// Observed values, one per observed quantity
    pub values: Vec<f64>,
}

impl Observation {
    /// Create an observation
    #[inline]
    #[must_use]
    pub fn new(time: f64, values: Vec<f64>) -> Self {
        Self { time, values }
    }
}

/// Named, time-ordered table of observations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Unique name within a replicate set
    pub name: String,
    /// Observations in ascending time order
    pub observations: Vec<Observation>,
}

impl Dataset {
    /// Create a dataset, ordering observations by time
    #[must_use]
    pub fn new(name: impl Into<String>, mut observations: Vec<Observation>) -> Self {
        observations.sort_by(|a, b| a.time.total_cmp(&b.time));
        Self {
            name: name.into(),
            observations,
        }
    }

    /// Number of observation rows
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    /// Whether the dataset has no rows
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Observation times in order
    pub fn times(&self) -> impl Iterator<Item = f64> + '_ {
        self.observations.iter().map(|o| o.time)
    }
}

/// Model output at a requested time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Predicted values, aligned with observation values
    pub values: Vec<f64>,
    /// Optional auxiliary payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Prediction {
    /// Create a prediction without payload
    #[inline]
    #[must_use]
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            values,
            payload: None,
        }
    }

    /// With an auxiliary payload
    #[inline]
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Per-task diagnostic information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Info {
    /// Whether the task produced a usable value
    pub successful: bool,
    /// Failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Likelihood-specific diagnostics
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl Info {
    /// Info of a successful evaluation
    #[inline]
    #[must_use]
    pub fn success() -> Self {
        Self {
            successful: true,
            error: None,
            fields: BTreeMap::new(),
        }
    }

    /// Info of a failed evaluation
    #[inline]
    #[must_use]
    pub fn failure(error: &TaskError) -> Self {
        Self {
            successful: false,
            error: Some(error.to_string()),
            fields: BTreeMap::new(),
        }
    }

    /// With a diagnostic field
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert a diagnostic field
    ///
    /// Values that fail to serialize are stored as null.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Serialize) {
        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        self.fields.insert(key.into(), value);
    }

    /// Numeric field, if present
    #[inline]
    #[must_use]
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(serde_json::Value::as_f64)
    }
}

impl Default for Info {
    fn default() -> Self {
        Self::success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameters_require() {
        let params = Parameters::new().with("drift", 0.5).with("sigma", f64::NAN);
        assert_eq!(params.require("drift").unwrap(), 0.5);
        assert!(matches!(params.require("sigma"), Err(TaskError::ModelInit(_))));
        assert!(matches!(params.require("x0"), Err(TaskError::ModelInit(_))));
    }

    #[test]
    fn parameters_from_iter() {
        let params: Parameters = [("a", 1.0), ("b", 2.0)].into_iter().collect();
        assert_eq!(params.len(), 2);
        assert_eq!(params.iter().map(|(k, _)| k).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn dataset_orders_by_time() {
        let dataset = Dataset::new(
            "A",
            vec![
                Observation::new(2.0, vec![1.0]),
                Observation::new(0.5, vec![0.0]),
            ],
        );
        assert_eq!(dataset.times().collect::<Vec<_>>(), vec![0.5, 2.0]);
        assert_eq!(dataset.len(), 2);
    }

    #[test]
    fn info_fields() {
        let info = Info::success().with("members", 8).with("deviation", 0.25);
        assert!(info.successful);
        assert_eq!(info.get_f64("deviation"), Some(0.25));
        assert_eq!(info.get_f64("members"), Some(8.0));

        let failed = Info::failure(&TaskError::ModelInit("bad".into()));
        assert!(!failed.successful);
        assert!(failed.error.unwrap().contains("bad"));
    }
}
