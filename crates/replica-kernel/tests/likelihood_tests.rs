use rand::Rng;
use replica_kernel::prelude::*;
use std::f64::consts::PI;
use std::sync::Arc;

/// Level plus optional uniform noise drawn from the context generator
#[derive(Debug, Default)]
struct NoisyLevel {
    level: f64,
    noise: f64,
}

impl Model for NoisyLevel {
    fn init(
        &mut self,
        _ctx: &mut ModelContext<'_>,
        _inputset: Option<&InputSet>,
        parameters: &Parameters,
    ) -> Result<(), TaskError> {
        self.level = parameters.require("level")?;
        self.noise = parameters.get("noise").unwrap_or(0.0);
        Ok(())
    }

    fn run(&mut self, ctx: &mut ModelContext<'_>, _time: f64) -> Result<Prediction, TaskError> {
        let jitter = if self.noise > 0.0 {
            self.noise * (ctx.rng.gen::<f64>() - 0.5)
        } else {
            0.0
        };
        Ok(Prediction::new(vec![self.level + jitter]))
    }

    fn save(&self) -> Result<serde_json::Value, TaskError> {
        Ok(serde_json::json!({ "level": self.level, "noise": self.noise }))
    }

    fn load(&mut self, state: serde_json::Value) -> Result<(), TaskError> {
        self.level = state["level"].as_f64().unwrap_or(0.0);
        self.noise = state["noise"].as_f64().unwrap_or(0.0);
        Ok(())
    }
}

fn planted(seed: u64, feedback: f64) -> Task {
    let dataset = Arc::new(Dataset::new(
        "A",
        vec![
            Observation::new(1.0, vec![1.0]),
            Observation::new(2.0, vec![3.0]),
        ],
    ));
    let mut task = Task::new("A", dataset, None, Box::new(NoisyLevel::default()));
    task.isolate(None, 0, false).unwrap();
    task.plant(SeedTree::new(seed).spawn(0, "R-A").unwrap(), 1).unwrap();
    task.set_feedback(feedback);
    task
}

#[test]
fn direct_likelihood_sums_log_densities() {
    let mut task = planted(1, f64::NAN);
    let params = Parameters::new().with("level", 1.0);
    let estimate = DirectLikelihood::new(ErrorScale::Fixed(1.0))
        .evaluate(&mut task, &params)
        .unwrap();

    let expected = -(2.0 * PI).ln() - 2.0;
    assert!((estimate.value - expected).abs() < 1e-12);
    assert_eq!(estimate.info.get_f64("snapshots"), Some(2.0));
    // informative level 1 carries per-snapshot estimates
    assert!(estimate.info.fields.contains_key("estimates"));
    assert!(!estimate.info.fields.contains_key("predictions"));
}

#[test]
fn direct_likelihood_reports_missing_parameters() {
    let mut task = planted(1, f64::NAN);
    let result = DirectLikelihood::new(ErrorScale::Parameter("sigma".into()))
        .evaluate(&mut task, &Parameters::new().with("level", 1.0));
    assert!(matches!(result, Err(TaskError::ModelInit(_))));
}

#[test]
fn ensemble_of_identical_members_shrinks() {
    let ensemble = EnsembleLikelihood::new(ErrorScale::Fixed(1.0), 4).with_range(2, 8);
    let mut task = planted(1, 4.0);
    let estimate = ensemble
        .evaluate(&mut task, &Parameters::new().with("level", 1.0))
        .unwrap();

    let expected = -(2.0 * PI).ln() - 2.0;
    assert!((estimate.value - expected).abs() < 1e-9);
    assert_eq!(estimate.info.get_f64("members"), Some(4.0));
    assert_eq!(estimate.info.get_f64("deviation"), Some(0.0));

    let hook = ensemble.feedback_hook().unwrap();
    assert_eq!(hook.feedback(estimate.value, &estimate.info), 2.0);
}

#[test]
fn ensemble_is_reproducible_per_seed() {
    let ensemble = EnsembleLikelihood::new(ErrorScale::Fixed(0.5), 6);
    let params = Parameters::new().with("level", 1.0).with("noise", 2.0);
    let value = |seed| {
        ensemble
            .evaluate(&mut planted(seed, f64::NAN), &params)
            .unwrap()
            .value
    };
    assert_eq!(value(3), value(3));
    assert_ne!(value(3), value(4));
}

#[test]
fn cost_profiles_wrap_the_model() {
    let task = planted(1, f64::NAN);
    let estimator = CostEstimator::new();

    let direct = DirectLikelihood::default();
    assert_eq!(estimator.task_cost(&task, &direct), 2);

    let ensemble = EnsembleLikelihood::new(ErrorScale::default(), 2).with_range(2, 16);
    let profile = ensemble.cost(task.model());
    let records = estimator.evaluations(&profile);
    assert_eq!(records[0].component, "Likelihood");
    assert_eq!(records[0].cumulative, 16);
    assert_eq!(records[1].component, "Model");
    assert_eq!(estimator.task_cost(&task, &ensemble), 32);
}
