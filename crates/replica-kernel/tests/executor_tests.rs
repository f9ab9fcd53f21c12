use proptest::prelude::*;
use replica_kernel::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Returns a constant level; only here to satisfy the task contract
#[derive(Debug, Default)]
struct LevelModel {
    level: f64,
}

impl Model for LevelModel {
    fn init(
        &mut self,
        _ctx: &mut ModelContext<'_>,
        _inputset: Option<&InputSet>,
        parameters: &Parameters,
    ) -> Result<(), TaskError> {
        self.level = parameters.get("level").unwrap_or(0.0);
        Ok(())
    }

    fn run(&mut self, _ctx: &mut ModelContext<'_>, _time: f64) -> Result<Prediction, TaskError> {
        Ok(Prediction::new(vec![self.level]))
    }

    fn save(&self) -> Result<serde_json::Value, TaskError> {
        Ok(serde_json::json!({ "level": self.level }))
    }

    fn load(&mut self, state: serde_json::Value) -> Result<(), TaskError> {
        self.level = state["level"].as_f64().unwrap_or(0.0);
        Ok(())
    }
}

/// Sleeps per task, then reports the task's position encoded in its name
#[derive(Debug, Default)]
struct LatencyLikelihood {
    delays: HashMap<String, u64>,
    panics: Vec<String>,
    failures: Vec<String>,
}

impl Likelihood for LatencyLikelihood {
    fn class_name(&self) -> &'static str {
        "LatencyLikelihood"
    }

    fn log_space(&self) -> bool {
        true
    }

    fn evaluate(&self, task: &mut Task, _parameters: &Parameters) -> Result<Estimate, TaskError> {
        if let Some(ms) = self.delays.get(task.name()) {
            std::thread::sleep(Duration::from_millis(*ms));
        }
        if self.panics.iter().any(|n| n == task.name()) {
            panic!("model crashed in {}", task.name());
        }
        if self.failures.iter().any(|n| n == task.name()) {
            return Err(TaskError::run(1.0, "diverged"));
        }
        let index: f64 = task.name()[1..].parse().unwrap_or(f64::NAN);
        Ok(Estimate::new(index, Info::success()))
    }

    fn cost(&self, model: &dyn Model) -> CostProfile {
        CostProfile::leaf("Model", model.class_name(), 1)
    }
}

fn planted_tasks(count: usize) -> Vec<Task> {
    let root = SeedTree::new(11);
    (0..count)
        .map(|i| {
            let name = format!("T{i}");
            let dataset = Arc::new(Dataset::new(name.clone(), vec![Observation::new(1.0, vec![0.0])]));
            let mut task = Task::new(name.clone(), dataset, None, Box::new(LevelModel::default()));
            task.isolate(None, 0, false).unwrap();
            task.plant(root.spawn(i as i64, &format!("R-{name}")).unwrap(), 0)
                .unwrap();
            task
        })
        .collect()
}

#[test]
fn serial_executor_preserves_order() {
    let mut tasks = planted_tasks(4);
    let mut executor = SerialExecutor::new();
    let outcomes = executor.map(&mut tasks, &LatencyLikelihood::default(), &Parameters::new());

    let values: Vec<f64> = outcomes.iter().map(|o| o.value).collect();
    assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0]);
    assert_eq!(executor.report().tasks, 4);
    assert!(tasks.iter().all(|t| t.state() == TaskState::Exited));
}

#[test]
fn failures_degrade_to_nan() {
    let mut tasks = planted_tasks(3);
    let likelihood = LatencyLikelihood {
        panics: vec!["T0".to_string()],
        failures: vec!["T2".to_string()],
        ..Default::default()
    };
    let mut executor = PoolExecutor::new(2).unwrap();
    let outcomes = executor.map(&mut tasks, &likelihood, &Parameters::new());

    assert!(outcomes[0].value.is_nan());
    assert!(!outcomes[0].info.successful);
    assert!(outcomes[0].info.error.as_deref().unwrap().contains("model crashed"));
    assert_eq!(outcomes[1].value, 1.0);
    assert!(outcomes[2].value.is_nan());
    assert!(outcomes[2].info.error.as_deref().unwrap().contains("diverged"));
    assert!(tasks[2].result().is_nan());
}

#[test]
fn pool_timeout_marks_task() {
    let mut tasks = planted_tasks(2);
    let likelihood = LatencyLikelihood {
        delays: HashMap::from([("T1".to_string(), 60)]),
        ..Default::default()
    };
    let mut executor = PoolExecutor::new(2)
        .unwrap()
        .with_timeout(Some(Duration::from_millis(20)));
    let outcomes = executor.map(&mut tasks, &likelihood, &Parameters::new());

    assert_eq!(outcomes[0].value, 0.0);
    assert!(!outcomes[0].timing.timed_out);
    assert!(outcomes[1].value.is_nan());
    assert!(outcomes[1].timing.timed_out);
    assert_eq!(executor.report().timed_out, 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_pool_output_follows_input(delays in prop::collection::vec(0u64..8, 1..8)) {
        let mut tasks = planted_tasks(delays.len());
        let likelihood = LatencyLikelihood {
            delays: delays
                .iter()
                .enumerate()
                .map(|(i, d)| (format!("T{i}"), *d))
                .collect(),
            ..Default::default()
        };
        let mut executor = PoolExecutor::new(4).unwrap();
        let outcomes = executor.map(&mut tasks, &likelihood, &Parameters::new());

        prop_assert_eq!(outcomes.len(), delays.len());
        for (i, outcome) in outcomes.iter().enumerate() {
            prop_assert_eq!(outcome.value, i as f64);
            prop_assert_eq!(&outcome.timing.name, &format!("T{i}"));
        }
    }
}
