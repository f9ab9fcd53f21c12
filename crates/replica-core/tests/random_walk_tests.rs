use replica_core::prelude::*;
use std::sync::Arc;

fn walk_data(name: &str, slope: f64) -> Dataset {
    let observations = (1..=8)
        .map(|t| Observation::new(t as f64, vec![slope * t as f64]))
        .collect();
    Dataset::new(name, observations)
}

fn replicates(seed: u64) -> ReplicateOrchestrator {
    let mut replicates = ReplicateOrchestrator::new(
        ReplicateConfig::new().with_root_seed(seed).with_informative(1),
        Arc::new(DirectLikelihood::new(ErrorScale::Parameter("error".into()))),
        |_| Box::new(RandomWalk::new()),
    )
    .unwrap();
    replicates.add_dataset(walk_data("up", 1.0), None).unwrap();
    replicates
        .add_dataset(walk_data("offset", 1.0), Some(serde_json::json!({ "x0": 0.0 })))
        .unwrap();
    replicates
}

#[test]
fn true_drift_scores_best() {
    let score = |drift: f64| {
        let params = Parameters::new()
            .with("drift", drift)
            .with("sigma", 0.0)
            .with("error", 0.5);
        replicates(1).evaluate(&params).unwrap().value
    };
    assert!(score(1.0) > score(0.5));
    assert!(score(1.0) > score(1.5));
}

#[test]
fn noisy_walk_is_reproducible() {
    let params = Parameters::new()
        .with("drift", 1.0)
        .with("sigma", 0.2)
        .with("error", 0.5);
    let first = replicates(4).evaluate(&params).unwrap();
    let second = replicates(4).evaluate(&params).unwrap();
    let other = replicates(5).evaluate(&params).unwrap();

    assert!(first.successful);
    assert_eq!(first.evaluations, second.evaluations);
    assert_ne!(first.evaluations, other.evaluations);
    assert!(first.infos["up"].fields.contains_key("estimates"));
}

#[test]
fn missing_parameter_degrades_to_failure() {
    let params = Parameters::new().with("drift", 1.0).with("error", 0.5);
    let result = replicates(1).evaluate(&params).unwrap();
    assert!(!result.successful);
    assert_eq!(result.failed().count(), 2);
}
