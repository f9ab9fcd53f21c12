use replica_kernel::task::state::{allowed_transitions, plant_target, validate_transition, TaskState};
use proptest::prelude::*;

#[test]
fn test_created_transitions() {
    assert!(validate_transition(TaskState::Created, TaskState::Isolated).is_ok());
    assert!(validate_transition(TaskState::Created, TaskState::Failed).is_ok());

    // Invalid
    assert!(validate_transition(TaskState::Created, TaskState::Initialized).is_err());
    assert!(validate_transition(TaskState::Created, TaskState::Ran).is_err());
}

#[test]
fn test_exited_only_reisolates() {
    assert!(validate_transition(TaskState::Exited, TaskState::Isolated).is_ok());

    assert!(validate_transition(TaskState::Exited, TaskState::Ran).is_err());
    assert!(validate_transition(TaskState::Exited, TaskState::Initialized).is_err());
}

#[test]
fn test_run_requires_initialization() {
    assert!(validate_transition(TaskState::Planted, TaskState::Ran).is_err());
    assert!(validate_transition(TaskState::Initialized, TaskState::Ran).is_ok());
    assert!(validate_transition(TaskState::Ran, TaskState::Ran).is_ok());
}

#[test]
fn test_plant_targets() {
    assert_eq!(plant_target(TaskState::Isolated), Some(TaskState::Planted));
    assert_eq!(plant_target(TaskState::Ran), Some(TaskState::Ran));
    assert_eq!(plant_target(TaskState::Created), None);
    assert_eq!(plant_target(TaskState::Exited), None);
}

fn any_state() -> impl Strategy<Value = TaskState> {
    prop_oneof![
        Just(TaskState::Created),
        Just(TaskState::Isolated),
        Just(TaskState::Planted),
        Just(TaskState::Initialized),
        Just(TaskState::Ran),
        Just(TaskState::Exited),
        Just(TaskState::Failed),
    ]
}

proptest! {
    #[test]
    fn prop_all_transitions_are_subset_of_allowed(from in any_state(), to in any_state()) {
        let res = validate_transition(from, to);
        let allowed = allowed_transitions(from);

        if res.is_ok() {
            assert!(allowed.contains(&to));
        } else {
            assert!(!allowed.contains(&to));
        }
    }

    #[test]
    fn prop_every_state_can_reach_isolation(from in any_state()) {
        // Tasks are reused across rounds, so nothing may be terminal forever
        let reachable = allowed_transitions(from).contains(&TaskState::Isolated)
            || allowed_transitions(from)
                .into_iter()
                .any(|next| allowed_transitions(next).contains(&TaskState::Isolated));
        prop_assert!(reachable);
    }
}
