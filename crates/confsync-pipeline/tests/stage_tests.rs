use confsync_pipeline::{allowed_transitions, transition, Event, Stage};
use proptest::prelude::*;

fn any_stage() -> impl Strategy<Value = Stage> {
    proptest::sample::select(Stage::ALL.to_vec())
}

fn any_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        Just(Event::Submit),
        Just(Event::Claimed),
        Just(Event::Completed),
        Just(Event::Failed),
        "[a-z]{0,6}".prop_map(|approver| Event::Approve { approver }),
        Just(Event::Retry),
        Just(Event::DeadlineExceeded),
        Just(Event::Rollback),
    ]
}

const POST_DEV: [Stage; 6] = [
    Stage::DevComplete,
    Stage::ProdApproved,
    Stage::ProdInProgress,
    Stage::ProdComplete,
    Stage::ProdFailed,
    Stage::RolledBack,
];

#[test]
fn test_created_transitions() {
    assert_eq!(transition(Stage::Created, &Event::Submit), Ok(Stage::DevPending));
    assert!(transition(Stage::Created, &Event::Completed).is_err());
    assert!(transition(Stage::Created, &Event::Claimed).is_err());
}

#[test]
fn test_failed_stages() {
    assert_eq!(allowed_transitions(Stage::DevFailed), vec![Stage::DevPending, Stage::RolledBack]);
    assert_eq!(allowed_transitions(Stage::ProdFailed), vec![Stage::RolledBack]);
}

proptest! {
    #[test]
    fn prop_transitions_are_subset_of_allowed(from in any_stage(), event in any_event()) {
        if let Ok(to) = transition(from, &event) {
            prop_assert!(allowed_transitions(from).contains(&to));
        }
    }

    #[test]
    fn prop_prod_complete_only_rolls_back(events in prop::collection::vec(any_event(), 1..12)) {
        let mut stage = Stage::ProdComplete;
        for event in &events {
            if let Ok(next) = transition(stage, event) {
                stage = next;
            }
            prop_assert!(matches!(stage, Stage::ProdComplete | Stage::RolledBack));
        }
    }

    #[test]
    fn prop_dev_pending_unreachable_after_dev(
        start in proptest::sample::select(POST_DEV.to_vec()),
        events in prop::collection::vec(any_event(), 1..16),
    ) {
        let mut stage = start;
        for event in &events {
            if let Ok(next) = transition(stage, event) {
                stage = next;
            }
            prop_assert_ne!(stage, Stage::DevPending);
            prop_assert_ne!(stage, Stage::Created);
        }
    }

    #[test]
    fn prop_rolled_back_is_final(event in any_event()) {
        prop_assert!(transition(Stage::RolledBack, &event).is_err());
    }
}
