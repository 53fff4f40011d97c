use crate::core::orchestrator::{OrchestrationState, can_transition};

use OrchestrationState::*;

#[test]
fn batch_happy_path_transitions_are_allowed() {
    let path = [
        (Idle, FetchingDashboard),
        (FetchingDashboard, RunningQueries(0)),
        (RunningQueries(0), SummarizingQuery(0)),
        (SummarizingQuery(0), RunningQueries(1)),
        (RunningQueries(1), SummarizingQuery(1)),
        (SummarizingQuery(1), Synthesizing),
        (Synthesizing, SuggestingQueries),
        (SuggestingQueries, Done),
    ];
    for (from, to) in path {
        assert!(
            can_transition(from, to),
            "expected transition {:?} -> {:?} to be allowed",
            from,
            to
        );
    }
}

#[test]
fn failed_query_moves_straight_to_the_next_one() {
    assert!(can_transition(RunningQueries(0), RunningQueries(1)));
    assert!(can_transition(RunningQueries(2), Synthesizing));
}

#[test]
fn query_indices_only_move_forward_by_one() {
    assert!(!can_transition(RunningQueries(0), RunningQueries(2)));
    assert!(!can_transition(RunningQueries(1), SummarizingQuery(0)));
    assert!(!can_transition(SummarizingQuery(1), RunningQueries(1)));
    assert!(!can_transition(Idle, RunningQueries(1)));
}

#[test]
fn synthesis_precedes_suggestions() {
    assert!(!can_transition(SummarizingQuery(0), SuggestingQueries));
    assert!(!can_transition(Synthesizing, Done));
    assert!(!can_transition(SuggestingQueries, Synthesizing));
}

#[test]
fn empty_batches_and_refine_skip_the_query_loop() {
    assert!(can_transition(Idle, Synthesizing));
    assert!(can_transition(FetchingDashboard, Synthesizing));
    assert!(can_transition(Idle, Refining));
    assert!(can_transition(Refining, Done));
    assert!(!can_transition(Refining, Synthesizing));
}

#[test]
fn error_is_reachable_from_every_active_state() {
    let active = [
        Idle,
        FetchingDashboard,
        RunningQueries(3),
        SummarizingQuery(3),
        Synthesizing,
        SuggestingQueries,
        Refining,
    ];
    for state in active {
        assert!(
            can_transition(state, Error),
            "expected {:?} -> Error to be allowed",
            state
        );
    }
}

#[test]
fn terminal_states_are_final() {
    for terminal in [Done, Error] {
        assert!(terminal.is_terminal());
        for target in [Idle, RunningQueries(0), Synthesizing, Done, Error] {
            assert!(!can_transition(terminal, target));
        }
    }
}
