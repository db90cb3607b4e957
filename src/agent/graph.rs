//! Transition table of the repair workflow.
//!
//! Edges are evaluated in table order after their source node returns; the
//! first edge whose guard holds wins. Guards are pure predicates over the
//! snapshot, so control flow can be tested without running any node.

use crate::agent::state::{NodeKind, WorkflowState};

/// Where the engine goes after a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Node(NodeKind),
    Terminate,
}

pub type Guard = fn(&WorkflowState) -> bool;

pub struct Edge {
    pub from: NodeKind,
    pub guard: Guard,
    pub to: Next,
}

pub const ENTRY: NodeKind = NodeKind::Analyze;

pub const TRANSITIONS: &[Edge] = &[
    Edge {
        from: NodeKind::Analyze,
        guard: lacks_tests,
        to: Next::Node(NodeKind::GenerateTests),
    },
    Edge {
        from: NodeKind::Analyze,
        guard: has_tests,
        to: Next::Node(NodeKind::Execute),
    },
    Edge {
        from: NodeKind::GenerateTests,
        guard: has_tests,
        to: Next::Node(NodeKind::Execute),
    },
    // No cap besides the engine's recursion limit.
    Edge {
        from: NodeKind::GenerateTests,
        guard: lacks_tests,
        to: Next::Node(NodeKind::GenerateTests),
    },
    Edge {
        from: NodeKind::Execute,
        guard: run_passed,
        to: Next::Terminate,
    },
    Edge {
        from: NodeKind::Execute,
        guard: run_failed,
        to: Next::Node(NodeKind::Diagnose),
    },
    Edge {
        from: NodeKind::Diagnose,
        guard: always,
        to: Next::Node(NodeKind::Repair),
    },
    Edge {
        from: NodeKind::Repair,
        guard: always,
        to: Next::Node(NodeKind::Postprocess),
    },
    Edge {
        from: NodeKind::Postprocess,
        guard: always,
        to: Next::Node(NodeKind::AdvanceIteration),
    },
    Edge {
        from: NodeKind::AdvanceIteration,
        guard: iterations_exhausted,
        to: Next::Terminate,
    },
    Edge {
        from: NodeKind::AdvanceIteration,
        guard: iterations_remain,
        to: Next::Node(NodeKind::Execute),
    },
];

/// Resolve the successor of `from` for the given snapshot.
///
/// Every node has a pair of complementary guards, so a missing match means the
/// table itself is broken; that case terminates rather than looping.
pub fn next_step(from: NodeKind, state: &WorkflowState) -> Next {
    TRANSITIONS
        .iter()
        .find(|edge| edge.from == from && (edge.guard)(state))
        .map(|edge| edge.to)
        .unwrap_or(Next::Terminate)
}

fn has_tests(state: &WorkflowState) -> bool {
    state.test_suite.is_some()
}

fn lacks_tests(state: &WorkflowState) -> bool {
    state.test_suite.is_none()
}

fn run_passed(state: &WorkflowState) -> bool {
    state.run_passed()
}

fn run_failed(state: &WorkflowState) -> bool {
    !state.run_passed()
}

fn always(_: &WorkflowState) -> bool {
    true
}

fn iterations_exhausted(state: &WorkflowState) -> bool {
    state.iteration >= state.max_iterations
}

fn iterations_remain(state: &WorkflowState) -> bool {
    state.iteration < state.max_iterations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::state::StatePatch;
    use crate::sandbox::RunOutcome;

    const ALL_NODES: [NodeKind; 7] = [
        NodeKind::Analyze,
        NodeKind::GenerateTests,
        NodeKind::Execute,
        NodeKind::Diagnose,
        NodeKind::Repair,
        NodeKind::Postprocess,
        NodeKind::AdvanceIteration,
    ];

    fn outcome(success: bool, exit_code: i32) -> RunOutcome {
        RunOutcome {
            success,
            stdout: String::new(),
            stderr: String::new(),
            exit_code,
            tests_passed: success,
        }
    }

    fn with_outcome(state: WorkflowState, run: RunOutcome) -> WorkflowState {
        state.apply(StatePatch {
            last_run_outcome: Some(run),
            ..Default::default()
        })
    }

    #[test]
    fn test_analyze_branches_on_test_suite() {
        let without = WorkflowState::new("x", None, 3);
        assert_eq!(
            next_step(NodeKind::Analyze, &without),
            Next::Node(NodeKind::GenerateTests)
        );

        let with = without.with_test_suite(Some("assert True"));
        assert_eq!(next_step(NodeKind::Analyze, &with), Next::Node(NodeKind::Execute));
    }

    #[test]
    fn test_generate_tests_retries_until_suite_exists() {
        let without = WorkflowState::new("x", None, 3);
        assert_eq!(
            next_step(NodeKind::GenerateTests, &without),
            Next::Node(NodeKind::GenerateTests)
        );

        let with = without.with_test_suite(Some("assert True"));
        assert_eq!(
            next_step(NodeKind::GenerateTests, &with),
            Next::Node(NodeKind::Execute)
        );
    }

    #[test]
    fn test_execute_terminates_only_on_clean_success() {
        let base = WorkflowState::new("x", None, 3);

        let passed = with_outcome(base.clone(), outcome(true, 0));
        assert_eq!(next_step(NodeKind::Execute, &passed), Next::Terminate);

        let failed = with_outcome(base.clone(), outcome(false, 1));
        assert_eq!(next_step(NodeKind::Execute, &failed), Next::Node(NodeKind::Diagnose));

        let inconsistent = with_outcome(base.clone(), outcome(true, 2));
        assert_eq!(
            next_step(NodeKind::Execute, &inconsistent),
            Next::Node(NodeKind::Diagnose)
        );

        assert_eq!(next_step(NodeKind::Execute, &base), Next::Node(NodeKind::Diagnose));
    }

    #[test]
    fn test_repair_chain_is_unconditional() {
        let state = WorkflowState::new("x", None, 3);
        assert_eq!(next_step(NodeKind::Diagnose, &state), Next::Node(NodeKind::Repair));
        assert_eq!(next_step(NodeKind::Repair, &state), Next::Node(NodeKind::Postprocess));
        assert_eq!(
            next_step(NodeKind::Postprocess, &state),
            Next::Node(NodeKind::AdvanceIteration)
        );
    }

    #[test]
    fn test_advance_iteration_respects_ceiling() {
        let state = WorkflowState::new("x", None, 2);
        assert_eq!(
            next_step(NodeKind::AdvanceIteration, &state),
            Next::Node(NodeKind::Execute)
        );

        let exhausted = state.apply(StatePatch {
            iteration: Some(2),
            ..Default::default()
        });
        assert_eq!(next_step(NodeKind::AdvanceIteration, &exhausted), Next::Terminate);
    }

    #[test]
    fn test_guards_are_total_and_exclusive() {
        let states = [
            WorkflowState::new("x", None, 1),
            WorkflowState::new("x", None, 1).with_test_suite(Some("t")),
            with_outcome(WorkflowState::new("x", None, 1), outcome(true, 0)),
            with_outcome(WorkflowState::new("x", None, 1), outcome(false, -1)),
        ];

        for node in ALL_NODES {
            for state in &states {
                let matching = TRANSITIONS
                    .iter()
                    .filter(|edge| edge.from == node && (edge.guard)(state))
                    .count();
                assert_eq!(matching, 1, "node {node} must have exactly one live edge");
            }
        }
    }
}
