use std::fmt;

use serde::{Deserialize, Serialize};

use crate::agent::prompt;
use crate::agent::proposer::Message;
use crate::sandbox::RunOutcome;

/// The named steps of the repair workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Analyze,
    GenerateTests,
    Execute,
    Diagnose,
    Repair,
    Postprocess,
    AdvanceIteration,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Analyze => "analyze",
            NodeKind::GenerateTests => "generate_tests",
            NodeKind::Execute => "execute",
            NodeKind::Diagnose => "diagnose",
            NodeKind::Repair => "repair",
            NodeKind::Postprocess => "postprocess",
            NodeKind::AdvanceIteration => "advance_iteration",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one workflow run. Nodes read it and return a [`StatePatch`];
/// the engine produces the next snapshot with [`WorkflowState::apply`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowState {
    pub conversation: Vec<Message>,
    pub candidate_code: String,
    pub specification: Option<String>,
    pub test_suite: Option<String>,
    pub last_run_outcome: Option<RunOutcome>,
    pub diagnostic_summary: Option<String>,
    pub phase: NodeKind,
    pub iteration: u32,
    pub max_iterations: u32,
    pub inspections_enabled: bool,
}

impl WorkflowState {
    pub fn new(candidate_code: &str, specification: Option<&str>, max_iterations: u32) -> Self {
        Self {
            conversation: vec![Message::system(prompt::BASE_INSTRUCTION)],
            candidate_code: candidate_code.to_string(),
            specification: specification.map(str::to_string),
            test_suite: None,
            last_run_outcome: None,
            diagnostic_summary: None,
            phase: NodeKind::Analyze,
            iteration: 0,
            max_iterations,
            inspections_enabled: false,
        }
    }

    pub fn with_test_suite(mut self, tests: Option<&str>) -> Self {
        self.test_suite = tests.map(str::to_string);
        self
    }

    pub fn with_inspections(mut self, enabled: bool) -> Self {
        self.inspections_enabled = enabled;
        self
    }

    /// Merge a node's patch into a new snapshot.
    ///
    /// Messages are only ever appended; `None` fields keep their prior value.
    pub fn apply(self, patch: StatePatch) -> Self {
        let mut conversation = self.conversation;
        conversation.extend(patch.messages);

        Self {
            conversation,
            candidate_code: patch.candidate_code.unwrap_or(self.candidate_code),
            specification: self.specification,
            test_suite: patch.test_suite.or(self.test_suite),
            last_run_outcome: patch.last_run_outcome.or(self.last_run_outcome),
            diagnostic_summary: patch.diagnostic_summary.or(self.diagnostic_summary),
            phase: patch.phase.unwrap_or(self.phase),
            iteration: patch
                .iteration
                .map_or(self.iteration, |i| i.min(self.max_iterations)),
            max_iterations: self.max_iterations,
            inspections_enabled: self.inspections_enabled,
        }
    }

    /// Whether the last sandboxed run passed.
    pub fn run_passed(&self) -> bool {
        self.last_run_outcome
            .as_ref()
            .is_some_and(|outcome| outcome.passed())
    }
}

/// Changes emitted by one node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    /// Appended to the conversation in order.
    pub messages: Vec<Message>,
    pub candidate_code: Option<String>,
    pub test_suite: Option<String>,
    pub last_run_outcome: Option<RunOutcome>,
    pub diagnostic_summary: Option<String>,
    pub phase: Option<NodeKind>,
    pub iteration: Option<u32>,
}

impl StatePatch {
    pub fn phase(phase: NodeKind) -> Self {
        Self {
            phase: Some(phase),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_starts_at_analyze() {
        let state = WorkflowState::new("x = 1", Some("set x"), 3);
        assert_eq!(state.phase, NodeKind::Analyze);
        assert_eq!(state.iteration, 0);
        assert_eq!(state.max_iterations, 3);
        assert_eq!(state.conversation.len(), 1);
        assert!(state.test_suite.is_none());
        assert!(state.last_run_outcome.is_none());
        assert!(!state.inspections_enabled);
    }

    #[test]
    fn test_apply_appends_and_keeps_untouched_fields() {
        let state = WorkflowState::new("x = 1", None, 3).with_test_suite(Some("assert x == 1"));
        let patch = StatePatch {
            messages: vec![Message::user("hello")],
            candidate_code: Some("x = 2".to_string()),
            ..StatePatch::phase(NodeKind::Repair)
        };

        let next = state.clone().apply(patch);
        assert_eq!(next.conversation.len(), 2);
        assert_eq!(next.conversation[..1], state.conversation[..]);
        assert_eq!(next.candidate_code, "x = 2");
        assert_eq!(next.test_suite.as_deref(), Some("assert x == 1"));
        assert_eq!(next.phase, NodeKind::Repair);
        assert_eq!(next.iteration, 0);
    }

    #[test]
    fn test_empty_patch_is_identity() {
        let state = WorkflowState::new("x = 1", Some("doc"), 2).with_inspections(true);
        assert_eq!(state.clone().apply(StatePatch::default()), state);
    }

    #[test]
    fn test_iteration_never_exceeds_ceiling() {
        let state = WorkflowState::new("x = 1", None, 2);
        let next = state.apply(StatePatch {
            iteration: Some(5),
            ..Default::default()
        });
        assert_eq!(next.iteration, 2);
    }

    #[test]
    fn test_node_names() {
        assert_eq!(NodeKind::GenerateTests.to_string(), "generate_tests");
        assert_eq!(NodeKind::AdvanceIteration.as_str(), "advance_iteration");
    }
}
