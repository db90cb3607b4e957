use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::agent::state::WorkflowState;
use crate::sandbox::RunOutcome;

/// What a repair run hands back to its caller.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub candidate_code: String,
    /// Verification outcome when reference tests were given, otherwise the
    /// last in-loop run.
    pub passed: bool,
    pub iterations: u32,
    pub max_iterations: u32,
    pub test_suite: Option<String>,
    pub diagnostic_summary: Option<String>,
    pub last_run_outcome: Option<RunOutcome>,
    pub verification: Option<RunOutcome>,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
}

impl RunReport {
    pub fn new(
        state: WorkflowState,
        verification: Option<RunOutcome>,
        started_at: DateTime<Utc>,
        elapsed_secs: f64,
    ) -> Self {
        let passed = match &verification {
            Some(outcome) => outcome.passed(),
            None => state.run_passed(),
        };

        Self {
            candidate_code: state.candidate_code,
            passed,
            iterations: state.iteration,
            max_iterations: state.max_iterations,
            test_suite: state.test_suite,
            diagnostic_summary: state.diagnostic_summary,
            last_run_outcome: state.last_run_outcome,
            verification,
            started_at,
            elapsed_secs,
        }
    }
}
