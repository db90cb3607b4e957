use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::agent::engine::WorkflowEngine;
use crate::agent::proposer::Proposer;
use crate::agent::state::WorkflowState;
use crate::agent::tools::lookup_inspections::InspectionRunner;
use crate::agent::tools::CapabilityRegistry;
use crate::config::AppConfig;
use crate::error::Result;
use crate::sandbox::SandboxRunner;
use crate::workflow::types::RunReport;

/// Run one repair workflow for the task described in `config`.
///
/// When reference tests are configured the final candidate is executed once
/// more against them, and that run decides `passed`.
pub async fn run_repair(config: &AppConfig, proposer: Arc<dyn Proposer>) -> Result<RunReport> {
    config.validate()?;

    let started_at = Utc::now();
    let clock = Instant::now();
    let task = &config.task;
    let run_inspections = config.workflow.run_inspections;

    let sandbox = SandboxRunner::new(&config.sandbox.interpreter, config.sandbox.timeout())
        .with_output_limit(config.sandbox.max_output_bytes);
    let inspections =
        run_inspections.then(|| InspectionRunner::from_config(&config.inspections));
    let engine = WorkflowEngine::new(proposer, sandbox, CapabilityRegistry::new(inspections));

    let initial = WorkflowState::new(
        &task.buggy_code,
        task.docstring.as_deref(),
        config.workflow.max_iter,
    )
    .with_test_suite(task.tests.as_deref())
    .with_inspections(run_inspections);

    tracing::info!(
        max_iter = config.workflow.max_iter,
        recursion_limit = config.workflow.recursion_limit,
        run_inspections,
        tests_supplied = task.tests.is_some(),
        "Starting repair workflow"
    );

    let state = engine.run(initial, config.workflow.recursion_limit).await?;

    let verification = match &task.reference_tests {
        Some(tests) => {
            let outcome = engine.sandbox().run(&state.candidate_code, Some(tests)).await?;
            tracing::info!(passed = outcome.passed(), "Verified against reference tests");
            Some(outcome)
        }
        None => None,
    };

    Ok(RunReport::new(
        state,
        verification,
        started_at,
        clock.elapsed().as_secs_f64(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::proposer::Reply;
    use crate::error::AppError;
    use crate::test_support::ScriptedProposer;

    fn config(task: &str) -> AppConfig {
        let yaml = format!(
            "claude:\n  api_key: sk-test\nworkflow:\n  max_iter: 2\n  recursion_limit: 50\nsandbox:\n  interpreter: sh\n  timeout_secs: 10\ntask:\n{task}"
        );
        config::Config::builder()
            .add_source(config::File::from_str(&yaml, config::FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[tokio::test]
    async fn test_report_uses_reference_verification() {
        let config = config(
            "  buggy_code: \"x=1\"\n  tests: \"[ \\\"$x\\\" = 1 ]\"\n  reference_tests: \"[ \\\"$x\\\" = 2 ]\"\n",
        );
        let proposer = Arc::new(ScriptedProposer::new(vec![Reply::text("fine")]));

        let report = run_repair(&config, proposer).await.unwrap();

        assert_eq!(report.candidate_code, "x=1");
        assert_eq!(report.iterations, 0);
        assert!(report.last_run_outcome.as_ref().unwrap().passed());
        assert!(!report.verification.as_ref().unwrap().passed());
        assert!(!report.passed);
    }

    #[tokio::test]
    async fn test_report_without_reference_uses_last_run() {
        let config = config("  buggy_code: \"exit 1\"\n  tests: \"true\"\n");
        let proposer = Arc::new(ScriptedProposer::default());

        let report = run_repair(&config, proposer).await.unwrap();

        assert!(!report.passed);
        assert!(report.verification.is_none());
        assert_eq!(report.iterations, 2);
        assert_eq!(report.max_iterations, 2);
        assert_eq!(report.candidate_code, "exit 1");
    }

    #[tokio::test]
    async fn test_invalid_task_is_rejected_before_running() {
        let config = config("  buggy_code: \"\"\n");
        let proposer = Arc::new(ScriptedProposer::default());

        let err = run_repair(&config, Arc::clone(&proposer) as Arc<dyn Proposer>)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
        assert!(proposer.requests().is_empty());
    }
}
