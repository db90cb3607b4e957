//! Behaviour of each workflow node.
//!
//! A node reads the current snapshot and returns a [`StatePatch`]; it never
//! touches the snapshot itself. Each Proposer request is the node's
//! instruction, then the conversation so far, then the node's own turns.

use crate::agent::payload;
use crate::agent::prompt;
use crate::agent::proposer::{Message, Proposer};
use crate::agent::state::{NodeKind, StatePatch, WorkflowState};
use crate::agent::tools::{CapabilityRegistry, ToolResult};
use crate::error::Result;
use crate::sandbox::SandboxRunner;

/// Name attached to sandbox observations in the conversation.
pub const SANDBOX_OBSERVATION: &str = "run_code_in_sandbox";

/// Collaborators shared by all nodes of a run.
pub struct NodeContext<'a> {
    pub proposer: &'a dyn Proposer,
    pub sandbox: &'a SandboxRunner,
    pub registry: &'a CapabilityRegistry,
}

pub async fn run_node(
    node: NodeKind,
    ctx: &NodeContext<'_>,
    state: &WorkflowState,
) -> Result<StatePatch> {
    match node {
        NodeKind::Analyze => analyze(ctx, state).await,
        NodeKind::GenerateTests => generate_tests(ctx, state).await,
        NodeKind::Execute => execute(ctx, state).await,
        NodeKind::Diagnose => diagnose(ctx, state).await,
        NodeKind::Repair => repair(ctx, state).await,
        NodeKind::Postprocess => postprocess(ctx, state).await,
        NodeKind::AdvanceIteration => Ok(advance_iteration(state)),
    }
}

fn request(instruction: &str, state: &WorkflowState, turns: &[Message]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(state.conversation.len() + turns.len() + 1);
    messages.push(Message::system(instruction));
    messages.extend(state.conversation.iter().cloned());
    messages.extend(turns.iter().cloned());
    messages
}

/// Content of a structured payload, or `None` (logged) when the reply is malformed.
fn parse_artifact(artifact: &str, reply: &str) -> Option<String> {
    match payload::parse_content(reply) {
        Ok(content) => Some(content),
        Err(e) => {
            tracing::warn!(artifact, error = %e, "Malformed payload, keeping previous value");
            None
        }
    }
}

pub async fn analyze(ctx: &NodeContext<'_>, state: &WorkflowState) -> Result<StatePatch> {
    let user = Message::user(prompt::analyze_request(
        &state.candidate_code,
        state.specification.as_deref(),
        state.test_suite.as_deref(),
    ));
    let reply = ctx
        .proposer
        .propose(&request(prompt::ANALYZE_CODE, state, &[user.clone()]), &[])
        .await?;

    Ok(StatePatch {
        messages: vec![user, reply.into()],
        ..StatePatch::phase(NodeKind::Analyze)
    })
}

/// Ask for a fresh test suite. The exchange is only kept once it parses;
/// until then the suite stays absent and the node runs again.
pub async fn generate_tests(ctx: &NodeContext<'_>, state: &WorkflowState) -> Result<StatePatch> {
    let user = Message::user(prompt::create_tests_request(
        &state.candidate_code,
        state.specification.as_deref(),
    ));
    let messages = vec![Message::system(prompt::CREATE_TESTS), user.clone()];
    let reply = ctx.proposer.propose(&messages, &[]).await?;

    match payload::parse_content(&reply.content) {
        Ok(tests) => {
            tracing::info!(lines = tests.lines().count(), "Generated test suite");
            Ok(StatePatch {
                messages: vec![user, reply.into()],
                test_suite: Some(tests),
                ..StatePatch::phase(NodeKind::GenerateTests)
            })
        }
        Err(e) => {
            tracing::warn!(error = %e, "Generated tests are not a valid payload, retrying");
            Ok(StatePatch::phase(NodeKind::GenerateTests))
        }
    }
}

pub async fn execute(ctx: &NodeContext<'_>, state: &WorkflowState) -> Result<StatePatch> {
    let outcome = ctx
        .sandbox
        .run(&state.candidate_code, state.test_suite.as_deref())
        .await?;

    let observation = Message::observation(
        SANDBOX_OBSERVATION,
        format!(
            "[{SANDBOX_OBSERVATION}] result:\n{}",
            serde_json::to_string_pretty(&outcome)?
        ),
    );

    Ok(StatePatch {
        messages: vec![observation],
        last_run_outcome: Some(outcome),
        ..StatePatch::phase(NodeKind::Execute)
    })
}

/// Let the Proposer analyze the failure, running whatever tools it asks for.
pub async fn diagnose(ctx: &NodeContext<'_>, state: &WorkflowState) -> Result<StatePatch> {
    let (stdout, stderr) = state
        .last_run_outcome
        .as_ref()
        .map(|o| (o.stdout.as_str(), o.stderr.as_str()))
        .unwrap_or_default();

    let user = Message::user(prompt::diagnose_request(stdout, stderr));
    let tools = ctx.registry.definitions(state.inspections_enabled);
    let reply = ctx
        .proposer
        .propose(&request(prompt::ANALYZE_ERROR, state, &[user.clone()]), &tools)
        .await?;

    let calls = reply.tool_calls.clone();
    let mut messages = vec![user, reply.into()];
    let mut diagnostic_summary = None;

    for call in &calls {
        let result = ctx.registry.invoke(call, state.inspections_enabled).await;
        if let ToolResult::StackTrace(report) = &result {
            diagnostic_summary = Some(report.exact_error.clone());
        }
        messages.push(Message::tool_result(call, result.to_json().to_string()));
    }

    Ok(StatePatch {
        messages,
        diagnostic_summary,
        ..StatePatch::phase(NodeKind::Diagnose)
    })
}

/// Review the tests first, then the code against the reviewed tests.
pub async fn repair(ctx: &NodeContext<'_>, state: &WorkflowState) -> Result<StatePatch> {
    let tests_user = Message::user(prompt::update_tests_request(state.test_suite.as_deref()));
    let tests_reply: Message = ctx
        .proposer
        .propose(&request(prompt::UPDATE_TESTS, state, &[tests_user.clone()]), &[])
        .await?
        .into();

    let code_user = Message::user(prompt::fix_code_request(&state.candidate_code));
    let code_reply: Message = ctx
        .proposer
        .propose(
            &request(
                prompt::FIX_ERROR,
                state,
                &[tests_user.clone(), tests_reply.clone(), code_user.clone()],
            ),
            &[],
        )
        .await?
        .into();

    let test_suite = parse_artifact("tests", tests_reply.content());
    let candidate_code = parse_artifact("code", code_reply.content());
    tracing::info!(
        tests_updated = test_suite.is_some(),
        code_updated = candidate_code.is_some(),
        "Repair finished"
    );

    Ok(StatePatch {
        messages: vec![tests_user, tests_reply, code_user, code_reply],
        candidate_code,
        test_suite,
        ..StatePatch::phase(NodeKind::Repair)
    })
}

/// Strip tests the Proposer may have folded into the candidate.
pub async fn postprocess(ctx: &NodeContext<'_>, state: &WorkflowState) -> Result<StatePatch> {
    let user = Message::user(prompt::postprocess_request(&state.candidate_code));
    let reply = ctx
        .proposer
        .propose(&request(prompt::POSTPROCESS_CODE, state, &[user]), &[])
        .await?;

    Ok(StatePatch {
        candidate_code: parse_artifact("code", &reply.content),
        ..StatePatch::phase(NodeKind::Postprocess)
    })
}

pub fn advance_iteration(state: &WorkflowState) -> StatePatch {
    StatePatch {
        iteration: Some(state.iteration.saturating_add(1)),
        ..Default::default()
    }
}
