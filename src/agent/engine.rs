use std::sync::Arc;

use crate::agent::graph::{self, Next};
use crate::agent::nodes::{self, NodeContext};
use crate::agent::proposer::Proposer;
use crate::agent::state::WorkflowState;
use crate::agent::tools::CapabilityRegistry;
use crate::error::{AppError, Result};
use crate::sandbox::SandboxRunner;

/// Drives a [`WorkflowState`] through the transition table one node at a time.
pub struct WorkflowEngine {
    proposer: Arc<dyn Proposer>,
    sandbox: SandboxRunner,
    registry: CapabilityRegistry,
}

impl WorkflowEngine {
    pub fn new(
        proposer: Arc<dyn Proposer>,
        sandbox: SandboxRunner,
        registry: CapabilityRegistry,
    ) -> Self {
        Self {
            proposer,
            sandbox,
            registry,
        }
    }

    pub fn sandbox(&self) -> &SandboxRunner {
        &self.sandbox
    }

    /// Run from the entry node until a terminal edge is taken.
    ///
    /// `recursion_limit` caps the total number of node invocations; exceeding
    /// it is an error. Running out of repair iterations is not: the final
    /// snapshot is returned and its `last_run_outcome` says whether the
    /// candidate passed.
    pub async fn run(
        &self,
        initial: WorkflowState,
        recursion_limit: usize,
    ) -> Result<WorkflowState> {
        let ctx = NodeContext {
            proposer: self.proposer.as_ref(),
            sandbox: &self.sandbox,
            registry: &self.registry,
        };

        let mut state = initial;
        let mut node = graph::ENTRY;
        let mut steps = 0usize;

        loop {
            if steps >= recursion_limit {
                tracing::error!(limit = recursion_limit, node = %node, "Recursion limit exceeded");
                return Err(AppError::RecursionExceeded {
                    limit: recursion_limit,
                    node,
                });
            }
            steps += 1;

            tracing::info!(
                node = %node,
                step = steps,
                iteration = state.iteration,
                "Running node"
            );

            let patch = nodes::run_node(node, &ctx, &state).await?;
            state = state.apply(patch);

            match graph::next_step(node, &state) {
                Next::Node(next) => node = next,
                Next::Terminate => break,
            }
        }

        tracing::info!(
            steps,
            iteration = state.iteration,
            passed = state.run_passed(),
            "Workflow finished"
        );
        Ok(state)
    }
}
