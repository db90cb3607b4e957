pub mod lookup_inspections;
pub mod parse_stack_trace;

use async_trait::async_trait;
use serde_json::json;

use crate::agent::proposer::{ToolCall, ToolDefinition};
use crate::error::Result;
use lookup_inspections::{Findings, InspectionRunner, LookupInspectionsTool};
use parse_stack_trace::{DiagnosticReport, ParseStackTraceTool};

/// Closed set of capabilities the Proposer may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolId {
    ParseStackTrace,
    LookupStaticInspections,
}

impl ToolId {
    pub fn name(self) -> &'static str {
        match self {
            ToolId::ParseStackTrace => "parse_stack_trace",
            ToolId::LookupStaticInspections => "lookup_static_inspections",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "parse_stack_trace" => Some(ToolId::ParseStackTrace),
            "lookup_static_inspections" => Some(ToolId::LookupStaticInspections),
            _ => None,
        }
    }

    fn enabled(self, inspections_enabled: bool) -> bool {
        match self {
            ToolId::ParseStackTrace => true,
            ToolId::LookupStaticInspections => inspections_enabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    StackTrace(DiagnosticReport),
    Inspections(Findings),
    /// Unknown tool, disabled tool, invalid arguments or a failed handler.
    Empty,
}

impl ToolResult {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ToolResult::StackTrace(report) => json!(report),
            ToolResult::Inspections(findings) => json!(findings),
            ToolResult::Empty => json!({}),
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn id(&self) -> ToolId;
    fn definition(&self) -> ToolDefinition;
    async fn execute(&self, input: serde_json::Value) -> Result<ToolResult>;
}

/// Maps tool identifiers to their handlers.
pub struct CapabilityRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl CapabilityRegistry {
    /// The stack trace parser is always registered; static inspections only
    /// when a runner is supplied.
    pub fn new(inspections: Option<InspectionRunner>) -> Self {
        let mut tools: Vec<Box<dyn Tool>> = vec![Box::new(ParseStackTraceTool)];
        if let Some(runner) = inspections {
            tools.push(Box::new(LookupInspectionsTool::new(runner)));
        }

        Self { tools }
    }

    /// Definitions to declare to the Proposer for one request.
    pub fn definitions(&self, inspections_enabled: bool) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .filter(|t| t.id().enabled(inspections_enabled))
            .map(|t| t.definition())
            .collect()
    }

    pub fn get(&self, id: ToolId) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.id() == id).map(|t| t.as_ref())
    }

    /// Run one requested tool call. Never fails: anything that goes wrong
    /// degrades to [`ToolResult::Empty`].
    pub async fn invoke(&self, call: &ToolCall, inspections_enabled: bool) -> ToolResult {
        let Some(id) = ToolId::from_name(&call.name) else {
            tracing::warn!(tool = %call.name, "Unknown tool requested");
            return ToolResult::Empty;
        };
        if !id.enabled(inspections_enabled) {
            tracing::warn!(tool = %call.name, "Disabled tool requested");
            return ToolResult::Empty;
        }
        let Some(tool) = self.get(id) else {
            tracing::warn!(tool = %call.name, "Tool not registered");
            return ToolResult::Empty;
        };

        tracing::info!(tool = %call.name, call_id = %call.id, "Executing tool");
        match tool.execute(call.arguments.clone()).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "Tool failed, using empty result");
                ToolResult::Empty
            }
        }
    }
}
