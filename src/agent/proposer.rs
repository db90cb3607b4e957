use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One role-tagged entry of a workflow conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    /// Instruction text that frames the Proposer's behaviour.
    System { content: String },
    User {
        content: String,
        /// Set when the turn carries an observation produced by the workflow itself.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        tool_call_id: String,
        name: String,
        content: String,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
            name: None,
        }
    }

    pub fn observation(name: &str, content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
            name: Some(name.to_string()),
        }
    }

    pub fn tool_result(call: &ToolCall, content: impl Into<String>) -> Self {
        Message::Tool {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            content: content.into(),
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Message::System { content }
            | Message::User { content, .. }
            | Message::Assistant { content, .. }
            | Message::Tool { content, .. } => content,
        }
    }
}

/// A tool invocation requested by the Proposer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// The Proposer's answer to one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl Reply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }
}

impl From<Reply> for Message {
    fn from(reply: Reply) -> Self {
        Message::Assistant {
            content: reply.content,
            tool_calls: reply.tool_calls,
        }
    }
}

/// A tool the Proposer may ask the workflow to run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// External text/code generation capability.
///
/// Implementations receive the full ordered conversation for one request and
/// return exactly one new message. Tools are declared per request; an empty
/// slice means the Proposer must answer in plain text.
#[async_trait]
pub trait Proposer: Send + Sync {
    async fn propose(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<Reply>;
}
