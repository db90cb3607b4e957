//! Test-only Proposer double.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::agent::proposer::{Message, Proposer, Reply, ToolCall, ToolDefinition};
use crate::error::Result;

/// One recorded Proposer request.
#[derive(Debug, Clone)]
pub struct Request {
    pub messages: Vec<Message>,
    pub tools: Vec<String>,
}

/// Replays canned replies in order and records every request.
///
/// Once the script runs out it keeps answering with a plain acknowledgement.
#[derive(Default)]
pub struct ScriptedProposer {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<Request>>,
}

impl ScriptedProposer {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    /// Instruction (first message) of every request, in order.
    pub fn instructions(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| r.messages.first().map(|m| m.content().to_string()).unwrap_or_default())
            .collect()
    }
}

#[async_trait]
impl Proposer for ScriptedProposer {
    async fn propose(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<Reply> {
        self.requests.lock().unwrap().push(Request {
            messages: messages.to_vec(),
            tools: tools.iter().map(|t| t.name.clone()).collect(),
        });
        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::text("ok")))
    }
}

/// A reply carrying a well-formed `{"content": ...}` payload.
pub fn payload(content: &str) -> Reply {
    let body = serde_json::json!({ "content": content });
    Reply::text(format!("```json\n{body}\n```"))
}

/// A reply that requests one tool call.
pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> Reply {
    Reply {
        content: String::new(),
        tool_calls: vec![ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }],
    }
}
