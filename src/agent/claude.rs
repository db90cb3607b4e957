use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::agent::proposer::{Message, Proposer, Reply, ToolCall, ToolDefinition};
use crate::config::ClaudeConfig;
use crate::error::{AppError, Result};

const MESSAGES_PATH: &str = "/v1/messages";
const API_VERSION: &str = "2023-06-01";

pub struct ClaudeClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: Option<f32>,
}

impl ClaudeClient {
    pub fn new(api_key: &str, model: &str, max_tokens: u32) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            model: model.to_string(),
            max_tokens,
            temperature: None,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub async fn send_message(&self, request: &MessagesRequest) -> Result<MessagesResponse> {
        let response = self
            .client
            .post(format!("{}{MESSAGES_PATH}", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("API returned {status}: {body}");
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => AppError::ClaudeRateLimited(message),
                s if s.is_server_error() => AppError::ClaudeTransient(message),
                _ => AppError::ClaudeApi(message),
            });
        }

        let body = response.json::<MessagesResponse>().await?;
        Ok(body)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }
}

/// [`Proposer`] backed by the Claude Messages API.
pub struct ClaudeProposer {
    client: ClaudeClient,
    max_retries: u32,
    backoff: Duration,
}

impl ClaudeProposer {
    pub fn new(client: ClaudeClient, max_retries: u32, backoff: Duration) -> Self {
        Self {
            client,
            max_retries,
            backoff,
        }
    }

    pub fn from_config(config: &ClaudeConfig) -> Self {
        let client = ClaudeClient::new(&config.api_key, &config.model, config.max_tokens)
            .with_base_url(&config.base_url)
            .with_temperature(config.temperature);
        Self::new(
            client,
            config.max_retries,
            Duration::from_secs(config.retry_backoff_secs),
        )
    }

    fn build_request(&self, messages: &[Message], tools: &[ToolDefinition]) -> MessagesRequest {
        let (system, messages) = to_api_messages(messages, !tools.is_empty());
        MessagesRequest {
            model: self.client.model().to_string(),
            max_tokens: self.client.max_tokens(),
            system,
            messages,
            tools: tools.to_vec(),
            temperature: self.client.temperature,
        }
    }
}

#[async_trait]
impl Proposer for ClaudeProposer {
    async fn propose(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<Reply> {
        let request = self.build_request(messages, tools);

        let mut attempt = 0;
        let response = loop {
            match self.client.send_message(&request).await {
                Ok(response) => break response,
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = retry_delay(self.backoff, attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying Claude request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        tracing::info!(
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            stop_reason = ?response.stop_reason,
            "Claude response"
        );

        Ok(into_reply(response.content))
    }
}

/// Exponential backoff that saturates instead of overflowing on large attempt counts.
fn retry_delay(backoff: Duration, attempt: u32) -> Duration {
    backoff.saturating_mul(2u32.saturating_pow(attempt))
}

/// Map a workflow conversation onto the Messages API shape.
///
/// Instruction messages are lifted into the `system` field and consecutive
/// same-role turns are merged. Without declared tools the API rejects
/// `tool_use`/`tool_result` blocks, so those are rendered as text instead.
fn to_api_messages(messages: &[Message], structured_tools: bool) -> (String, Vec<ApiMessage>) {
    let mut system = Vec::new();
    let mut out: Vec<ApiMessage> = Vec::new();

    for message in messages {
        let (role, blocks) = match message {
            Message::System { content } => {
                system.push(content.as_str());
                continue;
            }
            Message::User { content, .. } => ("user", vec![ContentBlock::text(content)]),
            Message::Assistant {
                content,
                tool_calls,
            } => {
                let mut blocks = Vec::new();
                if !content.trim().is_empty() {
                    blocks.push(ContentBlock::text(content));
                }
                for call in tool_calls {
                    if structured_tools {
                        blocks.push(ContentBlock::ToolUse {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            input: call.arguments.clone(),
                        });
                    } else {
                        blocks.push(ContentBlock::text(format!(
                            "[tool call {} ({})] {}",
                            call.name, call.id, call.arguments
                        )));
                    }
                }
                if blocks.is_empty() {
                    blocks.push(ContentBlock::text("(no content)"));
                }
                ("assistant", blocks)
            }
            Message::Tool {
                tool_call_id,
                name,
                content,
            } => {
                let block = if structured_tools {
                    ContentBlock::ToolResult {
                        tool_use_id: tool_call_id.clone(),
                        content: content.clone(),
                        is_error: None,
                    }
                } else {
                    ContentBlock::text(format!("[{name} result] {content}"))
                };
                ("user", vec![block])
            }
        };

        match out.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => out.push(ApiMessage {
                role: role.to_string(),
                content: blocks,
            }),
        }
    }

    (system.join("\n\n"), out)
}

fn into_reply(content: Vec<ContentBlock>) -> Reply {
    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in content {
        match block {
            ContentBlock::Text { text } => texts.push(text),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id,
                name,
                arguments: input,
            }),
            ContentBlock::ToolResult { .. } | ContentBlock::Unknown => {}
        }
    }

    Reply {
        content: texts.join("\n"),
        tool_calls,
    }
}

// --- Request types ---

#[derive(Debug, Serialize)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub system: String,
    pub messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiMessage {
    pub role: String,
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    #[serde(other)]
    Unknown,
}

impl ContentBlock {
    fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }
}

// --- Response types ---

#[derive(Debug, Deserialize)]
pub struct MessagesResponse {
    pub id: String,
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
    pub usage: Usage,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}
