//! Structured `{"content": ...}` payloads embedded in Proposer replies.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

static JSON_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json\s*(.*?)\s*```").expect("valid fence regex"));

/// Why a reply did not carry a usable artifact. Always recovered by the caller.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("no ```json fenced block in reply")]
    MissingFence,

    #[error("fenced block is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("payload has no string `content` field")]
    MissingContent,
}

/// Extract the full artifact text from the first ```json fenced block.
pub fn parse_content(reply: &str) -> Result<String, PayloadError> {
    let captures = JSON_FENCE
        .captures(reply)
        .ok_or(PayloadError::MissingFence)?;
    let value: serde_json::Value = serde_json::from_str(&captures[1])?;

    value
        .get("content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or(PayloadError::MissingContent)
}
