use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::agent::proposer::ToolDefinition;
use crate::agent::tools::{Tool, ToolId, ToolResult};
use crate::error::Result;
use crate::sandbox::CANDIDATE_FILENAME;

static FRAME_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)^[ \t]*File[ \t]+"(?P<file>[^"\n]+)",[ \t]+line[ \t]+(?P<line>\d+)(?:,[ \t]+in[ \t]+(?P<func>[^\n]+))?"#,
    )
    .expect("valid frame header regex")
});

/// Structured view of a failure trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub exact_error: String,
    pub source_fragments: Vec<SourceFragment>,
}

/// A line of the candidate that appears in the trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFragment {
    pub line_number: u32,
    pub fragment: String,
}

/// Parse a Python-style traceback.
///
/// Frames are `File "<path>", line <n>[, in <func>]` headers, each optionally
/// followed by an indented source line. Only frames from the candidate file
/// that carry a source line become fragments. The exact error is whatever
/// follows the last frame; a trace without frames is returned whole.
pub fn parse_stack_trace(trace: &str) -> DiagnosticReport {
    let mut fragments = Vec::new();
    let mut last_end = None;

    for header in FRAME_HEADER.captures_iter(trace) {
        let whole = header.get(0).expect("group 0 always matches");
        let (source_line, end) = source_line_after(trace, whole.end());
        last_end = Some(end);

        if !header["file"].contains(CANDIDATE_FILENAME) {
            continue;
        }
        let (Ok(line_number), Some(fragment)) = (header["line"].parse::<u32>(), source_line)
        else {
            continue;
        };
        fragments.push(SourceFragment {
            line_number,
            fragment: fragment.to_string(),
        });
    }

    match last_end {
        Some(end) => DiagnosticReport {
            exact_error: trace[end..].trim().to_string(),
            source_fragments: fragments,
        },
        None => DiagnosticReport {
            exact_error: trace.trim().to_string(),
            source_fragments: Vec::new(),
        },
    }
}

/// The indented source line directly after a frame header, if there is one,
/// and the offset where the frame ends.
///
/// Lines that open another frame or hold only a caret marker do not count.
fn source_line_after(trace: &str, header_end: usize) -> (Option<&str>, usize) {
    let Some(rest) = trace[header_end..].strip_prefix('\n') else {
        return (None, header_end);
    };
    let line = rest.split('\n').next().unwrap_or("");
    let code = line.trim_start_matches([' ', '\t']);

    let indented = code.len() < line.len();
    let opens_frame = code.starts_with("File") && FRAME_HEADER.is_match(line);
    if !indented || opens_frame || code.starts_with('^') {
        return (None, header_end);
    }

    let end = header_end + 1 + line.len();
    let code = code.trim_end_matches('\r');
    if code.trim().is_empty() {
        (None, end)
    } else {
        (Some(code), end)
    }
}

pub struct ParseStackTraceTool;

#[derive(Debug, Deserialize)]
struct ParseStackTraceArgs {
    trace: String,
}

#[async_trait]
impl Tool for ParseStackTraceTool {
    fn id(&self) -> ToolId {
        ToolId::ParseStackTrace
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: ToolId::ParseStackTrace.name().to_string(),
            description: "Statically parse a stack trace. Call this only when the run produced stderr. Returns the exact error and every line of the program under repair that appears in the trace.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "trace": {
                        "type": "string",
                        "description": "The stack trace to parse"
                    }
                },
                "required": ["trace"]
            }),
        }
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolResult> {
        let args: ParseStackTraceArgs = serde_json::from_value(input)?;
        Ok(ToolResult::StackTrace(parse_stack_trace(&args.trace)))
    }
}
