//! Conversation message helpers.
//!
//! Tool activity is recorded in the transcript as canonical text so that any
//! provider can read it and so that the previous call can be parsed back for
//! duplicate detection:
//!
//! ```text
//! AI ACTION (Turn 2): Executing `google_search` with parameters: {"query":"rust"}
//! TOOL RESPONSE (Turn 2): SUCCESS: `google_search` returned:
//! ...
//! ```

use conveyor_config::model::DEFAULT_PARAMETER_PREVIEW_CHARS;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::providers::{ChatMessage, ChatRole};
use crate::tools::ToolResult;

const TOOL_CALL_PREFIX: &str = "AI ACTION (Turn ";
const TOOL_CALL_NAME_OPEN: &str = "): Executing `";
const TOOL_CALL_PARAMS_OPEN: &str = "` with parameters: ";
const TOOL_RESPONSE_PREFIX: &str = "TOOL RESPONSE (Turn ";

/// Opens the marker appended to cut parameter values:
/// `...[truncated:<digest>]`, where the digest covers the full value so that
/// different long values never compare equal and identical ones still do.
pub const TRUNCATION_MARKER: &str = "...[truncated:";
const TRUNCATION_CLOSE: char = ']';
const DIGEST_BYTES: usize = 6;

pub fn build_message(role: ChatRole, content: impl Into<String>) -> ChatMessage {
    ChatMessage::new(role, content)
}

/// Renders tool-call and tool-result messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageFormatter {
    preview_chars: usize,
}

impl Default for MessageFormatter {
    fn default() -> Self {
        Self::new(DEFAULT_PARAMETER_PREVIEW_CHARS)
    }
}

impl MessageFormatter {
    pub fn new(preview_chars: usize) -> Self {
        Self {
            preview_chars: preview_chars.max(1),
        }
    }

    pub fn preview_chars(&self) -> usize {
        self.preview_chars
    }

    /// Assistant message recording that `name` was called on `turn`.
    pub fn format_tool_call_message(
        &self,
        name: &str,
        params: &Map<String, Value>,
        turn: usize,
    ) -> ChatMessage {
        let preview: Map<String, Value> = params
            .iter()
            .map(|(key, value)| (key.clone(), self.preview_value(value)))
            .collect();
        let rendered = Value::Object(preview).to_string();
        build_message(
            ChatRole::Assistant,
            format!("{TOOL_CALL_PREFIX}{turn}{TOOL_CALL_NAME_OPEN}{name}{TOOL_CALL_PARAMS_OPEN}{rendered}"),
        )
    }

    /// User message carrying the outcome of a tool call.
    ///
    /// Handler tools only report an outcome sentence. Query tools append
    /// their result data so the model can use it.
    pub fn format_tool_result_message(
        &self,
        name: &str,
        result: &ToolResult,
        params: &Map<String, Value>,
        is_handler_tool: bool,
        turn: usize,
    ) -> ChatMessage {
        let head = format!("{TOOL_RESPONSE_PREFIX}{turn}): ");

        if !result.success {
            let error = result.error.as_deref().unwrap_or("unknown error");
            return build_message(
                ChatRole::User,
                format!("{head}FAILED: `{name}` reported an error: {error}"),
            );
        }

        let body = if is_handler_tool {
            match params.get("title").and_then(Value::as_str) {
                Some(title) if !title.trim().is_empty() => format!(
                    "SUCCESS: `{name}` completed its action for \"{}\".",
                    short_title(title, self.preview_chars)
                ),
                _ => format!("SUCCESS: `{name}` completed its action."),
            }
        } else {
            match &result.data {
                Some(data) if !data.is_null() => {
                    let serialized =
                        serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string());
                    format!("SUCCESS: `{name}` returned:\n{serialized}")
                }
                _ => format!("SUCCESS: `{name}` completed with no data."),
            }
        };

        build_message(ChatRole::User, format!("{head}{body}"))
    }

    fn preview_value(&self, value: &Value) -> Value {
        match value {
            Value::String(text) if text.chars().count() > self.preview_chars => {
                let cut: String = text.chars().take(self.preview_chars).collect();
                Value::String(format!(
                    "{cut}{TRUNCATION_MARKER}{}{TRUNCATION_CLOSE}",
                    digest(text)
                ))
            }
            Value::Array(items) => Value::Array(items.iter().map(|v| self.preview_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, v)| (key.clone(), self.preview_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

fn short_title(title: &str, max_chars: usize) -> String {
    if title.chars().count() <= max_chars {
        return title.to_string();
    }
    let cut: String = title.chars().take(max_chars).collect();
    format!("{cut}...")
}

fn digest(text: &str) -> String {
    Sha256::digest(text.as_bytes())
        .iter()
        .take(DIGEST_BYTES)
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Split a cut value into its visible prefix and digest.
fn split_truncated(text: &str) -> Option<(&str, &str)> {
    let body = text.strip_suffix(TRUNCATION_CLOSE)?;
    let at = body.rfind(TRUNCATION_MARKER)?;
    Some((&body[..at], &body[at + TRUNCATION_MARKER.len()..]))
}

/// Tool name and parameters recovered from a tool-call message.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedToolCall {
    pub turn: usize,
    pub name: String,
    pub parameters: Map<String, Value>,
}

pub fn parse_tool_call_message(content: &str) -> Option<ParsedToolCall> {
    let rest = content.strip_prefix(TOOL_CALL_PREFIX)?;
    let (turn, rest) = rest.split_once(TOOL_CALL_NAME_OPEN)?;
    let (name, rendered) = rest.split_once(TOOL_CALL_PARAMS_OPEN)?;
    let parameters = match serde_json::from_str::<Value>(rendered).ok()? {
        Value::Object(map) => map,
        _ => return None,
    };
    Some(ParsedToolCall {
        turn: turn.parse().ok()?,
        name: name.to_string(),
        parameters,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallValidation {
    pub is_duplicate: bool,
    /// Corrective message to append when the call is a duplicate.
    pub correction: Option<String>,
}

/// Compare an incoming call with the most recent tool call in `history`.
pub fn validate_tool_call(
    name: &str,
    params: &Map<String, Value>,
    history: &[ChatMessage],
) -> ToolCallValidation {
    let previous = history
        .iter()
        .rev()
        .filter(|m| m.role == ChatRole::Assistant)
        .find_map(|m| parse_tool_call_message(&m.content));

    let is_duplicate = previous
        .map(|prev| prev.name == name && same_parameters(&prev.parameters, params))
        .unwrap_or(false);

    ToolCallValidation {
        is_duplicate,
        correction: is_duplicate.then(|| generate_duplicate_correction_message(name)),
    }
}

pub fn generate_duplicate_correction_message(name: &str) -> String {
    format!(
        "You just called `{name}` with exactly the same parameters as your previous action, \
         and its result is already in this conversation. Do not repeat that call. Use the \
         earlier result, call a different tool, or give your final answer."
    )
}

fn same_parameters(previous: &Map<String, Value>, incoming: &Map<String, Value>) -> bool {
    previous.len() == incoming.len()
        && previous
            .iter()
            .all(|(key, prev)| incoming.get(key).is_some_and(|value| same_value(prev, value)))
}

/// `previous` comes from a rendered tool-call message, so any string in it
/// may be a cut value; `incoming` is always the full value.
fn same_value(previous: &Value, incoming: &Value) -> bool {
    match (previous, incoming) {
        (Value::String(prev), Value::String(full)) => match split_truncated(prev) {
            Some((prefix, hash)) => {
                full.starts_with(prefix) && full.len() > prefix.len() && digest(full) == hash
            }
            None => prev == full,
        },
        (Value::Array(prev), Value::Array(full)) => {
            prev.len() == full.len() && prev.iter().zip(full).all(|(p, f)| same_value(p, f))
        }
        (Value::Object(prev), Value::Object(full)) => same_parameters(prev, full),
        (prev, full) => prev == full,
    }
}
