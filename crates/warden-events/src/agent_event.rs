//! Wire model for the agent CLI's stream-json output.

use serde_json::Value;

/// One decoded event from the agent subprocess stream.
///
/// `ToolUse`/`ToolResult` ids are opaque strings unique within one run; a
/// result may arrive without a matching prior tool use and downstream code
/// must degrade gracefully rather than reject the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentStreamEvent {
    Thinking {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
    Text {
        text: String,
    },
    SessionResult {
        session_id: String,
    },
}

/// Parses one stream-json line into zero or more events.
///
/// `assistant` and `user` lines carry a `message.content[]` array and may
/// yield one event per content block; `result` lines yield at most one
/// `SessionResult`. Unknown line or block types are skipped.
pub fn parse_stream_line(line: &str) -> Result<Vec<AgentStreamEvent>, serde_json::Error> {
    let value: Value = serde_json::from_str(line)?;
    Ok(events_from_value(&value))
}

fn events_from_value(value: &Value) -> Vec<AgentStreamEvent> {
    match value.get("type").and_then(Value::as_str) {
        Some("assistant") => content_block_events(value, assistant_block_event),
        Some("user") => content_block_events(value, user_block_event),
        Some("result") => value
            .get("session_id")
            .and_then(Value::as_str)
            .filter(|session_id| !session_id.is_empty())
            .map(|session_id| AgentStreamEvent::SessionResult {
                session_id: session_id.to_string(),
            })
            .into_iter()
            .collect(),
        _ => Vec::new(),
    }
}

fn content_block_events(
    value: &Value,
    block_event: fn(&Value) -> Option<AgentStreamEvent>,
) -> Vec<AgentStreamEvent> {
    value
        .get("message")
        .and_then(|message| message.get("content"))
        .and_then(Value::as_array)
        .map(|blocks| blocks.iter().filter_map(block_event).collect())
        .unwrap_or_default()
}

fn assistant_block_event(block: &Value) -> Option<AgentStreamEvent> {
    match block.get("type").and_then(Value::as_str)? {
        "thinking" => {
            let text = block.get("thinking").and_then(Value::as_str)?.trim();
            if text.is_empty() {
                return None;
            }
            Some(AgentStreamEvent::Thinking {
                text: text.to_string(),
            })
        }
        "text" => {
            let text = block.get("text").and_then(Value::as_str)?.trim();
            if text.is_empty() {
                return None;
            }
            Some(AgentStreamEvent::Text {
                text: text.to_string(),
            })
        }
        "tool_use" => Some(AgentStreamEvent::ToolUse {
            id: block
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            name: block
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            input: block.get("input").cloned().unwrap_or(Value::Null),
        }),
        _ => None,
    }
}

fn user_block_event(block: &Value) -> Option<AgentStreamEvent> {
    if block.get("type").and_then(Value::as_str)? != "tool_result" {
        return None;
    }
    Some(AgentStreamEvent::ToolResult {
        tool_use_id: block
            .get("tool_use_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        content: flatten_result_content(block.get("content")),
        is_error: block
            .get("is_error")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

/// Tool result content arrives either as a plain string or as a list of
/// `{type: "text", text}` parts; both collapse to one string.
fn flatten_result_content(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter(|part| part.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}
