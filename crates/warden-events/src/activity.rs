//! Folds decoded stream events into ordered, postable activity units.

use serde_json::Value;

use warden_core::{current_unix_timestamp_ms, truncate_with_marker};

use crate::agent_event::AgentStreamEvent;

/// Display cap for one emitted thinking block.
pub const THINKING_DISPLAY_CAP_BYTES: usize = 2048;
/// Display cap for a rendered tool input.
pub const TOOL_INPUT_CAP_BYTES: usize = 1000;
/// Display cap for a captured tool result.
pub const TOOL_RESULT_CAP_BYTES: usize = 500;

const UNKNOWN_TOOL_NAME: &str = "unknown-tool";

/// A tool call registered by `ToolUse` and awaiting its paired result.
#[derive(Debug, Clone)]
pub struct PendingToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
    pub started_at_unix_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Captured { content: String, is_error: bool },
    NotCaptured,
}

/// One externally publishable unit of activity, immutable once emitted.
///
/// Units are emitted in completion order: text immediately, tool activity
/// when its result pairs (or at stream end), thinking when the thinking run
/// is interrupted by a completed unit.
#[derive(Debug, Clone, PartialEq)]
pub enum PostableUnit {
    ThinkingBlock {
        text: String,
    },
    ToolActivityBlock {
        name: String,
        input: String,
        outcome: ToolOutcome,
        /// Wall-clock time from `ToolUse` to the paired result. Absent for
        /// orphan results and calls still unresolved at stream end.
        duration_ms: Option<u64>,
    },
    TextBlock {
        text: String,
    },
    /// Emitted by the runner after a successful exit, never mid-stream. A
    /// failed run ends without one.
    CompletionMarker,
}

/// Per-run fold from [`AgentStreamEvent`]s to [`PostableUnit`]s.
///
/// Owns the pending-tool-call map for exactly one subprocess run. Pairing
/// anomalies (orphan results, unresolved calls at stream end) degrade the
/// unit's content but never drop a unit and never surface as errors.
#[derive(Debug, Default)]
pub struct ActivityAggregator {
    thinking: String,
    pending: Vec<PendingToolCall>,
    resumption_token: Option<String>,
}

impl ActivityAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes one event, returning any units it completed.
    pub fn handle_event(&mut self, event: AgentStreamEvent) -> Vec<PostableUnit> {
        match event {
            AgentStreamEvent::Thinking { text } => {
                if !self.thinking.is_empty() {
                    self.thinking.push('\n');
                }
                self.thinking.push_str(&text);
                Vec::new()
            }
            AgentStreamEvent::ToolUse { id, name, input } => {
                self.pending.push(PendingToolCall {
                    id,
                    name,
                    input,
                    started_at_unix_ms: current_unix_timestamp_ms(),
                });
                Vec::new()
            }
            AgentStreamEvent::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                let mut units = self.flush_thinking();
                units.push(self.resolve_tool_result(&tool_use_id, content, is_error));
                units
            }
            AgentStreamEvent::Text { text } => {
                let mut units = self.flush_thinking();
                units.push(PostableUnit::TextBlock { text });
                units
            }
            AgentStreamEvent::SessionResult { session_id } => {
                self.resumption_token = Some(session_id);
                Vec::new()
            }
        }
    }

    /// Finalizes the run: flushes buffered thinking, then emits every
    /// unresolved tool call as "result not captured" in registration order.
    ///
    /// Deliberately does not emit [`PostableUnit::CompletionMarker`]; only
    /// the runner knows whether the subprocess exited cleanly, so the
    /// success marker is its call to make.
    pub fn finish(&mut self) -> Vec<PostableUnit> {
        let mut units = self.flush_thinking();
        for call in self.pending.drain(..) {
            units.push(PostableUnit::ToolActivityBlock {
                name: call.name,
                input: render_tool_input(&call.input),
                outcome: ToolOutcome::NotCaptured,
                duration_ms: None,
            });
        }
        units
    }

    /// The session id observed in a `result` line, if any; persisted by the
    /// runner as the resumption token for the next run.
    pub fn resumption_token(&self) -> Option<&str> {
        self.resumption_token.as_deref()
    }

    pub fn pending_tool_calls(&self) -> usize {
        self.pending.len()
    }

    fn flush_thinking(&mut self) -> Vec<PostableUnit> {
        if self.thinking.is_empty() {
            return Vec::new();
        }
        let text = truncate_with_marker(&self.thinking, THINKING_DISPLAY_CAP_BYTES);
        self.thinking.clear();
        vec![PostableUnit::ThinkingBlock { text }]
    }

    fn resolve_tool_result(
        &mut self,
        tool_use_id: &str,
        content: String,
        is_error: bool,
    ) -> PostableUnit {
        let matched = self
            .pending
            .iter()
            .position(|call| !tool_use_id.is_empty() && call.id == tool_use_id)
            // Heuristic fallback: with several calls in flight an id-less
            // result attaches to the most recent unresolved call, which can
            // misattribute. Kept for parity with observed agent behavior.
            .or_else(|| {
                if self.pending.is_empty() {
                    None
                } else {
                    Some(self.pending.len() - 1)
                }
            });
        let outcome = ToolOutcome::Captured {
            content: truncate_with_marker(&content, TOOL_RESULT_CAP_BYTES),
            is_error,
        };
        match matched {
            Some(index) => {
                let call = self.pending.remove(index);
                let duration_ms =
                    current_unix_timestamp_ms().saturating_sub(call.started_at_unix_ms);
                PostableUnit::ToolActivityBlock {
                    name: call.name,
                    input: render_tool_input(&call.input),
                    outcome,
                    duration_ms: Some(duration_ms),
                }
            }
            None => PostableUnit::ToolActivityBlock {
                name: UNKNOWN_TOOL_NAME.to_string(),
                input: String::new(),
                outcome,
                duration_ms: None,
            },
        }
    }
}

fn render_tool_input(input: &Value) -> String {
    if input.is_null() {
        return String::new();
    }
    let rendered = serde_json::to_string(input).unwrap_or_else(|_| input.to_string());
    truncate_with_marker(&rendered, TOOL_INPUT_CAP_BYTES)
}
