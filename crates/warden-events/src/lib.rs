//! Typed event stream for a supervised coding-agent subprocess.
//!
//! The agent CLI emits newline-delimited JSON on stdout. This crate decodes
//! that byte stream into [`AgentStreamEvent`] values and folds them into
//! ordered, postable activity units via [`ActivityAggregator`].

pub mod activity;
pub mod agent_event;
pub mod stream_decoder;

pub use activity::{
    ActivityAggregator, PendingToolCall, PostableUnit, ToolOutcome, THINKING_DISPLAY_CAP_BYTES,
    TOOL_INPUT_CAP_BYTES, TOOL_RESULT_CAP_BYTES,
};
pub use agent_event::{parse_stream_line, AgentStreamEvent};
pub use stream_decoder::{AgentStreamDecoder, READ_CHUNK_BYTES};
