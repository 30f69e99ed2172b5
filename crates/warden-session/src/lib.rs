//! Persisted session state for one supervised agent instance.
//!
//! The supervisor daemon owns exactly one session. Its record survives
//! process restarts via a schema-versioned JSON state file, and every
//! completed run appends one line to a JSONL run log next to it.

pub mod run_log;
pub mod session_state;

pub use run_log::RunLog;
pub use session_state::{
    SessionRecord, SessionStateStore, SessionStatus, SESSION_STATE_SCHEMA_VERSION,
};
