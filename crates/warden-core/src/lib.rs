//! Foundational low-level utilities shared across warden crates.
//!
//! Provides atomic file-write helpers, unix-time utilities, and the text
//! truncation/sanitization helpers used by the activity pipeline and state
//! persistence.

pub mod atomic_io;
pub mod text_utils;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use text_utils::{sanitize_for_path, truncate_with_marker, TRUNCATION_MARKER};
pub use time_utils::{current_unix_timestamp, current_unix_timestamp_ms};
