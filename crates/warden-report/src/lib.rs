//! External progress reporting for a supervised agent session.
//!
//! Activity units flow into a debounced [`ProgressReporter`], which renders
//! them to markdown and posts batches to the external issue thread through a
//! [`CommentSink`]. Delivery is at-most-once per batch; a failed post is
//! logged and dropped rather than retried with stale state.

pub mod comment_client;
pub mod progress_reporter;
pub mod render;

pub use comment_client::{CommentSink, IssueCommentClient, NullCommentSink, PostTarget};
pub use progress_reporter::{
    ProgressReporter, DEFAULT_FLUSH_INTERVAL, DEFAULT_MAX_BATCH_UNITS,
};
pub use render::{
    ack_comment, idle_shutdown_comment, idle_warning_comment, render_batch, run_failed_comment,
    startup_comment, AGENT_MARKER,
};
