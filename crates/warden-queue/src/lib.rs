//! Single-flight prompt queue and agent subprocess runner.
//!
//! Work items are serialized against one long-lived agent session: the
//! subprocess owns the working tree and the resumption token, so no two
//! runs ever execute concurrently. Queued items simply wait.

pub mod queue;
pub mod runner;
pub mod work_item;

pub use queue::{run_queue_loop, PromptQueue, QueueLoopConfig, QueueReceiver};
pub use runner::{AgentRunError, AgentRunner, AgentRunnerConfig, RunOutcome};
pub use work_item::{QueueStatusSnapshot, WorkItem};
