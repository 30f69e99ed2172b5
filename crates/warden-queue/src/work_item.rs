use serde::Serialize;

use warden_core::current_unix_timestamp_ms;

/// One queued prompt. Consumed exactly once by the queue loop and never
/// retried automatically.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub prompt: String,
    pub author: String,
    pub enqueued_at_unix_ms: u64,
}

impl WorkItem {
    pub fn new(prompt: String, author: String) -> Self {
        Self {
            prompt,
            author,
            enqueued_at_unix_ms: current_unix_timestamp_ms(),
        }
    }
}

/// Point-in-time queue view for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatusSnapshot {
    pub queue_length: usize,
    pub is_processing: bool,
}
