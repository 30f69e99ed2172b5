//! Single-flight queue loop over agent prompt runs.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use warden_core::current_unix_timestamp_ms;
use warden_report::{ack_comment, run_failed_comment, CommentSink, ProgressReporter};
use warden_session::{RunLog, SessionStateStore};

use crate::runner::AgentRunner;
use crate::work_item::{QueueStatusSnapshot, WorkItem};

fn lock_store(store: &Mutex<SessionStateStore>) -> std::sync::MutexGuard<'_, SessionStateStore> {
    store
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct QueueShared {
    queue_length: AtomicUsize,
    is_processing: AtomicBool,
}

/// Submission handle for the queue loop. Cheap to clone; submissions are
/// acknowledged immediately with a queue position while processing stays
/// asynchronous.
#[derive(Clone)]
pub struct PromptQueue {
    sender: mpsc::UnboundedSender<WorkItem>,
    shared: Arc<QueueShared>,
}

/// Consumer end of the queue, owned by [`run_queue_loop`]. The loop drains
/// until every [`PromptQueue`] clone is dropped.
pub struct QueueReceiver {
    receiver: mpsc::UnboundedReceiver<WorkItem>,
    shared: Arc<QueueShared>,
}

impl PromptQueue {
    pub fn new() -> (Self, QueueReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(QueueShared::default());
        (
            Self {
                sender,
                shared: shared.clone(),
            },
            QueueReceiver { receiver, shared },
        )
    }

    /// Enqueues one prompt and returns its position (1-based) in the queue.
    pub fn submit(&self, prompt: String, author: String) -> anyhow::Result<usize> {
        let position = self
            .shared
            .queue_length
            .fetch_add(1, Ordering::SeqCst)
            .saturating_add(1);
        self.sender
            .send(WorkItem::new(prompt, author))
            .map_err(|_| anyhow::anyhow!("prompt queue is shut down"))?;
        Ok(position)
    }

    pub fn snapshot(&self) -> QueueStatusSnapshot {
        QueueStatusSnapshot {
            queue_length: self.shared.queue_length.load(Ordering::SeqCst),
            is_processing: self.shared.is_processing.load(Ordering::SeqCst),
        }
    }
}

#[derive(Clone)]
pub struct QueueLoopConfig {
    pub flush_interval: Duration,
    pub max_batch_units: usize,
}

/// Drains work items one at a time until the submission side closes.
///
/// Each item gets a fresh reporter scoped to its run, so a completion flush
/// from one run can never interleave with the next. Run failures are
/// recorded and posted best-effort; the loop always proceeds to the next
/// item.
pub async fn run_queue_loop(
    mut queue: QueueReceiver,
    runner: AgentRunner,
    sink: Arc<dyn CommentSink>,
    store: Arc<Mutex<SessionStateStore>>,
    run_log: RunLog,
    config: QueueLoopConfig,
) {
    let shared = queue.shared.clone();
    while let Some(item) = queue.receiver.recv().await {
        shared.queue_length.fetch_sub(1, Ordering::SeqCst);
        shared.is_processing.store(true, Ordering::SeqCst);
        tracing::info!(author = %item.author, "processing prompt");

        let resumption_token = {
            let mut store = lock_store(&store);
            store.touch_activity();
            if let Err(error) = store.save() {
                tracing::warn!(%error, "failed to persist session activity");
            }
            store.record().resumption_token.clone()
        };

        if let Err(error) = sink.post(&ack_comment(&item.author)).await {
            tracing::warn!(%error, "failed to post acknowledgement comment");
        }

        let reporter =
            ProgressReporter::spawn(sink.clone(), config.flush_interval, config.max_batch_units);
        let result = runner
            .run(&item.prompt, resumption_token.as_deref(), &reporter)
            .await;
        reporter.finish().await;

        match result {
            Ok(outcome) => {
                {
                    let mut store = lock_store(&store);
                    store.set_resumption_token(outcome.resumption_token.clone());
                    store.record_run_completed();
                    if let Err(error) = store.save() {
                        tracing::warn!(%error, "failed to persist session state after run");
                    }
                }
                if let Err(error) = run_log.append(&json!({
                    "event": "run_completed",
                    "author": item.author,
                    "resumption_token": outcome.resumption_token,
                    "completed_unix_ms": current_unix_timestamp_ms(),
                })) {
                    tracing::warn!(%error, "failed to append run log entry");
                }
            }
            Err(error) => {
                tracing::warn!(%error, author = %item.author, "prompt run failed");
                {
                    let mut store = lock_store(&store);
                    store.record_run_failed();
                    if let Err(save_error) = store.save() {
                        tracing::warn!(error = %save_error, "failed to persist session state after failed run");
                    }
                }
                if let Err(post_error) = sink.post(&run_failed_comment(&error.to_string())).await {
                    tracing::warn!(error = %post_error, "failed to post run failure comment");
                }
                if let Err(log_error) = run_log.append(&json!({
                    "event": "run_failed",
                    "author": item.author,
                    "error": error.to_string(),
                    "failed_unix_ms": current_unix_timestamp_ms(),
                })) {
                    tracing::warn!(error = %log_error, "failed to append run log entry");
                }
            }
        }

        shared.is_processing.store(false, Ordering::SeqCst);
    }
}
