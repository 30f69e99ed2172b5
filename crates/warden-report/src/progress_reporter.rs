//! Debounced batching of activity units into external posts.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use warden_events::PostableUnit;

use crate::comment_client::CommentSink;
use crate::render::render_batch;

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_BATCH_UNITS: usize = 10;

/// Batches [`PostableUnit`]s and flushes them to a [`CommentSink`] on a
/// timer or once the batch reaches a size threshold, whichever comes first.
///
/// Flushing runs on its own task so a slow or failing post never blocks the
/// producer. Order within and across batches follows enqueue order. A failed
/// post drops its batch; at-most-once delivery per batch is deliberate,
/// since re-posting stale updates is worse than missing one.
/// `CompletionMarker` forces a final flush and stops the flush task.
pub struct ProgressReporter {
    sender: mpsc::UnboundedSender<PostableUnit>,
    worker: JoinHandle<()>,
}

impl ProgressReporter {
    pub fn spawn(
        sink: Arc<dyn CommentSink>,
        flush_interval: Duration,
        max_batch_units: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = tokio::spawn(flush_loop(
            sink,
            receiver,
            flush_interval.max(Duration::from_millis(1)),
            max_batch_units.max(1),
        ));
        Self { sender, worker }
    }

    /// Non-blocking enqueue. Units arriving after the terminal flush are
    /// dropped with a debug log.
    pub fn enqueue(&self, unit: PostableUnit) {
        if self.sender.send(unit).is_err() {
            tracing::debug!("progress reporter already finished, dropping unit");
        }
    }

    /// Closes the queue and waits for the final flush.
    pub async fn finish(self) {
        let Self { sender, worker } = self;
        drop(sender);
        if let Err(error) = worker.await {
            tracing::warn!(%error, "progress reporter flush task panicked");
        }
    }
}

async fn flush_loop(
    sink: Arc<dyn CommentSink>,
    mut receiver: mpsc::UnboundedReceiver<PostableUnit>,
    flush_interval: Duration,
    max_batch_units: usize,
) {
    let mut batch: Vec<PostableUnit> = Vec::new();
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            received = receiver.recv() => {
                match received {
                    Some(unit) => {
                        let terminal = matches!(unit, PostableUnit::CompletionMarker);
                        batch.push(unit);
                        if terminal {
                            flush(sink.as_ref(), &mut batch).await;
                            return;
                        }
                        if batch.len() >= max_batch_units {
                            flush(sink.as_ref(), &mut batch).await;
                        }
                    }
                    None => {
                        flush(sink.as_ref(), &mut batch).await;
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                flush(sink.as_ref(), &mut batch).await;
            }
        }
    }
}

async fn flush(sink: &dyn CommentSink, batch: &mut Vec<PostableUnit>) {
    if batch.is_empty() {
        return;
    }
    let units = std::mem::take(batch);
    let body = render_batch(&units);
    if let Err(error) = sink.post(&body).await {
        tracing::warn!(%error, dropped_units = units.len(), "progress post failed, dropping batch");
    }
}
