//! Chunked NDJSON decoder for the agent subprocess stdout.

use std::collections::VecDeque;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::agent_event::{parse_stream_line, AgentStreamEvent};

/// Read size per poll. Single stream-json lines routinely exceed the 64 KiB
/// default line-reader buffer, so the decoder reads large chunks and splits
/// on `\n` itself, carrying any trailing partial line into the next read.
pub const READ_CHUNK_BYTES: usize = 1024 * 1024;

const MALFORMED_LINE_PREVIEW_BYTES: usize = 200;

/// Pull-based decoder over an agent subprocess output stream.
///
/// One decoder instance covers exactly one subprocess run: the sequence it
/// yields is lazy, finite, and not restartable. Malformed lines are dropped
/// with a warning; the stream never aborts over them.
pub struct AgentStreamDecoder<R> {
    reader: R,
    carry: Vec<u8>,
    pending: VecDeque<AgentStreamEvent>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> AgentStreamDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            carry: Vec::new(),
            pending: VecDeque::new(),
            eof: false,
        }
    }

    /// Returns the next decoded event, or `None` once the stream is drained.
    /// An unterminated final line is flushed through one best-effort parse
    /// at end of stream.
    pub async fn next_event(&mut self) -> Result<Option<AgentStreamEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            if self.eof {
                return Ok(None);
            }
            self.fill_pending().await?;
        }
    }

    async fn fill_pending(&mut self) -> Result<()> {
        let mut chunk = vec![0_u8; READ_CHUNK_BYTES];
        let read = self
            .reader
            .read(&mut chunk)
            .await
            .context("failed to read agent stream")?;
        if read == 0 {
            self.eof = true;
            if !self.carry.is_empty() {
                let trailing = std::mem::take(&mut self.carry);
                self.decode_line(&trailing);
            }
            return Ok(());
        }

        self.carry.extend_from_slice(&chunk[..read]);
        let Some(last_newline) = self.carry.iter().rposition(|byte| *byte == b'\n') else {
            return Ok(());
        };
        let remainder = self.carry.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.carry, remainder);
        for line in complete.split(|byte| *byte == b'\n') {
            self.decode_line(line);
        }
        Ok(())
    }

    fn decode_line(&mut self, line: &[u8]) {
        let text = String::from_utf8_lossy(line);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        match parse_stream_line(trimmed) {
            Ok(events) => self.pending.extend(events),
            Err(error) => {
                let preview: String = trimmed.chars().take(MALFORMED_LINE_PREVIEW_BYTES).collect();
                tracing::warn!(%error, preview, "dropping malformed agent stream line");
            }
        }
    }
}
