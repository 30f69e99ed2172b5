//! Runs one agent subprocess and streams its output through the reporting
//! pipeline.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;

use warden_events::{ActivityAggregator, AgentStreamDecoder, PostableUnit};
use warden_report::ProgressReporter;

#[derive(Debug, Clone)]
pub struct AgentRunnerConfig {
    pub executable: String,
    pub extra_args: Vec<String>,
    pub workspace_dir: PathBuf,
    pub run_timeout_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum AgentRunError {
    #[error("failed to spawn agent '{executable}': {source}")]
    Spawn {
        executable: String,
        #[source]
        source: std::io::Error,
    },
    #[error("agent run timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("failed to read agent output: {0}")]
    Stream(#[from] anyhow::Error),
    #[error("agent exited with status {status}: {stderr}")]
    NonZeroExit { status: String, stderr: String },
}

#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    /// Session id observed in the stream, used to resume the next run.
    pub resumption_token: Option<String>,
}

async fn spawn_with_text_file_busy_retry(
    command: &mut Command,
    executable: &str,
) -> Result<tokio::process::Child, AgentRunError> {
    const MAX_TEXT_FILE_BUSY_RETRIES: u32 = 5;
    const TEXT_FILE_BUSY_ERRNO: i32 = 26;
    let mut attempt = 0;
    loop {
        match command.spawn() {
            Ok(child) => return Ok(child),
            Err(error) => {
                if error.raw_os_error() == Some(TEXT_FILE_BUSY_ERRNO)
                    && attempt < MAX_TEXT_FILE_BUSY_RETRIES
                {
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(25)).await;
                    continue;
                }
                return Err(AgentRunError::Spawn {
                    executable: executable.to_string(),
                    source: error,
                });
            }
        }
    }
}

fn truncate_stderr(stderr: &str) -> String {
    const MAX_CHARS: usize = 800;
    let trimmed = stderr.trim();
    if trimmed.chars().count() <= MAX_CHARS {
        return trimmed.to_string();
    }
    let mut truncated = trimmed.chars().take(MAX_CHARS).collect::<String>();
    truncated.push_str("...");
    truncated
}

/// Owns the agent CLI invocation for one session's working tree.
#[derive(Debug, Clone)]
pub struct AgentRunner {
    config: AgentRunnerConfig,
}

impl AgentRunner {
    pub fn new(config: AgentRunnerConfig) -> Self {
        Self { config }
    }

    /// Starts (or resumes) the agent with one prompt, forwarding every
    /// activity unit to `reporter` as the stream produces it. Returns once
    /// the subprocess has exited and the stream is drained.
    pub async fn run(
        &self,
        prompt: &str,
        resumption_token: Option<&str>,
        reporter: &ProgressReporter,
    ) -> Result<RunOutcome, AgentRunError> {
        let mut command = Command::new(&self.config.executable);
        command.kill_on_drop(true);
        command.arg("--dangerously-skip-permissions");
        command.arg("--output-format");
        command.arg("stream-json");
        command.arg("--verbose");
        if let Some(token) = resumption_token {
            command.arg("--continue");
            command.arg(token);
        }
        command.args(&self.config.extra_args);
        command.arg("-p");
        command.arg(prompt);
        command.current_dir(&self.config.workspace_dir);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let mut child =
            spawn_with_text_file_busy_retry(&mut command, &self.config.executable).await?;
        let stdout = child.stdout.take().ok_or_else(|| {
            AgentRunError::Stream(anyhow::anyhow!("agent stdout pipe was not captured"))
        })?;
        let mut stderr_pipe = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buffer = Vec::new();
            if let Some(stderr) = stderr_pipe.as_mut() {
                let _ = stderr.read_to_end(&mut buffer).await;
            }
            buffer
        });

        let run = async {
            let mut decoder = AgentStreamDecoder::new(stdout);
            let mut aggregator = ActivityAggregator::new();
            while let Some(event) = decoder.next_event().await? {
                for unit in aggregator.handle_event(event) {
                    reporter.enqueue(unit);
                }
            }
            for unit in aggregator.finish() {
                reporter.enqueue(unit);
            }
            let status = child
                .wait()
                .await
                .map_err(|error| anyhow::anyhow!("failed to wait for agent exit: {error}"))?;
            Ok::<_, anyhow::Error>((status, aggregator))
        };

        let (status, aggregator) =
            match tokio::time::timeout(Duration::from_millis(self.config.run_timeout_ms), run)
                .await
            {
                Ok(result) => result?,
                Err(_) => {
                    // Dropping the run future drops the child; kill_on_drop
                    // reaps it.
                    return Err(AgentRunError::Timeout {
                        timeout_ms: self.config.run_timeout_ms,
                    });
                }
            };

        let stderr_bytes = stderr_task.await.unwrap_or_default();
        if !status.success() {
            let status_label = status
                .code()
                .map(|code| code.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(AgentRunError::NonZeroExit {
                status: status_label,
                stderr: truncate_stderr(&String::from_utf8_lossy(&stderr_bytes)),
            });
        }

        // The success marker belongs to clean exits only; a failed run must
        // not read as completed on the external thread.
        reporter.enqueue(PostableUnit::CompletionMarker);
        Ok(RunOutcome {
            resumption_token: aggregator.resumption_token().map(ToOwned::to_owned),
        })
    }
}
