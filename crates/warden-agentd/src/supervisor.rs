//! Startup orchestration: state, API server, self-registration, queue loop,
//! and the idle watchdog.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;

use warden_core::current_unix_timestamp_ms;
use warden_queue::{
    run_queue_loop, AgentRunner, AgentRunnerConfig, PromptQueue, QueueLoopConfig,
};
use warden_register::{register_instance, RoutingControlPlane, SelfRegistrationConfig};
use warden_report::{
    idle_shutdown_comment, idle_warning_comment, startup_comment, CommentSink, IssueCommentClient,
    NullCommentSink, PostTarget,
};
use warden_session::{RunLog, SessionStateStore};

use crate::api_server::{self, ApiState};
use crate::cli_args::AgentdArgs;

const COMMENT_REQUEST_TIMEOUT_MS: u64 = 30_000;
const COMMENT_RETRY_MAX_ATTEMPTS: usize = 3;
const COMMENT_RETRY_BASE_DELAY_MS: u64 = 500;
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(60);

fn lock_store(store: &Mutex<SessionStateStore>) -> std::sync::MutexGuard<'_, SessionStateStore> {
    store
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn build_comment_sink(args: &AgentdArgs) -> Result<Arc<dyn CommentSink>> {
    match (&args.repo_slug, args.issue_number, &args.issue_token) {
        (Some(repo_slug), Some(issue_number), Some(token)) => {
            let client = IssueCommentClient::new(
                PostTarget {
                    api_base: args.issue_api_base.clone(),
                    repo_slug: repo_slug.clone(),
                    issue_number,
                },
                token,
                COMMENT_REQUEST_TIMEOUT_MS,
                COMMENT_RETRY_MAX_ATTEMPTS,
                COMMENT_RETRY_BASE_DELAY_MS,
            )?;
            Ok(Arc::new(client))
        }
        _ => {
            tracing::info!("no issue thread configured, progress comments disabled");
            Ok(Arc::new(NullCommentSink))
        }
    }
}

fn registration_config(args: &AgentdArgs) -> Option<SelfRegistrationConfig> {
    let listener = args.routing_listener.clone()?;
    let domain_suffix = args.domain_suffix.clone()?;
    Some(SelfRegistrationConfig {
        identity: args.session_id.clone(),
        domain_suffix,
        listener,
        port: args.service_port,
        health_check_path: args.health_check_path.clone(),
        priority_floor: args.rule_priority_floor,
        max_probe_attempts: args.max_priority_probes,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdleAction {
    Wait,
    Warn,
    Shutdown,
}

fn decide_idle_action(idle_ms: u64, warned: bool, warning_ms: u64, timeout_ms: u64) -> IdleAction {
    if idle_ms >= timeout_ms {
        return IdleAction::Shutdown;
    }
    if idle_ms >= warning_ms && !warned {
        return IdleAction::Warn;
    }
    IdleAction::Wait
}

fn spawn_idle_watchdog(
    store: Arc<Mutex<SessionStateStore>>,
    sink: Arc<dyn CommentSink>,
    shutdown: watch::Sender<bool>,
    warning_minutes: u64,
    timeout_minutes: u64,
) -> tokio::task::JoinHandle<()> {
    let warning_ms = warning_minutes.saturating_mul(60_000);
    let timeout_ms = timeout_minutes.saturating_mul(60_000);
    tokio::spawn(async move {
        let mut warned = false;
        let mut ticker = tokio::time::interval(IDLE_CHECK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let last_activity = lock_store(&store).record().last_activity_unix_ms;
            let idle_ms = current_unix_timestamp_ms().saturating_sub(last_activity);
            if idle_ms < warning_ms {
                warned = false;
            }
            match decide_idle_action(idle_ms, warned, warning_ms, timeout_ms) {
                IdleAction::Wait => {}
                IdleAction::Warn => {
                    warned = true;
                    let comment = idle_warning_comment(idle_ms / 60_000, timeout_minutes);
                    if let Err(error) = sink.post(&comment).await {
                        tracing::warn!(%error, "failed to post idle warning");
                    }
                }
                IdleAction::Shutdown => {
                    tracing::info!(idle_ms, "idle timeout reached");
                    if let Err(error) = sink.post(&idle_shutdown_comment(timeout_minutes)).await {
                        tracing::warn!(%error, "failed to post idle shutdown notice");
                    }
                    let _ = shutdown.send(true);
                    return;
                }
            }
        }
    })
}

pub(crate) async fn run(
    args: AgentdArgs,
    plane: Option<Arc<dyn RoutingControlPlane>>,
) -> Result<()> {
    std::fs::create_dir_all(&args.state_dir)
        .with_context(|| format!("failed to create {}", args.state_dir.display()))?;

    let store = Arc::new(Mutex::new(SessionStateStore::load(
        args.state_dir.join("session-state.json"),
        &args.session_id,
    )?));
    {
        let store = lock_store(&store);
        store.save().context("failed to persist initial session state")?;
    }
    let run_log = RunLog::open(args.state_dir.join("runs.jsonl"))?;
    let sink = build_comment_sink(&args)?;
    let (queue, receiver) = PromptQueue::new();

    let bind_addr = args
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid --bind '{}'", args.bind))?;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind api server on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound api server address")?;
    println!(
        "warden agentd listening: addr={} session={} state_dir={}",
        local_addr,
        args.session_id,
        args.state_dir.display()
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let api_state = Arc::new(ApiState {
        session_id: args.session_id.clone(),
        started_at_unix_ms: current_unix_timestamp_ms(),
        queue: queue.clone(),
        store: store.clone(),
    });
    let api_task = tokio::spawn(api_server::serve(listener, api_state, shutdown_rx));

    // Registration, the startup banner, and the initial prompt run off the
    // critical path so queue processing starts immediately.
    let startup_task = {
        let store = store.clone();
        let sink = sink.clone();
        let queue = queue.clone();
        let config = registration_config(&args);
        let initial_prompt = args.initial_prompt.clone();
        tokio::spawn(async move {
            let hostname = match (&plane, config) {
                (Some(plane), Some(config)) => {
                    register_instance(plane.as_ref(), Some(&config), &store).await
                }
                (None, Some(_)) => {
                    tracing::info!(
                        "no routing control plane wired, skipping self-registration"
                    );
                    None
                }
                _ => {
                    tracing::info!("routing configuration absent, skipping self-registration");
                    None
                }
            };
            let preview_url = hostname.map(|hostname| format!("https://{hostname}"));
            if let Err(error) = sink.post(&startup_comment(preview_url.as_deref())).await {
                tracing::warn!(%error, "failed to post startup comment");
            }
            if let Some(prompt) = initial_prompt {
                match queue.submit(prompt, "system".to_string()) {
                    Ok(position) => tracing::info!(position, "queued initial prompt"),
                    Err(error) => tracing::warn!(%error, "failed to queue initial prompt"),
                }
            }
        })
    };

    let idle_task = spawn_idle_watchdog(
        store.clone(),
        sink.clone(),
        shutdown_tx.clone(),
        args.idle_warning_minutes,
        args.idle_timeout_minutes,
    );

    let runner = AgentRunner::new(AgentRunnerConfig {
        executable: args.agent_executable.clone(),
        extra_args: args.agent_args.clone(),
        workspace_dir: args.workspace_dir.clone(),
        run_timeout_ms: args.run_timeout_ms,
    });
    let loop_config = QueueLoopConfig {
        flush_interval: Duration::from_millis(args.flush_interval_ms),
        max_batch_units: args.max_batch_units,
    };
    let mut idle_shutdown = shutdown_tx.subscribe();

    tokio::select! {
        _ = run_queue_loop(
            receiver,
            runner,
            sink.clone(),
            store.clone(),
            run_log,
            loop_config,
        ) => {}
        _ = tokio::signal::ctrl_c() => {
            println!("shutdown signal received");
        }
        _ = idle_shutdown.changed() => {
            println!("idle timeout reached, shutting down");
        }
    }

    let _ = shutdown_tx.send(true);
    startup_task.abort();
    idle_task.abort();
    {
        let mut store = lock_store(&store);
        store.mark_completed();
        if let Err(error) = store.save() {
            eprintln!("failed to persist final session state: {error}");
        }
    }
    if let Ok(serve_result) = api_task.await {
        serve_result?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_decide_idle_action_waits_below_warning_threshold() {
        assert_eq!(
            decide_idle_action(10 * 60_000, false, 55 * 60_000, 60 * 60_000),
            IdleAction::Wait
        );
    }

    #[test]
    fn unit_decide_idle_action_warns_once_then_waits() {
        assert_eq!(
            decide_idle_action(56 * 60_000, false, 55 * 60_000, 60 * 60_000),
            IdleAction::Warn
        );
        assert_eq!(
            decide_idle_action(56 * 60_000, true, 55 * 60_000, 60 * 60_000),
            IdleAction::Wait
        );
    }

    #[test]
    fn unit_decide_idle_action_shuts_down_at_timeout() {
        assert_eq!(
            decide_idle_action(60 * 60_000, true, 55 * 60_000, 60 * 60_000),
            IdleAction::Shutdown
        );
        assert_eq!(
            decide_idle_action(90 * 60_000, false, 55 * 60_000, 60 * 60_000),
            IdleAction::Shutdown
        );
    }
}
