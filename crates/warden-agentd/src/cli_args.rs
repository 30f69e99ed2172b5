use std::path::PathBuf;

use clap::Parser;

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

/// Supervisor daemon for one coding-agent session.
#[derive(Debug, Parser)]
#[command(name = "warden-agentd", about = "Supervises one coding agent session", version)]
pub(crate) struct AgentdArgs {
    /// Unique identifier for this session.
    #[arg(long, env = "WARDEN_SESSION_ID")]
    pub(crate) session_id: String,

    /// Directory for the session state file and run log.
    #[arg(long, env = "WARDEN_STATE_DIR", default_value = ".warden")]
    pub(crate) state_dir: PathBuf,

    /// Bind address for the prompt/health/status API.
    #[arg(long, env = "WARDEN_BIND", default_value = "0.0.0.0:3000")]
    pub(crate) bind: String,

    /// Agent CLI executable.
    #[arg(long, env = "WARDEN_AGENT_EXECUTABLE", default_value = "claude")]
    pub(crate) agent_executable: String,

    /// Extra argument passed through to the agent CLI (repeatable).
    #[arg(long = "agent-arg", allow_hyphen_values = true)]
    pub(crate) agent_args: Vec<String>,

    /// Working tree the agent runs in.
    #[arg(long, env = "WARDEN_WORKSPACE_DIR", default_value = ".")]
    pub(crate) workspace_dir: PathBuf,

    /// Hard cap on one agent run, in milliseconds.
    #[arg(long, env = "WARDEN_RUN_TIMEOUT_MS", default_value_t = 3_600_000, value_parser = parse_positive_u64)]
    pub(crate) run_timeout_ms: u64,

    /// `owner/repo` slug of the issue thread receiving progress comments.
    #[arg(long, env = "WARDEN_REPO_SLUG")]
    pub(crate) repo_slug: Option<String>,

    /// Issue (or pull request) number receiving progress comments.
    #[arg(long, env = "WARDEN_ISSUE_NUMBER")]
    pub(crate) issue_number: Option<u64>,

    #[arg(long, env = "WARDEN_ISSUE_API_BASE", default_value = "https://api.github.com")]
    pub(crate) issue_api_base: String,

    /// API token for posting comments. Posting is disabled when absent.
    #[arg(long, env = "WARDEN_ISSUE_TOKEN")]
    pub(crate) issue_token: Option<String>,

    #[arg(long, env = "WARDEN_FLUSH_INTERVAL_MS", default_value_t = 2_000, value_parser = parse_positive_u64)]
    pub(crate) flush_interval_ms: u64,

    #[arg(long, env = "WARDEN_MAX_BATCH_UNITS", default_value_t = 10, value_parser = parse_positive_usize)]
    pub(crate) max_batch_units: usize,

    /// Shared load-balancer listener to register a host rule on.
    #[arg(long, env = "WARDEN_ROUTING_LISTENER")]
    pub(crate) routing_listener: Option<String>,

    /// Domain suffix for the claimed hostname `{session-id}.{suffix}`.
    #[arg(long, env = "WARDEN_DOMAIN_SUFFIX")]
    pub(crate) domain_suffix: Option<String>,

    /// Port the routing target forwards to.
    #[arg(long, env = "WARDEN_SERVICE_PORT", default_value_t = 3000)]
    pub(crate) service_port: u16,

    #[arg(long, env = "WARDEN_HEALTH_CHECK_PATH", default_value = "/health")]
    pub(crate) health_check_path: String,

    #[arg(long, env = "WARDEN_RULE_PRIORITY_FLOOR", default_value_t = warden_register::RULE_PRIORITY_FLOOR)]
    pub(crate) rule_priority_floor: i64,

    #[arg(long, env = "WARDEN_MAX_PRIORITY_PROBES", default_value_t = warden_register::DEFAULT_MAX_PROBE_ATTEMPTS, value_parser = parse_positive_usize)]
    pub(crate) max_priority_probes: usize,

    /// Minutes of inactivity before a warning comment is posted.
    #[arg(long, env = "WARDEN_IDLE_WARNING_MINUTES", default_value_t = 55, value_parser = parse_positive_u64)]
    pub(crate) idle_warning_minutes: u64,

    /// Minutes of inactivity before the session shuts itself down.
    #[arg(long, env = "WARDEN_IDLE_TIMEOUT_MINUTES", default_value_t = 60, value_parser = parse_positive_u64)]
    pub(crate) idle_timeout_minutes: u64,

    /// Prompt submitted automatically once startup completes.
    #[arg(long, env = "WARDEN_INITIAL_PROMPT")]
    pub(crate) initial_prompt: Option<String>,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn unit_args_parse_with_defaults() {
        let args = AgentdArgs::try_parse_from(["warden-agentd", "--session-id", "sess-1"])
            .expect("parse");
        assert_eq!(args.session_id, "sess-1");
        assert_eq!(args.bind, "0.0.0.0:3000");
        assert_eq!(args.agent_executable, "claude");
        assert_eq!(args.flush_interval_ms, 2_000);
        assert_eq!(args.max_batch_units, 10);
        assert_eq!(args.idle_warning_minutes, 55);
        assert_eq!(args.idle_timeout_minutes, 60);
        assert!(args.repo_slug.is_none());
    }

    #[test]
    fn unit_args_collect_repeated_agent_args() {
        let args = AgentdArgs::try_parse_from([
            "warden-agentd",
            "--session-id",
            "sess-1",
            "--agent-arg",
            "--model",
            "--agent-arg",
            "opus",
        ])
        .expect("parse");
        assert_eq!(args.agent_args, vec!["--model", "opus"]);
    }

    #[test]
    fn regression_args_reject_zero_timeouts() {
        let result = AgentdArgs::try_parse_from([
            "warden-agentd",
            "--session-id",
            "sess-1",
            "--run-timeout-ms",
            "0",
        ]);
        assert!(result.is_err());
        let result = AgentdArgs::try_parse_from([
            "warden-agentd",
            "--session-id",
            "sess-1",
            "--max-batch-units",
            "0",
        ]);
        assert!(result.is_err());
    }
}
