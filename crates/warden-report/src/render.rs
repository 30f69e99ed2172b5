//! Markdown rendering for progress comments.
//!
//! Every comment body starts with [`AGENT_MARKER`] so the webhook side can
//! tell agent-authored comments from user feedback and skip re-ingesting
//! them.

use warden_events::{PostableUnit, ToolOutcome};

pub const AGENT_MARKER: &str = "<!-- warden-agent -->";

/// Renders a flush batch into one comment body, preserving unit order.
pub fn render_batch(units: &[PostableUnit]) -> String {
    let mut body = String::from(AGENT_MARKER);
    for unit in units {
        body.push_str("\n\n");
        match unit {
            PostableUnit::ThinkingBlock { text } => {
                body.push_str(":thought_balloon: **Thinking**\n");
                for line in text.lines() {
                    body.push_str("\n> ");
                    body.push_str(line);
                }
            }
            PostableUnit::ToolActivityBlock {
                name,
                input,
                outcome,
                duration_ms,
            } => {
                body.push_str(&format!(":gear: **{name}**"));
                if let Some(duration_ms) = duration_ms {
                    body.push_str(&format!(" ({})", format_duration_ms(*duration_ms)));
                }
                if !input.is_empty() {
                    body.push_str(&format!("\n\n```json\n{input}\n```"));
                }
                match outcome {
                    ToolOutcome::Captured { content, is_error } => {
                        let label = if *is_error { ":warning: Error" } else { "Result" };
                        if content.is_empty() {
                            body.push_str(&format!("\n\n{label}: (empty)"));
                        } else {
                            body.push_str(&format!("\n\n{label}:\n\n```\n{content}\n```"));
                        }
                    }
                    ToolOutcome::NotCaptured => {
                        body.push_str("\n\nResult: (not captured)");
                    }
                }
            }
            PostableUnit::TextBlock { text } => body.push_str(text),
            PostableUnit::CompletionMarker => {
                body.push_str(":white_check_mark: **Completed**");
            }
        }
    }
    body
}

fn format_duration_ms(duration_ms: u64) -> String {
    if duration_ms < 1_000 {
        format!("{duration_ms}ms")
    } else {
        format!("{:.1}s", duration_ms as f64 / 1_000.0)
    }
}

pub fn ack_comment(author: &str) -> String {
    format!("{AGENT_MARKER}\n:robot: Processing feedback from @{author}...")
}

pub fn startup_comment(reachable_url: Option<&str>) -> String {
    match reachable_url {
        Some(url) => format!(
            "{AGENT_MARKER}\n:rocket: **Agent Ready**\n\nPreview: {url}\n\nComment on this thread to send feedback."
        ),
        None => format!(
            "{AGENT_MARKER}\n:rocket: **Agent Ready**\n\nComment on this thread to send feedback."
        ),
    }
}

pub fn run_failed_comment(error: &str) -> String {
    format!("{AGENT_MARKER}\n:warning: **Error**\n\n```\n{error}\n```")
}

pub fn idle_warning_comment(idle_minutes: u64, timeout_minutes: u64) -> String {
    format!(
        "{AGENT_MARKER}\n:hourglass: **Idle Warning**\n\nNo activity for {idle_minutes} minutes. Session will shut down after {timeout_minutes} minutes idle."
    )
}

pub fn idle_shutdown_comment(timeout_minutes: u64) -> String {
    format!(
        "{AGENT_MARKER}\n:zzz: **Session Terminated**\n\nShut down after {timeout_minutes} minutes without activity."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_render_batch_leads_with_marker_and_preserves_order() {
        let body = render_batch(&[
            PostableUnit::TextBlock {
                text: "first".to_string(),
            },
            PostableUnit::TextBlock {
                text: "second".to_string(),
            },
        ]);
        assert!(body.starts_with(AGENT_MARKER));
        let first = body.find("first").expect("first present");
        let second = body.find("second").expect("second present");
        assert!(first < second);
    }

    #[test]
    fn unit_render_batch_quotes_thinking_lines() {
        let body = render_batch(&[PostableUnit::ThinkingBlock {
            text: "line one\nline two".to_string(),
        }]);
        assert!(body.contains("> line one"));
        assert!(body.contains("> line two"));
    }

    #[test]
    fn unit_render_batch_fences_tool_input_and_result() {
        let body = render_batch(&[PostableUnit::ToolActivityBlock {
            name: "Bash".to_string(),
            input: "{\"cmd\":\"ls\"}".to_string(),
            outcome: ToolOutcome::Captured {
                content: "a.txt".to_string(),
                is_error: false,
            },
            duration_ms: None,
        }]);
        assert!(body.contains(":gear: **Bash**"));
        assert!(body.contains("```json\n{\"cmd\":\"ls\"}\n```"));
        assert!(body.contains("Result:\n\n```\na.txt\n```"));
    }

    #[test]
    fn unit_render_batch_shows_tool_duration_when_known() {
        let body = render_batch(&[PostableUnit::ToolActivityBlock {
            name: "Read".to_string(),
            input: String::new(),
            outcome: ToolOutcome::Captured {
                content: "ok".to_string(),
                is_error: false,
            },
            duration_ms: Some(340),
        }]);
        assert!(body.contains(":gear: **Read** (340ms)"));

        let body = render_batch(&[PostableUnit::ToolActivityBlock {
            name: "Bash".to_string(),
            input: String::new(),
            outcome: ToolOutcome::NotCaptured,
            duration_ms: Some(2_500),
        }]);
        assert!(body.contains(":gear: **Bash** (2.5s)"));
    }

    #[test]
    fn unit_render_batch_labels_error_results() {
        let body = render_batch(&[PostableUnit::ToolActivityBlock {
            name: "Bash".to_string(),
            input: String::new(),
            outcome: ToolOutcome::Captured {
                content: "command not found".to_string(),
                is_error: true,
            },
            duration_ms: None,
        }]);
        assert!(body.contains(":warning: Error:"));
        assert!(!body.contains("```json"));
    }

    #[test]
    fn unit_render_batch_marks_uncaptured_results() {
        let body = render_batch(&[PostableUnit::ToolActivityBlock {
            name: "Edit".to_string(),
            input: String::new(),
            outcome: ToolOutcome::NotCaptured,
            duration_ms: None,
        }]);
        assert!(body.contains("Result: (not captured)"));
    }

    #[test]
    fn unit_lifecycle_comments_carry_marker() {
        assert!(ack_comment("octocat").starts_with(AGENT_MARKER));
        assert!(ack_comment("octocat").contains("@octocat"));
        assert!(startup_comment(Some("https://a.example.com")).contains("https://a.example.com"));
        assert!(run_failed_comment("boom").contains("```\nboom\n```"));
        assert!(idle_warning_comment(55, 60).contains("55 minutes"));
        assert!(idle_shutdown_comment(60).starts_with(AGENT_MARKER));
    }
}
