//! Schema-versioned state file for the supervised session record.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use warden_core::{current_unix_timestamp_ms, write_text_atomic};

pub const SESSION_STATE_SCHEMA_VERSION: u32 = 1;

/// Lifecycle of the supervised session.
///
/// `Starting` covers the window between process launch and a ready API
/// surface; `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Starting,
    Running,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Starting => "starting",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub status: SessionStatus,
    /// Agent-issued token that lets the next run resume the conversation.
    #[serde(default)]
    pub resumption_token: Option<String>,
    /// Externally reachable hostname claimed during self-registration.
    #[serde(default)]
    pub network_identity: Option<String>,
    #[serde(default)]
    pub created_at_unix_ms: u64,
    #[serde(default)]
    pub last_activity_unix_ms: u64,
    #[serde(default)]
    pub total_runs_completed: u64,
    #[serde(default)]
    pub total_runs_failed: u64,
}

impl SessionRecord {
    fn new(session_id: String) -> Self {
        let now = current_unix_timestamp_ms();
        Self {
            session_id,
            status: SessionStatus::Starting,
            resumption_token: None,
            network_identity: None,
            created_at_unix_ms: now,
            last_activity_unix_ms: now,
            total_runs_completed: 0,
            total_runs_failed: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionStateFile {
    schema_version: u32,
    session: SessionRecord,
}

/// Load-mutate-save store over the session state file.
///
/// Unreadable or schema-mismatched files are reported and replaced with a
/// fresh record rather than aborting startup. A state file carrying a
/// different session id is also replaced; the daemon is authoritative for
/// which session it hosts.
pub struct SessionStateStore {
    path: PathBuf,
    record: SessionRecord,
}

impl SessionStateStore {
    pub fn load(path: PathBuf, session_id: &str) -> Result<Self> {
        let record = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read session state file {}", path.display()))?;
            match serde_json::from_str::<SessionStateFile>(&raw) {
                Ok(state) if state.schema_version != SESSION_STATE_SCHEMA_VERSION => {
                    eprintln!(
                        "unsupported session state schema in {}: expected {}, found {} (starting fresh)",
                        path.display(),
                        SESSION_STATE_SCHEMA_VERSION,
                        state.schema_version
                    );
                    SessionRecord::new(session_id.to_string())
                }
                Ok(state) if state.session.session_id != session_id => {
                    eprintln!(
                        "session state file {} belongs to session {} (starting fresh for {})",
                        path.display(),
                        state.session.session_id,
                        session_id
                    );
                    SessionRecord::new(session_id.to_string())
                }
                Ok(state) => state.session,
                Err(error) => {
                    eprintln!(
                        "failed to parse session state file {}: {} (starting fresh)",
                        path.display(),
                        error
                    );
                    SessionRecord::new(session_id.to_string())
                }
            }
        } else {
            SessionRecord::new(session_id.to_string())
        };
        Ok(Self { path, record })
    }

    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    pub fn mark_running(&mut self) {
        self.record.status = SessionStatus::Running;
        self.touch_activity();
    }

    pub fn mark_completed(&mut self) {
        self.record.status = SessionStatus::Completed;
        self.touch_activity();
    }

    pub fn mark_failed(&mut self) {
        self.record.status = SessionStatus::Failed;
        self.touch_activity();
    }

    pub fn record_run_completed(&mut self) {
        self.record.total_runs_completed = self.record.total_runs_completed.saturating_add(1);
        self.touch_activity();
    }

    /// Counts a failed prompt run without ending the session; the queue
    /// proceeds to the next item.
    pub fn record_run_failed(&mut self) {
        self.record.total_runs_failed = self.record.total_runs_failed.saturating_add(1);
        self.touch_activity();
    }

    /// Replaces the stored resumption token. Tokens are opaque and the
    /// newest observation always wins.
    pub fn set_resumption_token(&mut self, token: Option<String>) {
        if token.is_some() {
            self.record.resumption_token = token;
        }
    }

    pub fn set_network_identity(&mut self, identity: String) {
        self.record.network_identity = Some(identity);
    }

    pub fn touch_activity(&mut self) {
        self.record.last_activity_unix_ms = current_unix_timestamp_ms();
    }

    pub fn save(&self) -> Result<()> {
        let state = SessionStateFile {
            schema_version: SESSION_STATE_SCHEMA_VERSION,
            session: self.record.clone(),
        };
        let mut payload =
            serde_json::to_string_pretty(&state).context("failed to serialize session state")?;
        payload.push('\n');
        write_text_atomic(&self.path, &payload)
            .with_context(|| format!("failed to write session state file {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("session-state.json")
    }

    #[test]
    fn unit_load_starts_fresh_when_file_is_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStateStore::load(state_path(&dir), "sess-1").expect("load");
        assert_eq!(store.record().session_id, "sess-1");
        assert_eq!(store.record().status, SessionStatus::Starting);
        assert!(store.record().resumption_token.is_none());
    }

    #[test]
    fn functional_save_then_load_round_trips_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = state_path(&dir);
        let mut store = SessionStateStore::load(path.clone(), "sess-1").expect("load");
        store.mark_running();
        store.set_resumption_token(Some("resume-abc".to_string()));
        store.set_network_identity("agent-sess-1.example.com".to_string());
        store.record_run_completed();
        store.save().expect("save");

        let reloaded = SessionStateStore::load(path, "sess-1").expect("reload");
        assert_eq!(reloaded.record().status, SessionStatus::Running);
        assert_eq!(
            reloaded.record().resumption_token.as_deref(),
            Some("resume-abc")
        );
        assert_eq!(
            reloaded.record().network_identity.as_deref(),
            Some("agent-sess-1.example.com")
        );
        assert_eq!(reloaded.record().total_runs_completed, 1);
    }

    #[test]
    fn regression_load_starts_fresh_on_parse_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = state_path(&dir);
        std::fs::write(&path, "{not json").expect("write");
        let store = SessionStateStore::load(path, "sess-1").expect("load");
        assert_eq!(store.record().status, SessionStatus::Starting);
    }

    #[test]
    fn regression_load_starts_fresh_on_schema_mismatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = state_path(&dir);
        let payload = serde_json::json!({
            "schema_version": SESSION_STATE_SCHEMA_VERSION + 1,
            "session": {
                "session_id": "sess-1",
                "status": "running",
            }
        });
        std::fs::write(&path, payload.to_string()).expect("write");
        let store = SessionStateStore::load(path, "sess-1").expect("load");
        assert_eq!(store.record().status, SessionStatus::Starting);
    }

    #[test]
    fn regression_load_starts_fresh_for_foreign_session_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = state_path(&dir);
        let mut store = SessionStateStore::load(path.clone(), "sess-old").expect("load");
        store.mark_running();
        store.save().expect("save");

        let store = SessionStateStore::load(path, "sess-new").expect("load");
        assert_eq!(store.record().session_id, "sess-new");
        assert_eq!(store.record().status, SessionStatus::Starting);
    }

    #[test]
    fn unit_set_resumption_token_ignores_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = SessionStateStore::load(state_path(&dir), "sess-1").expect("load");
        store.set_resumption_token(Some("resume-1".to_string()));
        store.set_resumption_token(None);
        assert_eq!(store.record().resumption_token.as_deref(), Some("resume-1"));
    }
}
