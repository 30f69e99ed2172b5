//! Startup self-registration flow.

use std::collections::HashSet;
use std::sync::Mutex;

use warden_core::sanitize_for_path;
use warden_session::SessionStateStore;

use crate::control_plane::{ControlPlaneError, RoutingControlPlane};

pub const RULE_PRIORITY_FLOOR: i64 = 100;
pub const DEFAULT_MAX_PROBE_ATTEMPTS: usize = 20;

#[derive(Debug, Clone)]
pub struct SelfRegistrationConfig {
    /// Unique hostname slice this instance claims, usually the session id.
    pub identity: String,
    pub domain_suffix: String,
    pub listener: String,
    pub port: u16,
    pub health_check_path: String,
    pub priority_floor: i64,
    pub max_probe_attempts: usize,
}

fn lock_store(store: &Mutex<SessionStateStore>) -> std::sync::MutexGuard<'_, SessionStateStore> {
    store
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn next_free_priority(floor: i64, occupied: &HashSet<i64>) -> i64 {
    let mut candidate = floor;
    while occupied.contains(&candidate) {
        candidate = candidate.saturating_add(1);
    }
    candidate
}

/// Registers this instance with the routing layer and persists the claimed
/// hostname into the session record, flipping it to running.
///
/// Best-effort throughout: a missing config or any control-plane failure is
/// logged and registration is abandoned, leaving the session reachable only
/// locally. Priority allocation is non-atomic; a collision on rule creation
/// is answered by refreshing the listing and probing again, bounded by
/// `max_probe_attempts`.
pub async fn register_instance(
    plane: &dyn RoutingControlPlane,
    config: Option<&SelfRegistrationConfig>,
    store: &Mutex<SessionStateStore>,
) -> Option<String> {
    let Some(config) = config else {
        tracing::info!("routing configuration absent, skipping self-registration");
        return None;
    };
    if config.identity.trim().is_empty()
        || config.domain_suffix.trim().is_empty()
        || config.listener.trim().is_empty()
    {
        tracing::info!("routing configuration incomplete, skipping self-registration");
        return None;
    }

    let target_name = format!("agent-{}", sanitize_for_path(&config.identity));
    let target = match plane
        .create_or_get_target(&target_name, config.port, &config.health_check_path)
        .await
    {
        Ok(target) => target,
        Err(error) => {
            tracing::warn!(%error, target_name, "failed to create routing target, continuing without public route");
            return None;
        }
    };

    let host_pattern = format!("{}.{}", config.identity, config.domain_suffix);
    let mut attempts = 0_usize;
    let rule = loop {
        if attempts >= config.max_probe_attempts.max(1) {
            tracing::warn!(
                attempts,
                "exhausted rule priority probes, continuing without public route"
            );
            return None;
        }
        attempts += 1;

        let occupied: HashSet<i64> = match plane.list_rule_priorities(&config.listener).await {
            Ok(priorities) => priorities.into_iter().collect(),
            Err(error) => {
                tracing::warn!(%error, "failed to list rule priorities, continuing without public route");
                return None;
            }
        };
        let priority = next_free_priority(config.priority_floor, &occupied);
        match plane
            .create_rule(&config.listener, priority, &host_pattern, &target)
            .await
        {
            Ok(rule) => break rule,
            Err(ControlPlaneError::PriorityInUse(priority)) => {
                tracing::info!(priority, "rule priority raced, probing again");
                continue;
            }
            Err(error) => {
                tracing::warn!(%error, "failed to create routing rule, continuing without public route");
                return None;
            }
        }
    };

    tracing::info!(rule_id = %rule.id, host_pattern, "registered routing rule");
    {
        let mut store = lock_store(store);
        store.set_network_identity(host_pattern.clone());
        store.mark_running();
        if let Err(error) = store.save() {
            tracing::warn!(%error, "failed to persist network identity");
        }
    }
    Some(host_pattern)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use warden_session::SessionStatus;

    use crate::control_plane::{RuleHandle, TargetHandle};

    use super::*;

    #[derive(Default)]
    struct MockPlane {
        occupied: Mutex<HashSet<i64>>,
        created_rules: Mutex<Vec<(i64, String)>>,
        rule_races_remaining: AtomicUsize,
        fail_target_creation: bool,
    }

    impl MockPlane {
        fn with_occupied(priorities: &[i64]) -> Self {
            Self {
                occupied: Mutex::new(priorities.iter().copied().collect()),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl RoutingControlPlane for MockPlane {
        async fn create_or_get_target(
            &self,
            name: &str,
            _port: u16,
            _health_check_path: &str,
        ) -> Result<TargetHandle, ControlPlaneError> {
            if self.fail_target_creation {
                return Err(ControlPlaneError::Other(anyhow::anyhow!(
                    "target quota exceeded"
                )));
            }
            Ok(TargetHandle {
                id: format!("tg/{name}"),
            })
        }

        async fn list_rule_priorities(
            &self,
            _listener: &str,
        ) -> Result<Vec<i64>, ControlPlaneError> {
            Ok(self.occupied.lock().expect("lock").iter().copied().collect())
        }

        async fn create_rule(
            &self,
            _listener: &str,
            priority: i64,
            host_pattern: &str,
            _target: &TargetHandle,
        ) -> Result<RuleHandle, ControlPlaneError> {
            let races = self.rule_races_remaining.load(Ordering::SeqCst);
            if races > 0 {
                self.rule_races_remaining.store(races - 1, Ordering::SeqCst);
                // The racing winner now occupies this priority.
                self.occupied.lock().expect("lock").insert(priority);
                return Err(ControlPlaneError::PriorityInUse(priority));
            }
            let mut occupied = self.occupied.lock().expect("lock");
            if occupied.contains(&priority) {
                return Err(ControlPlaneError::PriorityInUse(priority));
            }
            occupied.insert(priority);
            self.created_rules
                .lock()
                .expect("lock")
                .push((priority, host_pattern.to_string()));
            Ok(RuleHandle {
                id: format!("rule/{priority}"),
            })
        }
    }

    fn test_config() -> SelfRegistrationConfig {
        SelfRegistrationConfig {
            identity: "sess-42".to_string(),
            domain_suffix: "preview.example.com".to_string(),
            listener: "listener/shared".to_string(),
            port: 3000,
            health_check_path: "/health".to_string(),
            priority_floor: RULE_PRIORITY_FLOOR,
            max_probe_attempts: DEFAULT_MAX_PROBE_ATTEMPTS,
        }
    }

    fn test_store(dir: &tempfile::TempDir) -> Mutex<SessionStateStore> {
        Mutex::new(
            SessionStateStore::load(dir.path().join("state.json"), "sess-42").expect("load store"),
        )
    }

    #[tokio::test]
    async fn functional_registration_claims_first_free_priority() {
        let dir = tempfile::tempdir().expect("tempdir");
        let plane = MockPlane::with_occupied(&[100, 101, 102]);
        let store = test_store(&dir);

        let hostname = register_instance(&plane, Some(&test_config()), &store).await;
        assert_eq!(hostname.as_deref(), Some("sess-42.preview.example.com"));

        let rules = plane.created_rules.lock().expect("lock").clone();
        assert_eq!(
            rules,
            vec![(103, "sess-42.preview.example.com".to_string())]
        );

        let store = store.lock().expect("lock");
        assert_eq!(store.record().status, SessionStatus::Running);
        assert_eq!(
            store.record().network_identity.as_deref(),
            Some("sess-42.preview.example.com")
        );
    }

    #[tokio::test]
    async fn functional_registration_reprobes_after_priority_race() {
        let dir = tempfile::tempdir().expect("tempdir");
        let plane = MockPlane::with_occupied(&[100]);
        plane.rule_races_remaining.store(1, Ordering::SeqCst);
        let store = test_store(&dir);

        let hostname = register_instance(&plane, Some(&test_config()), &store).await;
        assert!(hostname.is_some());

        let rules = plane.created_rules.lock().expect("lock").clone();
        assert_eq!(rules.len(), 1);
        // 101 was lost to the race, so the refreshed probe lands on 102.
        assert_eq!(rules[0].0, 102);
    }

    #[tokio::test]
    async fn regression_registration_gives_up_after_bounded_probes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let plane = MockPlane::default();
        plane.rule_races_remaining.store(usize::MAX, Ordering::SeqCst);
        let store = test_store(&dir);

        let mut config = test_config();
        config.max_probe_attempts = 3;
        let hostname = register_instance(&plane, Some(&config), &store).await;
        assert!(hostname.is_none());

        let store = store.lock().expect("lock");
        assert_eq!(store.record().status, SessionStatus::Starting);
        assert!(store.record().network_identity.is_none());
    }

    #[tokio::test]
    async fn unit_registration_skips_when_config_is_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let plane = MockPlane::default();
        let store = test_store(&dir);

        let hostname = register_instance(&plane, None, &store).await;
        assert!(hostname.is_none());
        assert!(plane.created_rules.lock().expect("lock").is_empty());
        assert_eq!(
            store.lock().expect("lock").record().status,
            SessionStatus::Starting
        );
    }

    #[tokio::test]
    async fn regression_target_creation_failure_is_nonfatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let plane = MockPlane {
            fail_target_creation: true,
            ..MockPlane::default()
        };
        let store = test_store(&dir);

        let hostname = register_instance(&plane, Some(&test_config()), &store).await;
        assert!(hostname.is_none());
        assert_eq!(
            store.lock().expect("lock").record().status,
            SessionStatus::Starting
        );
    }

    #[test]
    fn unit_next_free_priority_probes_upward_from_floor() {
        let occupied: HashSet<i64> = [100, 101, 103].into_iter().collect();
        assert_eq!(next_free_priority(100, &occupied), 102);
        assert_eq!(next_free_priority(200, &occupied), 200);
    }
}
