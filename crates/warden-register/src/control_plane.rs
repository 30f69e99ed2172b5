//! Seam for the routing control plane.

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetHandle {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleHandle {
    pub id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ControlPlaneError {
    /// Another instance claimed the priority between listing and creation.
    /// The caller re-probes; this is not fatal.
    #[error("rule priority {0} is already in use")]
    PriorityInUse(i64),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The three control-plane calls self-registration depends on.
/// `create_or_get_target` is idempotent: an "already exists" response from
/// the provider must be mapped to success by the implementation.
#[async_trait]
pub trait RoutingControlPlane: Send + Sync {
    async fn create_or_get_target(
        &self,
        name: &str,
        port: u16,
        health_check_path: &str,
    ) -> Result<TargetHandle, ControlPlaneError>;

    async fn list_rule_priorities(&self, listener: &str) -> Result<Vec<i64>, ControlPlaneError>;

    async fn create_rule(
        &self,
        listener: &str,
        priority: i64,
        host_pattern: &str,
        target: &TargetHandle,
    ) -> Result<RuleHandle, ControlPlaneError>;
}
