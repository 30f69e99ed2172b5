//! Best-effort self-registration against a shared routing layer.
//!
//! A freshly started instance claims `{identity}.{domain_suffix}` on the
//! shared load balancer by creating a target, probing for a free rule
//! priority, and creating a host rule. Every step degrades to log-and-skip;
//! the agent works without a public route.

pub mod control_plane;
pub mod registration;

pub use control_plane::{ControlPlaneError, RoutingControlPlane, RuleHandle, TargetHandle};
pub use registration::{
    register_instance, SelfRegistrationConfig, DEFAULT_MAX_PROBE_ATTEMPTS, RULE_PRIORITY_FLOOR,
};
