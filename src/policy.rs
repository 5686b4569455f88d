//! Per-resource-type refresh policy.
//!
//! Decides, for each resource type, whether a stale hit may be served while a
//! background refresh runs (queueable) or must be refreshed in the request path,
//! which queue lane its refresh jobs go to, and how long a fresh entry lives.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default entry lifetime: one day.
pub const DEFAULT_TTL: Duration = Duration::from_secs(86_400);

/// Refresh queue lane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Low,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// Static policy for one resource type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcePolicy {
    /// Stale hits may be served while a background refresh is enqueued.
    pub queueable: bool,
    /// Lane for background refresh jobs.
    pub priority: Priority,
    /// Entry lifetime in seconds; `None` uses the table default.
    pub ttl_secs: Option<u64>,
}

impl Default for ResourcePolicy {
    fn default() -> Self {
        ResourcePolicy {
            queueable: true,
            priority: Priority::Low,
            ttl_secs: None,
        }
    }
}

impl ResourcePolicy {
    pub fn queueable(priority: Priority) -> Self {
        ResourcePolicy {
            queueable: true,
            priority,
            ttl_secs: None,
        }
    }

    /// Always refreshed synchronously in the request path.
    pub fn synchronous() -> Self {
        ResourcePolicy {
            queueable: false,
            ..ResourcePolicy::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_secs = Some(ttl.as_secs());
        self
    }
}

/// Resource types backed by user-profile or session-bound data.
const SYNCHRONOUS_TYPES: &[&str] = &[
    "user",
    "user_profile",
    "user_animelist",
    "user_mangalist",
    "user_history",
    "user_friends",
];

/// Primary entity types whose refreshes jump the queue.
const HIGH_PRIORITY_TYPES: &[&str] = &["anime", "manga", "character", "person"];

/// Lookup table from resource type to policy.
#[derive(Clone, Debug)]
pub struct PolicyTable {
    policies: HashMap<String, ResourcePolicy>,
    fallback: ResourcePolicy,
    default_ttl: Duration,
    force_synchronous: bool,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl PolicyTable {
    /// Empty table: every type is queueable, low priority, default TTL.
    pub fn new() -> Self {
        PolicyTable {
            policies: HashMap::new(),
            fallback: ResourcePolicy::default(),
            default_ttl: DEFAULT_TTL,
            force_synchronous: false,
        }
    }

    /// Table with the built-in classification of user and primary entity types.
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        for resource_type in SYNCHRONOUS_TYPES {
            table.insert(*resource_type, ResourcePolicy::synchronous());
        }
        for resource_type in HIGH_PRIORITY_TYPES {
            table.insert(*resource_type, ResourcePolicy::queueable(Priority::High));
        }
        table
    }

    pub fn insert(&mut self, resource_type: impl Into<String>, policy: ResourcePolicy) {
        self.policies.insert(resource_type.into(), policy);
    }

    pub fn with_policy(mut self, resource_type: impl Into<String>, policy: ResourcePolicy) -> Self {
        self.insert(resource_type, policy);
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Force every resource type into synchronous refresh.
    pub fn with_force_synchronous(mut self, force: bool) -> Self {
        self.force_synchronous = force;
        self
    }

    pub fn policy(&self, resource_type: &str) -> &ResourcePolicy {
        self.policies.get(resource_type).unwrap_or(&self.fallback)
    }

    pub fn is_queueable(&self, resource_type: &str) -> bool {
        !self.force_synchronous && self.policy(resource_type).queueable
    }

    pub fn priority(&self, resource_type: &str) -> Priority {
        self.policy(resource_type).priority
    }

    pub fn ttl(&self, resource_type: &str) -> Duration {
        self.policy(resource_type)
            .ttl_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_classification() {
        let table = PolicyTable::with_defaults();

        assert!(!table.is_queueable("user_profile"));
        assert!(table.is_queueable("anime"));
        assert_eq!(table.priority("anime"), Priority::High);
        assert_eq!(table.priority("schedules"), Priority::Low);
        assert_eq!(table.ttl("anime"), DEFAULT_TTL);
    }

    #[test]
    fn test_force_synchronous_overrides_every_type() {
        let table = PolicyTable::with_defaults().with_force_synchronous(true);
        assert!(!table.is_queueable("anime"));
        assert!(!table.is_queueable("unknown"));
    }

    #[test]
    fn test_per_type_ttl() {
        let table = PolicyTable::new()
            .with_default_ttl(Duration::from_secs(600))
            .with_policy(
                "schedules",
                ResourcePolicy::queueable(Priority::Low).with_ttl(Duration::from_secs(3600)),
            );

        assert_eq!(table.ttl("schedules"), Duration::from_secs(3600));
        assert_eq!(table.ttl("other"), Duration::from_secs(600));
    }

    #[test]
    fn test_policy_deserializes_with_defaults() {
        let policy: ResourcePolicy =
            serde_json::from_str(r#"{"priority":"high"}"#).expect("valid policy");
        assert!(policy.queueable);
        assert_eq!(policy.priority, Priority::High);
        assert_eq!(policy.ttl_secs, None);
    }
}
