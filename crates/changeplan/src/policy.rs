//! Planning policy
//!
//! Which fields are disruptive, how references are found and which resource
//! types depend on which are deployment decisions, so none of them has a
//! built-in default set.

use crate::approval::{ApprovalConfig, AutoApprovalRule};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Default number of dependencies at which a create becomes medium risk
pub const DEFAULT_CREATE_DEPENDENCY_THRESHOLD: usize = 3;

/// Default approval window in minutes
pub const DEFAULT_APPROVAL_TIMEOUT_MINUTES: u64 = 60;

/// Policy data consumed by dependency inference, risk assessment and approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlanPolicy {
    /// Property keys whose modification escalates an update to high risk
    pub disruptive_fields: BTreeSet<String>,
    /// Property keys scanned for references; empty scans every property
    pub reference_fields: BTreeSet<String>,
    /// Resource type -> resource types it must be created after
    pub type_dependencies: BTreeMap<String, BTreeSet<String>>,
    pub create_dependency_threshold: usize,
    /// Resource types whose creation is at least medium risk
    pub high_risk_types: BTreeSet<String>,
    /// Minutes a pending plan waits for a decision; 0 disables the deadline
    pub approval_timeout_minutes: u64,
    pub auto_approval: Vec<AutoApprovalRule>,
    /// Resource type -> estimated monthly price
    pub prices: BTreeMap<String, f64>,
}

impl Default for PlanPolicy {
    fn default() -> Self {
        Self {
            disruptive_fields: BTreeSet::new(),
            reference_fields: BTreeSet::new(),
            type_dependencies: BTreeMap::new(),
            create_dependency_threshold: DEFAULT_CREATE_DEPENDENCY_THRESHOLD,
            high_risk_types: BTreeSet::new(),
            approval_timeout_minutes: DEFAULT_APPROVAL_TIMEOUT_MINUTES,
            auto_approval: Vec::new(),
            prices: BTreeMap::new(),
        }
    }
}

impl PlanPolicy {
    /// Whether `key` is scanned for references to other resources.
    pub fn is_reference_field(&self, key: &str) -> bool {
        self.reference_fields.is_empty() || self.reference_fields.contains(key)
    }

    /// Whether `dependent` is declared to depend on `dependency` by type.
    pub fn type_depends_on(&self, dependent: &str, dependency: &str) -> bool {
        self.type_dependencies
            .get(dependent)
            .is_some_and(|deps| deps.contains(dependency))
    }

    /// How long a new plan waits for a decision, if bounded.
    pub fn approval_timeout(&self) -> Option<chrono::Duration> {
        (self.approval_timeout_minutes > 0).then(|| {
            let minutes = i64::try_from(self.approval_timeout_minutes)
                .unwrap_or(i64::MAX)
                .min(i64::MAX / 60_000);
            chrono::Duration::minutes(minutes)
        })
    }

    /// Approval settings carried by this policy.
    pub fn approval_config(&self) -> ApprovalConfig {
        ApprovalConfig {
            auto_approval: self.auto_approval.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::RiskLevel;

    #[test]
    fn test_defaults_assume_no_field_sets() {
        let policy = PlanPolicy::default();
        assert!(policy.disruptive_fields.is_empty());
        assert!(policy.type_dependencies.is_empty());
        assert_eq!(policy.create_dependency_threshold, 3);
        assert!(policy.is_reference_field("anything"));
    }

    #[test]
    fn test_reference_field_restriction() {
        let policy = PlanPolicy {
            reference_fields: ["vpc_id".to_string()].into(),
            ..Default::default()
        };
        assert!(policy.is_reference_field("vpc_id"));
        assert!(!policy.is_reference_field("name"));
    }

    #[test]
    fn test_type_dependencies() {
        let policy = PlanPolicy {
            type_dependencies: [("instance".to_string(), ["network".to_string()].into())].into(),
            ..Default::default()
        };
        assert!(policy.type_depends_on("instance", "network"));
        assert!(!policy.type_depends_on("network", "instance"));
    }

    #[test]
    fn test_approval_config_from_policy() {
        let policy = PlanPolicy {
            auto_approval: vec![AutoApprovalRule {
                name: "small".into(),
                max_risk: RiskLevel::Low,
                resource_types: BTreeSet::new(),
            }],
            ..Default::default()
        };
        assert_eq!(policy.approval_config().auto_approval.len(), 1);
        assert_eq!(policy.approval_timeout(), Some(chrono::Duration::minutes(60)));

        let no_deadline = PlanPolicy {
            approval_timeout_minutes: 0,
            ..Default::default()
        };
        assert!(no_deadline.approval_timeout().is_none());
    }
}
