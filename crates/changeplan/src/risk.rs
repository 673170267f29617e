//! Risk assessment for individual changes

use crate::change::{Change, ChangeAction, RiskLevel};
use crate::graph::DependencyGraph;
use crate::policy::PlanPolicy;

/// Classifies changes according to a planning policy
pub struct RiskAssessor<'a> {
    policy: &'a PlanPolicy,
}

impl<'a> RiskAssessor<'a> {
    pub fn new(policy: &'a PlanPolicy) -> Self {
        Self { policy }
    }

    /// Risk of `change` given where it sits in `graph`.
    ///
    /// - delete: high
    /// - update: medium, high when other changes wait on it or a disruptive
    ///   property changes
    /// - create: low, medium at the dependency threshold or for a high-risk
    ///   resource type
    pub fn assess(&self, change: &Change, graph: &DependencyGraph) -> RiskLevel {
        match change.action {
            ChangeAction::Delete => RiskLevel::High,
            ChangeAction::Update => {
                if graph.has_dependents(change.id()) || self.touches_disruptive_field(change) {
                    RiskLevel::High
                } else {
                    RiskLevel::Medium
                }
            }
            ChangeAction::Create => {
                if change.dependencies.len() >= self.policy.create_dependency_threshold
                    || self.policy.high_risk_types.contains(&change.resource_type)
                {
                    RiskLevel::Medium
                } else {
                    RiskLevel::Low
                }
            }
        }
    }

    fn touches_disruptive_field(&self, change: &Change) -> bool {
        let (Some(current), Some(desired)) = (&change.current_config, &change.desired_config)
        else {
            return false;
        };
        current
            .changed_properties(desired)
            .iter()
            .any(|key| self.policy.disruptive_fields.contains(*key))
    }
}
