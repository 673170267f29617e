//! Change plan engine
//!
//! Orchestrates diffing, dependency analysis, risk assessment and validation.
//! Plan generation either returns a complete, valid plan or an error; there
//! are no partial plans.

use crate::change::{Change, ChangeAction, ChangePlan, RiskLevel};
use crate::diff::compute_changes;
use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::policy::PlanPolicy;
use crate::risk::RiskAssessor;
use crate::types::{DesiredState, InfrastructureState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Price lookup for a single change.
///
/// Returns `None` when no estimate is available.
pub trait CostEstimator {
    fn estimate(&self, change: &Change) -> Option<f64>;
}

/// Per-change estimates and their total
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostEstimate {
    pub per_change: BTreeMap<String, f64>,
    pub total: f64,
}

/// Non-fatal findings of plan validation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Planning capability
pub trait ChangePlanEngine {
    /// Diff `current` against `desired` into an ordered, risk-annotated plan.
    fn generate_plan(
        &self,
        project_id: &str,
        current: Option<&InfrastructureState>,
        desired: &DesiredState,
        now: DateTime<Utc>,
    ) -> Result<ChangePlan>;

    /// Infer the dependency graph of a set of changes.
    fn analyze_dependencies(&self, changes: &[Change]) -> Result<DependencyGraph>;

    /// Check a plan against the state it will be applied to.
    fn validate_plan(
        &self,
        plan: &ChangePlan,
        current: Option<&InfrastructureState>,
    ) -> Result<ValidationReport>;

    /// Estimate what a plan costs using an external price lookup.
    fn estimate_cost(&self, plan: &ChangePlan, estimator: &dyn CostEstimator) -> CostEstimate;
}

/// Policy-driven engine
#[derive(Debug, Clone, Default)]
pub struct DefaultChangePlanEngine {
    policy: PlanPolicy,
}

impl DefaultChangePlanEngine {
    pub fn new(policy: PlanPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PlanPolicy {
        &self.policy
    }
}

impl ChangePlanEngine for DefaultChangePlanEngine {
    fn generate_plan(
        &self,
        project_id: &str,
        current: Option<&InfrastructureState>,
        desired: &DesiredState,
        now: DateTime<Utc>,
    ) -> Result<ChangePlan> {
        if let Some(state) = current
            && state.project_id() != project_id
        {
            return Err(Error::validation(
                format!(
                    "current state belongs to project {}, not {project_id}",
                    state.project_id()
                ),
                Vec::new(),
            ));
        }

        let mut changes = compute_changes(current, desired)?;
        let graph = self.analyze_dependencies(&changes)?;
        let order = graph.topological_order()?;

        let assessor = RiskAssessor::new(&self.policy);
        for change in &mut changes {
            change.dependencies = graph.dependencies_of(change.id());
        }
        for change in &mut changes {
            change.risk_level = assessor.assess(change, &graph);
        }

        let mut by_id: BTreeMap<String, Change> = changes
            .into_iter()
            .map(|c| (c.resource_id.clone(), c))
            .collect();
        let ordered: Vec<Change> = order.iter().filter_map(|id| by_id.remove(id)).collect();

        let base_version = current.map_or(0, InfrastructureState::version);
        let deadline = match self.policy.approval_timeout() {
            Some(timeout) => Some(now.checked_add_signed(timeout).ok_or_else(|| {
                Error::validation(
                    format!(
                        "approval timeout of {} minutes puts the deadline out of range",
                        self.policy.approval_timeout_minutes
                    ),
                    Vec::new(),
                )
            })?),
            None => None,
        };
        let plan = ChangePlan::new(project_id, base_version, ordered, now, deadline);

        let report = self.validate_plan(&plan, current)?;
        for warning in &report.warnings {
            log::warn!("Plan {}: {warning}", plan.id());
        }

        let summary = plan.summary();
        log::info!(
            "Generated plan {} for {project_id}: {} create, {} update, {} delete, overall risk {}",
            plan.id(),
            summary.creates,
            summary.updates,
            summary.deletes,
            summary.overall_risk
        );
        Ok(plan)
    }

    fn analyze_dependencies(&self, changes: &[Change]) -> Result<DependencyGraph> {
        DependencyGraph::analyze(changes, &self.policy)
    }

    fn validate_plan(
        &self,
        plan: &ChangePlan,
        current: Option<&InfrastructureState>,
    ) -> Result<ValidationReport> {
        let changes = plan.changes();

        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let duplicates: Vec<String> = changes
            .iter()
            .filter(|c| !seen.insert(c.id()))
            .map(|c| c.id().to_string())
            .collect();
        fail_if_any(duplicates, "more than one change targets the same resource")?;

        let inconsistent = offending(changes, |c| !c.is_consistent());
        fail_if_any(inconsistent, "change configuration does not match its action")?;

        let exists = |id: &str| current.is_some_and(|state| state.resource(id).is_some());
        let missing = offending(changes, |c| {
            c.action != ChangeAction::Create && !exists(c.id())
        });
        fail_if_any(missing, "update or delete targets a resource absent from the current state")?;

        let already_present = offending(changes, |c| c.action == ChangeAction::Create && exists(c.id()));
        fail_if_any(already_present, "create targets a resource that already exists")?;

        let dangling = offending(changes, |c| {
            c.dependencies
                .iter()
                .any(|dep| dep == c.id() || !seen.contains(dep.as_str()))
        });
        fail_if_any(dangling, "dependency does not name another change in the plan")?;

        let mut graph = DependencyGraph::new();
        for change in changes {
            graph.add_node(change.id());
            for dep in &change.dependencies {
                graph.add_edge(dep, change.id());
            }
        }
        graph.topological_order()?;

        let mut done: BTreeSet<&str> = BTreeSet::new();
        let out_of_order = offending(changes, |c| {
            let ready = c.dependencies.iter().all(|dep| done.contains(dep.as_str()));
            done.insert(c.id());
            !ready
        });
        fail_if_any(out_of_order, "change is ordered before one of its dependencies")?;

        let mut report = ValidationReport::default();
        if changes.is_empty() {
            report.warnings.push("plan contains no changes".to_string());
        }
        let high = changes
            .iter()
            .filter(|c| c.risk_level == RiskLevel::High)
            .count();
        if high > 0 {
            report
                .warnings
                .push(format!("plan contains {high} high-risk change(s)"));
        }
        for change in changes {
            if change.action == ChangeAction::Delete
                && self.policy.high_risk_types.contains(&change.resource_type)
            {
                report.warnings.push(format!(
                    "deleting {} of high-risk type {}",
                    change.id(),
                    change.resource_type
                ));
            }
        }
        Ok(report)
    }

    fn estimate_cost(&self, plan: &ChangePlan, estimator: &dyn CostEstimator) -> CostEstimate {
        let per_change: BTreeMap<String, f64> = plan
            .changes()
            .iter()
            .filter_map(|c| estimator.estimate(c).map(|cost| (c.id().to_string(), cost)))
            .collect();
        let total = per_change.values().sum();
        CostEstimate { per_change, total }
    }
}

fn offending<'a>(changes: &'a [Change], mut pred: impl FnMut(&'a Change) -> bool) -> Vec<String> {
    changes
        .iter()
        .filter(|c| pred(*c))
        .map(|c| c.id().to_string())
        .collect()
}

fn fail_if_any(change_ids: Vec<String>, message: &str) -> Result<()> {
    if change_ids.is_empty() {
        return Ok(());
    }
    log::warn!("Validation failed: {message}: {}", change_ids.join(", "));
    Err(Error::validation(message, change_ids))
}
