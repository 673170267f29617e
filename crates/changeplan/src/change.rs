//! Changes and change plans

use crate::types::ResourceConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// What a change does to its resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// Risk classification, ordered from least to most risky
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(s)
    }
}

/// A single create, update or delete of one resource.
///
/// The change identifier is the resource key; a plan holds at most one change
/// per key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    pub action: ChangeAction,
    pub resource_type: String,
    pub resource_id: String,
    pub current_config: Option<ResourceConfig>,
    pub desired_config: Option<ResourceConfig>,
    /// Identifiers of changes that must complete first
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    #[serde(default)]
    pub risk_level: RiskLevel,
}

impl Change {
    /// Create a resource that does not exist yet.
    pub fn create(desired: ResourceConfig) -> Self {
        Self {
            action: ChangeAction::Create,
            resource_type: desired.resource_type.clone(),
            resource_id: desired.id.clone(),
            current_config: None,
            desired_config: Some(desired),
            dependencies: BTreeSet::new(),
            risk_level: RiskLevel::Low,
        }
    }

    /// Reconfigure an existing resource.
    pub fn update(current: ResourceConfig, desired: ResourceConfig) -> Self {
        Self {
            action: ChangeAction::Update,
            resource_type: desired.resource_type.clone(),
            resource_id: desired.id.clone(),
            current_config: Some(current),
            desired_config: Some(desired),
            dependencies: BTreeSet::new(),
            risk_level: RiskLevel::Low,
        }
    }

    /// Remove an existing resource.
    pub fn delete(current: ResourceConfig) -> Self {
        Self {
            action: ChangeAction::Delete,
            resource_type: current.resource_type.clone(),
            resource_id: current.id.clone(),
            current_config: Some(current),
            desired_config: None,
            dependencies: BTreeSet::new(),
            risk_level: RiskLevel::Low,
        }
    }

    /// Change identifier
    pub fn id(&self) -> &str {
        &self.resource_id
    }

    /// Whether the configs present match what the action requires.
    pub fn is_consistent(&self) -> bool {
        match self.action {
            ChangeAction::Create => self.current_config.is_none() && self.desired_config.is_some(),
            ChangeAction::Update => self.current_config.is_some() && self.desired_config.is_some(),
            ChangeAction::Delete => self.current_config.is_some() && self.desired_config.is_none(),
        }
    }

    /// The configuration this change produces, or removes for a delete.
    pub fn effective_config(&self) -> Option<&ResourceConfig> {
        self.desired_config.as_ref().or(self.current_config.as_ref())
    }
}

/// Counts and overall risk of a plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSummary {
    pub total: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub high_risk: usize,
    pub overall_risk: RiskLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,
}

impl ChangeSummary {
    /// Create a summary from a list of changes
    pub fn from_changes(changes: &[Change]) -> Self {
        let mut summary = Self::default();
        for change in changes {
            match change.action {
                ChangeAction::Create => summary.creates += 1,
                ChangeAction::Update => summary.updates += 1,
                ChangeAction::Delete => summary.deletes += 1,
            }
            if change.risk_level == RiskLevel::High {
                summary.high_risk += 1;
            }
            summary.overall_risk = summary.overall_risk.max(change.risk_level);
        }
        summary.total = changes.len();
        summary
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.total > 0
    }
}

/// Approval status of a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Pending,
    Approved,
    Rejected,
    Executed,
    Expired,
}

impl PlanStatus {
    /// Rejected, Expired and Executed plans never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Expired | Self::Executed)
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Executed => "executed",
            Self::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// A dependency-ordered, risk-annotated set of changes awaiting approval.
///
/// Only `status` moves after creation, and only through the approval workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePlan {
    id: String,
    project_id: String,
    base_version: u64,
    changes: Vec<Change>,
    summary: ChangeSummary,
    status: PlanStatus,
    created_at: DateTime<Utc>,
    approval_deadline: Option<DateTime<Utc>>,
}

impl ChangePlan {
    /// Assemble a pending plan from ordered changes.
    pub(crate) fn new(
        project_id: &str,
        base_version: u64,
        changes: Vec<Change>,
        created_at: DateTime<Utc>,
        approval_deadline: Option<DateTime<Utc>>,
    ) -> Self {
        let id = plan_id(project_id, base_version, &changes, created_at);
        let summary = ChangeSummary::from_changes(&changes);
        Self {
            id,
            project_id: project_id.to_string(),
            base_version,
            changes,
            summary,
            status: PlanStatus::Pending,
            created_at,
            approval_deadline,
        }
    }

    /// Attach the total estimated cost to the summary.
    #[must_use]
    pub fn with_estimated_cost(mut self, total: f64) -> Self {
        self.summary.estimated_cost = Some(total);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// State version this plan was diffed against (0 when none existed)
    pub fn base_version(&self) -> u64 {
        self.base_version
    }

    /// Changes in execution order
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn summary(&self) -> &ChangeSummary {
        &self.summary
    }

    pub fn status(&self) -> PlanStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn approval_deadline(&self) -> Option<DateTime<Utc>> {
        self.approval_deadline
    }

    /// Whether a pending plan has passed its deadline at `now`.
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.approval_deadline.is_some_and(|deadline| now >= deadline)
    }

    pub(crate) fn set_status(&mut self, status: PlanStatus) {
        self.status = status;
    }
}

/// Content-derived identifier, stable for identical inputs.
fn plan_id(project_id: &str, base_version: u64, changes: &[Change], at: DateTime<Utc>) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(project_id.as_bytes());
    hasher.update(&base_version.to_le_bytes());
    hasher.update(at.to_rfc3339().as_bytes());
    for change in changes {
        hasher.update(change.action.to_string().as_bytes());
        hasher.update(change.id().as_bytes());
        if let Ok(bytes) = serde_json::to_vec(&change.desired_config) {
            hasher.update(&bytes);
        }
    }
    let hex = hasher.finalize().to_hex();
    format!("plan-{}", &hex.as_str()[..16])
}
