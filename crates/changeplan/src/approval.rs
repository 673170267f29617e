//! Approval workflow
//!
//! A plan moves Pending -> Approved | Rejected | Expired, and Approved ->
//! Executed. Terminal statuses never change again. Every transition is
//! appended to an audit trail.
//!
//! An approved plan is claimed for the duration of a run, so it executes at
//! most once at a time. A run that halts partway is recorded against the plan
//! and the plan is never executed again; the remainder goes in a new plan.

use crate::change::{ChangePlan, PlanStatus, RiskLevel};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Actor recorded for transitions the workflow makes on its own
pub const SYSTEM_ACTOR: &str = "system";

/// Approves matching plans on submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutoApprovalRule {
    pub name: String,
    /// Every change must be at or below this risk
    pub max_risk: RiskLevel,
    /// Allowed resource types; empty allows any
    #[serde(default)]
    pub resource_types: BTreeSet<String>,
}

impl AutoApprovalRule {
    pub fn matches(&self, plan: &ChangePlan) -> bool {
        plan.changes().iter().all(|change| {
            change.risk_level <= self.max_risk
                && (self.resource_types.is_empty()
                    || self.resource_types.contains(&change.resource_type))
        })
    }
}

/// Workflow settings
#[derive(Debug, Clone, Default)]
pub struct ApprovalConfig {
    pub auto_approval: Vec<AutoApprovalRule>,
}

/// One recorded status transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalEvent {
    pub plan_id: String,
    /// `None` for the submission itself
    pub from: Option<PlanStatus>,
    pub to: PlanStatus,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// Where a run stopped before its state could be committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HaltedRun {
    /// Changes applied on the remote endpoint
    pub completed: Vec<String>,
    /// The change that failed; `None` when every change applied but the
    /// commit did not
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<String>,
    pub skipped: Vec<String>,
    pub error: String,
    pub at: DateTime<Utc>,
}

impl HaltedRun {
    fn describe(&self) -> String {
        match &self.failed {
            Some(failed) => format!(
                "execution halted at {failed}: {} completed, {} skipped",
                self.completed.len(),
                self.skipped.len()
            ),
            None => format!(
                "execution applied {} change(s) but did not commit: {}",
                self.completed.len(),
                self.error
            ),
        }
    }
}

/// Plans under workflow control and their transition history.
///
/// This is the persisted form of the workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalBook {
    #[serde(default)]
    pub plans: BTreeMap<String, ChangePlan>,
    #[serde(default)]
    pub events: Vec<ApprovalEvent>,
    /// Plans whose execution stopped partway
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub halted: BTreeMap<String, HaltedRun>,
    /// Plans currently claimed by a run in this process
    #[serde(skip)]
    running: BTreeSet<String>,
}

impl ApprovalBook {
    fn transition(
        &mut self,
        plan_id: &str,
        to: PlanStatus,
        actor: &str,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let plan = self
            .plans
            .get_mut(plan_id)
            .ok_or_else(|| Error::PlanNotFound {
                plan_id: plan_id.to_string(),
            })?;
        let from = plan.status();
        plan.set_status(to);
        log::info!("Plan {plan_id}: {from} -> {to} by {actor}");
        self.events.push(ApprovalEvent {
            plan_id: plan_id.to_string(),
            from: Some(from),
            to,
            actor: actor.to_string(),
            reason,
            at,
        });
        Ok(())
    }

    fn plan(&self, plan_id: &str) -> Result<&ChangePlan> {
        self.plans.get(plan_id).ok_or_else(|| Error::PlanNotFound {
            plan_id: plan_id.to_string(),
        })
    }
}

/// Gatekeeper between plan generation and execution.
///
/// Internally synchronised; share it by reference or `Arc` between threads.
pub struct ApprovalWorkflow {
    config: ApprovalConfig,
    book: Mutex<ApprovalBook>,
}

impl ApprovalWorkflow {
    /// Create an empty workflow
    pub fn new(config: ApprovalConfig) -> Self {
        Self::with_book(config, ApprovalBook::default())
    }

    /// Resume from a persisted book
    pub fn with_book(config: ApprovalConfig, book: ApprovalBook) -> Self {
        Self {
            config,
            book: Mutex::new(book),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ApprovalBook> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Place a freshly generated plan under workflow control.
    ///
    /// Returns the plan's status afterwards, which is `Approved` when an
    /// auto-approval rule matched.
    pub fn submit(&self, plan: ChangePlan, now: DateTime<Utc>) -> Result<PlanStatus> {
        if plan.status() != PlanStatus::Pending {
            return Err(Error::InvalidTransition {
                plan_id: plan.id().to_string(),
                from: plan.status(),
                action: "submit",
            });
        }
        let mut book = self.lock();
        if book.plans.contains_key(plan.id()) {
            return Err(Error::validation(
                format!("plan {} was already submitted", plan.id()),
                Vec::new(),
            ));
        }

        let plan_id = plan.id().to_string();
        let rule = self
            .config
            .auto_approval
            .iter()
            .find(|rule| rule.matches(&plan))
            .map(|rule| rule.name.clone());
        book.plans.insert(plan_id.clone(), plan);
        book.events.push(ApprovalEvent {
            plan_id: plan_id.clone(),
            from: None,
            to: PlanStatus::Pending,
            actor: SYSTEM_ACTOR.to_string(),
            reason: None,
            at: now,
        });

        if let Some(rule) = rule {
            book.transition(
                &plan_id,
                PlanStatus::Approved,
                SYSTEM_ACTOR,
                Some(format!("auto-approval rule '{rule}'")),
                now,
            )?;
            return Ok(PlanStatus::Approved);
        }
        Ok(PlanStatus::Pending)
    }

    /// Approve a pending plan.
    pub fn approve(&self, plan_id: &str, approver: &str, now: DateTime<Utc>) -> Result<()> {
        let mut book = self.lock();
        Self::decide(&mut book, plan_id, "approve", now)?;
        book.transition(plan_id, PlanStatus::Approved, approver, None, now)
    }

    /// Reject a pending plan.
    pub fn reject(
        &self,
        plan_id: &str,
        approver: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut book = self.lock();
        Self::decide(&mut book, plan_id, "reject", now)?;
        book.transition(
            plan_id,
            PlanStatus::Rejected,
            approver,
            Some(reason.to_string()),
            now,
        )
    }

    /// Check that a decision may be made, expiring the plan if its deadline
    /// has passed.
    fn decide(
        book: &mut ApprovalBook,
        plan_id: &str,
        action: &'static str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let plan = book.plan(plan_id)?;
        if plan.status() == PlanStatus::Pending && plan.is_past_deadline(now) {
            Self::expire(book, plan_id, now)?;
        }
        let status = book.plan(plan_id)?.status();
        if status == PlanStatus::Pending {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                plan_id: plan_id.to_string(),
                from: status,
                action,
            })
        }
    }

    fn expire(book: &mut ApprovalBook, plan_id: &str, now: DateTime<Utc>) -> Result<()> {
        book.transition(
            plan_id,
            PlanStatus::Expired,
            SYSTEM_ACTOR,
            Some("approval deadline passed".to_string()),
            now,
        )
    }

    /// Expire every pending plan whose deadline has passed at `now`.
    ///
    /// Returns the ids of the plans expired by this sweep.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut book = self.lock();
        let due: Vec<String> = book
            .plans
            .values()
            .filter(|plan| plan.status() == PlanStatus::Pending && plan.is_past_deadline(now))
            .map(|plan| plan.id().to_string())
            .collect();
        let mut expired = Vec::with_capacity(due.len());
        for plan_id in due {
            if Self::expire(&mut book, &plan_id, now).is_ok() {
                expired.push(plan_id);
            }
        }
        if !expired.is_empty() {
            log::info!("Expired {} pending plan(s)", expired.len());
        }
        expired
    }

    /// Claim an approved plan for execution.
    ///
    /// Fails if the plan is not approved, is already running, or halted on
    /// an earlier run. The claim ends with `mark_executed`, `record_halt` or
    /// `release`.
    pub fn begin_execution(&self, plan_id: &str) -> Result<ChangePlan> {
        let mut book = self.lock();
        let plan = book.plan(plan_id)?;
        if plan.status() != PlanStatus::Approved {
            return Err(Error::InvalidTransition {
                plan_id: plan_id.to_string(),
                from: plan.status(),
                action: "execute",
            });
        }
        if let Some(run) = book.halted.get(plan_id) {
            return Err(Error::ExecutionBlocked {
                plan_id: plan_id.to_string(),
                reason: run.describe(),
            });
        }
        let plan = plan.clone();
        if !book.running.insert(plan_id.to_string()) {
            return Err(Error::ExecutionBlocked {
                plan_id: plan_id.to_string(),
                reason: "it is already executing".to_string(),
            });
        }
        Ok(plan)
    }

    /// Drop a claim whose run made no remote changes.
    pub fn release(&self, plan_id: &str) {
        self.lock().running.remove(plan_id);
    }

    /// Record a run that stopped partway and drop its claim.
    pub fn record_halt(&self, plan_id: &str, run: HaltedRun) -> Result<()> {
        let mut book = self.lock();
        book.running.remove(plan_id);
        let status = book.plan(plan_id)?.status();
        let reason = run.describe();
        log::warn!("Plan {plan_id}: {reason}");
        book.events.push(ApprovalEvent {
            plan_id: plan_id.to_string(),
            from: Some(status),
            to: status,
            actor: SYSTEM_ACTOR.to_string(),
            reason: Some(reason),
            at: run.at,
        });
        book.halted.insert(plan_id.to_string(), run);
        Ok(())
    }

    /// The recorded halt of a plan, if its execution stopped partway
    pub fn halted_run(&self, plan_id: &str) -> Option<HaltedRun> {
        self.lock().halted.get(plan_id).cloned()
    }

    /// Approved plans that may still be executed, oldest first
    pub fn executable(&self) -> Vec<ChangePlan> {
        let book = self.lock();
        let mut plans: Vec<ChangePlan> = book
            .plans
            .values()
            .filter(|plan| {
                plan.status() == PlanStatus::Approved
                    && !book.halted.contains_key(plan.id())
                    && !book.running.contains(plan.id())
            })
            .cloned()
            .collect();
        plans.sort_by(|a, b| a.created_at().cmp(&b.created_at()).then(a.id().cmp(b.id())));
        plans
    }

    /// Record successful application of an approved plan.
    pub fn mark_executed(&self, plan_id: &str, now: DateTime<Utc>) -> Result<()> {
        let mut book = self.lock();
        book.running.remove(plan_id);
        let status = book.plan(plan_id)?.status();
        if status != PlanStatus::Approved {
            return Err(Error::InvalidTransition {
                plan_id: plan_id.to_string(),
                from: status,
                action: "mark executed",
            });
        }
        book.transition(plan_id, PlanStatus::Executed, SYSTEM_ACTOR, None, now)
    }

    /// Current copy of a plan
    pub fn get(&self, plan_id: &str) -> Result<ChangePlan> {
        self.lock()
            .plans
            .get(plan_id)
            .cloned()
            .ok_or_else(|| Error::PlanNotFound {
                plan_id: plan_id.to_string(),
            })
    }

    /// Plans with the given status, oldest first
    pub fn with_status(&self, status: PlanStatus) -> Vec<ChangePlan> {
        let mut plans: Vec<ChangePlan> = self
            .lock()
            .plans
            .values()
            .filter(|plan| plan.status() == status)
            .cloned()
            .collect();
        plans.sort_by(|a, b| a.created_at().cmp(&b.created_at()).then(a.id().cmp(b.id())));
        plans
    }

    /// Plans awaiting a decision
    pub fn pending(&self) -> Vec<ChangePlan> {
        self.with_status(PlanStatus::Pending)
    }

    /// Transition history, optionally for one plan
    pub fn events(&self, plan_id: Option<&str>) -> Vec<ApprovalEvent> {
        self.lock()
            .events
            .iter()
            .filter(|event| plan_id.is_none_or(|id| event.plan_id == id))
            .cloned()
            .collect()
    }

    /// Copy of the whole book for persistence
    pub fn snapshot(&self) -> ApprovalBook {
        self.lock().clone()
    }
}
