//! Execution coordinator - applies approved plans and commits the result
//!
//! Changes within a plan run one at a time in dependency order. Independent
//! plans can run side by side on a rayon pool; plans for the same project
//! then race through the store's compare-and-swap and exactly one wins.

use crate::approval::{ApprovalWorkflow, HaltedRun};
use crate::change::{Change, ChangeAction, ChangePlan};
use crate::context::ProgressCallback;
use crate::error::{Error, Result};
use crate::provider::ResourceProvider;
use crate::store::StateStore;
use crate::types::{InfrastructureState, Resource, StateMetadata};
use chrono::Utc;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;

/// What happened to one change during execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOutcome {
    Applied,
    Failed { error: String },
    Skipped,
}

/// Result of a fully applied plan
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub plan_id: String,
    pub project_id: String,
    /// Change ids in the order they were applied
    pub applied: Vec<String>,
    pub previous_version: u64,
    pub new_version: u64,
}

/// What a run that reached the provider left behind
fn halted_run(plan: &ChangePlan, err: &Error) -> HaltedRun {
    match err {
        Error::ExecutionFailed {
            completed,
            failed,
            skipped,
            source,
            ..
        } => HaltedRun {
            completed: completed.clone(),
            failed: Some(failed.clone()),
            skipped: skipped.clone(),
            error: source.to_string(),
            at: Utc::now(),
        },
        other => HaltedRun {
            completed: plan.changes().iter().map(|c| c.id().to_string()).collect(),
            failed: None,
            skipped: Vec::new(),
            error: other.to_string(),
            at: Utc::now(),
        },
    }
}

/// Applies approved plans through a provider and commits new state.
pub struct ExecutionCoordinator<'a> {
    provider: &'a dyn ResourceProvider,
    store: &'a dyn StateStore,
    approvals: &'a ApprovalWorkflow,
    actor: String,
}

impl<'a> ExecutionCoordinator<'a> {
    pub fn new(
        provider: &'a dyn ResourceProvider,
        store: &'a dyn StateStore,
        approvals: &'a ApprovalWorkflow,
    ) -> Self {
        Self {
            provider,
            store,
            approvals,
            actor: crate::approval::SYSTEM_ACTOR.to_string(),
        }
    }

    /// Name recorded as `lastModifiedBy` on committed states.
    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    /// Apply an approved plan.
    ///
    /// Nothing is sent to the provider unless the plan is approved, not
    /// already claimed by another run, and the stored state is still at the
    /// version the plan was diffed against. A run that stops after reaching
    /// the provider is recorded in the approval book and the plan is never
    /// executed again.
    ///
    /// # Errors
    ///
    /// - `InvalidTransition` if the plan is not approved
    /// - `ExecutionBlocked` if the plan is running or halted on an earlier run
    /// - `StateConflict` if another execution committed first
    /// - `ExecutionFailed` if a change failed; earlier changes stay applied
    pub fn execute(
        &self,
        plan_id: &str,
        progress: &mut dyn ProgressCallback,
    ) -> Result<ExecutionResult> {
        let plan = self.approvals.begin_execution(plan_id)?;
        let mut reached_provider = false;
        let outcome = self.run(&plan, progress, &mut reached_provider);

        if let Err(err) = &outcome {
            if reached_provider {
                self.approvals.record_halt(plan_id, halted_run(&plan, err))?;
            } else {
                self.approvals.release(plan_id);
            }
        }
        outcome
    }

    fn run(
        &self,
        plan: &ChangePlan,
        progress: &mut dyn ProgressCallback,
        reached_provider: &mut bool,
    ) -> Result<ExecutionResult> {
        let plan_id = plan.id();
        let current = self.store.get_current(plan.project_id())?;
        let actual = current.as_ref().map_or(0, InfrastructureState::version);
        if actual != plan.base_version() {
            log::warn!(
                "Plan {plan_id} was generated against version {}, store is at {actual}",
                plan.base_version()
            );
            return Err(Error::StateConflict {
                project_id: plan.project_id().to_string(),
                expected: plan.base_version(),
                actual,
            });
        }

        *reached_provider = !plan.changes().is_empty();
        progress.on_plan_start(plan_id, plan.changes().len());
        let applied = self.apply_changes(plan, progress);
        progress.on_plan_complete(plan_id);
        let records = applied?;

        let state = self.next_state(plan, current.as_ref(), records);
        self.store
            .put_if_version(plan.project_id(), plan.base_version(), &state)?;
        self.approvals.mark_executed(plan_id, Utc::now())?;
        log::info!(
            "Plan {plan_id} executed; {} is now at version {}",
            plan.project_id(),
            state.version()
        );

        Ok(ExecutionResult {
            plan_id: plan_id.to_string(),
            project_id: plan.project_id().to_string(),
            applied: plan.changes().iter().map(|c| c.id().to_string()).collect(),
            previous_version: plan.base_version(),
            new_version: state.version(),
        })
    }

    /// Execute several plans concurrently, one task per plan.
    ///
    /// Results are returned in input order.
    pub fn execute_many<F>(
        &self,
        plan_ids: &[String],
        jobs: usize,
        make_progress: F,
    ) -> Vec<(String, Result<ExecutionResult>)>
    where
        F: Fn(&str) -> Box<dyn ProgressCallback> + Sync,
    {
        let run = |id: &String| {
            let mut progress = make_progress(id);
            (id.clone(), self.execute(id, progress.as_mut()))
        };

        match rayon::ThreadPoolBuilder::new().num_threads(jobs).build() {
            Ok(pool) => pool.install(|| plan_ids.par_iter().map(run).collect()),
            Err(e) => {
                log::warn!("Failed to create thread pool, executing sequentially: {e}");
                plan_ids.iter().map(run).collect()
            }
        }
    }

    /// Apply changes in order, halting at the first failure.
    ///
    /// Returns the resulting record for each change (`None` for deletes).
    fn apply_changes(
        &self,
        plan: &ChangePlan,
        progress: &mut dyn ProgressCallback,
    ) -> Result<Vec<(String, Option<Resource>)>> {
        let changes = plan.changes();
        let mut records = Vec::with_capacity(changes.len());

        for (index, change) in changes.iter().enumerate() {
            progress.on_change_start(change);
            match self.apply_change(change) {
                Ok(record) => {
                    log::debug!("Applied {} {}", change.action, change.id());
                    progress.on_change_complete(change, &ChangeOutcome::Applied);
                    records.push((change.id().to_string(), record));
                }
                Err(err) => {
                    let outcome = ChangeOutcome::Failed {
                        error: err.to_string(),
                    };
                    progress.on_change_complete(change, &outcome);
                    let skipped: Vec<String> = changes[index + 1..]
                        .iter()
                        .map(|c| {
                            progress.on_change_complete(c, &ChangeOutcome::Skipped);
                            c.id().to_string()
                        })
                        .collect();
                    let completed: Vec<String> =
                        records.into_iter().map(|(id, _)| id).collect();
                    log::warn!(
                        "Plan {} halted at {}: {} completed, {} skipped",
                        plan.id(),
                        change.id(),
                        completed.len(),
                        skipped.len()
                    );
                    return Err(Error::ExecutionFailed {
                        plan_id: plan.id().to_string(),
                        completed,
                        failed: change.id().to_string(),
                        skipped,
                        source: Box::new(err),
                    });
                }
            }
        }
        Ok(records)
    }

    fn apply_change(&self, change: &Change) -> Result<Option<Resource>> {
        let missing = |what: &str| {
            Error::validation(
                format!("{} change {} has no {what} config", change.action, change.id()),
                vec![change.id().to_string()],
            )
        };
        match change.action {
            ChangeAction::Create => {
                let desired = change.desired_config.as_ref().ok_or_else(|| missing("desired"))?;
                self.provider.create(desired).map(Some)
            }
            ChangeAction::Update => {
                let current = change.current_config.as_ref().ok_or_else(|| missing("current"))?;
                let desired = change.desired_config.as_ref().ok_or_else(|| missing("desired"))?;
                self.provider.update(current, desired).map(Some)
            }
            ChangeAction::Delete => {
                let current = change.current_config.as_ref().ok_or_else(|| missing("current"))?;
                self.provider.delete(current).map(|()| None)
            }
        }
    }

    /// Build the successor of `current` from the applied records.
    fn next_state(
        &self,
        plan: &ChangePlan,
        current: Option<&InfrastructureState>,
        records: Vec<(String, Option<Resource>)>,
    ) -> InfrastructureState {
        let mut resources: BTreeMap<String, Resource> = current
            .map(|state| {
                state
                    .resources()
                    .iter()
                    .map(|r| (r.id.clone(), r.clone()))
                    .collect()
            })
            .unwrap_or_default();
        for (id, record) in records {
            match record {
                Some(resource) => {
                    resources.insert(id, resource);
                }
                None => {
                    resources.remove(&id);
                }
            }
        }

        let summary = plan.summary();
        InfrastructureState::new(
            plan.project_id(),
            plan.base_version().saturating_add(1),
            Utc::now(),
            StateMetadata {
                last_modified_by: self.actor.clone(),
                change_description: format!(
                    "Applied plan {}: {} created, {} updated, {} deleted",
                    plan.id(),
                    summary.creates,
                    summary.updates,
                    summary.deletes
                ),
                change_plan_id: Some(plan.id().to_string()),
            },
            resources.into_values().collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::ApprovalConfig;
    use crate::change::PlanStatus;
    use crate::context::NoProgress;
    use crate::engine::{ChangePlanEngine, DefaultChangePlanEngine};
    use crate::provider::MockProvider;
    use crate::store::MemoryStateStore;
    use crate::types::{DesiredState, ResourceConfig, ResourceStatus};

    fn cfg(id: &str, ty: &str) -> ResourceConfig {
        ResourceConfig::new(id, ty, "us-east-1")
    }

    struct Fixture {
        provider: MockProvider,
        store: MemoryStateStore,
        approvals: ApprovalWorkflow,
        engine: DefaultChangePlanEngine,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                provider: MockProvider::new(),
                store: MemoryStateStore::new(),
                approvals: ApprovalWorkflow::new(ApprovalConfig::default()),
                engine: DefaultChangePlanEngine::default(),
            }
        }

        fn coordinator(&self) -> ExecutionCoordinator<'_> {
            ExecutionCoordinator::new(&self.provider, &self.store, &self.approvals)
        }

        fn plan(&self, desired: Vec<ResourceConfig>) -> String {
            let current = self.store.get_current("proj").unwrap();
            let plan = self
                .engine
                .generate_plan("proj", current.as_ref(), &DesiredState::new(desired), Utc::now())
                .unwrap();
            let id = plan.id().to_string();
            self.approvals.submit(plan, Utc::now()).unwrap();
            id
        }

        fn approved(&self, desired: Vec<ResourceConfig>) -> String {
            let id = self.plan(desired);
            self.approvals.approve(&id, "alice", Utc::now()).unwrap();
            id
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl ProgressCallback for Recorder {
        fn on_plan_start(&mut self, _plan_id: &str, count: usize) {
            self.events.push(format!("start {count}"));
        }
        fn on_change_start(&mut self, change: &Change) {
            self.events.push(format!("begin {}", change.id()));
        }
        fn on_change_complete(&mut self, change: &Change, outcome: &ChangeOutcome) {
            let tag = match outcome {
                ChangeOutcome::Applied => "ok",
                ChangeOutcome::Failed { .. } => "failed",
                ChangeOutcome::Skipped => "skipped",
            };
            self.events.push(format!("{tag} {}", change.id()));
        }
        fn on_plan_complete(&mut self, _plan_id: &str) {
            self.events.push("done".into());
        }
    }

    #[test]
    fn test_end_to_end_two_creates() {
        let fx = Fixture::new();
        let id = fx.approved(vec![
            cfg("b", "instance").with_property("network", "a"),
            cfg("a", "network"),
        ]);

        let mut progress = Recorder::default();
        let result = fx.coordinator().execute(&id, &mut progress).unwrap();
        assert_eq!(result.applied, vec!["a", "b"]);
        assert_eq!(result.new_version, 1);
        assert_eq!(fx.provider.calls(), vec!["create a", "create b"]);
        assert_eq!(
            progress.events,
            vec!["start 2", "begin a", "ok a", "begin b", "ok b", "done"]
        );

        let state = fx.store.get_current("proj").unwrap().unwrap();
        assert_eq!(state.version(), 1);
        assert_eq!(state.metadata().change_plan_id.as_deref(), Some(id.as_str()));
        assert!(state.resources().iter().all(|r| r.status == ResourceStatus::Active));
        assert_eq!(state.resources().len(), 2);
        assert_eq!(fx.approvals.get(&id).unwrap().status(), PlanStatus::Executed);
    }

    #[test]
    fn test_pending_plan_not_executed() {
        let fx = Fixture::new();
        let id = fx.plan(vec![cfg("a", "t")]);
        let err = fx.coordinator().execute(&id, &mut NoProgress).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: PlanStatus::Pending,
                ..
            }
        ));
        assert_eq!(fx.provider.call_count(), 0);
    }

    #[test]
    fn test_executed_plan_cannot_run_twice() {
        let fx = Fixture::new();
        let id = fx.approved(vec![cfg("a", "t")]);
        fx.coordinator().execute(&id, &mut NoProgress).unwrap();
        assert!(fx.coordinator().execute(&id, &mut NoProgress).is_err());
        assert_eq!(fx.provider.call_count(), 1);
    }

    #[test]
    fn test_failure_halts_and_accounts() {
        let fx = Fixture::new();
        let id = fx.approved(vec![
            cfg("a", "network"),
            cfg("b", "instance").with_property("network", "a"),
            cfg("c", "instance").with_property("network", "a"),
        ]);
        fx.provider.fail_on("b");

        let mut progress = Recorder::default();
        let err = fx.coordinator().execute(&id, &mut progress).unwrap_err();
        match err {
            Error::ExecutionFailed {
                completed,
                failed,
                skipped,
                ..
            } => {
                assert_eq!(completed, vec!["a"]);
                assert_eq!(failed, "b");
                assert_eq!(skipped, vec!["c"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(progress.events.contains(&"skipped c".to_string()));
        assert!(!fx.provider.calls().contains(&"create c".to_string()));
        assert!(fx.store.get_current("proj").unwrap().is_none());
        assert_eq!(fx.approvals.get(&id).unwrap().status(), PlanStatus::Approved);
    }

    #[test]
    fn test_halted_plan_is_not_executed_again() {
        let fx = Fixture::new();
        let id = fx.approved(vec![cfg("a", "t"), cfg("b", "t")]);
        fx.provider.fail_on("b");

        let err = fx.coordinator().execute(&id, &mut NoProgress).unwrap_err();
        assert!(matches!(err, Error::ExecutionFailed { .. }));
        let calls = fx.provider.calls();
        assert_eq!(calls, vec!["create a", "create b"]);

        let halt = fx.approvals.halted_run(&id).unwrap();
        assert_eq!(halt.completed, vec!["a"]);
        assert_eq!(halt.failed.as_deref(), Some("b"));

        let again = fx.coordinator().execute(&id, &mut NoProgress).unwrap_err();
        assert!(matches!(again, Error::ExecutionBlocked { .. }));
        assert_eq!(fx.provider.calls(), calls);
        assert!(fx.approvals.executable().is_empty());
    }

    #[test]
    fn test_conflict_before_remote_calls_releases_plan() {
        let fx = Fixture::new();
        let first = fx.approved(vec![cfg("a", "t")]);
        let second = fx.approved(vec![cfg("b", "t")]);
        fx.coordinator().execute(&first, &mut NoProgress).unwrap();

        assert!(fx.coordinator().execute(&second, &mut NoProgress).is_err());
        assert!(fx.approvals.halted_run(&second).is_none());
        assert!(matches!(
            fx.coordinator().execute(&second, &mut NoProgress),
            Err(Error::StateConflict { .. })
        ));
    }

    #[test]
    fn test_same_plan_twice_applies_once() {
        let fx = Fixture::new();
        let id = fx.approved(vec![cfg("a", "t"), cfg("b", "t")]);

        let results = fx
            .coordinator()
            .execute_many(&[id.clone(), id.clone()], 2, |_| {
                Box::new(NoProgress) as Box<dyn ProgressCallback>
            });
        assert_eq!(results.iter().filter(|(_, r)| r.is_ok()).count(), 1);
        assert_eq!(fx.provider.call_count(), 2);
        assert_eq!(fx.store.current_version("proj").unwrap(), 1);
    }

    #[test]
    fn test_stale_plan_conflicts_before_remote_calls() {
        let fx = Fixture::new();
        let first = fx.approved(vec![cfg("a", "t")]);
        let second = fx.approved(vec![cfg("b", "t")]);
        fx.coordinator().execute(&first, &mut NoProgress).unwrap();
        let calls = fx.provider.call_count();

        let err = fx.coordinator().execute(&second, &mut NoProgress).unwrap_err();
        assert!(matches!(
            err,
            Error::StateConflict {
                expected: 0,
                actual: 1,
                ..
            }
        ));
        assert_eq!(fx.provider.call_count(), calls);
    }

    #[test]
    fn test_second_generation_updates_and_deletes() {
        let fx = Fixture::new();
        let first = fx.approved(vec![cfg("a", "t"), cfg("b", "t")]);
        fx.coordinator().execute(&first, &mut NoProgress).unwrap();

        let second = fx.approved(vec![cfg("a", "t").with_property("size", 2)]);
        let result = fx.coordinator().execute(&second, &mut NoProgress).unwrap();
        assert_eq!(result.previous_version, 1);
        assert_eq!(result.new_version, 2);

        let state = fx.store.get_current("proj").unwrap().unwrap();
        let ids: Vec<&str> = state.resources().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
        assert_eq!(fx.store.list_history("proj", None).unwrap().len(), 2);
    }

    #[test]
    fn test_racing_executions_commit_once() {
        let fx = Fixture::new();
        let left = fx.approved(vec![cfg("left", "t")]);
        let right = fx.approved(vec![cfg("right", "t")]);

        let coordinator = fx.coordinator();
        let results: Vec<Result<ExecutionResult>> = std::thread::scope(|s| {
            let handles: Vec<_> = [&left, &right]
                .into_iter()
                .map(|id| {
                    let coordinator = &coordinator;
                    s.spawn(move || coordinator.execute(id, &mut NoProgress))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let winners: Vec<&ExecutionResult> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(Error::StateConflict { .. }))));

        let state = fx.store.get_current("proj").unwrap().unwrap();
        assert_eq!(state.version(), 1);
        let ids: Vec<&str> = state.resources().iter().map(|r| r.id.as_str()).collect();
        let winner = if winners[0].plan_id == left { "left" } else { "right" };
        assert_eq!(ids, vec![winner]);
    }

    #[test]
    fn test_execute_many_runs_independent_projects() {
        let fx = Fixture::new();
        let mut ids = Vec::new();
        for project in ["p1", "p2", "p3"] {
            let plan = fx
                .engine
                .generate_plan(
                    project,
                    None,
                    &DesiredState::new(vec![cfg(&format!("{project}-res"), "t")]),
                    Utc::now(),
                )
                .unwrap();
            let id = plan.id().to_string();
            fx.approvals.submit(plan, Utc::now()).unwrap();
            fx.approvals.approve(&id, "alice", Utc::now()).unwrap();
            ids.push(id);
        }

        let results = fx
            .coordinator()
            .execute_many(&ids, 2, |_| Box::new(NoProgress));
        assert_eq!(results.len(), 3);
        for ((id, result), expected) in results.iter().zip(&ids) {
            assert_eq!(id, expected);
            assert!(result.is_ok());
        }
        for project in ["p1", "p2", "p3"] {
            assert_eq!(fx.store.current_version(project).unwrap(), 1);
        }
    }
}
