//! Versioned state storage contract
//!
//! Writers never read-modify-write: every commit names the version it expects
//! to replace, and the store refuses the write if another commit got there
//! first.

use crate::error::{Error, Result};
use crate::types::{InfrastructureState, StateSnapshot};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Durable, versioned storage of state snapshots.
pub trait StateStore: Send + Sync {
    /// The highest committed version for a project, if any.
    fn get_current(&self, project_id: &str) -> Result<Option<InfrastructureState>>;

    /// Commit `state` only if the current version is still `expected_version`
    /// (0 meaning no state yet).
    ///
    /// # Errors
    ///
    /// Returns `Error::StateConflict` if another commit advanced the version.
    fn put_if_version(
        &self,
        project_id: &str,
        expected_version: u64,
        state: &InfrastructureState,
    ) -> Result<()>;

    /// Stored versions, newest first, up to `limit` entries.
    fn list_history(&self, project_id: &str, limit: Option<usize>) -> Result<Vec<StateSnapshot>>;

    /// Version of the current state, 0 when none exists.
    fn current_version(&self, project_id: &str) -> Result<u64> {
        Ok(self.get_current(project_id)?.map_or(0, |s| s.version()))
    }
}

/// Check the invariants every store enforces on a candidate state.
///
/// A candidate belongs to `project_id` and is exactly one version past
/// `expected_version`.
pub fn check_candidate(
    project_id: &str,
    expected_version: u64,
    state: &InfrastructureState,
) -> Result<()> {
    if state.project_id() != project_id {
        return Err(Error::validation(
            format!(
                "state belongs to project {}, not {project_id}",
                state.project_id()
            ),
            Vec::new(),
        ));
    }
    if expected_version.checked_add(1) != Some(state.version()) {
        return Err(Error::validation(
            format!(
                "new state version {} must directly follow {expected_version}",
                state.version()
            ),
            Vec::new(),
        ));
    }
    Ok(())
}

/// In-memory store, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    projects: Mutex<BTreeMap<String, Vec<InfrastructureState>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Vec<InfrastructureState>>> {
        self.projects.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StateStore for MemoryStateStore {
    fn get_current(&self, project_id: &str) -> Result<Option<InfrastructureState>> {
        Ok(self
            .lock()
            .get(project_id)
            .and_then(|versions| versions.last())
            .cloned())
    }

    fn put_if_version(
        &self,
        project_id: &str,
        expected_version: u64,
        state: &InfrastructureState,
    ) -> Result<()> {
        check_candidate(project_id, expected_version, state)?;
        let mut projects = self.lock();
        let versions = projects.entry(project_id.to_string()).or_default();
        let actual = versions.last().map_or(0, InfrastructureState::version);
        if actual != expected_version {
            log::warn!(
                "State conflict for {project_id}: expected {expected_version}, found {actual}"
            );
            return Err(Error::StateConflict {
                project_id: project_id.to_string(),
                expected: expected_version,
                actual,
            });
        }
        versions.push(state.clone());
        log::debug!("Committed {project_id} state version {}", state.version());
        Ok(())
    }

    fn list_history(&self, project_id: &str, limit: Option<usize>) -> Result<Vec<StateSnapshot>> {
        let projects = self.lock();
        let Some(versions) = projects.get(project_id) else {
            return Ok(Vec::new());
        };
        Ok(versions
            .iter()
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .map(|state| StateSnapshot {
                version: state.version(),
                timestamp: state.timestamp(),
                description: state.metadata().change_description.clone(),
                locator: format!("memory://{project_id}/v{}", state.version()),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StateMetadata;
    use chrono::Utc;

    fn state(project: &str, version: u64, description: &str) -> InfrastructureState {
        InfrastructureState::new(
            project,
            version,
            Utc::now(),
            StateMetadata {
                last_modified_by: "test".into(),
                change_description: description.into(),
                change_plan_id: None,
            },
            Vec::new(),
        )
    }

    #[test]
    fn test_empty_store() {
        let store = MemoryStateStore::new();
        assert!(store.get_current("p").unwrap().is_none());
        assert_eq!(store.current_version("p").unwrap(), 0);
        assert!(store.list_history("p", None).unwrap().is_empty());
    }

    #[test]
    fn test_put_if_version_advances() {
        let store = MemoryStateStore::new();
        store.put_if_version("p", 0, &state("p", 1, "first")).unwrap();
        store.put_if_version("p", 1, &state("p", 2, "second")).unwrap();
        assert_eq!(store.current_version("p").unwrap(), 2);
    }

    #[test]
    fn test_stale_write_conflicts() {
        let store = MemoryStateStore::new();
        store.put_if_version("p", 0, &state("p", 1, "first")).unwrap();
        let err = store
            .put_if_version("p", 0, &state("p", 1, "racing"))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::StateConflict {
                expected: 0,
                actual: 1,
                ..
            }
        ));
        assert_eq!(
            store.get_current("p").unwrap().unwrap().metadata().change_description,
            "first"
        );
    }

    #[test]
    fn test_candidate_checks() {
        let store = MemoryStateStore::new();
        assert!(store.put_if_version("p", 0, &state("other", 1, "x")).is_err());
        assert!(store.put_if_version("p", 0, &state("p", 0, "x")).is_err());
    }

    #[test]
    fn test_version_must_follow_expected() {
        let store = MemoryStateStore::new();
        assert!(matches!(
            store.put_if_version("p", 0, &state("p", 5, "skip")),
            Err(Error::ValidationFailed { .. })
        ));
        assert_eq!(store.current_version("p").unwrap(), 0);
        assert!(check_candidate("p", u64::MAX, &state("p", 0, "wrap")).is_err());
        store.put_if_version("p", 0, &state("p", 1, "next")).unwrap();
        assert!(store.put_if_version("p", 1, &state("p", 3, "skip")).is_err());
    }

    #[test]
    fn test_history_newest_first_with_limit() {
        let store = MemoryStateStore::new();
        for v in 1..=3 {
            store
                .put_if_version("p", v - 1, &state("p", v, &format!("v{v}")))
                .unwrap();
        }
        let history = store.list_history("p", Some(2)).unwrap();
        let versions: Vec<u64> = history.iter().map(|s| s.version).collect();
        assert_eq!(versions, vec![3, 2]);
        assert_eq!(history[0].description, "v3");
        assert_eq!(history[0].locator, "memory://p/v3");
    }
}
