//! File-backed versioned state store
//!
//! Layout: `<root>/projects/<project>/state/v000001.json`, one immutable file
//! per committed version. A commit writes a temporary file and hard-links it
//! to the version's name; the link fails if that name exists, so two
//! processes racing for the same version cannot both win.

use changeplan::{
    Error, InfrastructureState, Result, StateSnapshot, StateStore, check_candidate,
};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Versioned state snapshots on the local filesystem
#[derive(Debug, Clone)]
pub struct FileStateStore {
    root: PathBuf,
}

fn storage(context: &str, path: &Path, err: &io::Error) -> Error {
    Error::Storage(format!("{context} {}: {err}", path.display()))
}

/// `v000042.json` -> 42
fn parse_version(name: &str) -> Option<u64> {
    name.strip_prefix('v')?.strip_suffix(".json")?.parse().ok()
}

fn check_project_id(project_id: &str) -> Result<()> {
    let valid = !project_id.is_empty()
        && project_id != "."
        && project_id != ".."
        && project_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::validation(
            format!("invalid project id '{project_id}'"),
            Vec::new(),
        ))
    }
}

impl FileStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn project_dir(&self, project_id: &str) -> Result<PathBuf> {
        check_project_id(project_id)?;
        Ok(self.root.join("projects").join(project_id).join("state"))
    }

    fn version_path(dir: &Path, version: u64) -> PathBuf {
        dir.join(format!("v{version:06}.json"))
    }

    /// Stored versions, ascending.
    fn versions(&self, project_id: &str) -> Result<Vec<u64>> {
        let dir = self.project_dir(project_id)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage("Failed to list", &dir, &e)),
        };

        let mut versions: Vec<u64> = entries
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| parse_version(&entry.file_name().to_string_lossy()))
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }

    fn read(&self, path: &Path) -> Result<InfrastructureState> {
        let content =
            fs::read_to_string(path).map_err(|e| storage("Failed to read", path, &e))?;
        Ok(serde_json::from_str(&content)?)
    }

    fn conflict(&self, project_id: &str, expected: u64) -> Result<Error> {
        let actual = self.versions(project_id)?.last().copied().unwrap_or(0);
        log::warn!("State conflict for {project_id}: expected {expected}, found {actual}");
        Ok(Error::StateConflict {
            project_id: project_id.to_string(),
            expected,
            actual,
        })
    }
}

impl StateStore for FileStateStore {
    fn get_current(&self, project_id: &str) -> Result<Option<InfrastructureState>> {
        let Some(version) = self.versions(project_id)?.last().copied() else {
            return Ok(None);
        };
        let dir = self.project_dir(project_id)?;
        self.read(&Self::version_path(&dir, version)).map(Some)
    }

    fn put_if_version(
        &self,
        project_id: &str,
        expected_version: u64,
        state: &InfrastructureState,
    ) -> Result<()> {
        check_candidate(project_id, expected_version, state)?;
        if self.versions(project_id)?.last().copied().unwrap_or(0) != expected_version {
            return Err(self.conflict(project_id, expected_version)?);
        }

        let dir = self.project_dir(project_id)?;
        fs::create_dir_all(&dir).map_err(|e| storage("Failed to create", &dir, &e))?;

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos());
        let tmp = dir.join(format!(
            ".tmp-{}-{nanos}-{}",
            std::process::id(),
            TMP_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        let content = serde_json::to_string_pretty(state)?;
        let written = fs::File::create(&tmp)
            .and_then(|mut file| {
                file.write_all(content.as_bytes())?;
                file.sync_all()
            })
            .map_err(|e| storage("Failed to write", &tmp, &e));

        let target = Self::version_path(&dir, state.version());
        let linked = written.and_then(|()| match fs::hard_link(&tmp, &target) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(self.conflict(project_id, expected_version)?)
            }
            Err(e) => Err(storage("Failed to commit", &target, &e)),
        });
        if let Err(e) = fs::remove_file(&tmp) {
            log::debug!("Could not remove {}: {e}", tmp.display());
        }
        linked?;

        log::debug!(
            "Committed {project_id} state version {} to {}",
            state.version(),
            target.display()
        );
        Ok(())
    }

    fn list_history(&self, project_id: &str, limit: Option<usize>) -> Result<Vec<StateSnapshot>> {
        let dir = self.project_dir(project_id)?;
        self.versions(project_id)?
            .into_iter()
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .map(|version| {
                let path = Self::version_path(&dir, version);
                let state = self.read(&path)?;
                Ok(StateSnapshot {
                    version: state.version(),
                    timestamp: state.timestamp(),
                    description: state.metadata().change_description.clone(),
                    locator: path.display().to_string(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use changeplan::{Resource, ResourceConfig, StateMetadata};
    use chrono::Utc;
    use std::sync::Barrier;
    use std::thread;
    use tempfile::TempDir;

    fn state(project: &str, version: u64, description: &str) -> InfrastructureState {
        let now = Utc::now();
        InfrastructureState::new(
            project,
            version,
            now,
            StateMetadata {
                last_modified_by: "test".into(),
                change_description: description.into(),
                change_plan_id: None,
            },
            vec![Resource::from_config(
                &ResourceConfig::new("db", "database", "eu-west-1"),
                now,
            )],
        )
    }

    #[test]
    fn test_empty_store() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path());
        assert!(store.get_current("web").unwrap().is_none());
        assert_eq!(store.current_version("web").unwrap(), 0);
        assert!(store.list_history("web", None).unwrap().is_empty());
    }

    #[test]
    fn test_commit_and_read_back() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path());
        let first = state("web", 1, "initial");
        store.put_if_version("web", 0, &first).unwrap();
        store.put_if_version("web", 1, &state("web", 2, "second")).unwrap();

        let current = store.get_current("web").unwrap().unwrap();
        assert_eq!(current.version(), 2);
        assert_eq!(current.resources().len(), 1);
        assert!(
            dir.path()
                .join("projects/web/state/v000001.json")
                .exists()
        );

        let history = store.list_history("web", None).unwrap();
        let versions: Vec<u64> = history.iter().map(|s| s.version).collect();
        assert_eq!(versions, vec![2, 1]);
        assert_eq!(history[1].description, "initial");
        assert!(history[0].locator.ends_with("v000002.json"));
        assert_eq!(store.list_history("web", Some(1)).unwrap().len(), 1);
    }

    #[test]
    fn test_stale_expectation_conflicts() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path());
        store.put_if_version("web", 0, &state("web", 1, "a")).unwrap();

        let err = store
            .put_if_version("web", 0, &state("web", 1, "b"))
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
            store.get_current("web").unwrap().unwrap().metadata().change_description,
            "a"
        );
    }

    #[test]
    fn test_candidate_checks() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path());
        assert!(matches!(
            store.put_if_version("web", 0, &state("api", 1, "x")),
            Err(Error::ValidationFailed { .. })
        ));
        assert!(matches!(
            store.put_if_version("web", 1, &state("web", 1, "x")),
            Err(Error::ValidationFailed { .. })
        ));
        assert!(matches!(
            store.put_if_version("web", 0, &state("web", 5, "x")),
            Err(Error::ValidationFailed { .. })
        ));
        assert!(store.get_current("web").unwrap().is_none());
    }

    #[test]
    fn test_project_id_must_be_a_plain_name() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path());
        assert!(store.get_current("../escape").is_err());
        assert!(store.get_current("").is_err());
        assert!(store.get_current("team_a.prod-1").is_ok());
    }

    #[test]
    fn test_corrupt_snapshot_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path());
        let state_dir = dir.path().join("projects/web/state");
        fs::create_dir_all(&state_dir).unwrap();
        fs::write(state_dir.join("v000001.json"), "{not json").unwrap();
        fs::write(state_dir.join("notes.txt"), "ignored").unwrap();

        assert_eq!(store.current_version("web").ok(), None);
        assert!(matches!(
            store.get_current("web"),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_racing_writers_single_winner() {
        let dir = TempDir::new().unwrap();
        let barrier = Barrier::new(4);
        let wins: Vec<bool> = thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|i| {
                    let barrier = &barrier;
                    let root = dir.path().to_path_buf();
                    scope.spawn(move || {
                        let store = FileStateStore::new(root);
                        barrier.wait();
                        store
                            .put_if_version("web", 0, &state("web", 1, &format!("writer {i}")))
                            .is_ok()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(wins.iter().filter(|w| **w).count(), 1);
        let store = FileStateStore::new(dir.path());
        assert_eq!(store.current_version("web").unwrap(), 1);
        assert_eq!(store.list_history("web", None).unwrap().len(), 1);
    }
}
