pub mod apply;
pub mod approval;
pub mod plan;
pub mod state;

use anyhow::Result;
use changeplan::{ApprovalWorkflow, PlanPolicy};
use std::path::{Path, PathBuf};

use crate::Context;
use crate::config;
use crate::paths;
use crate::plans::PlanBookFile;
use crate::state::FileStateStore;

/// Everything a command needs from local disk.
pub struct Session {
    pub state_dir: PathBuf,
    pub policy: PlanPolicy,
    pub book: PlanBookFile,
    pub store: FileStateStore,
}

impl Session {
    /// Resolve paths and load the policy for this invocation.
    pub fn open(ctx: &Context) -> Result<Self> {
        let state_dir = paths::state_dir(ctx.state_dir.as_deref())?;
        let (policy_path, explicit) = paths::policy_file(ctx.policy.as_deref())?;
        let policy = config::load_policy(&policy_path, explicit)?;
        Ok(Self::at(&state_dir, policy))
    }

    pub fn at(state_dir: &Path, policy: PlanPolicy) -> Self {
        Self {
            state_dir: state_dir.to_path_buf(),
            book: PlanBookFile::new(state_dir),
            store: FileStateStore::new(state_dir),
            policy,
        }
    }

    /// The approval workflow as last saved.
    pub fn workflow(&self) -> Result<ApprovalWorkflow> {
        self.book.load(self.policy.approval_config())
    }
}
