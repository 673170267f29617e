//! Persisted approval book
//!
//! Plans and their transition history live in `<state dir>/plans.json`.
//! Commands load the book into an `ApprovalWorkflow`, act on it, and save it
//! back even when the action failed, since a failed decision may still have
//! expired the plan.

use anyhow::{Context, Result};
use changeplan::{ApprovalBook, ApprovalConfig, ApprovalWorkflow};
use std::fs;
use std::path::{Path, PathBuf};

const BOOK_FILE: &str = "plans.json";

pub struct PlanBookFile {
    path: PathBuf,
}

impl PlanBookFile {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(BOOK_FILE),
        }
    }

    /// Load the workflow, starting empty if nothing was saved yet.
    pub fn load(&self, config: ApprovalConfig) -> Result<ApprovalWorkflow> {
        if !self.path.exists() {
            log::debug!("No approval book at {}, starting empty", self.path.display());
            return Ok(ApprovalWorkflow::new(config));
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read approval book: {}", self.path.display()))?;
        let book: ApprovalBook = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse approval book: {}", self.path.display()))?;

        log::debug!(
            "Loaded {} plan(s) from {}",
            book.plans.len(),
            self.path.display()
        );
        Ok(ApprovalWorkflow::with_book(config, book))
    }

    /// Write the workflow's book, replacing the previous file atomically.
    pub fn save(&self, workflow: &ApprovalWorkflow) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        }

        let content = serde_json::to_string_pretty(&workflow.snapshot())
            .context("Failed to serialize approval book")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        log::debug!("Saved approval book to {}", self.path.display());
        Ok(())
    }
}
