//! Progress reporting for plan execution
//!
//! Lets callers render execution without the library depending on a
//! terminal or UI crate.

use crate::change::Change;
use crate::executor::ChangeOutcome;

/// Progress callback for execution operations
///
/// Implement this trait to receive progress updates during execution.
pub trait ProgressCallback: Send {
    /// Called once before the first change of a plan is applied
    fn on_plan_start(&mut self, plan_id: &str, count: usize);

    /// Called when starting to apply a single change
    fn on_change_start(&mut self, change: &Change);

    /// Called when a change has been applied, failed, or was skipped
    fn on_change_complete(&mut self, change: &Change, outcome: &ChangeOutcome);

    /// Called when the plan has finished, successfully or not
    fn on_plan_complete(&mut self, plan_id: &str);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_plan_start(&mut self, _plan_id: &str, _count: usize) {}
    fn on_change_start(&mut self, _change: &Change) {}
    fn on_change_complete(&mut self, _change: &Change, _outcome: &ChangeOutcome) {}
    fn on_plan_complete(&mut self, _plan_id: &str) {}
}
