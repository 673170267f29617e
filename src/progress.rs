//! Progress bars for plan execution

use changeplan::{Change, ChangeOutcome, ProgressCallback};
use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

fn style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} {prefix:.bold} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

/// Renders one plan's execution as a progress bar.
pub struct BarProgress {
    bar: ProgressBar,
    quiet: bool,
}

impl BarProgress {
    pub fn new(quiet: bool) -> Self {
        Self::attached(None, quiet)
    }

    /// A bar that shares the terminal with other plans' bars.
    pub fn attached(multi: Option<&MultiProgress>, quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new(0);
            bar.set_style(style());
            match multi {
                Some(multi) => multi.add(bar),
                None => bar,
            }
        };
        Self { bar, quiet }
    }
}

impl ProgressCallback for BarProgress {
    fn on_plan_start(&mut self, plan_id: &str, count: usize) {
        self.bar.set_length(count as u64);
        self.bar.set_prefix(plan_id.to_string());
    }

    fn on_change_start(&mut self, change: &Change) {
        self.bar
            .set_message(format!("{} {}", change.action, change.id()));
    }

    fn on_change_complete(&mut self, change: &Change, outcome: &ChangeOutcome) {
        match outcome {
            ChangeOutcome::Applied => self.bar.inc(1),
            ChangeOutcome::Failed { error } => {
                if !self.quiet {
                    self.bar.suspend(|| {
                        println!("  {} {} ({})", "✗".red(), change.id(), error);
                    });
                }
            }
            ChangeOutcome::Skipped => {}
        }
    }

    fn on_plan_complete(&mut self, _plan_id: &str) {
        self.bar.finish_and_clear();
    }
}
