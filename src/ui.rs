use changeplan::{ChangeAction, PlanStatus, RiskLevel};
use colored::{ColoredString, Colorize};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Risk level, colored by severity
pub fn risk(level: RiskLevel) -> ColoredString {
    let text = level.to_string();
    match level {
        RiskLevel::Low => text.green(),
        RiskLevel::Medium => text.yellow(),
        RiskLevel::High => text.red().bold(),
    }
}

/// Plan status, colored by disposition
pub fn status(status: PlanStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        PlanStatus::Pending => text.yellow(),
        PlanStatus::Approved => text.cyan(),
        PlanStatus::Executed => text.green(),
        PlanStatus::Rejected | PlanStatus::Expired => text.dimmed(),
    }
}

/// Diff-style symbol for a change action
pub fn action_symbol(action: ChangeAction) -> ColoredString {
    match action {
        ChangeAction::Create => "+".green(),
        ChangeAction::Update => "~".yellow(),
        ChangeAction::Delete => "-".red(),
    }
}

/// Format an estimated monthly cost
pub fn format_cost(amount: f64) -> String {
    format!("${amount:.2}/mo")
}

/// "1 change", "3 changes"
pub fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

// ============================================================================
// Tests
// ============================================================================
