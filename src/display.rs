//! Plan and state rendering

use changeplan::{
    ApprovalEvent, ChangeAction, ChangePlan, HaltedRun, InfrastructureState, StateSnapshot,
    ValidationReport,
};
use colored::Colorize;

use crate::ui;

/// Display a plan as a diff, grouped in execution order.
pub fn display_plan(plan: &ChangePlan) {
    if plan.changes().is_empty() {
        println!();
        println!("  {} No changes needed", "✓".green());
        return;
    }

    println!();
    println!(
        "┌─ {} {} ─────────────────────────────┐",
        "Plan".bold(),
        plan.id().cyan()
    );
    println!(
        "│ project {}  base version {}  status {}",
        plan.project_id().bold(),
        plan.base_version(),
        ui::status(plan.status())
    );
    println!("│");

    for (position, change) in plan.changes().iter().enumerate() {
        let detail = match (change.action, &change.current_config, &change.desired_config) {
            (ChangeAction::Update, Some(current), Some(desired)) => {
                let keys: Vec<&str> = desired.changed_properties(current).into_iter().collect();
                if keys.is_empty() {
                    "(name/region/tags)".to_string()
                } else {
                    format!("({})", keys.join(", "))
                }
            }
            (ChangeAction::Delete, _, _) => "(will remove)".to_string(),
            _ => String::new(),
        };
        let deps = if change.dependencies.is_empty() {
            String::new()
        } else {
            let names: Vec<&str> = change.dependencies.iter().map(String::as_str).collect();
            format!(" after {}", names.join(", "))
        };

        println!(
            "│ {:>3}. {} {:<28} {:<16} {:<6} {}{}",
            position + 1,
            ui::action_symbol(change.action),
            change.id(),
            change.resource_type.dimmed(),
            ui::risk(change.risk_level),
            detail.dimmed(),
            deps.dimmed()
        );
    }

    let summary = plan.summary();
    println!("│");
    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Summary: {} ({} create, {} update, {} delete), {} high risk, overall {}",
        ui::plural(summary.total, "change").bold(),
        summary.creates.to_string().green(),
        summary.updates.to_string().yellow(),
        summary.deletes.to_string().red(),
        summary.high_risk,
        ui::risk(summary.overall_risk)
    );
    if let Some(cost) = summary.estimated_cost {
        println!("│ Estimated cost: {}", ui::format_cost(cost));
    }
    if let Some(deadline) = plan.approval_deadline() {
        println!(
            "│ Approval deadline: {}",
            deadline.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    println!("└─────────────────────────────────────────────────────┘");
}

/// Display validation warnings, if any.
pub fn display_warnings(report: &ValidationReport) {
    for warning in &report.warnings {
        ui::warn(warning);
    }
}

/// Where an earlier run of the plan stopped.
pub fn display_halted_run(run: &HaltedRun) {
    println!();
    match &run.failed {
        Some(failed) => ui::warn(&format!("Execution halted at {failed}: {}", run.error)),
        None => ui::warn(&format!("Execution did not commit: {}", run.error)),
    }
    if !run.completed.is_empty() {
        ui::kv("completed", &run.completed.join(", "));
    }
    if !run.skipped.is_empty() {
        ui::kv("skipped", &run.skipped.join(", "));
    }
    ui::dim("This plan will not run again; generate a new plan for the remainder");
}

/// One line per plan.
pub fn display_plan_list(plans: &[ChangePlan]) {
    for plan in plans {
        let deadline = plan
            .approval_deadline()
            .map(|d| format!("until {}", d.format("%Y-%m-%d %H:%M")))
            .unwrap_or_default();
        println!(
            "  {}  {:<16} {:<10} {:<12} {:<8} {}",
            plan.id().cyan(),
            plan.project_id(),
            ui::status(plan.status()),
            ui::plural(plan.summary().total, "change"),
            ui::risk(plan.summary().overall_risk),
            deadline.dimmed()
        );
    }
}

/// Approval transitions, oldest first.
pub fn display_events(events: &[ApprovalEvent]) {
    for event in events {
        let from = event
            .from
            .map_or_else(|| "submitted".to_string(), |s| s.to_string());
        let reason = event
            .reason
            .as_deref()
            .map(|r| format!(" ({r})"))
            .unwrap_or_default();
        println!(
            "  {}  {} → {} by {}{}",
            event.at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            from,
            ui::status(event.to),
            event.actor.bold(),
            reason.dimmed()
        );
    }
}

/// The resources recorded in a state snapshot.
pub fn display_state(state: &InfrastructureState) {
    ui::header(&format!(
        "{} @ version {}",
        state.project_id(),
        state.version()
    ));
    ui::kv("updated", &state.timestamp().to_rfc3339());
    ui::kv("by", &state.metadata().last_modified_by);
    ui::kv("change", &state.metadata().change_description);
    println!();

    if state.resources().is_empty() {
        ui::dim("(no resources)");
        return;
    }
    for resource in state.resources() {
        println!(
            "  {:<28} {:<16} {:<12} {:<10} {}",
            resource.id.bold(),
            resource.resource_type,
            resource.region,
            resource.status,
            resource.arn.as_deref().unwrap_or("").dimmed()
        );
    }
}

/// Stored versions, newest first.
pub fn display_history(history: &[StateSnapshot]) {
    for snapshot in history {
        println!(
            "  {:>4}  {}  {}",
            format!("v{}", snapshot.version).bold(),
            snapshot.timestamp.format("%Y-%m-%d %H:%M:%S"),
            snapshot.description
        );
        ui::dim(&format!("      {}", snapshot.locator));
    }
}
