//! `apply` command - execute approved plans against the remote endpoint

use anyhow::{Result, bail};
use changeplan::{
    ApprovalWorkflow, Error, ExecutionCoordinator, ExecutionResult, ProgressCallback,
    ResourceProvider,
};
use colored::Colorize;
use indicatif::MultiProgress;
use remotekit::{BreakerRegistry, ResilientClient};

use super::Session;
use crate::Context;
use crate::cli::ApplyArgs;
use crate::config;
use crate::display;
use crate::progress::BarProgress;
use crate::ui;

/// Execute plans, one at a time or on a pool of `jobs` threads.
pub fn apply_plans(
    provider: &dyn ResourceProvider,
    session: &Session,
    workflow: &ApprovalWorkflow,
    plan_ids: &[String],
    jobs: usize,
    actor: &str,
    quiet: bool,
) -> Vec<(String, changeplan::Result<ExecutionResult>)> {
    let coordinator =
        ExecutionCoordinator::new(provider, &session.store, workflow).with_actor(actor);

    if let [plan_id] = plan_ids {
        let mut progress = BarProgress::new(quiet);
        return vec![(plan_id.clone(), coordinator.execute(plan_id, &mut progress))];
    }

    let multi = MultiProgress::new();
    coordinator.execute_many(plan_ids, jobs.max(1), |_| {
        Box::new(BarProgress::attached(Some(&multi), quiet)) as Box<dyn ProgressCallback>
    })
}

pub fn run(ctx: &Context, args: ApplyArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let workflow = session.workflow()?;

    let plan_ids: Vec<String> = if args.all {
        workflow
            .executable()
            .iter()
            .map(|p| p.id().to_string())
            .collect()
    } else {
        args.plan_id.clone().into_iter().collect()
    };

    if plan_ids.is_empty() {
        ui::info("No approved plans to apply");
        return Ok(());
    }

    if let [plan_id] = plan_ids.as_slice() {
        display::display_plan(&workflow.get(plan_id)?);
    } else {
        ui::header(&format!("Applying {} plans", plan_ids.len()));
        display::display_plan_list(&workflow.executable());
    }

    if !args.yes && !confirm_proceed()? {
        println!();
        println!("  {} Aborted", "✗".red());
        return Ok(());
    }

    let client_config = config::client_config(&ctx.remote)?;
    let registry = BreakerRegistry::new(client_config.breaker.clone());
    let client = ResilientClient::from_config(&client_config, &registry);

    let results = apply_plans(
        &client,
        &session,
        &workflow,
        &plan_ids,
        args.jobs,
        &args.actor,
        ctx.quiet,
    );
    session.book.save(&workflow)?;

    let total = results.len();
    let mut failures = Vec::new();
    for (plan_id, result) in results {
        match result {
            Ok(done) => ui::success(&format!(
                "Applied {plan_id}: {} now at version {} ({})",
                done.project_id,
                done.new_version,
                ui::plural(done.applied.len(), "change")
            )),
            Err(err) => {
                report_failure(&plan_id, &err);
                failures.push(err);
            }
        }
    }

    match (total, failures.pop()) {
        (_, None) => Ok(()),
        (1, Some(err)) => Err(err.into()),
        (_, Some(_)) => bail!("{} of {total} plans failed", failures.len() + 1),
    }
}

fn report_failure(plan_id: &str, err: &Error) {
    ui::error(&format!("{plan_id}: {err}"));
    match err {
        Error::ExecutionFailed {
            completed,
            failed,
            skipped,
            source,
            ..
        } => {
            ui::kv("failed", &format!("{failed} ({source})"));
            if !completed.is_empty() {
                ui::kv("completed", &completed.join(", "));
            }
            if !skipped.is_empty() {
                ui::kv("skipped", &skipped.join(", "));
            }
        }
        Error::ExecutionBlocked { .. } => {
            ui::dim("Generate a new plan from the current state to apply what remains");
        }
        Error::StateConflict { .. } => {
            ui::dim("State moved since this plan was generated; plan again from the latest state");
        }
        _ => ui::dim(err.category().advice()),
    }
}

/// Confirm with user
fn confirm_proceed() -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt("Apply?")
        .default(false)
        .interact()?;

    Ok(confirmed)
}
