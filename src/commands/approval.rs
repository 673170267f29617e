//! Approval commands - show, pending, approve, reject, sweep

use anyhow::Result;
use chrono::Utc;
use serde_json::json;

use super::Session;
use crate::Context;
use crate::display;
use crate::ui;

pub fn show(ctx: &Context, plan_id: &str, as_json: bool) -> Result<()> {
    let workflow = Session::open(ctx)?.workflow()?;
    let plan = workflow.get(plan_id)?;
    let events = workflow.events(Some(plan_id));
    let halted = workflow.halted_run(plan_id);

    if as_json {
        let doc = json!({ "plan": plan, "events": events, "halted": halted });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    display::display_plan(&plan);
    if let Some(run) = &halted {
        display::display_halted_run(run);
    }
    if !events.is_empty() {
        ui::header("History");
        display::display_events(&events);
    }
    Ok(())
}

pub fn pending(ctx: &Context) -> Result<()> {
    let workflow = Session::open(ctx)?.workflow()?;
    let plans = workflow.pending();

    if plans.is_empty() {
        if !ctx.quiet {
            ui::info("No plans awaiting approval");
        }
        return Ok(());
    }

    ui::header(&format!("Pending ({})", plans.len()));
    display::display_plan_list(&plans);
    Ok(())
}

pub fn approve(ctx: &Context, plan_id: &str, actor: &str) -> Result<()> {
    let session = Session::open(ctx)?;
    let workflow = session.workflow()?;
    let outcome = workflow.approve(plan_id, actor, Utc::now());
    // The attempt may have expired the plan, so save either way.
    session.book.save(&workflow)?;
    outcome?;

    ui::success(&format!("Plan {plan_id} approved by {actor}"));
    Ok(())
}

pub fn reject(ctx: &Context, plan_id: &str, reason: &str, actor: &str) -> Result<()> {
    let session = Session::open(ctx)?;
    let workflow = session.workflow()?;
    let outcome = workflow.reject(plan_id, actor, reason, Utc::now());
    session.book.save(&workflow)?;
    outcome?;

    ui::success(&format!("Plan {plan_id} rejected by {actor}"));
    Ok(())
}

pub fn sweep(ctx: &Context) -> Result<()> {
    let session = Session::open(ctx)?;
    let workflow = session.workflow()?;
    let expired = workflow.sweep_expired(Utc::now());

    if expired.is_empty() {
        if !ctx.quiet {
            ui::info("No pending plans past their deadline");
        }
        return Ok(());
    }

    session.book.save(&workflow)?;
    for plan_id in &expired {
        ui::warn(&format!("Expired {plan_id}"));
    }
    Ok(())
}
