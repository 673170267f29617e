//! `plan` command - diff desired state against current state and submit

use anyhow::{Context as _, Result};
use changeplan::{
    ChangePlan, ChangePlanEngine, DefaultChangePlanEngine, DesiredState, PlanStatus, StateStore,
    ValidationReport,
};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::Path;

use super::Session;
use crate::Context;
use crate::cli::PlanArgs;
use crate::display;
use crate::pricing::PriceTable;
use crate::ui;

/// Read a desired state document.
pub fn load_desired(path: &Path) -> Result<DesiredState> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read desired state: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid desired state document: {}", path.display()))
}

/// Generate a plan for `project`, priced when the policy has prices.
pub fn generate(
    session: &Session,
    project: &str,
    desired: &DesiredState,
    now: DateTime<Utc>,
) -> Result<(ChangePlan, ValidationReport)> {
    let current = session.store.get_current(project)?;
    let engine = DefaultChangePlanEngine::new(session.policy.clone());

    let mut plan = engine.generate_plan(project, current.as_ref(), desired, now)?;
    let report = engine.validate_plan(&plan, current.as_ref())?;

    let prices = PriceTable::new(session.policy.prices.clone());
    if !prices.is_empty() {
        let estimate = engine.estimate_cost(&plan, &prices);
        plan = plan.with_estimated_cost(estimate.total);
    }
    Ok((plan, report))
}

pub fn run(ctx: &Context, args: PlanArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let desired = load_desired(&args.desired)?;
    let now = Utc::now();
    let (plan, report) = generate(&session, &args.project, &desired, now)?;

    if !plan.summary().has_changes() {
        if args.json {
            println!("{}", serde_json::to_string_pretty(&plan)?);
        } else {
            display::display_plan(&plan);
        }
        return Ok(());
    }

    let workflow = session.workflow()?;
    let plan_id = plan.id().to_string();
    let status = workflow.submit(plan, now)?;
    session.book.save(&workflow)?;
    let plan = workflow.get(&plan_id)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    display::display_plan(&plan);
    display::display_warnings(&report);
    println!();
    if status == PlanStatus::Approved {
        ui::success(&format!("Plan {plan_id} auto-approved"));
        ui::dim(&format!("Run `infraplan apply {plan_id}` to apply it"));
    } else {
        ui::info(&format!("Plan {plan_id} submitted for approval"));
        ui::dim(&format!("Run `infraplan approve {plan_id}` to approve it"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use changeplan::{ChangeAction, PlanPolicy, RiskLevel};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_load_desired_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("desired.json");
        fs::write(
            &path,
            r#"{
  "resources": [
    {"id": "net", "type": "network", "name": "net", "region": "eu-west-1",
     "properties": {"cidr": "10.0.0.0/16"}},
    {"id": "web", "type": "instance", "name": "web", "region": "eu-west-1",
     "properties": {"network": "net", "size": 2}, "dependsOn": ["net"]}
  ]
}"#,
        )
        .unwrap();

        let desired = load_desired(&path).unwrap();
        assert_eq!(desired.resources.len(), 2);
        assert!(desired.resources[1].depends_on.contains("net"));
    }

    #[test]
    fn test_load_desired_rejects_unknown_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("desired.json");
        fs::write(&path, r#"{"resources": [], "extra": 1}"#).unwrap();
        assert!(load_desired(&path).is_err());
        assert!(load_desired(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_generate_orders_and_prices() {
        let dir = TempDir::new().unwrap();
        let policy = PlanPolicy {
            prices: BTreeMap::from([("instance".to_string(), 30.0), ("network".to_string(), 5.0)]),
            ..PlanPolicy::default()
        };
        let session = Session::at(dir.path(), policy);
        let desired = DesiredState::new(vec![
            changeplan::ResourceConfig::new("web", "instance", "eu-west-1")
                .with_property("network", "net"),
            changeplan::ResourceConfig::new("net", "network", "eu-west-1"),
        ]);

        let (plan, report) = generate(&session, "web", &desired, Utc::now()).unwrap();
        let order: Vec<&str> = plan.changes().iter().map(|c| c.id()).collect();
        assert_eq!(order, vec!["net", "web"]);
        assert!(plan.changes().iter().all(|c| c.action == ChangeAction::Create));
        assert_eq!(plan.summary().estimated_cost, Some(35.0));
        assert_eq!(plan.summary().overall_risk, RiskLevel::Low);
        assert_eq!(plan.base_version(), 0);
        assert!(report.is_clean());
    }

    #[test]
    fn test_generate_without_prices_has_no_cost() {
        let dir = TempDir::new().unwrap();
        let session = Session::at(dir.path(), PlanPolicy::default());
        let desired = DesiredState::new(vec![changeplan::ResourceConfig::new(
            "logs", "bucket", "eu-west-1",
        )]);
        let (plan, _) = generate(&session, "web", &desired, Utc::now()).unwrap();
        assert_eq!(plan.summary().estimated_cost, None);
    }
}
