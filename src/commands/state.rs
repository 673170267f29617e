//! State inspection and remote health

use anyhow::Result;
use changeplan::{ResourceProvider, StateStore};
use remotekit::{BreakerRegistry, ResilientClient};

use super::Session;
use crate::Context;
use crate::config;
use crate::display;
use crate::ui;

pub fn state(ctx: &Context, project: &str, as_json: bool) -> Result<()> {
    let session = Session::open(ctx)?;
    let Some(current) = session.store.get_current(project)? else {
        if as_json {
            println!("null");
        } else {
            ui::info(&format!("No state recorded for {project}"));
        }
        return Ok(());
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&current)?);
    } else {
        display::display_state(&current);
    }
    Ok(())
}

pub fn history(ctx: &Context, project: &str, limit: Option<usize>) -> Result<()> {
    let session = Session::open(ctx)?;
    let snapshots = session.store.list_history(project, limit)?;

    if snapshots.is_empty() {
        ui::info(&format!("No state recorded for {project}"));
        return Ok(());
    }

    ui::header(&format!("{project} ({})", ui::plural(snapshots.len(), "version")));
    display::display_history(&snapshots);
    Ok(())
}

pub fn health(ctx: &Context) -> Result<()> {
    let client_config = config::client_config(&ctx.remote)?;
    let registry = BreakerRegistry::new(client_config.breaker.clone());
    let client = ResilientClient::from_config(&client_config, &registry);

    client.health()?;
    ui::success(&format!("{} is healthy", client.target()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::RemoteArgs;
    use clap::Parser;
    use tempfile::TempDir;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        remote: RemoteArgs,
    }

    fn context(dir: &TempDir) -> Context {
        Context {
            verbose: 0,
            quiet: true,
            state_dir: Some(dir.path().to_string_lossy().into_owned()),
            policy: None,
            remote: Harness::parse_from(["test"]).remote,
        }
    }

    #[test]
    fn test_state_of_unknown_project() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        assert!(state(&ctx, "web", false).is_ok());
        assert!(history(&ctx, "web", Some(3)).is_ok());
    }

    #[test]
    fn test_state_rejects_bad_project_id() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        assert!(state(&ctx, "../escape", false).is_err());
    }
}
