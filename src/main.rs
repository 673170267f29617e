mod cli;
mod commands;
mod config;
mod display;
mod paths;
mod plans;
mod pricing;
mod progress;
mod state;
mod ui;

use anyhow::Result;
use changeplan::ErrorReport;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command, RemoteArgs};
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub state_dir: Option<String>,
    pub policy: Option<String>,
    pub remote: RemoteArgs,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        state_dir: cli.state_dir,
        policy: cli.policy,
        remote: cli.remote,
    };

    let outcome = match cli.command {
        Command::Plan(args) => commands::plan::run(&ctx, args),
        Command::Show { plan_id, json } => commands::approval::show(&ctx, &plan_id, json),
        Command::Pending => commands::approval::pending(&ctx),
        Command::Approve { plan_id, actor } => commands::approval::approve(&ctx, &plan_id, &actor),
        Command::Reject {
            plan_id,
            reason,
            actor,
        } => commands::approval::reject(&ctx, &plan_id, &reason, &actor),
        Command::Sweep => commands::approval::sweep(&ctx),
        Command::Apply(args) => commands::apply::run(&ctx, args),
        Command::State { project, json } => commands::state::state(&ctx, &project, json),
        Command::History { project, limit } => commands::state::history(&ctx, &project, limit),
        Command::Health => commands::state::health(&ctx),
        Command::Completions { shell } => {
            generate(shell, &mut Cli::command(), "infraplan", &mut io::stdout());
            Ok(())
        }
    };

    match outcome {
        Err(err) => match err.downcast_ref::<changeplan::Error>() {
            Some(domain) => {
                report(&ctx, domain);
                std::process::exit(1);
            }
            None => Err(err),
        },
        Ok(()) => Ok(()),
    }
}

/// Print a domain error with its code, and the full report when verbose.
fn report(ctx: &Context, err: &changeplan::Error) {
    let report = ErrorReport::from(err);
    ui::error(&format!("[{}] {}", report.code, report.message));
    if ctx.verbose > 0 {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => eprintln!("{json}"),
            Err(e) => log::debug!("Failed to render error report: {e}"),
        }
    } else if !ctx.quiet {
        ui::dim(err.category().advice());
    }
}
