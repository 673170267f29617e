use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "infraplan")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Plan, approve and apply infrastructure changes", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Directory holding state snapshots and the approval book
    #[arg(long, env = "INFRAPLAN_STATE_DIR", global = true)]
    pub state_dir: Option<String>,

    /// Planning policy file (TOML)
    #[arg(long, env = "INFRAPLAN_POLICY", global = true)]
    pub policy: Option<String>,

    #[command(flatten)]
    pub remote: RemoteArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Remote endpoint, breaker and retry settings
#[derive(Args, Debug, Clone)]
#[command(next_help_heading = "Remote endpoint")]
pub struct RemoteArgs {
    /// Resource-management endpoint
    #[arg(long = "remote-url", env = "INFRAPLAN_REMOTE_URL", default_value = remotekit::DEFAULT_ENDPOINT, global = true)]
    pub url: String,

    /// Timeout of a single remote attempt, in seconds
    #[arg(long, env = "INFRAPLAN_TIMEOUT_SECS", default_value_t = 30.0, global = true)]
    pub timeout_secs: f64,

    /// Consecutive failures that open the circuit
    #[arg(long, env = "INFRAPLAN_CB_FAILURE_THRESHOLD", default_value_t = 5, global = true)]
    pub cb_failure_threshold: u32,

    /// Seconds an open circuit waits before admitting a trial call
    #[arg(long, env = "INFRAPLAN_CB_RECOVERY_TIMEOUT_SECS", default_value_t = 60.0, global = true)]
    pub cb_recovery_timeout_secs: f64,

    /// Consecutive trial successes that close the circuit
    #[arg(long, env = "INFRAPLAN_CB_SUCCESS_THRESHOLD", default_value_t = 3, global = true)]
    pub cb_success_threshold: u32,

    /// Attempts per remote call, including the first
    #[arg(long, env = "INFRAPLAN_RETRY_MAX_RETRIES", default_value_t = 3, global = true)]
    pub retry_max_retries: u32,

    /// First backoff delay, in seconds
    #[arg(long, env = "INFRAPLAN_RETRY_BASE_DELAY_SECS", default_value_t = 1.0, global = true)]
    pub retry_base_delay_secs: f64,

    /// Longest backoff delay, in seconds
    #[arg(long, env = "INFRAPLAN_RETRY_MAX_DELAY_SECS", default_value_t = 60.0, global = true)]
    pub retry_max_delay_secs: f64,

    /// Backoff growth factor
    #[arg(long, env = "INFRAPLAN_RETRY_EXPONENTIAL_BASE", default_value_t = 2.0, global = true)]
    pub retry_exponential_base: f64,

    /// Randomize backoff delays
    #[arg(long, env = "INFRAPLAN_RETRY_JITTER", default_value_t = true, action = clap::ArgAction::Set, global = true)]
    pub retry_jitter: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Diff a desired state against the current one and submit the plan
    Plan(PlanArgs),

    /// Show a plan and its approval history
    Show {
        /// Plan id
        plan_id: String,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// List plans awaiting a decision
    Pending,

    /// Approve a pending plan
    Approve {
        /// Plan id
        plan_id: String,

        /// Who is approving
        #[arg(long = "as", env = "USER", default_value = "operator")]
        actor: String,
    },

    /// Reject a pending plan
    Reject {
        /// Plan id
        plan_id: String,

        /// Why the plan is rejected
        #[arg(short, long)]
        reason: String,

        /// Who is rejecting
        #[arg(long = "as", env = "USER", default_value = "operator")]
        actor: String,
    },

    /// Expire pending plans whose approval deadline has passed
    Sweep,

    /// Apply approved plans
    Apply(ApplyArgs),

    /// Show the current state of a project
    State {
        /// Project id
        project: String,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// List stored state versions of a project, newest first
    History {
        /// Project id
        project: String,

        /// Show at most this many versions
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Check that the remote endpoint is serving
    Health,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct PlanArgs {
    /// Project id
    #[arg(short, long)]
    pub project: String,

    /// Desired state document (JSON)
    #[arg(short, long)]
    pub desired: PathBuf,

    /// Print the plan as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Plan to apply
    #[arg(required_unless_present = "all", conflicts_with = "all")]
    pub plan_id: Option<String>,

    /// Apply every approved plan
    #[arg(long)]
    pub all: bool,

    /// Skip confirmation prompts
    #[arg(short, long)]
    pub yes: bool,

    /// Number of plans applied in parallel
    #[arg(short, long, default_value = "4")]
    pub jobs: usize,

    /// Who is applying, recorded on the committed state
    #[arg(long = "as", env = "USER", default_value = "operator")]
    pub actor: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_remote_flags() {
        let cli = Cli::try_parse_from([
            "infraplan",
            "--remote-url",
            "http://svc:9000",
            "--retry-jitter",
            "false",
            "--cb-failure-threshold",
            "2",
            "health",
        ])
        .unwrap();
        assert_eq!(cli.remote.url, "http://svc:9000");
        assert!(!cli.remote.retry_jitter);
        assert_eq!(cli.remote.cb_failure_threshold, 2);
        assert!(matches!(cli.command, Command::Health));
    }

    #[test]
    fn test_apply_requires_plan_or_all() {
        assert!(Cli::try_parse_from(["infraplan", "apply"]).is_err());
        assert!(Cli::try_parse_from(["infraplan", "apply", "plan-1", "--all"]).is_err());

        let cli = Cli::try_parse_from(["infraplan", "apply", "--all", "-y", "-j", "2"]).unwrap();
        match cli.command {
            Command::Apply(args) => {
                assert!(args.all && args.yes);
                assert_eq!(args.jobs, 2);
                assert!(args.plan_id.is_none());
            }
            _ => panic!("expected apply"),
        }
    }

    #[test]
    fn test_reject_requires_reason() {
        assert!(Cli::try_parse_from(["infraplan", "reject", "plan-1"]).is_err());
        let cli =
            Cli::try_parse_from(["infraplan", "reject", "plan-1", "-r", "too risky", "--as", "bob"])
                .unwrap();
        match cli.command {
            Command::Reject {
                plan_id,
                reason,
                actor,
            } => {
                assert_eq!(plan_id, "plan-1");
                assert_eq!(reason, "too risky");
                assert_eq!(actor, "bob");
            }
            _ => panic!("expected reject"),
        }
    }
}
