use anyhow::{Context, Result, bail};
use changeplan::PlanPolicy;
use remotekit::{CircuitBreakerConfig, ClientConfig, RetryPolicy};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::cli::RemoteArgs;

/// Load the planning policy.
///
/// A missing file falls back to the default policy unless the path was
/// given explicitly.
pub fn load_policy(path: &Path, explicit: bool) -> Result<PlanPolicy> {
    if !path.exists() {
        if explicit {
            bail!("Policy file not found: {}", path.display());
        }
        log::debug!("No policy at {}, using defaults", path.display());
        return Ok(PlanPolicy::default());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read policy file: {}", path.display()))?;
    let policy: PlanPolicy = toml::from_str(&content)
        .with_context(|| format!("Failed to parse policy file: {}", path.display()))?;

    log::debug!("Loaded policy from {}", path.display());
    Ok(policy)
}

fn seconds(name: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .with_context(|| format!("{name} must be a non-negative number of seconds, got {value}"))
}

/// Build the remote client configuration from command-line/environment values.
pub fn client_config(args: &RemoteArgs) -> Result<ClientConfig> {
    if !(args.retry_exponential_base.is_finite() && args.retry_exponential_base > 0.0) {
        bail!(
            "retry exponential base must be positive, got {}",
            args.retry_exponential_base
        );
    }

    Ok(ClientConfig {
        endpoint: args.url.clone(),
        timeout: seconds("timeout", args.timeout_secs)?,
        breaker: CircuitBreakerConfig {
            failure_threshold: args.cb_failure_threshold.max(1),
            recovery_timeout: seconds("recovery timeout", args.cb_recovery_timeout_secs)?,
            success_threshold: args.cb_success_threshold.max(1),
        },
        retry: RetryPolicy {
            max_retries: args.retry_max_retries,
            base_delay: seconds("retry base delay", args.retry_base_delay_secs)?,
            max_delay: seconds("retry max delay", args.retry_max_delay_secs)?,
            exponential_base: args.retry_exponential_base,
            jitter: args.retry_jitter,
        },
    })
}
