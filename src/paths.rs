//! Path resolution for infraplan
//!
//! Explicit `--state-dir` / `--policy` values (or their `INFRAPLAN_*`
//! environment variables) win. Otherwise:
//!
//! - state: `XDG_STATE_HOME/infraplan`, else `~/.local/state/infraplan`
//! - policy: `XDG_CONFIG_HOME/infraplan/policy.toml`, else
//!   `~/.config/infraplan/policy.toml`

use anyhow::{Context, Result};
use std::path::PathBuf;

const APP_DIR: &str = "infraplan";

/// Name of the policy file inside the config directory
pub const POLICY_FILE: &str = "policy.toml";

/// Resolve the state directory.
pub fn state_dir(explicit: Option<&str>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        let path = expand(dir);
        log::debug!("Using state dir: {}", path.display());
        return Ok(path);
    }
    default_dir(std::env::var("XDG_STATE_HOME").ok(), &[".local", "state"])
}

/// Resolve the policy file, and whether it was asked for explicitly.
pub fn policy_file(explicit: Option<&str>) -> Result<(PathBuf, bool)> {
    if let Some(file) = explicit {
        return Ok((expand(file), true));
    }
    let dir = default_dir(std::env::var("XDG_CONFIG_HOME").ok(), &[".config"])?;
    Ok((dir.join(POLICY_FILE), false))
}

fn default_dir(xdg: Option<String>, home_relative: &[&str]) -> Result<PathBuf> {
    if let Some(base) = xdg.filter(|b| !b.is_empty()) {
        return Ok(PathBuf::from(base).join(APP_DIR));
    }
    let home = dirs::home_dir().context("Could not determine home directory")?;
    let mut path = home;
    for part in home_relative {
        path.push(part);
    }
    path.push(APP_DIR);
    Ok(path)
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_state_dir_wins() {
        assert_eq!(
            state_dir(Some("/custom/state")).unwrap(),
            PathBuf::from("/custom/state")
        );
    }

    #[test]
    fn test_explicit_state_dir_with_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(
            state_dir(Some("~/infra-state")).unwrap(),
            home.join("infra-state")
        );
    }

    #[test]
    fn test_default_dir_prefers_xdg() {
        assert_eq!(
            default_dir(Some("/tmp/xdg-state".to_string()), &[".local", "state"]).unwrap(),
            PathBuf::from("/tmp/xdg-state/infraplan")
        );
    }

    #[test]
    fn test_default_dir_falls_back_to_home() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(
            default_dir(None, &[".local", "state"]).unwrap(),
            home.join(".local").join("state").join("infraplan")
        );
        assert_eq!(
            default_dir(Some(String::new()), &[".config"]).unwrap(),
            home.join(".config").join("infraplan")
        );
    }

    #[test]
    fn test_policy_file_explicit_flag() {
        let (path, explicit) = policy_file(Some("/etc/infraplan.toml")).unwrap();
        assert_eq!(path, PathBuf::from("/etc/infraplan.toml"));
        assert!(explicit);

        let (path, explicit) = policy_file(None).unwrap();
        assert!(path.ends_with("infraplan/policy.toml"));
        assert!(!explicit);
    }

    #[test]
    fn test_expand_absolute() {
        assert_eq!(expand("/absolute/path"), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_expand_unknown_env_var_unchanged() {
        assert_eq!(
            expand("/path/$NONEXISTENT_VAR_12345/file"),
            PathBuf::from("/path/$NONEXISTENT_VAR_12345/file")
        );
    }
}
