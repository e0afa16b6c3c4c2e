//! Runtime defaults and environment overlay.
//!
//! Settings are resolved in increasing priority: built-in constants, then
//! the environment variables listed below, then CLI flags. Only the
//! variables this module reads are consulted; all other `ANSIBLE_*`
//! variables are ignored.
//!
//! | Variable | Meaning |
//! |---|---|
//! | `RUNBOOK_INVENTORY` / `ANSIBLE_INVENTORY` | default inventory path |
//! | `RUNBOOK_FORKS` / `ANSIBLE_FORKS` | default fork count |
//! | `RUNBOOK_REMOTE_USER` / `ANSIBLE_REMOTE_USER` | default remote user |
//! | `RUNBOOK_HOST_KEY_CHECKING` / `ANSIBLE_HOST_KEY_CHECKING` | host-key policy |
//! | `RUNBOOK_VAULT_PASSWORD_FILE` / `ANSIBLE_VAULT_PASSWORD_FILE` | vault password file |
//! | `RUNBOOK_TIMEOUT` / `ANSIBLE_TIMEOUT` | connection timeout in seconds |

use std::path::PathBuf;

/// Default number of parallel host executions per task.
pub const DEFAULT_FORKS: usize = 5;

/// Default connection timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Upper bound on simultaneously open connections in a play.
pub const MAX_CONNECTIONS: usize = 256;

/// Connection establishment attempts before giving up.
pub const CONNECT_ATTEMPTS: u32 = 3;

/// Base delay for the connect retry backoff, in seconds.
pub const CONNECT_BACKOFF_BASE_SECS: u64 = 1;

/// Grace period given to in-flight transports on shutdown, in seconds.
pub const SHUTDOWN_GRACE_SECS: u64 = 5;

/// Cap on iterative template variable resolution passes.
pub const TEMPLATE_RESOLVE_PASSES: usize = 10;

/// Plaintext bytes per chunk for the Windows chunked upload. 700 KiB of
/// plaintext base64-encodes to roughly 950 KiB, below the 1 MiB command
/// envelope cap.
pub const WINRM_CHUNK_SIZE: usize = 700 * 1024;

/// How the SSH transport treats unknown or mismatching host keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostKeyPolicy {
    /// Reject hosts absent from known_hosts.
    Strict,
    /// Accept and remember unknown hosts, reject key mismatches.
    #[default]
    AcceptNew,
    /// Skip host-key verification entirely.
    Insecure,
}

impl HostKeyPolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "strict" | "true" | "yes" => Some(Self::Strict),
            "accept-new" | "accept_new" => Some(Self::AcceptNew),
            "insecure" | "false" | "no" => Some(Self::Insecure),
            _ => None,
        }
    }
}

/// Resolved runtime defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Default inventory path, if one is configured.
    pub inventory: Option<PathBuf>,
    /// Default fork count.
    pub forks: usize,
    /// Default remote user.
    pub remote_user: Option<String>,
    /// SSH host-key policy.
    pub host_key_policy: HostKeyPolicy,
    /// Default vault password file.
    pub vault_password_file: Option<PathBuf>,
    /// Default connection timeout in seconds.
    pub timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            inventory: None,
            forks: DEFAULT_FORKS,
            remote_user: None,
            host_key_policy: HostKeyPolicy::default(),
            vault_password_file: None,
            timeout: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Builds the configuration from built-in defaults plus the
    /// environment overlay.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(path) = env_either("RUNBOOK_INVENTORY", "ANSIBLE_INVENTORY") {
            config.inventory = Some(PathBuf::from(path));
        }
        if let Some(forks) = env_either("RUNBOOK_FORKS", "ANSIBLE_FORKS") {
            if let Ok(n) = forks.parse::<usize>() {
                config.forks = n.max(1);
            }
        }
        if let Some(user) = env_either("RUNBOOK_REMOTE_USER", "ANSIBLE_REMOTE_USER") {
            config.remote_user = Some(user);
        }
        if let Some(policy) = env_either("RUNBOOK_HOST_KEY_CHECKING", "ANSIBLE_HOST_KEY_CHECKING") {
            if let Some(p) = HostKeyPolicy::parse(&policy) {
                config.host_key_policy = p;
            }
        }
        if let Some(path) = env_either("RUNBOOK_VAULT_PASSWORD_FILE", "ANSIBLE_VAULT_PASSWORD_FILE")
        {
            config.vault_password_file = Some(PathBuf::from(path));
        }
        if let Some(timeout) = env_either("RUNBOOK_TIMEOUT", "ANSIBLE_TIMEOUT") {
            if let Ok(t) = timeout.parse::<u64>() {
                config.timeout = t;
            }
        }

        config
    }
}

fn env_either(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .or_else(|_| std::env::var(fallback))
        .ok()
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.forks, 5);
        assert_eq!(config.timeout, 30);
        assert_eq!(config.host_key_policy, HostKeyPolicy::AcceptNew);
    }

    #[test]
    fn host_key_policy_parsing() {
        assert_eq!(HostKeyPolicy::parse("strict"), Some(HostKeyPolicy::Strict));
        assert_eq!(
            HostKeyPolicy::parse("accept-new"),
            Some(HostKeyPolicy::AcceptNew)
        );
        assert_eq!(
            HostKeyPolicy::parse("False"),
            Some(HostKeyPolicy::Insecure)
        );
        assert_eq!(HostKeyPolicy::parse("bogus"), None);
    }
}
