//! Command-line surface.
//!
//! A single entry point: positional playbook paths plus the run options.
//! The diagnostic flags (`--list-hosts`, `--list-tasks`, `--list-tags`,
//! `--syntax-check`) parse everything but never contact hosts.

use clap::Parser;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::vars::VarMap;

/// A minimal configuration-management runner.
#[derive(Debug, Parser)]
#[command(name = "runbook", version, about)]
pub struct Cli {
    /// Playbook file(s) to run, in order.
    #[arg(required = true, value_name = "PLAYBOOK")]
    pub playbooks: Vec<PathBuf>,

    /// Inventory file or directory.
    #[arg(short = 'i', long, value_name = "PATH")]
    pub inventory: Option<PathBuf>,

    /// Restrict selected hosts to this pattern.
    #[arg(short = 'l', long, value_name = "PATTERN")]
    pub limit: Option<String>,

    /// Extra variables: `key=value`, inline YAML/JSON, or `@file`.
    /// Highest-priority tier.
    #[arg(short = 'e', long = "extra-vars", value_name = "VARS")]
    pub extra_vars: Vec<String>,

    /// Parallel host executions per task.
    #[arg(short = 'f', long, value_name = "N")]
    pub forks: Option<usize>,

    /// Check mode: report would-change without mutating remote state.
    #[arg(short = 'C', long)]
    pub check: bool,

    /// Attach diffs to file-editing results.
    #[arg(short = 'D', long)]
    pub diff: bool,

    /// Emit the structured JSON document instead of the human stream.
    #[arg(long)]
    pub json: bool,

    /// Only run tasks tagged with one of these.
    #[arg(short = 't', long, value_delimiter = ',', value_name = "TAGS")]
    pub tags: Vec<String>,

    /// Skip tasks tagged with one of these.
    #[arg(long = "skip-tags", value_delimiter = ',', value_name = "TAGS")]
    pub skip_tags: Vec<String>,

    /// Increase verbosity (repeatable).
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Vault password file (or executable producing the password).
    #[arg(long, value_name = "PATH")]
    pub vault_password_file: Option<PathBuf>,

    /// Prompt for the vault password on stdin.
    #[arg(long)]
    pub ask_vault_pass: bool,

    /// Remote user override.
    #[arg(short = 'u', long, value_name = "USER")]
    pub user: Option<String>,

    /// Transport override: local, ssh, or winrm.
    #[arg(short = 'c', long, value_name = "TRANSPORT")]
    pub connection: Option<String>,

    /// Connection timeout in seconds.
    #[arg(short = 'T', long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// SSH private key file.
    #[arg(long, value_name = "PATH")]
    pub private_key: Option<PathBuf>,

    /// Escalate privileges by default.
    #[arg(short = 'b', long = "become")]
    pub escalate: bool,

    /// Escalation target user.
    #[arg(long, value_name = "USER")]
    pub become_user: Option<String>,

    /// Escalation method: sudo, su, or runas.
    #[arg(long, value_name = "METHOD")]
    pub become_method: Option<String>,

    /// Prompt for the escalation password on stdin.
    #[arg(short = 'K', long)]
    pub ask_become_pass: bool,

    /// Keep running remaining handlers on hosts that failed during a
    /// handler flush.
    #[arg(long)]
    pub force_handlers: bool,

    /// List hosts each play would target, then exit.
    #[arg(long)]
    pub list_hosts: bool,

    /// List tasks each play would run, then exit.
    #[arg(long)]
    pub list_tasks: bool,

    /// List tags used by each play, then exit.
    #[arg(long)]
    pub list_tags: bool,

    /// Parse inventory and playbooks, then exit.
    #[arg(long)]
    pub syntax_check: bool,
}

impl Cli {
    /// True when a diagnostic dry run was requested.
    pub fn diagnostic_mode(&self) -> bool {
        self.list_hosts || self.list_tasks || self.list_tags || self.syntax_check
    }

    /// Resolves the `-e` arguments into the highest-priority variable
    /// tier.
    pub fn parse_extra_vars(&self) -> Result<VarMap> {
        let mut vars = VarMap::new();
        for spec in &self.extra_vars {
            let spec = spec.trim();
            if let Some(path) = spec.strip_prefix('@') {
                let content = std::fs::read_to_string(path)
                    .map_err(|e| Error::parse(path, format!("cannot read extra-vars file: {}", e)))?;
                let loaded: VarMap = serde_yaml::from_str(&content)
                    .map_err(|e| Error::parse(path, e.to_string()))?;
                vars.extend(loaded);
            } else if spec.starts_with('{') {
                let loaded: VarMap = serde_yaml::from_str(spec)
                    .map_err(|e| Error::parse("extra-vars", e.to_string()))?;
                vars.extend(loaded);
            } else {
                for pair in spec.split_whitespace() {
                    let (key, value) = pair.split_once('=').ok_or_else(|| {
                        Error::parse(
                            "extra-vars",
                            format!("expected key=value, got '{}'", pair),
                        )
                    })?;
                    vars.insert(
                        key.to_string(),
                        crate::inventory::coerce_scalar(value),
                    );
                }
            }
        }
        Ok(vars)
    }
}
