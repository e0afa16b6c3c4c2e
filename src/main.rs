//! runbook - a minimal configuration-management runner.
//!
//! Entry point: flag parsing, logging, vault and inventory setup, then
//! either a diagnostic dry run or the playbook executor.

use anyhow::Result;
use clap::Parser;
use std::io::BufRead;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use runbook::cli::Cli;
use runbook::config::{Config, HostKeyPolicy};
use runbook::connection::{ConnectSettings, ConnectionManager};
use runbook::error::Error;
use runbook::executor::{self, PlaybookRunner, RunnerOptions};
use runbook::inventory::{Inventory, TransportKind};
use runbook::output;
use runbook::playbook::{Playbook, PlaybookParser};
use runbook::vault::{VaultLib, VaultSecret};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(error) => {
            let code = error.exit_code();
            // Host failures were already narrated by the reporter.
            if !matches!(error, Error::HostsFailed) {
                output::error(&error.to_string());
            }
            code
        }
    };
    std::process::exit(code);
}

fn init_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(verbosity >= 3).with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

async fn run(cli: Cli) -> runbook::error::Result<()> {
    let config = Config::from_env();

    let vault = build_vault(&cli, &config)?;

    // Inventory: CLI flag, then the environment default, then empty.
    let inventory = match cli.inventory.clone().or_else(|| config.inventory.clone()) {
        Some(path) => Inventory::load(path)?,
        None => {
            output::warning("no inventory was provided; only patterns matching zero hosts will resolve");
            Inventory::new()
        }
    };

    let mut playbooks: Vec<Playbook> = Vec::new();
    for path in &cli.playbooks {
        let playbook = PlaybookParser::new(path)
            .with_vault(vault.clone())
            .parse()?;
        playbooks.push(playbook);
    }

    if cli.diagnostic_mode() {
        return diagnostics(&cli, &inventory, &playbooks);
    }

    let connect = ConnectSettings {
        timeout: cli.timeout.unwrap_or(config.timeout),
        host_key_policy: resolve_host_key_policy(&config),
        remote_user: cli.user.clone().or_else(|| config.remote_user.clone()),
        private_key: cli.private_key.clone(),
        transport: cli.connection.as_deref().map(TransportKind::parse),
    };

    let become_password = if cli.ask_become_pass {
        Some(prompt("BECOME password: ")?)
    } else {
        None
    };

    let options = RunnerOptions {
        forks: cli.forks.unwrap_or(config.forks),
        limit: cli.limit.clone(),
        check_mode: cli.check,
        diff_mode: cli.diff,
        verbosity: cli.verbose,
        extra_vars: cli.parse_extra_vars()?,
        tags: cli.tags.clone(),
        skip_tags: cli.skip_tags.clone(),
        force_handlers: cli.force_handlers,
        json_output: cli.json,
        r#become: cli.escalate,
        become_user: cli.become_user.clone(),
        become_method: cli.become_method.clone(),
        become_password,
    };

    let connections = Arc::new(ConnectionManager::new(connect));
    let runner = PlaybookRunner::new(inventory, options, connections, vault);

    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            executor::request_interrupt();
        }
    });

    let outcome = runner.run(&playbooks).await;

    if cli.json {
        println!("{}", runner.reporter().to_json()?);
    }
    outcome
}

fn build_vault(cli: &Cli, config: &Config) -> runbook::error::Result<Option<Arc<VaultLib>>> {
    let mut vault = VaultLib::new();
    if let Some(path) = cli
        .vault_password_file
        .clone()
        .or_else(|| config.vault_password_file.clone())
    {
        vault.add_secret(VaultSecret::from_file(path)?);
    }
    if cli.ask_vault_pass {
        vault.add_secret(VaultSecret::new(prompt("Vault password: ")?));
    }
    Ok(vault.has_secrets().then(|| Arc::new(vault)))
}

fn resolve_host_key_policy(config: &Config) -> HostKeyPolicy {
    config.host_key_policy
}

fn prompt(message: &str) -> runbook::error::Result<String> {
    eprint!("{}", message);
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(Error::Io)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// The diagnostic dry runs: everything parses, no host is contacted.
fn diagnostics(
    cli: &Cli,
    inventory: &Inventory,
    playbooks: &[Playbook],
) -> runbook::error::Result<()> {
    if cli.syntax_check {
        for playbook in playbooks {
            println!("playbook: {} (syntax ok)", playbook.path.display());
        }
        return Ok(());
    }

    for playbook in playbooks {
        println!("playbook: {}", playbook.path.display());
        for play in &playbook.plays {
            println!("  play: {}", play.name);

            if cli.list_hosts {
                let mut hosts = inventory.select(&play.hosts)?;
                if let Some(limit) = &cli.limit {
                    let allowed: std::collections::HashSet<String> = inventory
                        .select(limit)?
                        .iter()
                        .map(|h| h.name.clone())
                        .collect();
                    hosts.retain(|h| allowed.contains(&h.name));
                }
                println!("    hosts ({}):", hosts.len());
                for host in hosts {
                    println!("      {}", host.name);
                }
            }
            if cli.list_tasks {
                println!("    tasks:");
                for name in play.task_names() {
                    println!("      {}", name);
                }
            }
            if cli.list_tags {
                println!("    tags: [{}]", play.all_tags().join(", "));
            }
        }
    }
    Ok(())
}
