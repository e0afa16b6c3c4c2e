//! Shared fixture for the end-to-end runner tests: write a playbook to a
//! temp dir, parse it, and execute it against an in-memory inventory.
#![allow(dead_code)]

use std::sync::Arc;

use runbook::connection::{ConnectSettings, ConnectionManager};
use runbook::error::Result;
use runbook::executor::{PlaybookRunner, RunnerOptions};
use runbook::inventory::Inventory;
use runbook::playbook::PlaybookParser;
use runbook::report::RunReport;

/// Two local hosts in one group, enough for most scenarios.
pub const TWO_LOCAL_HOSTS: &str = "\
[web]
web1 ansible_connection=local
web2 ansible_connection=local
";

pub const ONE_LOCAL_HOST: &str = "\
[web]
web1 ansible_connection=local
";

/// Runs a playbook and returns the structured report plus the outcome.
pub async fn run_playbook(
    inventory_ini: &str,
    playbook_yaml: &str,
    options: RunnerOptions,
) -> (RunReport, Result<()>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("site.yml");
    std::fs::write(&path, playbook_yaml).expect("write playbook");

    let inventory = Inventory::from_ini(inventory_ini).expect("inventory");
    let playbook = PlaybookParser::new(&path).parse().expect("parse");

    let connections = Arc::new(ConnectionManager::new(ConnectSettings::default()));
    let runner = PlaybookRunner::new(inventory, options, connections, None);
    let outcome = runner.run(&[playbook]).await;
    let report = runner.reporter().report();
    (report, outcome)
}

/// Default options for tests: structured mode silences the human stream.
pub fn quiet_options() -> RunnerOptions {
    RunnerOptions {
        forks: 5,
        json_output: true,
        ..RunnerOptions::default()
    }
}
