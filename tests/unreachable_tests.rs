//! Unreachable-host exclusion: a host whose transport cannot connect is
//! dropped from the rest of the play while the others keep going.

mod common;

use common::{quiet_options, run_playbook};
use runbook::error::Error;
use runbook::report::TaskStatus;

/// web2 points its SSH transport at a port nothing listens on.
const MIXED_INVENTORY: &str = "\
[web]
web1 ansible_connection=local
web2 ansible_connection=ssh ansible_host=127.0.0.1 ansible_port=1
";

#[tokio::test]
async fn unreachable_host_is_excluded_for_the_rest_of_the_play() {
    let playbook = r#"
- hosts: web
  tasks:
    - name: first
      debug:
        msg: "hello {{ inventory_hostname }}"
    - name: second
      debug:
        msg: "again {{ inventory_hostname }}"
"#;
    let (report, outcome) = run_playbook(MIXED_INVENTORY, playbook, quiet_options()).await;

    assert!(matches!(outcome, Err(Error::HostsFailed)));

    let first = &report.plays[0].tasks[0];
    assert_eq!(first.per_host["web1"].status, TaskStatus::Ok);
    assert_eq!(first.per_host["web2"].status, TaskStatus::Unreachable);

    // web1 completed every task; web2 received no further attempts.
    let second = &report.plays[0].tasks[1];
    assert_eq!(second.per_host["web1"].status, TaskStatus::Ok);
    assert!(!second.per_host.contains_key("web2"));

    let stats = &report.stats;
    assert_eq!(stats["web1"].ok, 2);
    assert_eq!(stats["web2"].unreachable, 1);
}
