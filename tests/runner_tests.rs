//! End-to-end runner behavior over the local transport: linear fan-out,
//! conditionals, loops, registration, and check mode.

mod common;

use common::{quiet_options, run_playbook, ONE_LOCAL_HOST, TWO_LOCAL_HOSTS};
use runbook::error::Error;
use runbook::report::TaskStatus;

#[tokio::test]
async fn two_hosts_one_task_linear_fan_out() {
    let playbook = r#"
- name: hello
  hosts: web
  tasks:
    - name: greet
      debug:
        msg: "hello {{ inventory_hostname }}"
"#;
    let (report, outcome) = run_playbook(TWO_LOCAL_HOSTS, playbook, quiet_options()).await;

    assert!(outcome.is_ok());
    let task = &report.plays[0].tasks[0];
    assert_eq!(task.per_host.len(), 2);
    assert!(task.per_host["web1"].msg.contains("hello web1"));
    assert!(task.per_host["web2"].msg.contains("hello web2"));
    assert_eq!(report.stats["web1"].ok, 1);
    assert_eq!(report.stats["web2"].ok, 1);
    assert_eq!(report.stats["web1"].failed, 0);
}

#[tokio::test]
async fn loop_with_conditional_and_register() {
    let playbook = r#"
- hosts: web
  tasks:
    - name: echo items
      command: "/bin/echo {{ item }}"
      loop: [a, b, c]
      when: item != 'b'
      register: r
    - name: inspect register
      assert:
        that:
          - "r.results | length == 3"
          - "r.results[1].skipped"
          - "not r.results[0].skipped"
          - "'a' in r.results[0].stdout"
          - "'c' in r.results[2].stdout"
"#;
    let (report, outcome) = run_playbook(ONE_LOCAL_HOST, playbook, quiet_options()).await;

    assert!(outcome.is_ok(), "assert task should pass: {:?}", outcome);
    let loop_task = &report.plays[0].tasks[0];
    let results = loop_task.per_host["web1"].results["results"]
        .as_array()
        .expect("results list");
    assert_eq!(results.len(), 3);
    assert_eq!(results[1]["status"], "skipped");
    assert_ne!(results[0]["status"], "skipped");
    assert_ne!(results[2]["status"], "skipped");
}

#[tokio::test]
async fn empty_loop_is_skipped_without_change() {
    let playbook = r#"
- hosts: web
  vars:
    empty: []
  tasks:
    - name: nothing to do
      command: "/bin/echo {{ item }}"
      loop: "{{ empty }}"
"#;
    let (report, outcome) = run_playbook(ONE_LOCAL_HOST, playbook, quiet_options()).await;

    assert!(outcome.is_ok());
    let result = &report.plays[0].tasks[0].per_host["web1"];
    assert_eq!(result.status, TaskStatus::Skipped);
    assert!(!result.changed);
}

#[tokio::test]
async fn failed_host_skips_subsequent_tasks() {
    let playbook = r#"
- hosts: web
  tasks:
    - name: boom
      fail:
        msg: "down you go"
    - name: never runs
      debug:
        msg: "unreachable code"
"#;
    let (report, outcome) = run_playbook(ONE_LOCAL_HOST, playbook, quiet_options()).await;

    assert!(matches!(outcome, Err(Error::HostsFailed)));
    assert_eq!(report.stats["web1"].failed, 1);
    // The second task scheduled no hosts, so it never opened a slot.
    assert_eq!(report.plays[0].tasks.len(), 1);
}

#[tokio::test]
async fn ignore_errors_keeps_host_eligible() {
    let playbook = r#"
- hosts: web
  tasks:
    - name: soft failure
      command: "/bin/false"
      ignore_errors: true
    - name: still runs
      debug:
        msg: "alive"
"#;
    let (report, outcome) = run_playbook(ONE_LOCAL_HOST, playbook, quiet_options()).await;

    assert!(outcome.is_ok());
    assert_eq!(report.stats["web1"].ignored, 1);
    assert_eq!(report.stats["web1"].failed, 0);
    assert_eq!(report.plays[0].tasks[1].per_host["web1"].status, TaskStatus::Ok);
}

#[tokio::test]
async fn set_fact_feeds_later_tasks() {
    let playbook = r#"
- hosts: web
  tasks:
    - name: remember
      set_fact:
        flavor: crispy
    - name: recall
      assert:
        that: "flavor == 'crispy'"
"#;
    let (_, outcome) = run_playbook(ONE_LOCAL_HOST, playbook, quiet_options()).await;
    assert!(outcome.is_ok(), "{:?}", outcome);
}

#[tokio::test]
async fn registered_result_drives_conditionals() {
    let playbook = r#"
- hosts: web
  tasks:
    - name: probe
      command: "/bin/echo ready"
      register: probe
    - name: follow up
      debug:
        msg: "saw {{ probe.stdout }}"
      when: probe is changed
"#;
    let (report, outcome) = run_playbook(ONE_LOCAL_HOST, playbook, quiet_options()).await;
    assert!(outcome.is_ok());
    assert!(report.plays[0].tasks[1].per_host["web1"]
        .msg
        .contains("saw ready"));
}

#[tokio::test]
async fn check_mode_reports_would_change_without_mutating() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("never-written.txt");
    let playbook = format!(
        r#"
- hosts: web
  tasks:
    - name: would write
      copy:
        content: "data"
        dest: "{}"
"#,
        dest.display()
    );
    let mut options = quiet_options();
    options.check_mode = true;
    let (report, outcome) = run_playbook(ONE_LOCAL_HOST, &playbook, options).await;

    assert!(outcome.is_ok());
    assert_eq!(
        report.plays[0].tasks[0].per_host["web1"].status,
        TaskStatus::Changed
    );
    assert!(!dest.exists());
}

#[tokio::test]
async fn forks_of_one_behaves_serially() {
    let playbook = r#"
- hosts: web
  tasks:
    - name: step one
      command: "/bin/echo one"
    - name: step two
      command: "/bin/echo two"
"#;
    let mut options = quiet_options();
    options.forks = 1;
    let (report, outcome) = run_playbook(TWO_LOCAL_HOSTS, playbook, options).await;

    assert!(outcome.is_ok());
    for task in &report.plays[0].tasks {
        assert_eq!(task.per_host.len(), 2);
    }
    assert_eq!(report.stats["web1"].changed, 2);
    assert_eq!(report.stats["web2"].changed, 2);
}

#[tokio::test]
async fn empty_inventory_completes_cleanly() {
    let playbook = r#"
- hosts: all
  tasks:
    - debug:
        msg: "nobody home"
"#;
    let (report, outcome) = run_playbook("", playbook, quiet_options()).await;
    assert!(outcome.is_ok());
    assert!(report.stats.is_empty());
}

#[tokio::test]
async fn changed_when_override() {
    let playbook = r#"
- hosts: web
  tasks:
    - name: report ok despite execution
      command: "/bin/echo side effect free"
      changed_when: false
"#;
    let (report, outcome) = run_playbook(ONE_LOCAL_HOST, playbook, quiet_options()).await;
    assert!(outcome.is_ok());
    let result = &report.plays[0].tasks[0].per_host["web1"];
    assert_eq!(result.status, TaskStatus::Ok);
    assert!(!result.changed);
}

#[tokio::test]
async fn failed_when_promotes_success_to_failure() {
    let playbook = r#"
- hosts: web
  tasks:
    - name: lies
      command: "/bin/echo ERROR in output"
      register: out
      failed_when: "'ERROR' in out.stdout"
"#;
    let (report, outcome) = run_playbook(ONE_LOCAL_HOST, playbook, quiet_options()).await;
    assert!(matches!(outcome, Err(Error::HostsFailed)));
    assert_eq!(
        report.plays[0].tasks[0].per_host["web1"].status,
        TaskStatus::Failed
    );
}

#[tokio::test]
async fn undefined_variable_fails_the_task() {
    let playbook = r#"
- hosts: web
  tasks:
    - name: strict
      debug:
        msg: "{{ no_such_variable }}"
"#;
    let (report, outcome) = run_playbook(ONE_LOCAL_HOST, playbook, quiet_options()).await;
    assert!(matches!(outcome, Err(Error::HostsFailed)));
    assert_eq!(
        report.plays[0].tasks[0].per_host["web1"].status,
        TaskStatus::Failed
    );
}

#[tokio::test]
async fn any_errors_fatal_stops_the_play() {
    let playbook = r#"
- hosts: web
  any_errors_fatal: true
  tasks:
    - name: fail on one host
      fail:
        msg: nope
      when: inventory_hostname == 'web1'
    - name: would continue
      debug:
        msg: next
"#;
    let (report, outcome) = run_playbook(TWO_LOCAL_HOSTS, playbook, quiet_options()).await;
    assert!(matches!(outcome, Err(Error::HostsFailed)));
    // The second task never scheduled on either host.
    assert_eq!(report.plays[0].tasks.len(), 1);
}
