//! Handler notification, flush points, and once-per-play semantics.

mod common;

use common::{quiet_options, run_playbook, ONE_LOCAL_HOST};

fn counter_playbook(marker: &std::path::Path) -> String {
    format!(
        r#"
- hosts: web
  tasks:
    - name: change something
      copy:
        content: "state"
        dest: "{dir}/state.txt"
      notify: bump counter
    - name: no notification
      debug:
        msg: quiet
  handlers:
    - name: bump counter
      shell: "echo run >> {marker}"
"#,
        dir = marker.parent().unwrap().display(),
        marker = marker.display(),
    )
}

#[tokio::test]
async fn notified_handler_runs_once_at_end_of_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("counter.txt");
    let playbook = counter_playbook(&marker);

    let (report, outcome) = run_playbook(ONE_LOCAL_HOST, &playbook, quiet_options()).await;

    assert!(outcome.is_ok(), "{:?}", outcome);
    let runs = std::fs::read_to_string(&marker).unwrap_or_default();
    assert_eq!(runs.lines().count(), 1, "handler must run exactly once");

    let handler_slots: Vec<_> = report.plays[0]
        .tasks
        .iter()
        .filter(|t| t.name == "bump counter")
        .collect();
    assert_eq!(handler_slots.len(), 1);
}

#[tokio::test]
async fn unchanged_task_does_not_notify() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("counter.txt");
    let playbook = format!(
        r#"
- hosts: web
  tasks:
    - name: no change
      debug:
        msg: steady
      notify: bump counter
  handlers:
    - name: bump counter
      shell: "echo run >> {}"
"#,
        marker.display()
    );

    let (_, outcome) = run_playbook(ONE_LOCAL_HOST, &playbook, quiet_options()).await;
    assert!(outcome.is_ok());
    assert!(!marker.exists(), "debug is never 'changed', no notification");
}

#[tokio::test]
async fn multiple_notifications_still_run_once() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("counter.txt");
    let playbook = format!(
        r#"
- hosts: web
  tasks:
    - name: first change
      copy:
        content: "one"
        dest: "{dir}/a.txt"
      notify: bump counter
    - name: second change
      copy:
        content: "two"
        dest: "{dir}/b.txt"
      notify: bump counter
  handlers:
    - name: bump counter
      shell: "echo run >> {marker}"
"#,
        dir = dir.path().display(),
        marker = marker.display(),
    )
    .to_string();

    let (_, outcome) = run_playbook(ONE_LOCAL_HOST, &playbook, quiet_options()).await;
    assert!(outcome.is_ok());
    let runs = std::fs::read_to_string(&marker).unwrap_or_default();
    assert_eq!(runs.lines().count(), 1);
}

#[tokio::test]
async fn meta_flush_handlers_runs_pending_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("counter.txt");
    let playbook = format!(
        r#"
- hosts: web
  tasks:
    - name: change
      copy:
        content: "x"
        dest: "{dir}/x.txt"
      notify: bump counter
    - name: flush now
      meta: flush_handlers
    - name: observe
      command: "cat {marker}"
      register: seen
    - name: confirm handler ran before this point
      assert:
        that: "'run' in seen.stdout"
"#,
        dir = dir.path().display(),
        marker = marker.display(),
    ) + &format!(
        r#"  handlers:
    - name: bump counter
      shell: "echo run >> {}"
"#,
        marker.display()
    );

    let (_, outcome) = run_playbook(ONE_LOCAL_HOST, &playbook, quiet_options()).await;
    assert!(outcome.is_ok(), "{:?}", outcome);
    // Flushed mid-play and not re-run at the end.
    let runs = std::fs::read_to_string(&marker).unwrap_or_default();
    assert_eq!(runs.lines().count(), 1);
}

#[tokio::test]
async fn listen_tag_notifies_every_listener() {
    let dir = tempfile::tempdir().unwrap();
    let marker_a = dir.path().join("a.txt");
    let marker_b = dir.path().join("b.txt");
    let playbook = format!(
        r#"
- hosts: web
  tasks:
    - name: change
      copy:
        content: "x"
        dest: "{dir}/x.txt"
      notify: app events
  handlers:
    - name: first listener
      shell: "echo run >> {a}"
      listen: app events
    - name: second listener
      shell: "echo run >> {b}"
      listen: app events
"#,
        dir = dir.path().display(),
        a = marker_a.display(),
        b = marker_b.display(),
    );

    let (_, outcome) = run_playbook(ONE_LOCAL_HOST, &playbook, quiet_options()).await;
    assert!(outcome.is_ok());
    assert!(marker_a.exists());
    assert!(marker_b.exists());
}

#[tokio::test]
async fn handler_does_not_run_on_host_that_failed_before_flush() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("counter.txt");
    let playbook = format!(
        r#"
- hosts: web
  tasks:
    - name: change and notify
      copy:
        content: "x"
        dest: "{dir}/x.txt"
      notify: bump counter
    - name: then die
      fail:
        msg: fatal before flush
  handlers:
    - name: bump counter
      shell: "echo run >> {marker}"
"#,
        dir = dir.path().display(),
        marker = marker.display(),
    );

    let (_, outcome) = run_playbook(ONE_LOCAL_HOST, &playbook, quiet_options()).await;
    assert!(outcome.is_err());
    assert!(
        !marker.exists(),
        "a failed host must not run its pending handlers"
    );
}
