//! Result accumulation: per-task per-host outcomes, per-host counters,
//! and the machine-readable run document.
//!
//! Results arrive in task-completion order and may be out of order within
//! a task (hosts finish concurrently); the reporter keys every record on
//! `(task_index, host_name)` so the final document is deterministic.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::modules::{DiffPayload, ModuleOutput};

/// Status of one task on one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum TaskStatus {
    Ok,
    Changed,
    Failed,
    Skipped,
    Unreachable,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Ok => "ok",
            TaskStatus::Changed => "changed",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Unreachable => "unreachable",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of one task on one host.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    /// Final status after overrides.
    pub status: TaskStatus,
    /// Whether remote state changed (or would change, in check mode).
    pub changed: bool,
    /// One-line human message.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub msg: String,
    /// Module-specific result map.
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub results: serde_json::Map<String, serde_json::Value>,
    /// Captured standard output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// Captured standard error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Exit code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rc: Option<i32>,
    /// Before/after payload from file-editing modules in diff mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<DiffPayload>,
    /// The task failed but `ignore_errors` kept the host eligible.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub ignored: bool,
}

impl TaskResult {
    /// A bare result with the given status.
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status,
            changed: status == TaskStatus::Changed,
            msg: String::new(),
            results: serde_json::Map::new(),
            stdout: None,
            stderr: None,
            rc: None,
            diff: None,
            ignored: false,
        }
    }

    /// A skipped result with a reason.
    pub fn skipped(msg: impl Into<String>) -> Self {
        let mut result = Self::status(TaskStatus::Skipped);
        result.msg = msg.into();
        result
    }

    /// A failed result with a message.
    pub fn failed(msg: impl Into<String>) -> Self {
        let mut result = Self::status(TaskStatus::Failed);
        result.msg = msg.into();
        result
    }

    /// An unreachable result with a message.
    pub fn unreachable(msg: impl Into<String>) -> Self {
        let mut result = Self::status(TaskStatus::Unreachable);
        result.msg = msg.into();
        result
    }

    /// Converts a module output into a result.
    pub fn from_output(output: ModuleOutput) -> Self {
        let status = if output.failed {
            TaskStatus::Failed
        } else if output.skipped {
            TaskStatus::Skipped
        } else if output.changed {
            TaskStatus::Changed
        } else {
            TaskStatus::Ok
        };
        Self {
            status,
            changed: output.changed,
            msg: output.msg,
            results: output.data,
            stdout: output.stdout,
            stderr: output.stderr,
            rc: output.rc,
            diff: output.diff,
            ignored: false,
        }
    }

    /// True for failed or unreachable.
    pub fn is_failure(&self) -> bool {
        matches!(self.status, TaskStatus::Failed | TaskStatus::Unreachable)
    }

    /// The value stored under a `register:` name: flags, captured output,
    /// split lines, and the module result map flattened in.
    pub fn registered_value(&self) -> serde_yaml::Value {
        let mut map = serde_yaml::Mapping::new();
        let insert = |map: &mut serde_yaml::Mapping, k: &str, v: serde_yaml::Value| {
            map.insert(serde_yaml::Value::String(k.to_string()), v);
        };

        insert(&mut map, "changed", serde_yaml::Value::Bool(self.changed));
        insert(
            &mut map,
            "failed",
            serde_yaml::Value::Bool(self.status == TaskStatus::Failed),
        );
        insert(
            &mut map,
            "skipped",
            serde_yaml::Value::Bool(self.status == TaskStatus::Skipped),
        );
        insert(
            &mut map,
            "status",
            serde_yaml::Value::String(self.status.to_string()),
        );
        insert(
            &mut map,
            "msg",
            serde_yaml::Value::String(self.msg.clone()),
        );
        insert(
            &mut map,
            "rc",
            serde_yaml::Value::Number(self.rc.unwrap_or(0).into()),
        );

        let stdout = self.stdout.clone().unwrap_or_default();
        let stderr = self.stderr.clone().unwrap_or_default();
        insert(
            &mut map,
            "stdout_lines",
            serde_yaml::Value::Sequence(
                stdout
                    .lines()
                    .map(|l| serde_yaml::Value::String(l.to_string()))
                    .collect(),
            ),
        );
        insert(
            &mut map,
            "stderr_lines",
            serde_yaml::Value::Sequence(
                stderr
                    .lines()
                    .map(|l| serde_yaml::Value::String(l.to_string()))
                    .collect(),
            ),
        );
        insert(&mut map, "stdout", serde_yaml::Value::String(stdout));
        insert(&mut map, "stderr", serde_yaml::Value::String(stderr));

        for (key, value) in &self.results {
            insert(
                &mut map,
                key,
                serde_yaml::to_value(value).unwrap_or(serde_yaml::Value::Null),
            );
        }

        serde_yaml::Value::Mapping(map)
    }
}

/// Per-host counters for the recap.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[allow(missing_docs)]
pub struct HostStats {
    pub ok: u32,
    pub changed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub unreachable: u32,
    /// Failures caught by a rescue section.
    pub rescued: u32,
    /// Failures suppressed by `ignore_errors`.
    pub ignored: u32,
}

impl HostStats {
    /// Records one result.
    pub fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Ok => self.ok += 1,
            TaskStatus::Changed => self.changed += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Skipped => self.skipped += 1,
            TaskStatus::Unreachable => self.unreachable += 1,
        }
    }

    /// True if the host saw any failure.
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.unreachable > 0
    }
}

/// One task's results across hosts.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    /// Task name.
    pub name: String,
    /// Module name.
    pub module: String,
    /// Results keyed by host name.
    pub per_host: BTreeMap<String, TaskResult>,
}

/// One play's results.
#[derive(Debug, Clone, Serialize)]
pub struct PlayReport {
    /// Play name.
    pub name: String,
    /// Hosts the play targeted.
    pub hosts: Vec<String>,
    /// Tasks in execution order.
    pub tasks: Vec<TaskReport>,
}

/// The full machine-readable run document.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// Plays in execution order.
    pub plays: Vec<PlayReport>,
    /// Aggregated per-host counters.
    pub stats: BTreeMap<String, HostStats>,
}

/// Accumulates results across the run. The executor is the only writer;
/// workers hand results through it under a lock.
#[derive(Default)]
pub struct Reporter {
    state: Mutex<RunReport>,
}

impl Reporter {
    /// Creates an empty reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new play section.
    pub fn play_start(&self, name: &str, hosts: Vec<String>) {
        self.state.lock().plays.push(PlayReport {
            name: name.to_string(),
            hosts,
            tasks: Vec::new(),
        });
    }

    /// Opens a task slot and returns its index within the current play.
    pub fn task_start(&self, name: &str, module: &str) -> usize {
        let mut state = self.state.lock();
        let play = state.plays.last_mut().expect("task outside a play");
        play.tasks.push(TaskReport {
            name: name.to_string(),
            module: module.to_string(),
            per_host: BTreeMap::new(),
        });
        play.tasks.len() - 1
    }

    /// Records one host's result for a task. Tolerates out-of-order
    /// arrival within the task by keying on `(task_index, host)`.
    pub fn record(&self, task_index: usize, host: &str, result: TaskResult) {
        let mut state = self.state.lock();
        let status = result.status;
        let ignored = result.ignored;
        if let Some(play) = state.plays.last_mut() {
            if let Some(task) = play.tasks.get_mut(task_index) {
                task.per_host.insert(host.to_string(), result);
            }
        }
        let stats = state.stats.entry(host.to_string()).or_default();
        if ignored {
            stats.ignored += 1;
        } else {
            stats.record(status);
        }
    }

    /// Converts one recorded failure into a rescued outcome after a
    /// rescue section caught it.
    pub fn mark_rescued(&self, host: &str) {
        let mut state = self.state.lock();
        let stats = state.stats.entry(host.to_string()).or_default();
        if stats.failed > 0 {
            stats.failed -= 1;
        }
        stats.rescued += 1;
    }

    /// Aggregated per-host counters.
    pub fn stats(&self) -> BTreeMap<String, HostStats> {
        self.state.lock().stats.clone()
    }

    /// True if any host failed or was unreachable.
    pub fn has_failures(&self) -> bool {
        self.state.lock().stats.values().any(|s| s.has_failures())
    }

    /// Snapshot of the structured document.
    pub fn report(&self) -> RunReport {
        self.state.lock().clone()
    }

    /// Serializes the structured document.
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(&self.report())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_order_arrivals_key_correctly() {
        let reporter = Reporter::new();
        reporter.play_start("p", vec!["h1".into(), "h2".into()]);
        let t0 = reporter.task_start("first", "debug");
        let t1 = reporter.task_start("second", "debug");

        // Second task's results land before the first task's.
        reporter.record(t1, "h2", TaskResult::status(TaskStatus::Changed));
        reporter.record(t0, "h2", TaskResult::status(TaskStatus::Ok));
        reporter.record(t0, "h1", TaskResult::status(TaskStatus::Ok));
        reporter.record(t1, "h1", TaskResult::failed("boom"));

        let report = reporter.report();
        let tasks = &report.plays[0].tasks;
        assert_eq!(tasks[0].per_host["h1"].status, TaskStatus::Ok);
        assert_eq!(tasks[1].per_host["h1"].status, TaskStatus::Failed);
        assert_eq!(tasks[1].per_host["h2"].status, TaskStatus::Changed);

        let stats = reporter.stats();
        assert_eq!(stats["h1"].ok, 1);
        assert_eq!(stats["h1"].failed, 1);
        assert_eq!(stats["h2"].ok, 1);
        assert_eq!(stats["h2"].changed, 1);
        assert!(reporter.has_failures());
    }

    #[test]
    fn registered_value_shape() {
        let mut result = TaskResult::status(TaskStatus::Changed);
        result.stdout = Some("a\nb".to_string());
        result.rc = Some(0);
        result
            .results
            .insert("dest".to_string(), serde_json::json!("/tmp/x"));

        let value = result.registered_value();
        let map = value.as_mapping().unwrap();
        assert_eq!(map.get("changed"), Some(&serde_yaml::Value::Bool(true)));
        assert_eq!(map.get("failed"), Some(&serde_yaml::Value::Bool(false)));
        assert_eq!(
            map.get("stdout_lines").and_then(|v| v.as_sequence()).map(|s| s.len()),
            Some(2)
        );
        assert_eq!(
            map.get("dest"),
            Some(&serde_yaml::Value::String("/tmp/x".into()))
        );
    }

    #[test]
    fn module_output_status_mapping() {
        let out = ModuleOutput::changed("x");
        assert_eq!(TaskResult::from_output(out).status, TaskStatus::Changed);
        let out = ModuleOutput::skipped("y");
        assert_eq!(TaskResult::from_output(out).status, TaskStatus::Skipped);
        let out = ModuleOutput::failed("z");
        assert!(TaskResult::from_output(out).is_failure());
    }
}
