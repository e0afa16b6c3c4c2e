//! The runner: linear-strategy playbook execution.
//!
//! Plays run sequentially; within a play, each task fans out across all
//! eligible hosts with bounded concurrency (forks) before the next task
//! starts. Per-host state lives in [`HostContext`], owned by the host's
//! worker future while a task runs. Blocks execute structurally
//! (body, then rescue for hosts that failed in the body, then always for
//! every host that entered); handlers flush after each task section and
//! on `meta: flush_handlers`.

pub mod context;

pub use context::HostContext;

use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::{MAX_CONNECTIONS, SHUTDOWN_GRACE_SECS};
use crate::connection::{
    Connection, ConnectionError, ConnectionManager, Escalation, RunOptions,
};
use crate::error::{Error, Result};
use crate::inventory::{Host, Inventory, TransportKind};
use crate::modules::{global_registry, ModuleContext, ModuleError, ModuleParams};
use crate::output;
use crate::playbook::{Block, Handler, Include, Play, Playbook, Task, TaskUnit};
use crate::report::{Reporter, TaskResult, TaskStatus};
use crate::template::TemplateEngine;
use crate::vars::{self, merge_var, VarMap};
use crate::vault::VaultLib;

/// Process-wide cancellation flag, set by the signal handler and polled
/// between tasks.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Requests a graceful shutdown: no new tasks are scheduled.
pub fn request_interrupt() {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Runner-level options, resolved from CLI flags and defaults.
#[derive(Debug, Clone, Default)]
pub struct RunnerOptions {
    /// Per-task cross-host concurrency bound.
    pub forks: usize,
    /// Further restricts play host selection.
    pub limit: Option<String>,
    /// Dry-run default for every play.
    pub check_mode: bool,
    /// Diff-mode default for every play.
    pub diff_mode: bool,
    /// Verbosity counter from the CLI.
    pub verbosity: u8,
    /// Highest-priority variable tier.
    pub extra_vars: VarMap,
    /// Only run tasks carrying one of these tags.
    pub tags: Vec<String>,
    /// Skip tasks carrying one of these tags.
    pub skip_tags: Vec<String>,
    /// Keep running remaining handlers on hosts failed mid-flush.
    pub force_handlers: bool,
    /// Suppress the human stream (structured output mode).
    pub json_output: bool,
    /// CLI-level become default (never applied to local transports).
    pub r#become: bool,
    /// CLI-level escalation user.
    pub become_user: Option<String>,
    /// CLI-level escalation method.
    pub become_method: Option<String>,
    /// Escalation password from the prompt.
    pub become_password: Option<String>,
}

/// Flow control after a task: keep going, or stop the play
/// (`any_errors_fatal`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Inherited execution properties from enclosing blocks and includes.
#[derive(Clone, Default)]
struct Scope {
    /// Conditions ANDed onto every task's own `when`.
    whens: Vec<serde_yaml::Value>,
    become_: Option<bool>,
    become_user: Option<String>,
    become_method: Option<String>,
    /// Variables contributed by includes, below task vars.
    task_vars: VarMap,
    /// When set, only these hosts receive tasks (rescue/always/handlers).
    restrict: Option<HashSet<String>>,
    /// Run even on hosts already marked failed (always sections,
    /// forced handler flush).
    include_failed: bool,
    /// Use the handler banner.
    handler: bool,
}

/// Executes playbooks against an inventory.
pub struct PlaybookRunner {
    inventory: Inventory,
    options: RunnerOptions,
    reporter: Arc<Reporter>,
    connections: Arc<ConnectionManager>,
    vault: Option<Arc<VaultLib>>,
}

impl PlaybookRunner {
    /// Creates a runner.
    pub fn new(
        inventory: Inventory,
        options: RunnerOptions,
        connections: Arc<ConnectionManager>,
        vault: Option<Arc<VaultLib>>,
    ) -> Self {
        Self {
            inventory,
            options,
            reporter: Arc::new(Reporter::new()),
            connections,
            vault,
        }
    }

    /// The accumulated results.
    pub fn reporter(&self) -> &Arc<Reporter> {
        &self.reporter
    }

    /// Runs every play of every playbook. Returns `Error::HostsFailed`
    /// when any host failed or was unreachable.
    pub async fn run(&self, playbooks: &[Playbook]) -> Result<()> {
        let outcome = self.run_inner(playbooks).await;

        // Give in-flight transports a bounded window to release.
        let _ = tokio::time::timeout(
            std::time::Duration::from_secs(SHUTDOWN_GRACE_SECS),
            self.connections.close_all(),
        )
        .await;

        if !self.options.json_output {
            output::recap(&self.reporter.stats());
        }

        outcome?;
        if self.reporter.has_failures() {
            return Err(Error::HostsFailed);
        }
        Ok(())
    }

    async fn run_inner(&self, playbooks: &[Playbook]) -> Result<()> {
        for playbook in playbooks {
            let base_dir = playbook
                .path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            for play in &playbook.plays {
                if interrupted() {
                    return Err(Error::Interrupted);
                }
                self.run_play(play, &base_dir).await?;
            }
        }
        Ok(())
    }

    async fn run_play(&self, play: &Play, base_dir: &Path) -> Result<()> {
        let mut selected: Vec<&Host> = self.inventory.select(&play.hosts)?;
        if let Some(limit) = &self.options.limit {
            let allowed: HashSet<String> = self
                .inventory
                .select(limit)?
                .iter()
                .map(|h| h.name.clone())
                .collect();
            selected.retain(|h| allowed.contains(&h.name));
        }

        if !self.options.json_output {
            output::play_banner(&play.name);
        }
        self.reporter
            .play_start(&play.name, selected.iter().map(|h| h.name.clone()).collect());

        if selected.is_empty() {
            output::warning(&format!("no hosts matched for play: {}", play.hosts));
            return Ok(());
        }
        if selected.len() > MAX_CONNECTIONS {
            return Err(Error::TooManyHosts {
                hosts: selected.len(),
                limit: MAX_CONNECTIONS,
            });
        }

        let engine = Arc::new(TemplateEngine::new(base_dir));
        let check_mode = self.options.check_mode || play.check_mode.unwrap_or(false);
        let diff_mode = self.options.diff_mode || play.diff.unwrap_or(false);

        let mut run = PlayRun {
            runner: self,
            play,
            engine,
            base_dir: base_dir.to_path_buf(),
            host_order: selected.iter().map(|h| h.name.clone()).collect(),
            ctxs: HashMap::new(),
        };
        for host in selected {
            let mut snapshot = vars::merged_host_vars(&self.inventory, host);
            for (key, value) in &play.vars {
                merge_var(&mut snapshot, key, value.clone());
            }
            if let Some(vault) = &self.vault {
                decrypt_vars(&mut snapshot, vault)?;
            }
            run.ctxs.insert(
                host.name.clone(),
                HostContext::new(host.clone(), snapshot, check_mode, diff_mode),
            );
        }

        if play.gather_facts {
            let setup = Task {
                name: "Gathering Facts".to_string(),
                module: "setup".to_string(),
                raw_module: "setup".to_string(),
                args: serde_yaml::Value::Mapping(serde_yaml::Mapping::new()),
                loop_var: "item".to_string(),
                ..Task::default()
            };
            run.run_task(&setup, &Scope::default()).await?;
        }

        // Each section ends at a handler flush point.
        let sections: [&[TaskUnit]; 3] = [&play.pre_tasks, &play.tasks, &play.post_tasks];
        for units in sections {
            let flow = run.run_units(units, &Scope::default()).await?;
            run.flush_handlers().await?;
            if flow == Flow::Stop {
                debug!(play = %play.name, "stopping play: any_errors_fatal");
                break;
            }
        }

        Ok(())
    }

    /// Whether a task passes the tag filters.
    fn tag_allows(&self, tags: &[String]) -> bool {
        if tags.iter().any(|t| self.options.skip_tags.contains(t)) {
            return false;
        }
        if self.options.tags.is_empty() {
            return true;
        }
        tags.iter()
            .any(|t| t == "always" || self.options.tags.contains(t))
    }
}

/// State for one play in flight.
struct PlayRun<'a> {
    runner: &'a PlaybookRunner,
    play: &'a Play,
    engine: Arc<TemplateEngine>,
    base_dir: PathBuf,
    host_order: Vec<String>,
    ctxs: HashMap<String, HostContext>,
}

/// Boxed future alias for the mutually recursive scheduling functions
/// (units contain blocks contain units; meta tasks flush handlers which
/// run handler tasks).
type ScheduleFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + 'a>>;

impl PlayRun<'_> {
    fn run_units<'a>(
        &'a mut self,
        units: &'a [TaskUnit],
        scope: &'a Scope,
    ) -> ScheduleFuture<'a, Result<Flow>> {
        Box::pin(async move {
            for unit in units {
                if interrupted() {
                    return Err(Error::Interrupted);
                }
                let flow = match unit {
                    TaskUnit::Task(task) => self.run_task(task, scope).await?,
                    TaskUnit::Block(block) => self.run_block(block, scope).await?,
                    TaskUnit::Include(include) => self.run_include(include, scope).await?,
                };
                if flow == Flow::Stop {
                    return Ok(Flow::Stop);
                }
            }
            Ok(Flow::Continue)
        })
    }

    /// Body, then rescue for hosts the body failed, then always for every
    /// host that entered.
    async fn run_block(&mut self, block: &Block, scope: &Scope) -> Result<Flow> {
        if !self.runner.tag_allows(&block.tags) {
            return Ok(Flow::Continue);
        }

        let entered: HashSet<String> = self
            .host_order
            .iter()
            .filter(|name| {
                scope
                    .restrict
                    .as_ref()
                    .map(|r| r.contains(*name))
                    .unwrap_or(true)
            })
            .filter(|name| {
                self.ctxs
                    .get(*name)
                    .map(|c| c.eligible() || (scope.include_failed && !c.unreachable))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        if entered.is_empty() {
            return Ok(Flow::Continue);
        }

        let pre_failed: HashSet<String> = self
            .ctxs
            .iter()
            .filter(|(_, c)| c.failed)
            .map(|(n, _)| n.clone())
            .collect();

        let mut child = scope.clone();
        if let Some(when) = &block.when {
            child.whens.push(when.clone());
        }
        if block.r#become.is_some() {
            child.become_ = block.r#become;
        }
        if block.become_user.is_some() {
            child.become_user = block.become_user.clone();
        }
        if block.become_method.is_some() {
            child.become_method = block.become_method.clone();
        }
        child.restrict = Some(entered.clone());

        let mut flow = self.run_units(&block.body, &child).await?;

        // Hosts that failed inside this block body are rescue candidates.
        let candidates: Vec<String> = entered
            .iter()
            .filter(|name| !pre_failed.contains(*name))
            .filter(|name| self.ctxs.get(*name).map(|c| c.failed).unwrap_or(false))
            .cloned()
            .collect();

        if !candidates.is_empty() && !block.rescue.is_empty() {
            for name in &candidates {
                if let Some(ctx) = self.ctxs.get_mut(name) {
                    ctx.failed = false;
                }
                self.runner.reporter.mark_rescued(name);
            }
            let mut rescue_scope = child.clone();
            rescue_scope.restrict = Some(candidates.iter().cloned().collect());
            let rescue_flow = self.run_units(&block.rescue, &rescue_scope).await?;
            if rescue_flow == Flow::Stop {
                flow = Flow::Stop;
            }
        }

        if !block.always.is_empty() {
            let mut always_scope = child.clone();
            always_scope.restrict = Some(entered);
            always_scope.include_failed = true;
            let always_flow = self.run_units(&block.always, &always_scope).await?;
            if always_flow == Flow::Stop {
                flow = Flow::Stop;
            }
        }

        Ok(flow)
    }

    /// Expands a dynamic include at the moment it is reached.
    async fn run_include(&mut self, include: &Include, scope: &Scope) -> Result<Flow> {
        if !self.runner.tag_allows(&include.tags) {
            return Ok(Flow::Continue);
        }

        // The file/role reference renders against host-independent vars
        // (play vars and extra vars); per-host conditions stay on the
        // expanded tasks.
        let mut ref_vars = self.play.vars.clone();
        for (key, value) in &self.runner.options.extra_vars {
            merge_var(&mut ref_vars, key, value.clone());
        }
        let target = self.engine.render_string(&include.target, &ref_vars)?;

        let ctx = crate::playbook::ParseCtx {
            path: self.base_dir.join(&target),
            base_dir: self.base_dir.clone(),
            vault: self.runner.vault.clone(),
        };
        let units = if include.is_role {
            crate::roles::load_role_entry(&serde_yaml::Value::String(target), &ctx)?.tasks
        } else {
            crate::playbook::parse_task_file(&self.base_dir.join(&target), &ctx)?
        };

        let mut child = scope.clone();
        if let Some(when) = &include.when {
            child.whens.push(when.clone());
        }
        for (key, value) in &include.vars {
            child.task_vars.insert(key.clone(), value.clone());
        }

        self.run_units(&units, &child).await
    }

    async fn run_task(&mut self, task: &Task, scope: &Scope) -> Result<Flow> {
        if !self.runner.tag_allows(&task.tags) {
            return Ok(Flow::Continue);
        }

        // `meta` acts on the play itself, not on hosts.
        if task.module == "meta" {
            let directive = task
                .args
                .as_mapping()
                .and_then(|m| m.get("_raw_params"))
                .and_then(|v| v.as_str())
                .unwrap_or("");
            if directive == "flush_handlers" {
                self.flush_handlers().await?;
            } else {
                warn!(directive, "ignoring unsupported meta directive");
            }
            return Ok(Flow::Continue);
        }

        let eligible: Vec<String> = self
            .host_order
            .iter()
            .filter(|name| {
                scope
                    .restrict
                    .as_ref()
                    .map(|r| r.contains(*name))
                    .unwrap_or(true)
            })
            .filter(|name| {
                self.ctxs
                    .get(*name)
                    .map(|c| c.eligible() || (scope.include_failed && !c.unreachable))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        if eligible.is_empty() {
            return Ok(Flow::Continue);
        }

        if !self.runner.options.json_output {
            if scope.handler {
                output::task_banner(&format!("RUNNING HANDLER: {}", task.name));
            } else {
                output::task_banner(&task.name);
            }
        }
        let task_index = self
            .runner
            .reporter
            .task_start(&task.name, &task.module);

        let pre_failed: HashSet<String> = self
            .ctxs
            .iter()
            .filter(|(_, c)| c.failed || c.unreachable)
            .map(|(n, _)| n.clone())
            .collect();

        // Fan out: each host's context moves into its worker; the
        // semaphore bounds how many are active at once.
        let semaphore = Arc::new(Semaphore::new(self.runner.options.forks.max(1)));
        let mut workers = Vec::with_capacity(eligible.len());
        for name in &eligible {
            let ctx = self
                .ctxs
                .remove(name)
                .ok_or_else(|| Error::Internal(format!("missing context for {}", name)))?;
            workers.push(execute_on_host(
                self.runner,
                self.play,
                &self.engine,
                &self.base_dir,
                task,
                scope,
                task_index,
                ctx,
                semaphore.clone(),
            ));
        }

        for ctx in join_all(workers).await {
            self.ctxs.insert(ctx.host.name.clone(), ctx);
        }

        let new_failure = self
            .ctxs
            .iter()
            .any(|(name, c)| (c.failed || c.unreachable) && !pre_failed.contains(name));
        if self.play.any_errors_fatal && new_failure {
            return Ok(Flow::Stop);
        }
        Ok(Flow::Continue)
    }

    /// Runs every pending handler, in first-notify order across hosts,
    /// each at most once per play per host.
    fn flush_handlers(&mut self) -> ScheduleFuture<'_, Result<()>> {
        Box::pin(self.flush_handlers_inner())
    }

    async fn flush_handlers_inner(&mut self) -> Result<()> {
        loop {
            // First-notify order: walk hosts in play order, collecting
            // pending names in their per-host order.
            let mut order: Vec<String> = Vec::new();
            for name in &self.host_order {
                if let Some(ctx) = self.ctxs.get(name) {
                    for pending in &ctx.notified {
                        if !order.contains(pending) {
                            order.push(pending.clone());
                        }
                    }
                }
            }
            if order.is_empty() {
                return Ok(());
            }

            for handler_name in order {
                let handler: Option<Handler> = self
                    .play
                    .handlers
                    .iter()
                    .find(|h| h.task.name == handler_name)
                    .cloned();
                let Some(handler) = handler else {
                    warn!(handler = %handler_name, "notified handler not found");
                    for ctx in self.ctxs.values_mut() {
                        ctx.clear_pending(&handler_name);
                    }
                    continue;
                };

                let force = self.runner.options.force_handlers;
                let pending: HashSet<String> = self
                    .ctxs
                    .iter()
                    .filter(|(_, c)| c.has_pending(&handler_name))
                    .filter(|(_, c)| !c.unreachable && (!c.failed || force))
                    .map(|(n, _)| n.clone())
                    .collect();

                // Clear the notification everywhere; a handler runs at
                // most once per play.
                for ctx in self.ctxs.values_mut() {
                    ctx.clear_pending(&handler_name);
                }
                if pending.is_empty() {
                    continue;
                }

                let scope = Scope {
                    restrict: Some(pending),
                    include_failed: force,
                    handler: true,
                    ..Scope::default()
                };
                self.run_task(&handler.task, &scope).await?;
            }
            // Handlers may notify further handlers; loop until quiet.
        }
    }
}

/// One host's execution of one task: condition, loop, module dispatch,
/// result overrides, registration, notification, reporting.
#[allow(clippy::too_many_arguments)]
async fn execute_on_host(
    runner: &PlaybookRunner,
    play: &Play,
    engine: &Arc<TemplateEngine>,
    base_dir: &Path,
    task: &Task,
    scope: &Scope,
    task_index: usize,
    mut ctx: HostContext,
    semaphore: Arc<Semaphore>,
) -> HostContext {
    let _permit = semaphore.acquire().await.expect("semaphore closed");

    // Variable view: host context, include vars, task vars, extra vars.
    let mut vars = ctx.merged_vars();
    for (key, value) in &scope.task_vars {
        merge_var(&mut vars, key, value.clone());
    }
    for (key, value) in &task.vars {
        let rendered = engine
            .render_structure(value, &vars)
            .unwrap_or_else(|_| value.clone());
        merge_var(&mut vars, key, rendered);
    }
    for (key, value) in &runner.options.extra_vars {
        merge_var(&mut vars, key, value.clone());
    }

    let mut result = run_task_body(runner, play, engine, base_dir, task, scope, &mut ctx, &vars)
        .await;

    // ignore_errors keeps the host eligible but records the failure.
    if result.status == TaskStatus::Failed && task.ignore_errors {
        result.ignored = true;
        result.msg = format!("(ignored) {}", result.msg);
    }

    if let Some(register) = &task.register {
        ctx.register(register, result.registered_value());
    }
    if let Some(facts) = result.results.get("ansible_facts") {
        let yaml = serde_yaml::to_value(facts).unwrap_or(serde_yaml::Value::Null);
        ctx.merge_facts(&yaml);
    }

    match result.status {
        TaskStatus::Failed if !result.ignored => ctx.failed = true,
        TaskStatus::Unreachable => ctx.unreachable = true,
        _ => {}
    }

    if result.changed {
        for notification in &task.notify {
            let mut matched = false;
            for handler in &play.handlers {
                if handler.listens_to(notification) {
                    ctx.notify(&handler.task.name);
                    matched = true;
                }
            }
            if !matched {
                warn!(host = %ctx.host.name, notification, "notify matched no handler");
            }
        }
    }

    if !runner.options.json_output {
        let show_msg = result.is_failure()
            || result.ignored
            || task.module == "debug"
            || (result.status == TaskStatus::Skipped && runner.options.verbosity > 0)
            || runner.options.verbosity > 0;
        let msg = show_msg.then_some(result.msg.as_str());
        output::host_line(&ctx.host.name, result.status, msg);
        if let Some(diff) = &result.diff {
            output::diff(diff);
        }
    }

    runner.reporter.record(task_index, &ctx.host.name, result);
    ctx
}

/// Condition evaluation plus loop handling around the single execution.
#[allow(clippy::too_many_arguments)]
async fn run_task_body(
    runner: &PlaybookRunner,
    play: &Play,
    engine: &Arc<TemplateEngine>,
    base_dir: &Path,
    task: &Task,
    scope: &Scope,
    ctx: &mut HostContext,
    vars: &VarMap,
) -> TaskResult {
    let mut conditions: Vec<&serde_yaml::Value> = scope.whens.iter().collect();
    if let Some(when) = &task.when {
        conditions.push(when);
    }

    let Some(loop_expr) = &task.loop_items else {
        // Conditions evaluate once when there is no loop.
        for condition in &conditions {
            match engine.evaluate_when(condition, vars) {
                Ok(true) => {}
                Ok(false) => return TaskResult::skipped("Conditional result was False"),
                Err(e) => return TaskResult::failed(format!("error in 'when': {}", e)),
            }
        }
        return run_single(runner, play, engine, base_dir, task, scope, ctx, vars).await;
    };

    // Loop: render the expression to a sequence, then run per item with
    // the loop variable bound. Conditions evaluate per iteration.
    let items = match engine.render_structure(loop_expr, vars) {
        Ok(serde_yaml::Value::Sequence(seq)) => seq,
        Ok(serde_yaml::Value::Null) => Vec::new(),
        Ok(other) => vec![other],
        Err(e) => return TaskResult::failed(format!("error in 'loop': {}", e)),
    };

    if items.is_empty() {
        let mut result = TaskResult::skipped("No items in the list");
        result.changed = false;
        return result;
    }

    let length = items.len();
    let mut iteration_records: Vec<serde_json::Value> = Vec::with_capacity(length);
    let mut overall_changed = false;
    let mut overall_failed = false;
    let mut all_skipped = true;
    let mut last_msg = String::new();

    for (index, item) in items.into_iter().enumerate() {
        let mut item_vars = vars.clone();
        item_vars.insert(task.loop_var.clone(), item);
        let mut loop_info = serde_yaml::Mapping::new();
        loop_info.insert("index".into(), serde_yaml::Value::Number((index + 1).into()));
        loop_info.insert("index0".into(), serde_yaml::Value::Number(index.into()));
        loop_info.insert("first".into(), serde_yaml::Value::Bool(index == 0));
        loop_info.insert("last".into(), serde_yaml::Value::Bool(index + 1 == length));
        loop_info.insert("length".into(), serde_yaml::Value::Number(length.into()));
        item_vars.insert(
            "ansible_loop".to_string(),
            serde_yaml::Value::Mapping(loop_info),
        );
        item_vars.insert(
            "ansible_loop_var".to_string(),
            serde_yaml::Value::String(task.loop_var.clone()),
        );

        let mut iteration = None;
        for condition in &conditions {
            match engine.evaluate_when(condition, &item_vars) {
                Ok(true) => {}
                Ok(false) => {
                    iteration = Some(TaskResult::skipped("Conditional result was False"));
                    break;
                }
                Err(e) => {
                    iteration = Some(TaskResult::failed(format!("error in 'when': {}", e)));
                    break;
                }
            }
        }
        let iteration = match iteration {
            Some(result) => result,
            None => {
                run_single(runner, play, engine, base_dir, task, scope, ctx, &item_vars).await
            }
        };

        overall_changed |= iteration.changed;
        if iteration.status != TaskStatus::Skipped {
            all_skipped = false;
        }
        let failed = iteration.is_failure();
        if !iteration.msg.is_empty() {
            last_msg = iteration.msg.clone();
        }
        iteration_records.push(
            serde_json::to_value(iteration.registered_value()).unwrap_or(serde_json::Value::Null),
        );

        if failed && !task.ignore_errors {
            overall_failed = true;
            break;
        }
    }

    let status = if overall_failed {
        TaskStatus::Failed
    } else if all_skipped {
        TaskStatus::Skipped
    } else if overall_changed {
        TaskStatus::Changed
    } else {
        TaskStatus::Ok
    };
    let mut combined = TaskResult::status(status);
    combined.changed = overall_changed;
    combined.msg = if overall_failed {
        last_msg
    } else {
        format!("{} items processed", iteration_records.len())
    };
    combined
        .results
        .insert("results".to_string(), serde_json::Value::Array(iteration_records));
    combined
}

/// One module invocation on one host.
#[allow(clippy::too_many_arguments)]
async fn run_single(
    runner: &PlaybookRunner,
    play: &Play,
    engine: &Arc<TemplateEngine>,
    base_dir: &Path,
    task: &Task,
    scope: &Scope,
    ctx: &mut HostContext,
    vars: &VarMap,
) -> TaskResult {
    let rendered_args = match engine.render_structure(&task.args, vars) {
        Ok(args) => args,
        Err(e) => return TaskResult::failed(format!("Template error in task args: {}", e)),
    };
    let params: ModuleParams = match &rendered_args {
        serde_yaml::Value::Mapping(map) => map
            .iter()
            .filter_map(|(k, v)| k.as_str().map(|k| (k.to_string(), v.clone())))
            .collect(),
        _ => ModuleParams::new(),
    };

    // delegate_to re-routes the transport; the variable context stays the
    // originating host's.
    let target_host: Host = match &task.delegate_to {
        Some(delegate) => {
            let name = match engine.render_string(delegate, vars) {
                Ok(name) => name,
                Err(e) => return TaskResult::failed(format!("error in delegate_to: {}", e)),
            };
            match runner.inventory.get_host(name.trim()) {
                Some(host) => host.clone(),
                None if name.trim() == "localhost" || name.trim() == "127.0.0.1" => {
                    let mut host = Host::new(name.trim());
                    host.vars.insert(
                        "ansible_connection".to_string(),
                        serde_yaml::Value::String("local".to_string()),
                    );
                    host
                }
                None => {
                    return TaskResult::failed(format!(
                        "delegate_to host '{}' is not in the inventory",
                        name.trim()
                    ))
                }
            }
        }
        None => ctx.host.clone(),
    };

    let connection = match runner.connections.get(&target_host).await {
        Ok(connection) => connection,
        Err(e) if e.is_unreachable() => return TaskResult::unreachable(e.to_string()),
        Err(e) => return TaskResult::failed(e.to_string()),
    };

    let escalation = resolve_become(runner, play, scope, task, connection.kind());
    let connection: Arc<dyn Connection> =
        if escalation.is_some() || !task.environment.is_empty() {
            Arc::new(TaskConnection {
                inner: connection,
                escalation,
                env: task.environment.clone(),
            })
        } else {
            connection
        };

    let module_ctx = ModuleContext {
        connection,
        engine: engine.clone(),
        vars: vars.clone(),
        check_mode: task.check_mode.unwrap_or(ctx.check_mode),
        diff_mode: task.diff.unwrap_or(ctx.diff_mode),
        base_dir: base_dir.to_path_buf(),
    };

    let outcome = global_registry()
        .execute(&task.module, &params, &module_ctx)
        .await;
    let mut result = match outcome {
        Ok(output) => TaskResult::from_output(output),
        Err(ModuleError::Connection(e)) if e.is_unreachable() => {
            TaskResult::unreachable(e.to_string())
        }
        Err(ModuleError::Connection(ConnectionError::Timeout(secs))) => {
            // The transport is reset; the next task reconnects.
            runner.connections.discard(&target_host.name).await;
            TaskResult::failed(format!("command timed out after {} seconds", secs))
        }
        Err(e) => TaskResult::failed(e.to_string()),
    };

    apply_result_overrides(engine, task, vars, &mut result);
    result
}

/// `changed_when` / `failed_when`, evaluated with `result` bound.
fn apply_result_overrides(
    engine: &TemplateEngine,
    task: &Task,
    vars: &VarMap,
    result: &mut TaskResult,
) {
    if matches!(result.status, TaskStatus::Skipped | TaskStatus::Unreachable) {
        return;
    }
    if task.changed_when.is_none() && task.failed_when.is_none() {
        return;
    }

    let mut eval_vars = vars.clone();
    eval_vars.insert("result".to_string(), result.registered_value());

    if let Some(expr) = &task.changed_when {
        if result.status != TaskStatus::Failed {
            match engine.evaluate_when(expr, &eval_vars) {
                Ok(changed) => {
                    result.changed = changed;
                    result.status = if changed {
                        TaskStatus::Changed
                    } else {
                        TaskStatus::Ok
                    };
                }
                Err(e) => {
                    *result = TaskResult::failed(format!("error in changed_when: {}", e));
                    return;
                }
            }
        }
    }

    if let Some(expr) = &task.failed_when {
        match engine.evaluate_when(expr, &eval_vars) {
            Ok(true) => {
                result.status = TaskStatus::Failed;
                if result.msg.is_empty() {
                    result.msg = "failed_when condition was met".to_string();
                }
            }
            Ok(false) => {
                if result.status == TaskStatus::Failed {
                    result.status = if result.changed {
                        TaskStatus::Changed
                    } else {
                        TaskStatus::Ok
                    };
                    result.msg = format!("(failed_when overridden) {}", result.msg);
                }
            }
            Err(e) => {
                *result = TaskResult::failed(format!("error in failed_when: {}", e));
            }
        }
    }
}

/// Resolves the effective privilege escalation for a task. Task settings
/// win over block, block over play, play over the CLI default; the CLI
/// default never applies to local transports.
fn resolve_become(
    runner: &PlaybookRunner,
    play: &Play,
    scope: &Scope,
    task: &Task,
    kind: TransportKind,
) -> Option<Escalation> {
    let explicit = task
        .r#become
        .or(scope.become_)
        .or(if play.r#become { Some(true) } else { None });
    let effective = match explicit {
        Some(value) => value,
        None => runner.options.r#become && kind != TransportKind::Local,
    };
    if !effective {
        return None;
    }

    let default_user = if kind == TransportKind::Winrm {
        "Administrator"
    } else {
        "root"
    };
    let default_method = if kind == TransportKind::Winrm {
        "runas"
    } else {
        "sudo"
    };

    Some(Escalation {
        user: task
            .become_user
            .clone()
            .or_else(|| scope.become_user.clone())
            .or_else(|| play.become_user.clone())
            .or_else(|| runner.options.become_user.clone())
            .unwrap_or_else(|| default_user.to_string()),
        method: task
            .become_method
            .clone()
            .or_else(|| scope.become_method.clone())
            .or_else(|| play.become_method.clone())
            .or_else(|| runner.options.become_method.clone())
            .unwrap_or_else(|| default_method.to_string()),
        password: runner.options.become_password.clone(),
    })
}

/// Connection adapter that injects a task's escalation and environment
/// into every `run` call.
struct TaskConnection {
    inner: Arc<dyn Connection>,
    escalation: Option<Escalation>,
    env: indexmap::IndexMap<String, String>,
}

#[async_trait::async_trait]
impl Connection for TaskConnection {
    fn identifier(&self) -> &str {
        self.inner.identifier()
    }

    fn kind(&self) -> TransportKind {
        self.inner.kind()
    }

    async fn run(
        &self,
        command: &str,
        mut options: RunOptions,
    ) -> crate::connection::ConnectionResult<crate::connection::RunOutput> {
        if options.escalate.is_none() {
            options.escalate = self.escalation.clone();
        }
        for (key, value) in &self.env {
            options.env.entry(key.clone()).or_insert_with(|| value.clone());
        }
        self.inner.run(command, options).await
    }

    async fn put(
        &self,
        local: &Path,
        remote: &str,
        mode: Option<u32>,
    ) -> crate::connection::ConnectionResult<()> {
        self.inner.put(local, remote, mode).await
    }

    async fn put_content(
        &self,
        content: &[u8],
        remote: &str,
        mode: Option<u32>,
    ) -> crate::connection::ConnectionResult<()> {
        self.inner.put_content(content, remote, mode).await
    }

    async fn get(&self, remote: &str, local: &Path) -> crate::connection::ConnectionResult<()> {
        self.inner.get(remote, local).await
    }

    async fn get_content(&self, remote: &str) -> crate::connection::ConnectionResult<Vec<u8>> {
        self.inner.get_content(remote).await
    }

    async fn stat(
        &self,
        remote: &str,
    ) -> crate::connection::ConnectionResult<crate::connection::FileStat> {
        self.inner.stat(remote).await
    }

    async fn mkdir(&self, remote: &str, mode: Option<u32>) -> crate::connection::ConnectionResult<()> {
        self.inner.mkdir(remote, mode).await
    }

    async fn close(&self) -> crate::connection::ConnectionResult<()> {
        self.inner.close().await
    }

    async fn is_alive(&self) -> bool {
        self.inner.is_alive().await
    }
}

/// Inline vault values decrypt at context construction: a string value
/// carrying the vault header becomes its decrypted payload, parsed as a
/// scalar or tree.
fn decrypt_vars(vars: &mut VarMap, vault: &VaultLib) -> Result<()> {
    for (_, value) in vars.iter_mut() {
        if let serde_yaml::Value::String(s) = value {
            if VaultLib::is_encrypted(s) {
                let plain = vault.decrypt_to_string(s)?;
                *value = serde_yaml::from_str(&plain)
                    .unwrap_or(serde_yaml::Value::String(plain));
            }
        }
    }
    Ok(())
}
