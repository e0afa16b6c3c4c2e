//! Playbook parsing: tree data in, strongly-shaped plays out.
//!
//! The parser validates the feature subset eagerly (`serial`, `throttle`,
//! `max_fail_percentage`, non-linear `strategy`, and `async`/`poll` are
//! rejected with an unsupported-feature error), normalizes the three
//! module-invocation shapes (mapping, free-form string, `args:` block),
//! expands static `import_tasks`/`import_role` in place, and defers
//! dynamic `include_tasks`/`include_role` to execution time.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::vars::VarMap;
use crate::vault::VaultLib;

/// Task keys that are never module names.
static TASK_KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "name", "args", "register", "when", "loop", "with_items", "with_list", "loop_control",
        "ignore_errors", "changed_when", "failed_when", "notify", "listen", "tags", "become",
        "become_user", "become_method", "check_mode", "diff", "delegate_to", "vars",
        "environment", "block", "rescue", "always", "any_errors_fatal", "run_once", "no_log",
        "until", "retries", "delay", "timeout", "throttle", "async", "poll", "connection",
    ]
    .into_iter()
    .collect()
});

/// Task-level constructs outside the supported subset.
static UNSUPPORTED_TASK_KEYS: &[&str] = &["async", "poll", "throttle"];

/// Play-level constructs outside the supported subset.
static UNSUPPORTED_PLAY_KEYS: &[&str] = &["serial", "throttle", "max_fail_percentage"];

/// `key=value` pairs with optional quoting, for the inline argument form.
static KV_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(\w+)=(?:"([^"]*)"|'([^']*)'|(\S+))"#).expect("valid regex")
});

/// Known short names that accept free-form arguments.
static FREE_FORM_MODULES: &[&str] = &[
    "command",
    "shell",
    "raw",
    "win_command",
    "win_shell",
    "meta",
    "include_vars",
];

/// FQCN prefixes with native mappings.
static NATIVE_COLLECTIONS: &[&str] = &["ansible.builtin.", "ansible.windows.", "ansible.posix."];

/// An ordered sequence of plays.
#[derive(Debug, Clone)]
pub struct Playbook {
    /// Source path, for diagnostics.
    pub path: PathBuf,
    /// Plays in document order.
    pub plays: Vec<Play>,
}

/// One play: a host selector bound to task sections and handlers.
#[derive(Debug, Clone)]
pub struct Play {
    /// Display name.
    pub name: String,
    /// Host selector pattern.
    pub hosts: String,
    /// Run the implicit `setup` task before anything else.
    pub gather_facts: bool,
    /// Play-level variables (including loaded `vars_files`).
    pub vars: VarMap,
    /// Tasks before roles and the main list.
    pub pre_tasks: Vec<TaskUnit>,
    /// Role tasks followed by the play's own tasks.
    pub tasks: Vec<TaskUnit>,
    /// Tasks after the main list.
    pub post_tasks: Vec<TaskUnit>,
    /// Handlers, addressable by name and listen tags.
    pub handlers: Vec<Handler>,
    /// Play-level escalation default.
    pub r#become: bool,
    /// Play-level escalation user.
    pub become_user: Option<String>,
    /// Play-level escalation method.
    pub become_method: Option<String>,
    /// Play-level check-mode override.
    pub check_mode: Option<bool>,
    /// Play-level diff-mode override.
    pub diff: Option<bool>,
    /// Promote any single-host failure to a play-wide stop.
    pub any_errors_fatal: bool,
    /// Play tags.
    pub tags: Vec<String>,
}

/// A schedulable unit: a plain task, a block, or a deferred include.
#[derive(Debug, Clone)]
pub enum TaskUnit {
    /// A single module invocation.
    Task(Task),
    /// A body/rescue/always container.
    Block(Block),
    /// A dynamic include, expanded at execution time.
    Include(Include),
}

/// A single module invocation with its control metadata.
#[derive(Debug, Clone, Default)]
pub struct Task {
    /// Display name.
    pub name: String,
    /// Registry key the module resolves under.
    pub module: String,
    /// The name as written in the playbook, for diagnostics.
    pub raw_module: String,
    /// Pre-template argument mapping.
    pub args: serde_yaml::Value,
    /// Condition: bare expression, boolean, or a list (AND).
    pub when: Option<serde_yaml::Value>,
    /// Loop expression, when the task iterates.
    pub loop_items: Option<serde_yaml::Value>,
    /// Loop variable name (default `item`).
    pub loop_var: String,
    /// Variable name the result registers under.
    pub register: Option<String>,
    /// Keep the host eligible on failure.
    pub ignore_errors: bool,
    /// Override for the changed flag.
    pub changed_when: Option<serde_yaml::Value>,
    /// Override for the failed flag.
    pub failed_when: Option<serde_yaml::Value>,
    /// Handler notifications sent when the task changes something.
    pub notify: Vec<String>,
    /// Task tags.
    pub tags: Vec<String>,
    /// Task-level escalation override.
    pub r#become: Option<bool>,
    /// Task-level escalation user.
    pub become_user: Option<String>,
    /// Task-level escalation method.
    pub become_method: Option<String>,
    /// Task-level check-mode override.
    pub check_mode: Option<bool>,
    /// Task-level diff-mode override.
    pub diff: Option<bool>,
    /// Re-route the transport to another inventory host.
    pub delegate_to: Option<String>,
    /// Task-level variables.
    pub vars: VarMap,
    /// Environment for the executed command.
    pub environment: IndexMap<String, String>,
}

/// A task container with rescue/always semantics. Blocks nest.
#[derive(Debug, Clone, Default)]
pub struct Block {
    /// Display name.
    pub name: String,
    /// Main section.
    pub body: Vec<TaskUnit>,
    /// Runs for hosts the body failed.
    pub rescue: Vec<TaskUnit>,
    /// Runs for every host that entered the block.
    pub always: Vec<TaskUnit>,
    /// Condition applied to every child.
    pub when: Option<serde_yaml::Value>,
    /// Block-level escalation override.
    pub r#become: Option<bool>,
    /// Block-level escalation user.
    pub become_user: Option<String>,
    /// Block-level escalation method.
    pub become_method: Option<String>,
    /// Block tags.
    pub tags: Vec<String>,
}

/// A dynamic `include_tasks`/`include_role`, expanded when reached.
#[derive(Debug, Clone)]
pub struct Include {
    /// Display name.
    pub name: String,
    /// Tasks file (for include_tasks) or role name (for include_role).
    pub target: String,
    /// Whether the target is a role.
    pub is_role: bool,
    /// Condition applied to every expanded task.
    pub when: Option<serde_yaml::Value>,
    /// Variables applied to every expanded task.
    pub vars: VarMap,
    /// Include tags.
    pub tags: Vec<String>,
}

/// A handler: a task that runs at flush time, addressable by name and by
/// listen tags.
#[derive(Debug, Clone)]
pub struct Handler {
    /// The handler's task body.
    pub task: Task,
    /// Additional notification tags this handler listens to.
    pub listen: Vec<String>,
}

impl Handler {
    /// True if a notification string addresses this handler.
    pub fn listens_to(&self, notification: &str) -> bool {
        self.task.name == notification || self.listen.iter().any(|l| l == notification)
    }
}

/// Shared state for one parse run.
pub(crate) struct ParseCtx {
    pub path: PathBuf,
    pub base_dir: PathBuf,
    pub vault: Option<Arc<VaultLib>>,
}

impl ParseCtx {
    fn err(&self, message: impl Into<String>) -> Error {
        Error::parse(&self.path, message)
    }
}

/// Parses a playbook file.
pub struct PlaybookParser {
    ctx: ParseCtx,
}

impl PlaybookParser {
    /// Creates a parser for the given playbook path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            ctx: ParseCtx {
                path,
                base_dir,
                vault: None,
            },
        }
    }

    /// Attaches a vault for decrypting `vars_files`.
    pub fn with_vault(mut self, vault: Option<Arc<VaultLib>>) -> Self {
        self.ctx.vault = vault;
        self
    }

    /// Parses the file into a [`Playbook`].
    pub fn parse(self) -> Result<Playbook> {
        let content = std::fs::read_to_string(&self.ctx.path)
            .map_err(|e| self.ctx.err(format!("cannot read playbook: {}", e)))?;
        self.parse_str(&content)
    }

    /// Parses playbook content (exposed for tests).
    pub fn parse_str(self, content: &str) -> Result<Playbook> {
        let data: serde_yaml::Value = serde_yaml::from_str(content)
            .map_err(|e| self.ctx.err(format!("YAML syntax error: {}", e)))?;

        let docs = match data {
            serde_yaml::Value::Sequence(seq) => seq,
            serde_yaml::Value::Null => Vec::new(),
            other => vec![other],
        };

        let mut plays = Vec::new();
        for doc in &docs {
            if let serde_yaml::Value::Mapping(map) = doc {
                plays.push(parse_play(map, &self.ctx)?);
            }
        }

        Ok(Playbook {
            path: self.ctx.path,
            plays,
        })
    }
}

fn get<'a>(map: &'a serde_yaml::Mapping, key: &str) -> Option<&'a serde_yaml::Value> {
    map.get(serde_yaml::Value::String(key.to_string()))
}

fn get_str(map: &serde_yaml::Mapping, key: &str) -> Option<String> {
    match get(map, key) {
        Some(serde_yaml::Value::String(s)) => Some(s.clone()),
        Some(serde_yaml::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn get_bool(map: &serde_yaml::Mapping, key: &str) -> Option<bool> {
    match get(map, key) {
        Some(serde_yaml::Value::Bool(b)) => Some(*b),
        Some(serde_yaml::Value::String(s)) => {
            matches!(s.to_lowercase().as_str(), "true" | "yes" | "1").then_some(true).or(Some(false))
        }
        _ => None,
    }
}

fn string_list(value: Option<&serde_yaml::Value>) -> Vec<String> {
    match value {
        Some(serde_yaml::Value::String(s)) => vec![s.clone()],
        Some(serde_yaml::Value::Sequence(seq)) => seq
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

fn var_map(value: Option<&serde_yaml::Value>) -> VarMap {
    match value {
        Some(serde_yaml::Value::Mapping(map)) => map
            .iter()
            .filter_map(|(k, v)| k.as_str().map(|k| (k.to_string(), v.clone())))
            .collect(),
        _ => VarMap::new(),
    }
}

fn parse_play(map: &serde_yaml::Mapping, ctx: &ParseCtx) -> Result<Play> {
    for key in UNSUPPORTED_PLAY_KEYS {
        if get(map, key).is_some() {
            return Err(Error::unsupported_with(
                format!("'{}' at play level", key),
                "only the linear strategy without batching is supported",
            ));
        }
    }
    if let Some(strategy) = get_str(map, "strategy") {
        if strategy != "linear" {
            return Err(Error::unsupported_with(
                format!("strategy '{}'", strategy),
                "only the linear strategy is supported",
            ));
        }
    }

    let hosts = get_str(map, "hosts")
        .ok_or_else(|| ctx.err("play is missing the required 'hosts' field"))?;

    let mut play = Play {
        name: get_str(map, "name").unwrap_or_else(|| "Unnamed play".to_string()),
        hosts,
        gather_facts: get_bool(map, "gather_facts").unwrap_or(false),
        vars: var_map(get(map, "vars")),
        pre_tasks: Vec::new(),
        tasks: Vec::new(),
        post_tasks: Vec::new(),
        handlers: Vec::new(),
        r#become: get_bool(map, "become").unwrap_or(false),
        become_user: get_str(map, "become_user"),
        become_method: get_str(map, "become_method"),
        check_mode: get_bool(map, "check_mode"),
        diff: get_bool(map, "diff"),
        any_errors_fatal: get_bool(map, "any_errors_fatal").unwrap_or(false),
        tags: string_list(get(map, "tags")),
    };

    // vars_files load at parse, decrypting vault envelopes when a vault
    // is configured.
    for file in string_list(get(map, "vars_files")) {
        let path = ctx.base_dir.join(&file);
        let raw = std::fs::read_to_string(&path)
            .map_err(|_| ctx.err(format!("vars_file not found: {}", file)))?;
        let content = if VaultLib::is_encrypted(&raw) {
            match &ctx.vault {
                Some(vault) => vault.decrypt_to_string(&raw)?,
                None => {
                    return Err(ctx.err(format!(
                        "vars_file {} is vault-encrypted but no vault password was given",
                        file
                    )))
                }
            }
        } else {
            raw
        };
        let vars: VarMap = serde_yaml::from_str(&content)
            .map_err(|e| ctx.err(format!("vars_file {}: {}", file, e)))?;
        for (key, value) in vars {
            play.vars.insert(key, value);
        }
    }

    if let Some(serde_yaml::Value::Sequence(items)) = get(map, "pre_tasks") {
        play.pre_tasks = parse_task_units(items, ctx)?;
    }

    // Roles expand ahead of the play's own tasks.
    if let Some(roles) = get(map, "roles") {
        let entries = match roles {
            serde_yaml::Value::Sequence(seq) => seq.clone(),
            other => vec![other.clone()],
        };
        for entry in &entries {
            let loaded = crate::roles::load_role_entry(entry, ctx)?;
            play.tasks.extend(loaded.tasks);
            play.handlers.extend(loaded.handlers);
        }
    }

    if let Some(serde_yaml::Value::Sequence(items)) = get(map, "tasks") {
        play.tasks.extend(parse_task_units(items, ctx)?);
    }
    if let Some(serde_yaml::Value::Sequence(items)) = get(map, "post_tasks") {
        play.post_tasks = parse_task_units(items, ctx)?;
    }

    if let Some(serde_yaml::Value::Sequence(items)) = get(map, "handlers") {
        for item in items {
            if let serde_yaml::Value::Mapping(handler_map) = item {
                let task = parse_task(handler_map, ctx)?;
                let listen = string_list(get(handler_map, "listen"));
                play.handlers.push(Handler { task, listen });
            }
        }
    }

    Ok(play)
}

/// Parses a list of task-like entries (tasks, blocks, includes).
pub(crate) fn parse_task_units(
    items: &[serde_yaml::Value],
    ctx: &ParseCtx,
) -> Result<Vec<TaskUnit>> {
    let mut units = Vec::new();
    for item in items {
        let map = match item {
            serde_yaml::Value::Mapping(map) => map,
            _ => return Err(ctx.err("task entry must be a mapping")),
        };
        units.extend(parse_task_unit(map, ctx)?);
    }
    Ok(units)
}

fn parse_task_unit(map: &serde_yaml::Mapping, ctx: &ParseCtx) -> Result<Vec<TaskUnit>> {
    if get(map, "block").is_some() {
        return Ok(vec![TaskUnit::Block(parse_block(map, ctx)?)]);
    }

    // Static imports expand here; dynamic includes are deferred.
    if let Some(target) = get_str(map, "import_tasks") {
        let path = ctx.base_dir.join(&target);
        let mut units = parse_task_file(&path, ctx)?;
        apply_include_overrides(&mut units, map);
        return Ok(units);
    }
    if let Some(target) = include_target(map, "include_tasks") {
        return Ok(vec![TaskUnit::Include(Include {
            name: get_str(map, "name").unwrap_or_else(|| format!("include {}", target)),
            target,
            is_role: false,
            when: get(map, "when").cloned(),
            vars: var_map(get(map, "vars")),
            tags: string_list(get(map, "tags")),
        })]);
    }
    if let Some(role) = include_role_target(map, "import_role") {
        let loaded = crate::roles::load_role_entry(
            &serde_yaml::Value::String(role),
            ctx,
        )?;
        let mut units = loaded.tasks;
        apply_include_overrides(&mut units, map);
        return Ok(units);
    }
    if let Some(role) = include_role_target(map, "include_role") {
        return Ok(vec![TaskUnit::Include(Include {
            name: get_str(map, "name").unwrap_or_else(|| format!("include role {}", role)),
            target: role,
            is_role: true,
            when: get(map, "when").cloned(),
            vars: var_map(get(map, "vars")),
            tags: string_list(get(map, "tags")),
        })]);
    }

    Ok(vec![TaskUnit::Task(parse_task(map, ctx)?)])
}

fn include_target(map: &serde_yaml::Mapping, key: &str) -> Option<String> {
    match get(map, key) {
        Some(serde_yaml::Value::String(s)) => Some(s.clone()),
        Some(serde_yaml::Value::Mapping(m)) => get_str(m, "file"),
        _ => None,
    }
}

fn include_role_target(map: &serde_yaml::Mapping, key: &str) -> Option<String> {
    match get(map, key) {
        Some(serde_yaml::Value::String(s)) => Some(s.clone()),
        Some(serde_yaml::Value::Mapping(m)) => get_str(m, "name"),
        _ => None,
    }
}

/// Merges import-level `when`/`tags` into statically expanded units.
fn apply_include_overrides(units: &mut [TaskUnit], map: &serde_yaml::Mapping) {
    let when = get(map, "when").cloned();
    let tags = string_list(get(map, "tags"));
    for unit in units {
        match unit {
            TaskUnit::Task(task) => {
                if task.when.is_none() {
                    task.when = when.clone();
                }
                for tag in &tags {
                    if !task.tags.contains(tag) {
                        task.tags.push(tag.clone());
                    }
                }
            }
            TaskUnit::Block(block) => {
                if block.when.is_none() {
                    block.when = when.clone();
                }
                for tag in &tags {
                    if !block.tags.contains(tag) {
                        block.tags.push(tag.clone());
                    }
                }
            }
            TaskUnit::Include(include) => {
                if include.when.is_none() {
                    include.when = when.clone();
                }
            }
        }
    }
}

/// Parses a standalone tasks file (roles, imports, dynamic includes).
pub(crate) fn parse_task_file(path: &Path, ctx: &ParseCtx) -> Result<Vec<TaskUnit>> {
    let content = std::fs::read_to_string(path)
        .map_err(|_| ctx.err(format!("tasks file not found: {}", path.display())))?;
    let data: serde_yaml::Value = serde_yaml::from_str(&content)
        .map_err(|e| Error::parse(path, format!("YAML syntax error: {}", e)))?;
    match data {
        serde_yaml::Value::Sequence(items) => parse_task_units(&items, ctx),
        serde_yaml::Value::Null => Ok(Vec::new()),
        _ => Err(Error::parse(path, "tasks file must contain a list")),
    }
}

fn parse_block(map: &serde_yaml::Mapping, ctx: &ParseCtx) -> Result<Block> {
    let section = |key: &str| -> Result<Vec<TaskUnit>> {
        match get(map, key) {
            Some(serde_yaml::Value::Sequence(items)) => parse_task_units(items, ctx),
            None => Ok(Vec::new()),
            Some(_) => Err(ctx.err(format!("'{}' must be a list", key))),
        }
    };

    Ok(Block {
        name: get_str(map, "name").unwrap_or_else(|| "block".to_string()),
        body: section("block")?,
        rescue: section("rescue")?,
        always: section("always")?,
        when: get(map, "when").cloned(),
        r#become: get_bool(map, "become"),
        become_user: get_str(map, "become_user"),
        become_method: get_str(map, "become_method"),
        tags: string_list(get(map, "tags")),
    })
}

fn parse_task(map: &serde_yaml::Mapping, ctx: &ParseCtx) -> Result<Task> {
    for key in UNSUPPORTED_TASK_KEYS {
        if get(map, key).is_some() {
            return Err(Error::unsupported_with(
                format!("'{}' at task level", key),
                "asynchronous and throttled tasks are outside the supported subset",
            ));
        }
    }

    // Exactly one module invocation per task.
    let mut module_key: Option<(String, serde_yaml::Value)> = None;
    for (key, value) in map {
        let key = match key.as_str() {
            Some(k) => k,
            None => continue,
        };
        if TASK_KEYWORDS.contains(key) {
            continue;
        }
        if let Some((first, _)) = &module_key {
            return Err(ctx.err(format!(
                "task declares more than one module: '{}' and '{}'",
                first, key
            )));
        }
        module_key = Some((key.to_string(), value.clone()));
    }

    let (raw_module, module_value) = module_key.ok_or_else(|| {
        ctx.err(format!(
            "task has no recognized module: keys {:?}",
            map.iter()
                .filter_map(|(k, _)| k.as_str())
                .collect::<Vec<_>>()
        ))
    })?;

    // FQCN with a native mapping normalizes to the short name; other
    // qualified names are preserved for the registry to reject with a
    // precise message.
    let module = NATIVE_COLLECTIONS
        .iter()
        .find_map(|prefix| raw_module.strip_prefix(prefix))
        .map(str::to_string)
        .unwrap_or_else(|| raw_module.clone());

    let mut args = normalize_args(&module, &module_value);
    // An `args:` block merges into the module arguments.
    if let Some(serde_yaml::Value::Mapping(extra)) = get(map, "args") {
        if let serde_yaml::Value::Mapping(target) = &mut args {
            for (k, v) in extra {
                target.insert(k.clone(), v.clone());
            }
        }
    }

    let loop_items = get(map, "loop")
        .or_else(|| get(map, "with_items"))
        .or_else(|| get(map, "with_list"))
        .cloned();
    let loop_var = match get(map, "loop_control") {
        Some(serde_yaml::Value::Mapping(lc)) => {
            get_str(lc, "loop_var").unwrap_or_else(|| "item".to_string())
        }
        _ => "item".to_string(),
    };

    let environment = match get(map, "environment") {
        Some(serde_yaml::Value::Mapping(env)) => env
            .iter()
            .filter_map(|(k, v)| {
                let key = k.as_str()?.to_string();
                let value = match v {
                    serde_yaml::Value::String(s) => s.clone(),
                    serde_yaml::Value::Number(n) => n.to_string(),
                    serde_yaml::Value::Bool(b) => b.to_string(),
                    _ => return None,
                };
                Some((key, value))
            })
            .collect(),
        _ => IndexMap::new(),
    };

    Ok(Task {
        name: get_str(map, "name").unwrap_or_else(|| format!("{} task", module)),
        module,
        raw_module,
        args,
        when: get(map, "when").cloned(),
        loop_items,
        loop_var,
        register: get_str(map, "register"),
        ignore_errors: get_bool(map, "ignore_errors").unwrap_or(false),
        changed_when: get(map, "changed_when").cloned(),
        failed_when: get(map, "failed_when").cloned(),
        notify: string_list(get(map, "notify")),
        tags: string_list(get(map, "tags")),
        r#become: get_bool(map, "become"),
        become_user: get_str(map, "become_user"),
        become_method: get_str(map, "become_method"),
        check_mode: get_bool(map, "check_mode"),
        diff: get_bool(map, "diff"),
        delegate_to: get_str(map, "delegate_to"),
        vars: var_map(get(map, "vars")),
        environment,
    })
}

/// Normalizes the module argument shapes: a mapping stays as-is; a
/// `key=value` string becomes the equivalent mapping; anything else on a
/// free-form module lands in `_raw_params`.
fn normalize_args(module: &str, value: &serde_yaml::Value) -> serde_yaml::Value {
    match value {
        serde_yaml::Value::Mapping(_) => value.clone(),
        serde_yaml::Value::Null => serde_yaml::Value::Mapping(serde_yaml::Mapping::new()),
        serde_yaml::Value::String(s) => {
            let mut map = serde_yaml::Mapping::new();
            let free_form = FREE_FORM_MODULES.contains(&module);
            if !free_form {
                for caps in KV_PATTERN.captures_iter(s) {
                    let key = caps.get(1).map_or("", |m| m.as_str());
                    let raw = caps
                        .get(2)
                        .or_else(|| caps.get(3))
                        .or_else(|| caps.get(4))
                        .map_or("", |m| m.as_str());
                    map.insert(
                        serde_yaml::Value::String(key.to_string()),
                        serde_yaml::Value::String(raw.to_string()),
                    );
                }
            }
            if map.is_empty() {
                map.insert(
                    serde_yaml::Value::String("_raw_params".to_string()),
                    serde_yaml::Value::String(s.clone()),
                );
            }
            serde_yaml::Value::Mapping(map)
        }
        other => {
            let mut map = serde_yaml::Mapping::new();
            map.insert(
                serde_yaml::Value::String("_raw_params".to_string()),
                other.clone(),
            );
            serde_yaml::Value::Mapping(map)
        }
    }
}

impl Play {
    /// All units in execution order (pre, main, post), for the diagnostic
    /// listings.
    pub fn all_units(&self) -> impl Iterator<Item = &TaskUnit> {
        self.pre_tasks
            .iter()
            .chain(self.tasks.iter())
            .chain(self.post_tasks.iter())
    }

    /// Flattened task names, descending into blocks.
    pub fn task_names(&self) -> Vec<String> {
        fn walk(units: &[TaskUnit], out: &mut Vec<String>) {
            for unit in units {
                match unit {
                    TaskUnit::Task(task) => out.push(task.name.clone()),
                    TaskUnit::Include(include) => out.push(include.name.clone()),
                    TaskUnit::Block(block) => {
                        walk(&block.body, out);
                        walk(&block.rescue, out);
                        walk(&block.always, out);
                    }
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.pre_tasks, &mut out);
        walk(&self.tasks, &mut out);
        walk(&self.post_tasks, &mut out);
        out
    }

    /// Every tag used by this play's tasks.
    pub fn all_tags(&self) -> Vec<String> {
        fn walk(units: &[TaskUnit], out: &mut Vec<String>) {
            for unit in units {
                match unit {
                    TaskUnit::Task(task) => out.extend(task.tags.iter().cloned()),
                    TaskUnit::Include(include) => out.extend(include.tags.iter().cloned()),
                    TaskUnit::Block(block) => {
                        out.extend(block.tags.iter().cloned());
                        walk(&block.body, out);
                        walk(&block.rescue, out);
                        walk(&block.always, out);
                    }
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.pre_tasks, &mut out);
        walk(&self.tasks, &mut out);
        walk(&self.post_tasks, &mut out);
        out.sort();
        out.dedup();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<Playbook> {
        PlaybookParser::new("test.yml").parse_str(content)
    }

    #[test]
    fn minimal_play() {
        let pb = parse(
            r#"
- name: demo
  hosts: web
  tasks:
    - name: say hello
      debug:
        msg: hello
"#,
        )
        .unwrap();
        assert_eq!(pb.plays.len(), 1);
        let play = &pb.plays[0];
        assert_eq!(play.hosts, "web");
        assert_eq!(play.tasks.len(), 1);
        match &play.tasks[0] {
            TaskUnit::Task(task) => {
                assert_eq!(task.module, "debug");
                assert_eq!(task.name, "say hello");
            }
            _ => panic!("expected a task"),
        }
    }

    #[test]
    fn missing_hosts_is_a_parse_error() {
        let err = parse("- name: broken\n  tasks: []\n").unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn serial_is_unsupported() {
        let err = parse("- hosts: all\n  serial: 2\n  tasks: []\n").unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn non_linear_strategy_is_unsupported() {
        let err = parse("- hosts: all\n  strategy: free\n  tasks: []\n").unwrap_err();
        assert_eq!(err.exit_code(), 4);
        // Explicit linear is fine.
        assert!(parse("- hosts: all\n  strategy: linear\n  tasks: []\n").is_ok());
    }

    #[test]
    fn async_poll_is_unsupported() {
        let err = parse(
            "- hosts: all\n  tasks:\n    - command: sleep 100\n      async: 10\n      poll: 0\n",
        )
        .unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn two_modules_in_one_task_is_an_error() {
        let err = parse(
            "- hosts: all\n  tasks:\n    - debug:\n        msg: a\n      ping:\n",
        )
        .unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn fqcn_normalizes_but_preserves_original() {
        let pb = parse(
            "- hosts: all\n  tasks:\n    - ansible.builtin.debug:\n        msg: hi\n",
        )
        .unwrap();
        match &pb.plays[0].tasks[0] {
            TaskUnit::Task(task) => {
                assert_eq!(task.module, "debug");
                assert_eq!(task.raw_module, "ansible.builtin.debug");
            }
            _ => panic!("expected a task"),
        }
    }

    #[test]
    fn key_value_short_form() {
        let pb = parse("- hosts: all\n  tasks:\n    - copy: src=a.txt dest=\"/tmp/a b.txt\"\n")
            .unwrap();
        match &pb.plays[0].tasks[0] {
            TaskUnit::Task(task) => {
                let args = task.args.as_mapping().unwrap();
                assert_eq!(args.get("src").unwrap().as_str(), Some("a.txt"));
                assert_eq!(args.get("dest").unwrap().as_str(), Some("/tmp/a b.txt"));
            }
            _ => panic!("expected a task"),
        }
    }

    #[test]
    fn free_form_shell_keeps_raw_params() {
        let pb = parse("- hosts: all\n  tasks:\n    - shell: echo a=b | wc -l\n").unwrap();
        match &pb.plays[0].tasks[0] {
            TaskUnit::Task(task) => {
                let args = task.args.as_mapping().unwrap();
                assert_eq!(
                    args.get("_raw_params").unwrap().as_str(),
                    Some("echo a=b | wc -l")
                );
            }
            _ => panic!("expected a task"),
        }
    }

    #[test]
    fn args_block_merges() {
        let pb = parse(
            r#"
- hosts: all
  tasks:
    - command: /bin/true
      args:
        chdir: /tmp
"#,
        )
        .unwrap();
        match &pb.plays[0].tasks[0] {
            TaskUnit::Task(task) => {
                let args = task.args.as_mapping().unwrap();
                assert_eq!(args.get("chdir").unwrap().as_str(), Some("/tmp"));
                assert_eq!(args.get("_raw_params").unwrap().as_str(), Some("/bin/true"));
            }
            _ => panic!("expected a task"),
        }
    }

    #[test]
    fn blocks_parse_with_sections() {
        let pb = parse(
            r#"
- hosts: all
  tasks:
    - name: guarded
      block:
        - debug: {msg: body}
      rescue:
        - debug: {msg: rescue}
      always:
        - debug: {msg: always}
"#,
        )
        .unwrap();
        match &pb.plays[0].tasks[0] {
            TaskUnit::Block(block) => {
                assert_eq!(block.body.len(), 1);
                assert_eq!(block.rescue.len(), 1);
                assert_eq!(block.always.len(), 1);
            }
            _ => panic!("expected a block"),
        }
    }

    #[test]
    fn with_items_is_a_loop_alias() {
        let pb = parse(
            "- hosts: all\n  tasks:\n    - debug: {msg: '{{ item }}'}\n      with_items: [a, b]\n",
        )
        .unwrap();
        match &pb.plays[0].tasks[0] {
            TaskUnit::Task(task) => assert!(task.loop_items.is_some()),
            _ => panic!("expected a task"),
        }
    }

    #[test]
    fn handlers_with_listen() {
        let pb = parse(
            r#"
- hosts: all
  tasks: []
  handlers:
    - name: restart app
      command: /bin/true
      listen: app events
"#,
        )
        .unwrap();
        let handler = &pb.plays[0].handlers[0];
        assert!(handler.listens_to("restart app"));
        assert!(handler.listens_to("app events"));
        assert!(!handler.listens_to("other"));
    }

    #[test]
    fn include_tasks_is_deferred() {
        let pb = parse(
            "- hosts: all\n  tasks:\n    - include_tasks: sub.yml\n      when: go\n",
        )
        .unwrap();
        match &pb.plays[0].tasks[0] {
            TaskUnit::Include(include) => {
                assert_eq!(include.target, "sub.yml");
                assert!(!include.is_role);
                assert!(include.when.is_some());
            }
            _ => panic!("expected an include"),
        }
    }

    #[test]
    fn when_list_shorthand_is_preserved() {
        let pb = parse(
            "- hosts: all\n  tasks:\n    - debug: {msg: x}\n      when: ['a == 1', 'b == 2']\n",
        )
        .unwrap();
        match &pb.plays[0].tasks[0] {
            TaskUnit::Task(task) => {
                assert!(matches!(task.when, Some(serde_yaml::Value::Sequence(_))));
            }
            _ => panic!("expected a task"),
        }
    }
}
