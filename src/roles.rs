//! Role loading.
//!
//! A role lives at `roles/<name>/` with the conventional subdirectories:
//! `tasks/`, `handlers/`, `defaults/`, `vars/`, and `meta/` (each with a
//! `main.yml`). Role defaults form the lowest role-variable tier, role
//! vars a higher one; dependencies from `meta/main.yml` are flattened
//! ahead of the role's own tasks.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::playbook::{parse_task_units, Handler, ParseCtx, TaskUnit};
use crate::vars::VarMap;

/// The expanded content of one role (dependencies included).
pub struct LoadedRole {
    pub tasks: Vec<TaskUnit>,
    pub handlers: Vec<Handler>,
}

/// Loads a role referenced from a play's `roles:` list or an
/// `import_role`/`include_role` directive.
pub(crate) fn load_role_entry(
    entry: &serde_yaml::Value,
    ctx: &ParseCtx,
) -> Result<LoadedRole> {
    let mut stack = Vec::new();
    load_role_value(entry, ctx, &mut stack)
}

fn load_role_value(
    entry: &serde_yaml::Value,
    ctx: &ParseCtx,
    stack: &mut Vec<String>,
) -> Result<LoadedRole> {
    let (name, params, when, tags) = match entry {
        serde_yaml::Value::String(name) => (name.clone(), VarMap::new(), None, Vec::new()),
        serde_yaml::Value::Mapping(map) => {
            let name = map
                .get("role")
                .or_else(|| map.get("name"))
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    Error::parse(&ctx.path, "role entry must carry a 'role' or 'name' key")
                })?
                .to_string();
            let mut params = VarMap::new();
            for (k, v) in map {
                if let Some(key) = k.as_str() {
                    if !matches!(key, "role" | "name" | "tags" | "when" | "vars") {
                        params.insert(key.to_string(), v.clone());
                    }
                }
            }
            if let Some(serde_yaml::Value::Mapping(vars)) = map.get("vars") {
                for (k, v) in vars {
                    if let Some(key) = k.as_str() {
                        params.insert(key.to_string(), v.clone());
                    }
                }
            }
            let when = map.get("when").cloned();
            let tags = match map.get("tags") {
                Some(serde_yaml::Value::String(s)) => vec![s.clone()],
                Some(serde_yaml::Value::Sequence(seq)) => seq
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
                _ => Vec::new(),
            };
            (name, params, when, tags)
        }
        _ => return Err(Error::parse(&ctx.path, "invalid role entry")),
    };

    load_role(&name, params, when, tags, ctx, stack)
}

fn load_role(
    name: &str,
    params: VarMap,
    when: Option<serde_yaml::Value>,
    tags: Vec<String>,
    ctx: &ParseCtx,
    stack: &mut Vec<String>,
) -> Result<LoadedRole> {
    if stack.iter().any(|n| n == name) {
        return Err(Error::parse(
            &ctx.path,
            format!(
                "circular role dependency: {} -> {}",
                stack.join(" -> "),
                name
            ),
        ));
    }
    stack.push(name.to_string());

    let role_path = find_role_path(name, ctx)
        .ok_or_else(|| Error::parse(&ctx.path, format!("role not found: {}", name)))?;

    let mut loaded = LoadedRole {
        tasks: Vec::new(),
        handlers: Vec::new(),
    };

    // Dependencies first.
    if let Some(meta) = read_main(&role_path.join("meta"))? {
        if let Some(serde_yaml::Value::Sequence(deps)) = meta.get("dependencies") {
            for dep in deps {
                let dep_role = load_role_value(dep, ctx, stack)?;
                loaded.tasks.extend(dep_role.tasks);
                loaded.handlers.extend(dep_role.handlers);
            }
        }
    }

    // defaults < role entry params < vars/main.
    let mut role_vars = VarMap::new();
    if let Some(defaults) = read_main(&role_path.join("defaults"))? {
        merge_mapping(&mut role_vars, &defaults);
    }
    for (k, v) in &params {
        role_vars.insert(k.clone(), v.clone());
    }
    if let Some(vars) = read_main(&role_path.join("vars"))? {
        merge_mapping(&mut role_vars, &vars);
    }

    // Role tasks parse with the role's tasks directory as the include
    // base, so intra-role imports resolve naturally.
    let role_ctx = ParseCtx {
        path: ctx.path.clone(),
        base_dir: role_path.join("tasks"),
        vault: ctx.vault.clone(),
    };

    let tasks_file = main_file(&role_path.join("tasks")).ok_or_else(|| {
        Error::parse(
            &ctx.path,
            format!("role '{}' has no tasks/main.yml", name),
        )
    })?;
    let content = std::fs::read_to_string(&tasks_file)?;
    let data: serde_yaml::Value = serde_yaml::from_str(&content)
        .map_err(|e| Error::parse(&tasks_file, format!("YAML syntax error: {}", e)))?;
    let units = match data {
        serde_yaml::Value::Sequence(items) => parse_task_units(&items, &role_ctx)?,
        serde_yaml::Value::Null => Vec::new(),
        _ => return Err(Error::parse(&tasks_file, "role tasks must be a list")),
    };

    for mut unit in units {
        apply_role_props(&mut unit, &role_vars, &when, &tags);
        loaded.tasks.push(unit);
    }

    if let Some(handlers_file) = main_file(&role_path.join("handlers")) {
        let content = std::fs::read_to_string(&handlers_file)?;
        let data: serde_yaml::Value = serde_yaml::from_str(&content)
            .map_err(|e| Error::parse(&handlers_file, format!("YAML syntax error: {}", e)))?;
        if let serde_yaml::Value::Sequence(items) = data {
            for item in &items {
                if let serde_yaml::Value::Mapping(map) = item {
                    let units = parse_task_units(std::slice::from_ref(item), &role_ctx)?;
                    if let Some(TaskUnit::Task(task)) = units.into_iter().next() {
                        let listen = match map.get("listen") {
                            Some(serde_yaml::Value::String(s)) => vec![s.clone()],
                            Some(serde_yaml::Value::Sequence(seq)) => seq
                                .iter()
                                .filter_map(|v| v.as_str().map(str::to_string))
                                .collect(),
                            _ => Vec::new(),
                        };
                        loaded.handlers.push(Handler { task, listen });
                    }
                }
            }
        }
    }

    stack.pop();
    Ok(loaded)
}

fn apply_role_props(
    unit: &mut TaskUnit,
    role_vars: &VarMap,
    when: &Option<serde_yaml::Value>,
    tags: &[String],
) {
    match unit {
        TaskUnit::Task(task) => {
            // Role vars sit below the task's own vars.
            let mut vars = role_vars.clone();
            for (k, v) in &task.vars {
                vars.insert(k.clone(), v.clone());
            }
            task.vars = vars;
            if task.when.is_none() {
                task.when = when.clone();
            }
            for tag in tags {
                if !task.tags.contains(tag) {
                    task.tags.push(tag.clone());
                }
            }
        }
        TaskUnit::Block(block) => {
            if block.when.is_none() {
                block.when = when.clone();
            }
            for tag in tags {
                if !block.tags.contains(tag) {
                    block.tags.push(tag.clone());
                }
            }
            for child in block
                .body
                .iter_mut()
                .chain(block.rescue.iter_mut())
                .chain(block.always.iter_mut())
            {
                apply_role_props(child, role_vars, &None, &[]);
            }
        }
        TaskUnit::Include(include) => {
            let mut vars = role_vars.clone();
            for (k, v) in &include.vars {
                vars.insert(k.clone(), v.clone());
            }
            include.vars = vars;
            if include.when.is_none() {
                include.when = when.clone();
            }
        }
    }
}

fn find_role_path(name: &str, ctx: &ParseCtx) -> Option<PathBuf> {
    let candidates = [
        ctx.base_dir.join("roles").join(name),
        PathBuf::from("roles").join(name),
    ];
    candidates.into_iter().find(|p| p.is_dir())
}

fn main_file(dir: &Path) -> Option<PathBuf> {
    ["main.yml", "main.yaml"]
        .iter()
        .map(|f| dir.join(f))
        .find(|p| p.is_file())
}

fn read_main(dir: &Path) -> Result<Option<serde_yaml::Mapping>> {
    let Some(file) = main_file(dir) else {
        return Ok(None);
    };
    let content = std::fs::read_to_string(&file)?;
    if content.trim().is_empty() {
        return Ok(None);
    }
    let data: serde_yaml::Value = serde_yaml::from_str(&content)
        .map_err(|e| Error::parse(&file, format!("YAML syntax error: {}", e)))?;
    match data {
        serde_yaml::Value::Mapping(map) => Ok(Some(map)),
        serde_yaml::Value::Null => Ok(None),
        _ => Err(Error::parse(&file, "expected a mapping")),
    }
}

fn merge_mapping(vars: &mut VarMap, map: &serde_yaml::Mapping) {
    for (k, v) in map {
        if let Some(key) = k.as_str() {
            vars.insert(key.to_string(), v.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playbook::PlaybookParser;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn role_tasks_defaults_and_handlers_load() {
        let dir = tempfile::tempdir().unwrap();
        let role = dir.path().join("roles/app");
        write(
            &role.join("tasks/main.yml"),
            "- name: deploy\n  debug:\n    msg: '{{ app_port }}'\n",
        );
        write(&role.join("defaults/main.yml"), "app_port: 8080\n");
        write(
            &role.join("handlers/main.yml"),
            "- name: restart app\n  command: /bin/true\n",
        );
        write(
            &dir.path().join("site.yml"),
            "- hosts: all\n  roles:\n    - app\n  tasks: []\n",
        );

        let pb = PlaybookParser::new(dir.path().join("site.yml"))
            .parse()
            .unwrap();
        let play = &pb.plays[0];
        assert_eq!(play.tasks.len(), 1);
        assert_eq!(play.handlers.len(), 1);
        match &play.tasks[0] {
            TaskUnit::Task(task) => {
                assert_eq!(task.name, "deploy");
                assert_eq!(
                    task.vars.get("app_port"),
                    Some(&serde_yaml::Value::Number(8080.into()))
                );
            }
            _ => panic!("expected task"),
        }
    }

    #[test]
    fn role_entry_params_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let role = dir.path().join("roles/app");
        write(&role.join("tasks/main.yml"), "- debug: {msg: x}\n");
        write(&role.join("defaults/main.yml"), "app_port: 8080\n");
        write(
            &dir.path().join("site.yml"),
            "- hosts: all\n  roles:\n    - role: app\n      app_port: 9090\n",
        );

        let pb = PlaybookParser::new(dir.path().join("site.yml"))
            .parse()
            .unwrap();
        match &pb.plays[0].tasks[0] {
            TaskUnit::Task(task) => {
                assert_eq!(
                    task.vars.get("app_port"),
                    Some(&serde_yaml::Value::Number(9090.into()))
                );
            }
            _ => panic!("expected task"),
        }
    }

    #[test]
    fn dependencies_flatten_before_role_tasks() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("roles/base/tasks/main.yml"),
            "- name: base task\n  debug: {msg: base}\n",
        );
        write(
            &dir.path().join("roles/app/tasks/main.yml"),
            "- name: app task\n  debug: {msg: app}\n",
        );
        write(
            &dir.path().join("roles/app/meta/main.yml"),
            "dependencies:\n  - base\n",
        );
        write(
            &dir.path().join("site.yml"),
            "- hosts: all\n  roles: [app]\n",
        );

        let pb = PlaybookParser::new(dir.path().join("site.yml"))
            .parse()
            .unwrap();
        let names: Vec<_> = pb.plays[0].task_names();
        assert_eq!(names, vec!["base task", "app task"]);
    }

    #[test]
    fn circular_dependencies_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("roles/a/tasks/main.yml"),
            "- debug: {msg: a}\n",
        );
        write(
            &dir.path().join("roles/a/meta/main.yml"),
            "dependencies: [b]\n",
        );
        write(
            &dir.path().join("roles/b/tasks/main.yml"),
            "- debug: {msg: b}\n",
        );
        write(
            &dir.path().join("roles/b/meta/main.yml"),
            "dependencies: [a]\n",
        );
        write(&dir.path().join("site.yml"), "- hosts: all\n  roles: [a]\n");

        let err = PlaybookParser::new(dir.path().join("site.yml"))
            .parse()
            .unwrap_err();
        assert!(err.to_string().contains("circular role dependency"));
    }

    #[test]
    fn missing_role_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("site.yml"),
            "- hosts: all\n  roles: [ghost]\n",
        );
        let err = PlaybookParser::new(dir.path().join("site.yml"))
            .parse()
            .unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
