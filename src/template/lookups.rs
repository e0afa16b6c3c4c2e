//! Lookup plugins exposed through the `lookup()` (and `query()`) template
//! global.
//!
//! Lookups run on the control node; `pipe` uses the local process
//! facility, never a transport. Relative paths resolve against the
//! playbook directory.

use minijinja::value::{Rest, Value};
use minijinja::{Environment, Error, ErrorKind};
use rand::Rng;
use std::path::{Path, PathBuf};

/// Registers the `lookup`/`query` globals. Called once at engine
/// construction.
pub fn register(env: &mut Environment<'static>, base_dir: PathBuf) {
    let dir = base_dir.clone();
    env.add_function("lookup", move |name: String, args: Rest<Value>| {
        dispatch(&dir, &name, &args)
    });
    env.add_function("query", move |name: String, args: Rest<Value>| {
        dispatch(&base_dir, &name, &args)
    });
}

fn dispatch(base_dir: &Path, name: &str, args: &[Value]) -> Result<Value, Error> {
    match name {
        "file" => lookup_file(base_dir, str_arg(name, args, 0)?),
        "env" => Ok(Value::from(
            std::env::var(str_arg(name, args, 0)?).unwrap_or_default(),
        )),
        "pipe" => lookup_pipe(str_arg(name, args, 0)?),
        "fileglob" => lookup_fileglob(base_dir, str_arg(name, args, 0)?),
        "first_found" => lookup_first_found(base_dir, args),
        "items" => lookup_items(args),
        "dict" => lookup_dict(args),
        "password" => lookup_password(base_dir, str_arg(name, args, 0)?),
        "lines" => lookup_lines(base_dir, str_arg(name, args, 0)?),
        other => Err(fail(other, "unknown lookup")),
    }
}

fn fail(name: &str, message: impl std::fmt::Display) -> Error {
    Error::new(
        ErrorKind::InvalidOperation,
        format!("lookup('{}') failed: {}", name, message),
    )
}

fn str_arg<'a>(name: &str, args: &'a [Value], index: usize) -> Result<&'a str, Error> {
    args.get(index)
        .and_then(|v| v.as_str())
        .ok_or_else(|| fail(name, format!("missing string argument {}", index + 1)))
}

fn resolve(base_dir: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

fn lookup_file(base_dir: &Path, path: &str) -> Result<Value, Error> {
    let content =
        std::fs::read_to_string(resolve(base_dir, path)).map_err(|e| fail("file", e))?;
    Ok(Value::from(content.trim_end_matches('\n').to_string()))
}

fn lookup_pipe(command: &str) -> Result<Value, Error> {
    let output = std::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .output()
        .map_err(|e| fail("pipe", e))?;
    if !output.status.success() {
        return Err(fail(
            "pipe",
            format!(
                "command exited {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(Value::from(stdout.trim_end_matches('\n').to_string()))
}

fn lookup_fileglob(base_dir: &Path, pattern: &str) -> Result<Value, Error> {
    let full = resolve(base_dir, pattern);
    let paths = glob::glob(&full.to_string_lossy()).map_err(|e| fail("fileglob", e))?;
    let mut files: Vec<Value> = Vec::new();
    for entry in paths.flatten() {
        if entry.is_file() {
            files.push(Value::from(entry.to_string_lossy().into_owned()));
        }
    }
    Ok(Value::from(files))
}

fn lookup_first_found(base_dir: &Path, args: &[Value]) -> Result<Value, Error> {
    // Accepts either a list argument or varargs of candidate paths.
    let candidates: Vec<String> = if args.len() == 1 && args[0].as_str().is_none() {
        args[0]
            .try_iter()
            .map_err(|e| fail("first_found", e))?
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    } else {
        args.iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    };

    for candidate in &candidates {
        let path = resolve(base_dir, candidate);
        if path.exists() {
            return Ok(Value::from(path.to_string_lossy().into_owned()));
        }
    }
    Err(fail(
        "first_found",
        format!("none of {} candidates exist", candidates.len()),
    ))
}

fn lookup_items(args: &[Value]) -> Result<Value, Error> {
    // Flattens one level, matching `with_items` semantics.
    let mut out: Vec<Value> = Vec::new();
    for arg in args {
        match arg.try_iter() {
            Ok(iter) if arg.as_str().is_none() => out.extend(iter),
            _ => out.push(arg.clone()),
        }
    }
    Ok(Value::from(out))
}

fn lookup_dict(args: &[Value]) -> Result<Value, Error> {
    let mapping = args
        .first()
        .ok_or_else(|| fail("dict", "missing mapping argument"))?;
    let mut out: Vec<Value> = Vec::new();
    for key in mapping.try_iter().map_err(|e| fail("dict", e))? {
        let value = mapping.get_item(&key).unwrap_or(Value::UNDEFINED);
        out.push(Value::from_serialize(&serde_json::json!({
            "key": serde_json::to_value(&key).map_err(|e| fail("dict", e))?,
            "value": serde_json::to_value(&value).map_err(|e| fail("dict", e))?,
        })));
    }
    Ok(Value::from(out))
}

/// Reads the password stored at `path`, generating and persisting a new
/// random one when the file does not exist yet.
fn lookup_password(base_dir: &Path, path: &str) -> Result<Value, Error> {
    let full = resolve(base_dir, path);
    if full.exists() {
        let content = std::fs::read_to_string(&full).map_err(|e| fail("password", e))?;
        return Ok(Value::from(
            content.lines().next().unwrap_or("").to_string(),
        ));
    }

    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    let password: String = (0..20)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();

    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent).map_err(|e| fail("password", e))?;
    }
    std::fs::write(&full, format!("{}\n", password)).map_err(|e| fail("password", e))?;
    Ok(Value::from(password))
}

fn lookup_lines(base_dir: &Path, path: &str) -> Result<Value, Error> {
    let content =
        std::fs::read_to_string(resolve(base_dir, path)).map_err(|e| fail("lines", e))?;
    let lines: Vec<Value> = content.lines().map(Value::from).collect();
    Ok(Value::from(lines))
}

#[cfg(test)]
mod tests {
    use crate::template::TemplateEngine;
    use crate::vars::VarMap;
    use std::io::Write;

    #[test]
    fn file_lookup_reads_relative_to_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("motd"), "welcome\n").unwrap();
        let engine = TemplateEngine::new(dir.path());
        let out = engine
            .render_string("{{ lookup('file', 'motd') }}", &VarMap::new())
            .unwrap();
        assert_eq!(out, "welcome");
    }

    #[test]
    fn env_lookup_missing_is_empty() {
        let engine = TemplateEngine::default();
        let out = engine
            .render_string("{{ lookup('env', 'RUNBOOK_TEST_UNSET_VAR') }}", &VarMap::new())
            .unwrap();
        assert_eq!(out, "");
    }

    #[test]
    fn pipe_lookup_runs_on_control_node() {
        let engine = TemplateEngine::default();
        let out = engine
            .render_string("{{ lookup('pipe', 'echo piped') }}", &VarMap::new())
            .unwrap();
        assert_eq!(out, "piped");
    }

    #[test]
    fn pipe_failure_is_a_template_error() {
        let engine = TemplateEngine::default();
        assert!(engine
            .render_string("{{ lookup('pipe', 'false') }}", &VarMap::new())
            .is_err());
    }

    #[test]
    fn first_found_picks_existing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.conf"), "x").unwrap();
        let engine = TemplateEngine::new(dir.path());
        let out = engine
            .render_string(
                "{{ lookup('first_found', ['a.conf', 'b.conf']) }}",
                &VarMap::new(),
            )
            .unwrap();
        assert!(out.ends_with("b.conf"));
    }

    #[test]
    fn password_lookup_is_stable_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let engine = TemplateEngine::new(dir.path());
        let first = engine
            .render_string("{{ lookup('password', 'secret.txt') }}", &VarMap::new())
            .unwrap();
        let second = engine
            .render_string("{{ lookup('password', 'secret.txt') }}", &VarMap::new())
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 20);
    }

    #[test]
    fn lines_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("hosts.txt")).unwrap();
        writeln!(f, "one").unwrap();
        writeln!(f, "two").unwrap();
        let engine = TemplateEngine::new(dir.path());
        let out = engine
            .render_string("{{ lookup('lines', 'hosts.txt') | length }}", &VarMap::new())
            .unwrap();
        assert_eq!(out, "2");
    }

    #[test]
    fn fileglob_lists_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("c.txt")).unwrap();
        let engine = TemplateEngine::new(dir.path());
        let out = engine
            .render_string("{{ lookup('fileglob', '*.txt') | length }}", &VarMap::new())
            .unwrap();
        assert_eq!(out, "2");
    }

    #[test]
    fn unknown_lookup_errors() {
        let engine = TemplateEngine::default();
        assert!(engine
            .render_string("{{ lookup('nope', 'x') }}", &VarMap::new())
            .is_err());
    }
}
