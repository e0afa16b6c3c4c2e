//! The fixed filter and test surface of the template engine.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use minijinja::value::Value;
use minijinja::{Environment, Error, ErrorKind};

/// Registers every filter and test on the environment. Called once at
/// engine construction.
pub fn register(env: &mut Environment<'static>) {
    env.add_filter("default", default);
    env.add_filter("d", default);
    env.add_filter("bool", bool_filter);
    env.add_filter("string", string_filter);
    env.add_filter("to_json", to_json);
    env.add_filter("to_yaml", to_yaml);
    env.add_filter("b64encode", b64encode);
    env.add_filter("b64decode", b64decode);
    env.add_filter("basename", basename);
    env.add_filter("dirname", dirname);
    env.add_filter("regex_replace", regex_replace);
    env.add_filter("combine", combine);

    env.add_test("iterable", is_iterable);
    env.add_test("failed", |v: Value| result_flag(&v, "failed"));
    env.add_test("success", |v: Value| !result_flag(&v, "failed"));
    env.add_test("succeeded", |v: Value| !result_flag(&v, "failed"));
    env.add_test("changed", |v: Value| result_flag(&v, "changed"));
    env.add_test("skipped", |v: Value| result_flag(&v, "skipped"));
}

/// `default(fallback, boolean=false)`: undefined values take the
/// fallback; with `boolean=true`, falsy values do too.
fn default(value: Value, fallback: Option<Value>, boolean: Option<bool>) -> Value {
    let fallback = fallback.unwrap_or_else(|| Value::from(""));
    if value.is_undefined() {
        return fallback;
    }
    if boolean.unwrap_or(false) && !value.is_true() {
        return fallback;
    }
    value
}

fn bool_filter(value: Value) -> bool {
    if let Some(s) = value.as_str() {
        return matches!(s.to_lowercase().as_str(), "true" | "yes" | "1" | "on");
    }
    value.is_true()
}

fn string_filter(value: Value) -> String {
    value.to_string()
}

fn to_json(value: Value) -> Result<String, Error> {
    serde_json::to_string(&value)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))
}

fn to_yaml(value: Value) -> Result<String, Error> {
    serde_yaml::to_string(&value)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))
}

fn b64encode(value: String) -> String {
    BASE64.encode(value.as_bytes())
}

fn b64decode(value: String) -> Result<String, Error> {
    let bytes = BASE64
        .decode(value.as_bytes())
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("invalid base64: {}", e)))?;
    String::from_utf8(bytes)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("invalid utf-8: {}", e)))
}

fn basename(value: String) -> String {
    std::path::Path::new(&value)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn dirname(value: String) -> String {
    std::path::Path::new(&value)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn regex_replace(
    value: String,
    pattern: String,
    replacement: String,
) -> Result<String, Error> {
    let re = regex::Regex::new(&pattern)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("bad pattern: {}", e)))?;
    Ok(re.replace_all(&value, replacement.as_str()).into_owned())
}

/// Shallow dictionary merge; the argument's keys win.
fn combine(value: Value, other: Value) -> Result<Value, Error> {
    let mut base: serde_json::Value = serde_json::to_value(&value)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
    let overlay: serde_json::Value = serde_json::to_value(&other)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;

    match (&mut base, overlay) {
        (serde_json::Value::Object(a), serde_json::Value::Object(b)) => {
            for (k, v) in b {
                a.insert(k, v);
            }
            Ok(Value::from_serialize(&base))
        }
        _ => Err(Error::new(
            ErrorKind::InvalidOperation,
            "combine expects two mappings",
        )),
    }
}

fn is_iterable(value: Value) -> bool {
    value.as_str().is_none() && value.try_iter().is_ok()
}

/// Reads a boolean flag off a registered TaskResult mapping. A bare
/// string status ("failed", "skipped", ...) is also accepted.
fn result_flag(value: &Value, flag: &str) -> bool {
    if let Some(s) = value.as_str() {
        return s == flag;
    }
    let attr = value.get_attr(flag).unwrap_or(Value::UNDEFINED);
    if !attr.is_undefined() {
        return attr.is_true();
    }
    // Fall back to the status field.
    value
        .get_attr("status")
        .ok()
        .and_then(|s| s.as_str().map(|s| s == flag))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vars::VarMap;

    fn render(template: &str, vars: &VarMap) -> String {
        let engine = crate::template::TemplateEngine::default();
        engine.render_string(template, vars).unwrap()
    }

    fn empty() -> VarMap {
        VarMap::new()
    }

    #[test]
    fn b64_round_trip_is_identity() {
        let out = render("{{ 'payload' | b64encode | b64decode }}", &empty());
        assert_eq!(out, "payload");
    }

    #[test]
    fn path_filters() {
        assert_eq!(render("{{ '/etc/ssh/sshd_config' | basename }}", &empty()), "sshd_config");
        assert_eq!(render("{{ '/etc/ssh/sshd_config' | dirname }}", &empty()), "/etc/ssh");
    }

    #[test]
    fn regex_replace_filter() {
        let out = render(r"{{ 'web42' | regex_replace('\d+', 'N') }}", &empty());
        assert_eq!(out, "webN");
    }

    #[test]
    fn combine_merges_shallowly() {
        let mut vars = VarMap::new();
        vars.insert("a".into(), serde_yaml::from_str("{x: 1, y: 2}").unwrap());
        vars.insert("b".into(), serde_yaml::from_str("{y: 9, z: 3}").unwrap());
        let out = render("{{ (a | combine(b)) | to_json }}", &vars);
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["x"], 1);
        assert_eq!(parsed["y"], 9);
        assert_eq!(parsed["z"], 3);
    }

    #[test]
    fn bool_filter_follows_convention() {
        assert_eq!(render("{{ 'yes' | bool }}", &empty()), "true");
        assert_eq!(render("{{ 'off' | bool }}", &empty()), "false");
    }

    #[test]
    fn result_tests_read_flags() {
        let engine = crate::template::TemplateEngine::default();
        let mut vars = VarMap::new();
        vars.insert(
            "r".into(),
            serde_yaml::from_str("{failed: true, changed: false}").unwrap(),
        );
        assert!(engine
            .evaluate_when(&serde_yaml::Value::String("r is failed".into()), &vars)
            .unwrap());
        assert!(!engine
            .evaluate_when(&serde_yaml::Value::String("r is changed".into()), &vars)
            .unwrap());
        assert!(!engine
            .evaluate_when(&serde_yaml::Value::String("r is success".into()), &vars)
            .unwrap());
    }

    #[test]
    fn to_yaml_and_to_json() {
        let mut vars = VarMap::new();
        vars.insert("m".into(), serde_yaml::from_str("{k: v}").unwrap());
        assert_eq!(render("{{ m | to_json }}", &vars), r#"{"k":"v"}"#);
        assert!(render("{{ m | to_yaml }}", &vars).contains("k: v"));
    }
}
