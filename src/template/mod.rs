//! Expression and templating core.
//!
//! Strict-undefined rendering of `{{ … }}`/`{% … %}` expressions against a
//! host's variable mapping, with a fixed filter/test/lookup surface. Three
//! entry points: [`TemplateEngine::render_string`],
//! [`TemplateEngine::render_structure`], and
//! [`TemplateEngine::evaluate_when`]. Nested variable references are
//! resolved iteratively by [`TemplateEngine::resolve_vars`].

mod filters;
mod lookups;

use minijinja::{Environment, UndefinedBehavior};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::TEMPLATE_RESOLVE_PASSES;
use crate::vars::VarMap;

/// Errors raised by rendering, condition evaluation, or lookups.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The expression failed to parse or render.
    #[error("Template error in '{expression}': {message}")]
    Render {
        /// The failing expression text (possibly truncated)
        expression: String,
        /// Underlying message
        message: String,
    },

    /// A lookup plugin failed.
    #[error("lookup('{name}') failed: {message}")]
    Lookup {
        /// Lookup name
        name: String,
        /// Underlying message
        message: String,
    },
}

impl TemplateError {
    fn render(expression: &str, err: &minijinja::Error) -> Self {
        let mut truncated = expression.to_string();
        if truncated.len() > 120 {
            truncated.truncate(120);
            truncated.push_str("...");
        }
        Self::Render {
            expression: truncated,
            message: err.to_string(),
        }
    }
}

/// Result type for template operations.
pub type TemplateResult<T> = Result<T, TemplateError>;

/// True if the text contains template markers.
pub fn is_template(text: &str) -> bool {
    text.contains("{{") || text.contains("{%")
}

/// The configured template engine. Static tables (filters, tests, the
/// lookup dispatcher) are installed once at construction; the engine is
/// read-only afterwards and shared across host workers.
pub struct TemplateEngine {
    env: Environment<'static>,
    base_dir: PathBuf,
}

impl std::fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEngine")
            .field("base_dir", &self.base_dir)
            .finish()
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new(".")
    }
}

impl TemplateEngine {
    /// Creates an engine. `base_dir` anchors relative paths in lookups
    /// (conventionally the playbook directory).
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        let base_dir = base_dir.as_ref().to_path_buf();
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        filters::register(&mut env);
        lookups::register(&mut env, base_dir.clone());
        Self { env, base_dir }
    }

    /// The directory relative lookup paths resolve against.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Renders a string template against `vars`. Text without template
    /// markers is returned unchanged.
    pub fn render_string(&self, text: &str, vars: &VarMap) -> TemplateResult<String> {
        if !is_template(text) {
            return Ok(text.to_string());
        }
        self.env
            .render_str(text, vars)
            .map_err(|e| TemplateError::render(text, &e))
    }

    /// Renders a string, preserving the native type when the whole string
    /// is a single `{{ … }}` expression (so `"{{ mylist }}"` yields a
    /// sequence, not its string form).
    pub fn render_value(&self, text: &str, vars: &VarMap) -> TemplateResult<serde_yaml::Value> {
        if let Some(expr) = single_expression(text) {
            let value = self
                .env
                .compile_expression(expr)
                .and_then(|compiled| compiled.eval(vars))
                .map_err(|e| TemplateError::render(text, &e))?;
            return serde_yaml::to_value(&value).map_err(|e| TemplateError::Render {
                expression: text.to_string(),
                message: e.to_string(),
            });
        }
        self.render_string(text, vars)
            .map(serde_yaml::Value::String)
    }

    /// Recursively renders every string leaf of a tree; non-string scalars
    /// pass through untouched. Rendering an already-resolved structure is
    /// the identity.
    pub fn render_structure(
        &self,
        value: &serde_yaml::Value,
        vars: &VarMap,
    ) -> TemplateResult<serde_yaml::Value> {
        Ok(match value {
            serde_yaml::Value::String(s) => self.render_value(s, vars)?,
            serde_yaml::Value::Sequence(seq) => serde_yaml::Value::Sequence(
                seq.iter()
                    .map(|v| self.render_structure(v, vars))
                    .collect::<TemplateResult<_>>()?,
            ),
            serde_yaml::Value::Mapping(map) => {
                let mut out = serde_yaml::Mapping::new();
                for (k, v) in map {
                    let key = match k {
                        serde_yaml::Value::String(s) => {
                            serde_yaml::Value::String(self.render_string(s, vars)?)
                        }
                        other => other.clone(),
                    };
                    out.insert(key, self.render_structure(v, vars)?);
                }
                serde_yaml::Value::Mapping(out)
            }
            scalar => scalar.clone(),
        })
    }

    /// Evaluates a `when` condition. Accepts a bare expression string
    /// (without `{{ }}`), a boolean, or a list of conditions (logical AND).
    pub fn evaluate_when(
        &self,
        condition: &serde_yaml::Value,
        vars: &VarMap,
    ) -> TemplateResult<bool> {
        match condition {
            serde_yaml::Value::Null => Ok(true),
            serde_yaml::Value::Bool(b) => Ok(*b),
            serde_yaml::Value::Sequence(conditions) => {
                for cond in conditions {
                    if !self.evaluate_when(cond, vars)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            serde_yaml::Value::String(expr) => self.evaluate_expr(expr, vars),
            other => Ok(matches!(other, serde_yaml::Value::Number(n) if n.as_f64() != Some(0.0))),
        }
    }

    fn evaluate_expr(&self, expr: &str, vars: &VarMap) -> TemplateResult<bool> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Ok(true);
        }
        // Conditions are bare expressions, but `when: "{{ x }}"` appears in
        // the wild; unwrap the markers rather than nesting them.
        let expr = single_expression(expr).unwrap_or(expr);

        let value = self
            .env
            .compile_expression(expr)
            .and_then(|compiled| compiled.eval(vars))
            .map_err(|e| TemplateError::render(expr, &e))?;
        Ok(value_is_truthy(&value))
    }

    /// Resolves templated variable definitions against each other by
    /// repeated substitution, up to a fixed pass cap. Converges when a
    /// pass produces no change; on cap exhaustion the last partial result
    /// is returned. Values that cannot render yet (e.g. they reference
    /// runtime-only variables) are kept verbatim.
    pub fn resolve_vars(&self, vars: &VarMap) -> VarMap {
        let mut current = vars.clone();
        for pass in 0..TEMPLATE_RESOLVE_PASSES {
            let mut next = current.clone();
            let mut changed = false;
            for (key, value) in &current {
                match self.render_structure(value, &current) {
                    Ok(rendered) => {
                        if &rendered != value {
                            changed = true;
                        }
                        next.insert(key.clone(), rendered);
                    }
                    Err(_) => {
                        // Leave unresolvable values for later; they fail at
                        // use time under strict undefined.
                    }
                }
            }
            current = next;
            if !changed {
                return current;
            }
            if pass == TEMPLATE_RESOLVE_PASSES - 1 {
                tracing::warn!(
                    passes = TEMPLATE_RESOLVE_PASSES,
                    "variable resolution did not converge; returning last stable value"
                );
            }
        }
        current
    }
}

/// If the whole (trimmed) string is exactly one `{{ … }}` expression,
/// returns the inner expression.
fn single_expression(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") || inner.contains("{%") {
        return None;
    }
    Some(inner.trim())
}

/// Boolean coercion: native booleans pass through; strings follow the
/// yes/no convention with non-empty fallback; everything else uses the
/// engine's truthiness.
fn value_is_truthy(value: &minijinja::Value) -> bool {
    if let Some(s) = value.as_str() {
        return match s.to_lowercase().trim() {
            "true" | "yes" | "1" | "on" => true,
            "false" | "no" | "0" | "off" | "" => false,
            _ => true,
        };
    }
    value.is_true()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> VarMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), serde_yaml::from_str(v).unwrap()))
            .collect()
    }

    #[test]
    fn plain_text_passes_through() {
        let engine = TemplateEngine::default();
        assert_eq!(
            engine.render_string("no markers here", &VarMap::new()).unwrap(),
            "no markers here"
        );
    }

    #[test]
    fn renders_variables() {
        let engine = TemplateEngine::default();
        let v = vars(&[("name", "world")]);
        assert_eq!(
            engine.render_string("hello {{ name }}", &v).unwrap(),
            "hello world"
        );
    }

    #[test]
    fn undefined_variable_is_an_error() {
        let engine = TemplateEngine::default();
        assert!(engine.render_string("{{ missing }}", &VarMap::new()).is_err());
    }

    #[test]
    fn default_filter_supplies_value() {
        let engine = TemplateEngine::default();
        assert_eq!(
            engine
                .render_string("{{ missing | default('x') }}", &VarMap::new())
                .unwrap(),
            "x"
        );
    }

    #[test]
    fn single_expression_preserves_native_type() {
        let engine = TemplateEngine::default();
        let v = vars(&[("items", "[1, 2, 3]")]);
        let value = engine.render_value("{{ items }}", &v).unwrap();
        assert_eq!(value, serde_yaml::from_str::<serde_yaml::Value>("[1, 2, 3]").unwrap());
    }

    #[test]
    fn render_structure_is_idempotent() {
        let engine = TemplateEngine::default();
        let v = vars(&[("port", "80")]);
        let tree: serde_yaml::Value =
            serde_yaml::from_str("{listen: '{{ port }}', nested: {flag: true, n: 7}}").unwrap();
        let once = engine.render_structure(&tree, &v).unwrap();
        let twice = engine.render_structure(&once, &v).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn when_bare_expression() {
        let engine = TemplateEngine::default();
        let v = vars(&[("x", "5")]);
        assert!(engine
            .evaluate_when(&serde_yaml::Value::String("x > 3".into()), &v)
            .unwrap());
        assert!(!engine
            .evaluate_when(&serde_yaml::Value::String("x > 9".into()), &v)
            .unwrap());
    }

    #[test]
    fn when_list_is_conjunction() {
        let engine = TemplateEngine::default();
        let v = vars(&[("x", "5"), ("y", "1")]);
        let both: serde_yaml::Value = serde_yaml::from_str("['x > 3', 'y == 1']").unwrap();
        assert!(engine.evaluate_when(&both, &v).unwrap());
        let one_false: serde_yaml::Value = serde_yaml::from_str("['x > 3', 'y == 2']").unwrap();
        assert!(!engine.evaluate_when(&one_false, &v).unwrap());
    }

    #[test]
    fn when_is_defined() {
        let engine = TemplateEngine::default();
        let v = vars(&[("present", "1")]);
        assert!(engine
            .evaluate_when(&serde_yaml::Value::String("present is defined".into()), &v)
            .unwrap());
        assert!(engine
            .evaluate_when(&serde_yaml::Value::String("absent is not defined".into()), &v)
            .unwrap());
    }

    #[test]
    fn when_string_truthiness() {
        let engine = TemplateEngine::default();
        let v = vars(&[("flag", "'no'")]);
        assert!(!engine
            .evaluate_when(&serde_yaml::Value::String("flag".into()), &v)
            .unwrap());
    }

    #[test]
    fn nested_vars_resolve_iteratively() {
        let engine = TemplateEngine::default();
        let v = vars(&[
            ("a", "'{{ b }}/x'"),
            ("b", "'{{ c }}'"),
            ("c", "base"),
        ]);
        let resolved = engine.resolve_vars(&v);
        assert_eq!(
            resolved["a"],
            serde_yaml::Value::String("base/x".to_string())
        );
    }

    #[test]
    fn self_reference_stops_at_cap() {
        let engine = TemplateEngine::default();
        let v = vars(&[("a", "'{{ a }}x'")]);
        // Must terminate; the exact partial value is implementation-defined.
        let _ = engine.resolve_vars(&v);
    }
}
