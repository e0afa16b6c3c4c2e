//! `lineinfile` module: ensure a single line is present in (or absent
//! from) a file, keyed by an optional regular expression.
//!
//! The pure line-editing core is shared with `win_lineinfile`.

use async_trait::async_trait;
use regex::Regex;

use super::{
    file_diff, Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult,
    ParamExt,
};

/// Where a new line lands when no existing line matched.
#[derive(Debug, Clone, Default)]
pub(crate) enum InsertPosition {
    /// After the last line matching a pattern, or at EOF if none match.
    After(String),
    /// Before the first line matching a pattern, or at EOF if none match.
    Before(String),
    /// At the end of the file.
    #[default]
    Eof,
}

/// Declarative description of one line edit.
#[derive(Debug, Clone, Default)]
pub(crate) struct LineEdit {
    /// The exact line to ensure (required for state=present).
    pub line: Option<String>,
    /// Pattern selecting the line to replace or remove.
    pub regexp: Option<String>,
    /// present (default) or absent.
    pub absent: bool,
    /// Placement of an inserted line.
    pub insert: InsertPosition,
}

/// Applies a line edit to file content, returning the new content and
/// whether anything changed. Trailing-newline presence is preserved.
pub(crate) fn edit_lines(content: &str, edit: &LineEdit) -> ModuleResult<(String, bool)> {
    let had_trailing_newline = content.is_empty() || content.ends_with('\n');
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();

    let regexp = match &edit.regexp {
        Some(pattern) => Some(Regex::new(pattern).map_err(|e| {
            ModuleError::InvalidParameter(format!("invalid regexp '{}': {}", pattern, e))
        })?),
        None => None,
    };

    let changed = if edit.absent {
        let before = lines.len();
        lines.retain(|l| {
            let matches = match (&regexp, &edit.line) {
                (Some(re), _) => re.is_match(l),
                (None, Some(line)) => l == line,
                (None, None) => false,
            };
            !matches
        });
        lines.len() != before
    } else {
        let line = edit
            .line
            .clone()
            .ok_or_else(|| ModuleError::MissingParameter("line".to_string()))?;

        // Replace the last line matching the pattern; otherwise keep an
        // already-present exact line; otherwise insert.
        let matched_idx = regexp
            .as_ref()
            .and_then(|re| lines.iter().rposition(|l| re.is_match(l)));

        match matched_idx {
            Some(idx) => {
                if lines[idx] == line {
                    false
                } else {
                    lines[idx] = line;
                    true
                }
            }
            None => {
                if lines.iter().any(|l| l == &line) {
                    false
                } else {
                    let at = match &edit.insert {
                        InsertPosition::Eof => lines.len(),
                        InsertPosition::After(pattern) => {
                            let re = Regex::new(pattern).map_err(|e| {
                                ModuleError::InvalidParameter(format!(
                                    "invalid insertafter '{}': {}",
                                    pattern, e
                                ))
                            })?;
                            lines
                                .iter()
                                .rposition(|l| re.is_match(l))
                                .map(|i| i + 1)
                                .unwrap_or(lines.len())
                        }
                        InsertPosition::Before(pattern) => {
                            let re = Regex::new(pattern).map_err(|e| {
                                ModuleError::InvalidParameter(format!(
                                    "invalid insertbefore '{}': {}",
                                    pattern, e
                                ))
                            })?;
                            lines
                                .iter()
                                .position(|l| re.is_match(l))
                                .unwrap_or(lines.len())
                        }
                    };
                    lines.insert(at, line);
                    true
                }
            }
        }
    };

    let mut result = lines.join("\n");
    if had_trailing_newline && !result.is_empty() {
        result.push('\n');
    }
    Ok((result, changed))
}

/// Builds a [`LineEdit`] from module parameters.
pub(crate) fn edit_from_params(params: &ModuleParams) -> ModuleResult<LineEdit> {
    let state = params
        .get_str("state")
        .unwrap_or_else(|| "present".to_string());
    let insert = if let Some(pattern) = params.get_str("insertafter") {
        if pattern == "EOF" {
            InsertPosition::Eof
        } else {
            InsertPosition::After(pattern)
        }
    } else if let Some(pattern) = params.get_str("insertbefore") {
        InsertPosition::Before(pattern)
    } else {
        InsertPosition::Eof
    };

    Ok(LineEdit {
        line: params.get_str("line"),
        regexp: params.get_str("regexp"),
        absent: state == "absent",
        insert,
    })
}

#[derive(Debug)]
pub struct LineinfileModule;

#[async_trait]
impl Module for LineinfileModule {
    fn name(&self) -> &'static str {
        "lineinfile"
    }

    fn required_params(&self) -> &'static [&'static str] {
        &["path"]
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let path = params.get_str_required("path")?;
        let create = params.get_bool_or("create", false);
        let edit = edit_from_params(params)?;

        let stat = ctx.connection.stat(&path).await?;
        let before = if stat.exists {
            String::from_utf8(ctx.connection.get_content(&path).await?).map_err(|_| {
                ModuleError::ExecutionFailed(format!("{} is not a text file", path))
            })?
        } else if create || edit.absent {
            String::new()
        } else {
            return Ok(ModuleOutput::failed(format!(
                "{} does not exist (use create: true to add it)",
                path
            )));
        };

        let (after, changed) = edit_lines(&before, &edit)?;
        if !changed {
            return Ok(ModuleOutput::ok("line already in desired state"));
        }

        let mut output = if ctx.check_mode {
            ModuleOutput::changed(format!("would edit {}", path))
        } else {
            ctx.connection
                .put_content(after.as_bytes(), &path, params.get_mode("mode")?)
                .await?;
            ModuleOutput::changed(format!("edited {}", path))
        };

        if ctx.diff_mode {
            output = output.with_diff(file_diff(&before, &after, &path));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::tests_support::local_context;

    fn present(line: &str, regexp: Option<&str>) -> LineEdit {
        LineEdit {
            line: Some(line.to_string()),
            regexp: regexp.map(str::to_string),
            ..LineEdit::default()
        }
    }

    #[test]
    fn appends_missing_line_at_eof() {
        let (out, changed) = edit_lines("a\nb\n", &present("c", None)).unwrap();
        assert!(changed);
        assert_eq!(out, "a\nb\nc\n");
    }

    #[test]
    fn present_line_is_untouched() {
        let (out, changed) = edit_lines("a\nb\n", &present("b", None)).unwrap();
        assert!(!changed);
        assert_eq!(out, "a\nb\n");
    }

    #[test]
    fn regexp_replaces_last_match() {
        let content = "port=1\nport=2\nother\n";
        let (out, changed) = edit_lines(content, &present("port=9", Some("^port="))).unwrap();
        assert!(changed);
        assert_eq!(out, "port=1\nport=9\nother\n");
    }

    #[test]
    fn insertafter_places_line() {
        let edit = LineEdit {
            line: Some("new".into()),
            insert: InsertPosition::After("^a$".into()),
            ..LineEdit::default()
        };
        let (out, changed) = edit_lines("a\nb\n", &edit).unwrap();
        assert!(changed);
        assert_eq!(out, "a\nnew\nb\n");
    }

    #[test]
    fn insertbefore_places_line() {
        let edit = LineEdit {
            line: Some("new".into()),
            insert: InsertPosition::Before("^b$".into()),
            ..LineEdit::default()
        };
        let (out, _) = edit_lines("a\nb\n", &edit).unwrap();
        assert_eq!(out, "a\nnew\nb\n");
    }

    #[test]
    fn absent_removes_matches() {
        let edit = LineEdit {
            regexp: Some("^drop".into()),
            absent: true,
            ..LineEdit::default()
        };
        let (out, changed) = edit_lines("keep\ndrop me\ndrop too\n", &edit).unwrap();
        assert!(changed);
        assert_eq!(out, "keep\n");
    }

    #[test]
    fn file_without_trailing_newline_stays_that_way() {
        let (out, _) = edit_lines("a\nb", &present("c", None)).unwrap();
        assert_eq!(out, "a\nb\nc");
    }

    #[tokio::test]
    async fn module_is_idempotent_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("conf");
        std::fs::write(&file, "x=1\n").unwrap();
        let ctx = local_context(false, false);
        let p: ModuleParams = serde_yaml::from_str(&format!(
            "{{path: '{}', line: 'y=2'}}",
            file.display()
        ))
        .unwrap();

        let first = LineinfileModule.execute(&p, &ctx).await.unwrap();
        assert!(first.changed);
        let second = LineinfileModule.execute(&p, &ctx).await.unwrap();
        assert!(!second.changed);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "x=1\ny=2\n");
    }

    #[tokio::test]
    async fn missing_file_without_create_fails() {
        let ctx = local_context(false, false);
        let p: ModuleParams =
            serde_yaml::from_str("{path: '/no/such/file', line: 'x'}").unwrap();
        let out = LineinfileModule.execute(&p, &ctx).await.unwrap();
        assert!(out.failed);
    }

    #[tokio::test]
    async fn diff_mode_attaches_payload() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("conf");
        std::fs::write(&file, "a\n").unwrap();
        let ctx = local_context(false, true);
        let p: ModuleParams = serde_yaml::from_str(&format!(
            "{{path: '{}', line: 'b'}}",
            file.display()
        ))
        .unwrap();
        let out = LineinfileModule.execute(&p, &ctx).await.unwrap();
        let diff = out.diff.expect("diff");
        assert_eq!(diff.before, "a\n");
        assert_eq!(diff.after, "a\nb\n");
    }
}
