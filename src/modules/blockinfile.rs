//! `blockinfile` module: maintain a marker-delimited block of text.

use async_trait::async_trait;

use super::{
    file_diff, Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult,
    ParamExt,
};

const DEFAULT_MARKER: &str = "# {mark} MANAGED BLOCK";

/// Replaces (or removes) the text between the begin/end markers,
/// appending the block at EOF when the markers are not present yet.
pub(crate) fn edit_block(
    content: &str,
    block: &str,
    marker_begin: &str,
    marker_end: &str,
    absent: bool,
) -> (String, bool) {
    let had_trailing_newline = content.is_empty() || content.ends_with('\n');
    let lines: Vec<&str> = content.lines().collect();

    let begin = lines.iter().position(|l| l.trim() == marker_begin);
    let end = begin.and_then(|b| {
        lines[b..]
            .iter()
            .position(|l| l.trim() == marker_end)
            .map(|offset| b + offset)
    });

    let mut out: Vec<String> = Vec::with_capacity(lines.len() + 4);
    let new_block: Vec<String> = if absent {
        Vec::new()
    } else {
        let mut b = vec![marker_begin.to_string()];
        b.extend(block.lines().map(str::to_string));
        b.push(marker_end.to_string());
        b
    };

    match (begin, end) {
        (Some(b), Some(e)) => {
            out.extend(lines[..b].iter().map(|s| s.to_string()));
            out.extend(new_block.iter().cloned());
            out.extend(lines[e + 1..].iter().map(|s| s.to_string()));
        }
        _ => {
            out.extend(lines.iter().map(|s| s.to_string()));
            out.extend(new_block.iter().cloned());
        }
    }

    let mut result = out.join("\n");
    if had_trailing_newline && !result.is_empty() {
        result.push('\n');
    }
    let changed = result != content;
    (result, changed)
}

#[derive(Debug)]
pub struct BlockinfileModule;

#[async_trait]
impl Module for BlockinfileModule {
    fn name(&self) -> &'static str {
        "blockinfile"
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
        let block = params.get_str("block").unwrap_or_default();
        let absent = params.get_str("state").as_deref() == Some("absent") || block.is_empty();
        let marker = params
            .get_str("marker")
            .unwrap_or_else(|| DEFAULT_MARKER.to_string());
        let marker_begin = marker.replace("{mark}", "BEGIN");
        let marker_end = marker.replace("{mark}", "END");
        let create = params.get_bool_or("create", false);

        let stat = ctx.connection.stat(&path).await?;
        let before = if stat.exists {
            String::from_utf8(ctx.connection.get_content(&path).await?).map_err(|_| {
                ModuleError::ExecutionFailed(format!("{} is not a text file", path))
            })?
        } else if create || absent {
            String::new()
        } else {
            return Ok(ModuleOutput::failed(format!(
                "{} does not exist (use create: true to add it)",
                path
            )));
        };

        let (after, changed) = edit_block(&before, &block, &marker_begin, &marker_end, absent);
        if !changed {
            return Ok(ModuleOutput::ok("block already in desired state"));
        }

        let mut output = if ctx.check_mode {
            ModuleOutput::changed(format!("would update block in {}", path))
        } else {
            ctx.connection
                .put_content(after.as_bytes(), &path, params.get_mode("mode")?)
                .await?;
            ModuleOutput::changed(format!("updated block in {}", path))
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

    #[test]
    fn inserts_block_at_eof() {
        let (out, changed) = edit_block("top\n", "a\nb", "# BEGIN", "# END", false);
        assert!(changed);
        assert_eq!(out, "top\n# BEGIN\na\nb\n# END\n");
    }

    #[test]
    fn replaces_existing_block() {
        let content = "top\n# BEGIN\nold\n# END\nbottom\n";
        let (out, changed) = edit_block(content, "new", "# BEGIN", "# END", false);
        assert!(changed);
        assert_eq!(out, "top\n# BEGIN\nnew\n# END\nbottom\n");
    }

    #[test]
    fn identical_block_is_unchanged() {
        let content = "# BEGIN\nsame\n# END\n";
        let (_, changed) = edit_block(content, "same", "# BEGIN", "# END", false);
        assert!(!changed);
    }

    #[test]
    fn absent_removes_markers_and_body() {
        let content = "keep\n# BEGIN\nbody\n# END\n";
        let (out, changed) = edit_block(content, "", "# BEGIN", "# END", true);
        assert!(changed);
        assert_eq!(out, "keep\n");
    }
}
