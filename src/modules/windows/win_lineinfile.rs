//! `win_lineinfile`: line editing on Windows targets.
//!
//! Reuses the core line-editing logic, normalizing CRLF line endings in
//! and restoring them on the way out.

use async_trait::async_trait;

use crate::modules::lineinfile::{edit_from_params, edit_lines};
use crate::modules::{
    file_diff, Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult,
    ParamExt,
};

#[derive(Debug)]
pub struct WinLineinfileModule;

#[async_trait]
impl Module for WinLineinfileModule {
    fn name(&self) -> &'static str {
        "win_lineinfile"
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
        let raw = if stat.exists {
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

        let crlf = raw.contains("\r\n");
        let before = if crlf { raw.replace("\r\n", "\n") } else { raw.clone() };

        let (after_lf, changed) = edit_lines(&before, &edit)?;
        if !changed {
            return Ok(ModuleOutput::ok("line already in desired state"));
        }
        let after = if crlf {
            after_lf.replace('\n', "\r\n")
        } else {
            after_lf.clone()
        };

        let mut output = if ctx.check_mode {
            ModuleOutput::changed(format!("would edit {}", path))
        } else {
            ctx.connection
                .put_content(after.as_bytes(), &path, None)
                .await?;
            ModuleOutput::changed(format!("edited {}", path))
        };
        if ctx.diff_mode {
            output = output.with_diff(file_diff(&before, &after_lf, &path));
        }
        Ok(output)
    }
}
