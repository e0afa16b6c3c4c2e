//! `file` module: ensure a path is absent, a directory, a touched file,
//! an existing file, or a symlink.

use async_trait::async_trait;

use super::{Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult, ParamExt};
use crate::connection::{sh_quote, RunOptions};

#[derive(Debug)]
pub struct FileModule;

#[async_trait]
impl Module for FileModule {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let path = params
            .get_str("path")
            .or_else(|| params.get_str("dest"))
            .or_else(|| params.get_str("name"))
            .ok_or_else(|| ModuleError::MissingParameter("path".to_string()))?;
        let state = params.get_str("state").unwrap_or_else(|| "file".to_string());
        let mode = params.get_mode("mode")?;

        let stat = ctx.connection.stat(&path).await?;

        match state.as_str() {
            "absent" => {
                if !stat.exists {
                    return Ok(ModuleOutput::ok(format!("{} is already absent", path)));
                }
                if ctx.check_mode {
                    return Ok(ModuleOutput::changed(format!("would remove {}", path)));
                }
                let out = ctx
                    .connection
                    .run(&format!("rm -rf -- {}", sh_quote(&path)), RunOptions::sh())
                    .await?;
                if !out.success() {
                    return Ok(ModuleOutput::failed(format!(
                        "could not remove {}: {}",
                        path,
                        out.stderr.trim()
                    )));
                }
                Ok(ModuleOutput::changed(format!("removed {}", path)))
            }
            "directory" => {
                if stat.exists && stat.is_dir {
                    return Ok(ModuleOutput::ok(format!("{} already exists", path)));
                }
                if stat.exists && !stat.is_dir {
                    return Ok(ModuleOutput::failed(format!(
                        "{} exists and is not a directory",
                        path
                    )));
                }
                if ctx.check_mode {
                    return Ok(ModuleOutput::changed(format!(
                        "would create directory {}",
                        path
                    )));
                }
                ctx.connection.mkdir(&path, mode).await?;
                Ok(ModuleOutput::changed(format!("created directory {}", path)))
            }
            "touch" => {
                if ctx.check_mode {
                    let verb = if stat.exists { "update" } else { "create" };
                    return Ok(ModuleOutput::changed(format!("would {} {}", verb, path)));
                }
                if !stat.exists {
                    ctx.connection.put_content(b"", &path, mode).await?;
                } else {
                    let out = ctx
                        .connection
                        .run(&format!("touch -- {}", sh_quote(&path)), RunOptions::sh())
                        .await?;
                    if !out.success() {
                        return Ok(ModuleOutput::failed(format!(
                            "touch {} failed: {}",
                            path,
                            out.stderr.trim()
                        )));
                    }
                }
                Ok(ModuleOutput::changed(format!("touched {}", path)))
            }
            "file" => {
                if stat.exists && stat.is_file {
                    Ok(ModuleOutput::ok(format!("{} exists", path)))
                } else if stat.exists {
                    Ok(ModuleOutput::failed(format!("{} is not a regular file", path)))
                } else {
                    // state=file never creates; that is touch.
                    Ok(ModuleOutput::failed(format!("{} does not exist", path)))
                }
            }
            "link" => {
                let src = params
                    .get_str("src")
                    .ok_or_else(|| ModuleError::MissingParameter("src (for state=link)".into()))?;

                if stat.is_link {
                    let out = ctx
                        .connection
                        .run(
                            &format!("readlink -- {}", sh_quote(&path)),
                            RunOptions::sh(),
                        )
                        .await?;
                    if out.success() && out.stdout.trim() == src {
                        return Ok(ModuleOutput::ok(format!(
                            "{} already links to {}",
                            path, src
                        )));
                    }
                }
                if ctx.check_mode {
                    return Ok(ModuleOutput::changed(format!(
                        "would link {} -> {}",
                        path, src
                    )));
                }
                let out = ctx
                    .connection
                    .run(
                        &format!("ln -sfn -- {} {}", sh_quote(&src), sh_quote(&path)),
                        RunOptions::sh(),
                    )
                    .await?;
                if !out.success() {
                    return Ok(ModuleOutput::failed(format!(
                        "linking {} failed: {}",
                        path,
                        out.stderr.trim()
                    )));
                }
                Ok(ModuleOutput::changed(format!("linked {} -> {}", path, src)))
            }
            other => Err(ModuleError::InvalidParameter(format!(
                "unknown state '{}'",
                other
            ))),
        }
    }
}
