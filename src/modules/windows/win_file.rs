//! `win_file`: path state management on Windows targets.

use async_trait::async_trait;

use super::ps_quote;
use crate::connection::RunOptions;
use crate::modules::{
    Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult, ParamExt,
};

#[derive(Debug)]
pub struct WinFileModule;

#[async_trait]
impl Module for WinFileModule {
    fn name(&self) -> &'static str {
        "win_file"
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let path = params
            .get_str("path")
            .or_else(|| params.get_str("dest"))
            .ok_or_else(|| ModuleError::MissingParameter("path".to_string()))?;
        let state = params
            .get_str("state")
            .unwrap_or_else(|| "file".to_string());

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
                    .run(
                        &format!("Remove-Item {} -Recurse -Force", ps_quote(&path)),
                        RunOptions::powershell(),
                    )
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
                if ctx.check_mode {
                    return Ok(ModuleOutput::changed(format!(
                        "would create directory {}",
                        path
                    )));
                }
                ctx.connection.mkdir(&path, None).await?;
                Ok(ModuleOutput::changed(format!("created directory {}", path)))
            }
            "touch" => {
                if ctx.check_mode {
                    let verb = if stat.exists { "update" } else { "create" };
                    return Ok(ModuleOutput::changed(format!("would {} {}", verb, path)));
                }
                let script = format!(
                    "if (Test-Path {p}) {{ (Get-Item {p}).LastWriteTime = Get-Date }} else {{ New-Item -ItemType File -Force -Path {p} | Out-Null }}",
                    p = ps_quote(&path)
                );
                let out = ctx.connection.run(&script, RunOptions::powershell()).await?;
                if !out.success() {
                    return Ok(ModuleOutput::failed(format!(
                        "touch {} failed: {}",
                        path,
                        out.stderr.trim()
                    )));
                }
                Ok(ModuleOutput::changed(format!("touched {}", path)))
            }
            "file" => {
                if stat.exists && stat.is_file {
                    Ok(ModuleOutput::ok(format!("{} exists", path)))
                } else {
                    Ok(ModuleOutput::failed(format!(
                        "{} does not exist or is not a file",
                        path
                    )))
                }
            }
            other => Err(ModuleError::InvalidParameter(format!(
                "unknown state '{}'",
                other
            ))),
        }
    }
}
