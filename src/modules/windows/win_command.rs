//! `win_command` and `win_shell`: command execution on Windows targets.

use async_trait::async_trait;

use crate::connection::RunOptions;
use crate::modules::{
    Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult, ParamExt,
};

async fn run_windows_command(
    params: &ModuleParams,
    ctx: &ModuleContext,
    options: RunOptions,
) -> ModuleResult<ModuleOutput> {
    let command = params
        .get_str("_raw_params")
        .or_else(|| params.get_str("cmd"))
        .ok_or_else(|| ModuleError::MissingParameter("cmd".to_string()))?;

    if let Some(creates) = params.get_str("creates") {
        if ctx.connection.stat(&creates).await?.exists {
            return Ok(ModuleOutput::ok(format!("skipped, since {} exists", creates)));
        }
    }
    if let Some(removes) = params.get_str("removes") {
        if !ctx.connection.stat(&removes).await?.exists {
            return Ok(ModuleOutput::ok(format!(
                "skipped, since {} does not exist",
                removes
            )));
        }
    }

    if ctx.check_mode {
        return Ok(ModuleOutput::skipped(format!(
            "check mode: would run '{}'",
            command
        )));
    }

    let mut options = options;
    if let Some(chdir) = params.get_str("chdir") {
        options.cwd = Some(chdir);
    }

    let out = ctx.connection.run(&command, options).await?;
    let mut output = if out.success() {
        ModuleOutput::changed("")
    } else {
        ModuleOutput::failed(format!("non-zero return code {}", out.rc))
    };
    output = output.with_command_output(out.stdout, out.stderr, out.rc);
    Ok(output)
}

/// Runs a command through `cmd.exe` (no PowerShell parsing).
#[derive(Debug)]
pub struct WinCommandModule;

#[async_trait]
impl Module for WinCommandModule {
    fn name(&self) -> &'static str {
        "win_command"
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        run_windows_command(params, ctx, RunOptions::raw()).await
    }
}

/// Runs a script through PowerShell.
#[derive(Debug)]
pub struct WinShellModule;

#[async_trait]
impl Module for WinShellModule {
    fn name(&self) -> &'static str {
        "win_shell"
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        run_windows_command(params, ctx, RunOptions::powershell()).await
    }
}
