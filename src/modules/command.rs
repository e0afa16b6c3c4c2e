//! Command execution modules: `command` (no shell), `shell` (POSIX
//! shell), and `raw` (bare command line, no guards).

use async_trait::async_trait;

use super::{Module, ModuleContext, ModuleOutput, ModuleParams, ModuleResult, ParamExt};
use crate::connection::RunOptions;

/// Shared front half: free-form extraction plus the `creates`/`removes`
/// guards.
async fn prepare(
    params: &ModuleParams,
    ctx: &ModuleContext,
    with_guards: bool,
) -> ModuleResult<Result<String, ModuleOutput>> {
    let command = params
        .get_str("_raw_params")
        .or_else(|| params.get_str("cmd"))
        .ok_or_else(|| super::ModuleError::MissingParameter("cmd".to_string()))?;

    if with_guards {
        if let Some(creates) = params.get_str("creates") {
            let stat = ctx.connection.stat(&creates).await?;
            if stat.exists {
                return Ok(Err(ModuleOutput::ok(format!(
                    "skipped, since {} exists",
                    creates
                ))));
            }
        }
        if let Some(removes) = params.get_str("removes") {
            let stat = ctx.connection.stat(&removes).await?;
            if !stat.exists {
                return Ok(Err(ModuleOutput::ok(format!(
                    "skipped, since {} does not exist",
                    removes
                ))));
            }
        }
    }

    Ok(Ok(command))
}

async fn run_command(
    command: &str,
    params: &ModuleParams,
    ctx: &ModuleContext,
    mut options: RunOptions,
) -> ModuleResult<ModuleOutput> {
    if ctx.check_mode {
        // Arbitrary commands cannot be simulated safely.
        return Ok(ModuleOutput::skipped(format!(
            "check mode: would run '{}'",
            command
        )));
    }

    if let Some(chdir) = params.get_str("chdir") {
        options.cwd = Some(chdir);
    }
    if let Some(stdin) = params.get_str("stdin") {
        options.stdin = Some(stdin);
    }

    let out = ctx.connection.run(command, options).await?;
    let mut output = if out.success() {
        ModuleOutput::changed("")
    } else {
        ModuleOutput::failed(format!(
            "non-zero return code {}: {}",
            out.rc,
            if out.stderr.trim().is_empty() {
                out.stdout.trim()
            } else {
                out.stderr.trim()
            }
        ))
    };
    output = output.with_command_output(out.stdout, out.stderr, out.rc);
    Ok(output)
}

/// Executes a command without a shell: no pipes, redirects, or expansion.
#[derive(Debug)]
pub struct CommandModule;

#[async_trait]
impl Module for CommandModule {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let command = match prepare(params, ctx, true).await? {
            Ok(command) => command,
            Err(early) => return Ok(early),
        };
        run_command(&command, params, ctx, RunOptions::raw()).await
    }
}

/// Executes a command through the remote POSIX shell.
#[derive(Debug)]
pub struct ShellModule;

#[async_trait]
impl Module for ShellModule {
    fn name(&self) -> &'static str {
        "shell"
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let command = match prepare(params, ctx, true).await? {
            Ok(command) => command,
            Err(early) => return Ok(early),
        };
        run_command(&command, params, ctx, RunOptions::sh()).await
    }
}

/// Executes a bare command line with no guards and no environment setup.
#[derive(Debug)]
pub struct RawModule;

#[async_trait]
impl Module for RawModule {
    fn name(&self) -> &'static str {
        "raw"
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let command = match prepare(params, ctx, false).await? {
            Ok(command) => command,
            Err(early) => return Ok(early),
        };
        run_command(&command, params, ctx, RunOptions::sh()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::tests_support::local_context;

    fn params(yaml: &str) -> ModuleParams {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[tokio::test]
    async fn shell_captures_output() {
        let ctx = local_context(false, false);
        let out = ShellModule
            .execute(&params("{_raw_params: 'echo hi'}"), &ctx)
            .await
            .unwrap();
        assert!(out.changed);
        assert_eq!(out.rc, Some(0));
        assert_eq!(out.stdout.as_deref().map(str::trim), Some("hi"));
    }

    #[tokio::test]
    async fn nonzero_rc_fails_with_output_attached() {
        let ctx = local_context(false, false);
        let out = ShellModule
            .execute(&params("{_raw_params: 'echo doom >&2; exit 7'}"), &ctx)
            .await
            .unwrap();
        assert!(out.failed);
        assert_eq!(out.rc, Some(7));
        assert!(out.stderr.as_deref().unwrap().contains("doom"));
    }

    #[tokio::test]
    async fn creates_guard_short_circuits() {
        let ctx = local_context(false, false);
        let out = ShellModule
            .execute(&params("{_raw_params: 'echo hi', creates: '/'}"), &ctx)
            .await
            .unwrap();
        assert!(!out.changed);
        assert!(out.msg.contains("skipped"));
    }

    #[tokio::test]
    async fn check_mode_skips() {
        let ctx = local_context(true, false);
        let out = CommandModule
            .execute(&params("{_raw_params: 'rm -rf /tmp/x'}"), &ctx)
            .await
            .unwrap();
        assert!(out.skipped);
    }

    #[tokio::test]
    async fn command_does_not_expand() {
        let ctx = local_context(false, false);
        let out = CommandModule
            .execute(&params("{_raw_params: 'echo $HOME'}"), &ctx)
            .await
            .unwrap();
        assert_eq!(out.stdout.as_deref().map(str::trim), Some("$HOME"));
    }
}
