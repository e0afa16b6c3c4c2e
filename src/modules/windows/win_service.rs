//! `win_service`: Windows service state and startup-mode management.

use async_trait::async_trait;

use super::ps_quote;
use crate::connection::RunOptions;
use crate::modules::{
    Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult, ParamExt,
};

#[derive(Debug)]
pub struct WinServiceModule;

impl WinServiceModule {
    async fn current_status(
        &self,
        name: &str,
        ctx: &ModuleContext,
    ) -> ModuleResult<Option<String>> {
        let out = ctx
            .connection
            .run(
                &format!(
                    "(Get-Service -Name {} -ErrorAction SilentlyContinue).Status",
                    ps_quote(name)
                ),
                RunOptions::powershell(),
            )
            .await?;
        let status = out.stdout.trim().to_string();
        if status.is_empty() {
            Ok(None)
        } else {
            Ok(Some(status))
        }
    }
}

#[async_trait]
impl Module for WinServiceModule {
    fn name(&self) -> &'static str {
        "win_service"
    }

    fn required_params(&self) -> &'static [&'static str] {
        &["name"]
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let name = params.get_str_required("name")?;
        let state = params.get_str("state");
        let start_mode = params.get_str("start_mode");

        let status = match self.current_status(&name, ctx).await? {
            Some(status) => status,
            None => {
                return Ok(ModuleOutput::failed(format!("service '{}' not found", name)))
            }
        };

        let mut changed = false;
        let mut actions: Vec<String> = Vec::new();

        if let Some(state) = &state {
            let running = status.eq_ignore_ascii_case("Running");
            let (needs_action, verb) = match state.as_str() {
                "started" => (!running, "Start-Service"),
                "stopped" => (running, "Stop-Service -Force"),
                "restarted" => (true, "Restart-Service -Force"),
                other => {
                    return Err(ModuleError::InvalidParameter(format!(
                        "unknown state '{}'",
                        other
                    )))
                }
            };
            if needs_action {
                if ctx.check_mode {
                    actions.push(format!("would run {} on {}", verb, name));
                } else {
                    let out = ctx
                        .connection
                        .run(
                            &format!("{} -Name {}", verb, ps_quote(&name)),
                            RunOptions::powershell(),
                        )
                        .await?;
                    if !out.success() {
                        return Ok(ModuleOutput::failed(format!(
                            "{} failed for '{}': {}",
                            verb,
                            name,
                            out.stderr.trim()
                        )));
                    }
                    actions.push(format!("{} {}", verb, name));
                }
                changed = true;
            }
        }

        if let Some(mode) = &start_mode {
            let ps_mode = match mode.as_str() {
                "auto" => "Automatic",
                "manual" => "Manual",
                "disabled" => "Disabled",
                other => {
                    return Err(ModuleError::InvalidParameter(format!(
                        "unknown start_mode '{}'",
                        other
                    )))
                }
            };
            let current = ctx
                .connection
                .run(
                    &format!("(Get-Service -Name {}).StartType", ps_quote(&name)),
                    RunOptions::powershell(),
                )
                .await?;
            if !current.stdout.trim().eq_ignore_ascii_case(ps_mode) {
                if ctx.check_mode {
                    actions.push(format!("would set start mode to {}", ps_mode));
                } else {
                    let out = ctx
                        .connection
                        .run(
                            &format!(
                                "Set-Service -Name {} -StartupType {}",
                                ps_quote(&name),
                                ps_mode
                            ),
                            RunOptions::powershell(),
                        )
                        .await?;
                    if !out.success() {
                        return Ok(ModuleOutput::failed(format!(
                            "setting start mode failed: {}",
                            out.stderr.trim()
                        )));
                    }
                    actions.push(format!("start mode set to {}", ps_mode));
                }
                changed = true;
            }
        }

        let msg = if actions.is_empty() {
            format!("service '{}' already in desired state", name)
        } else {
            actions.join("; ")
        };
        let mut output = if changed {
            ModuleOutput::changed(msg)
        } else {
            ModuleOutput::ok(msg)
        };
        output = output.with_data("name", serde_json::json!(name));
        output = output.with_data("previous_status", serde_json::json!(status));
        Ok(output)
    }
}
