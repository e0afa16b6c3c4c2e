//! `win_wait_for`: port/path waiting for Windows targets.

use async_trait::async_trait;
use std::time::Duration;

use crate::modules::{
    Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult, ParamExt,
};

#[derive(Debug)]
pub struct WinWaitForModule;

#[async_trait]
impl Module for WinWaitForModule {
    fn name(&self) -> &'static str {
        "win_wait_for"
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let timeout = params.get_u64("timeout")?.unwrap_or(300);
        let delay = params.get_u64("delay")?.unwrap_or(0);
        let sleep = params.get_u64("sleep")?.unwrap_or(1).max(1);
        let state = params
            .get_str("state")
            .unwrap_or_else(|| "started".to_string());
        let port = params.get_u64("port")?;
        let path = params.get_str("path");
        // Ports are probed from the control node against the target
        // address, since the remote shell cannot block cheaply.
        let host = params
            .get_str("host")
            .unwrap_or_else(|| ctx.connection.identifier().to_string());

        if port.is_none() && path.is_none() {
            return Err(ModuleError::MissingParameter(
                "either 'port' or 'path' is required".to_string(),
            ));
        }
        if ctx.check_mode {
            return Ok(ModuleOutput::skipped("check mode: not waiting"));
        }

        if delay > 0 {
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }
        let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout);

        loop {
            let satisfied = match (&port, &path) {
                (Some(port), _) => {
                    let open = matches!(
                        tokio::time::timeout(
                            Duration::from_secs(2),
                            tokio::net::TcpStream::connect((host.as_str(), *port as u16)),
                        )
                        .await,
                        Ok(Ok(_))
                    );
                    match state.as_str() {
                        "stopped" | "absent" => !open,
                        _ => open,
                    }
                }
                (None, Some(path)) => {
                    let exists = ctx.connection.stat(path).await?.exists;
                    match state.as_str() {
                        "absent" => !exists,
                        _ => exists,
                    }
                }
                (None, None) => unreachable!("validated above"),
            };

            if satisfied {
                return Ok(ModuleOutput::ok(format!("reached state {}", state)));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(ModuleOutput::failed(format!(
                    "timeout after {} seconds",
                    timeout
                )));
            }
            tokio::time::sleep(Duration::from_secs(sleep)).await;
        }
    }
}
