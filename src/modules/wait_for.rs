//! `wait_for` module: block until a TCP port answers or a path appears
//! (or disappears).

use async_trait::async_trait;
use std::time::Duration;

use super::{Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult, ParamExt};

#[derive(Debug)]
pub struct WaitForModule;

#[async_trait]
impl Module for WaitForModule {
    fn name(&self) -> &'static str {
        "wait_for"
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
        let host = params
            .get_str("host")
            .unwrap_or_else(|| "127.0.0.1".to_string());

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
        let mut elapsed = delay;

        loop {
            let satisfied = match (&port, &path) {
                (Some(port), _) => {
                    let open = probe_port(&host, *port as u16).await;
                    match state.as_str() {
                        "stopped" | "absent" | "drained" => !open,
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
                let what = port
                    .map(|p| format!("{}:{}", host, p))
                    .or_else(|| path.clone())
                    .unwrap_or_default();
                return Ok(ModuleOutput::ok(format!("{} reached state {}", what, state))
                    .with_data("elapsed", serde_json::json!(elapsed)));
            }

            if tokio::time::Instant::now() >= deadline {
                let what = port
                    .map(|p| format!("port {}:{}", host, p))
                    .or_else(|| path.clone().map(|p| format!("path {}", p)))
                    .unwrap_or_default();
                return Ok(ModuleOutput::failed(format!(
                    "timeout after {} seconds waiting for {}",
                    timeout, what
                )));
            }

            tokio::time::sleep(Duration::from_secs(sleep)).await;
            elapsed += sleep;
        }
    }
}

async fn probe_port(host: &str, port: u16) -> bool {
    matches!(
        tokio::time::timeout(
            Duration::from_secs(2),
            tokio::net::TcpStream::connect((host, port)),
        )
        .await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::tests_support::local_context;

    #[tokio::test]
    async fn waits_for_existing_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("ready");
        std::fs::write(&file, "").unwrap();
        let ctx = local_context(false, false);
        let p: ModuleParams =
            serde_yaml::from_str(&format!("{{path: '{}', timeout: 2}}", file.display())).unwrap();
        let out = WaitForModule.execute(&p, &ctx).await.unwrap();
        assert!(!out.failed);
    }

    #[tokio::test]
    async fn times_out_on_missing_path() {
        let ctx = local_context(false, false);
        let p: ModuleParams =
            serde_yaml::from_str("{path: '/never/appears', timeout: 1}").unwrap();
        let out = WaitForModule.execute(&p, &ctx).await.unwrap();
        assert!(out.failed);
        assert!(out.msg.contains("timeout"));
    }

    #[tokio::test]
    async fn open_port_is_detected() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let ctx = local_context(false, false);
        let p: ModuleParams =
            serde_yaml::from_str(&format!("{{port: {}, timeout: 3}}", port)).unwrap();
        let out = WaitForModule.execute(&p, &ctx).await.unwrap();
        assert!(!out.failed);
        drop(listener);
    }

    #[tokio::test]
    async fn neither_port_nor_path_is_an_error() {
        let ctx = local_context(false, false);
        let p: ModuleParams = serde_yaml::from_str("{timeout: 1}").unwrap();
        assert!(WaitForModule.execute(&p, &ctx).await.is_err());
    }
}
