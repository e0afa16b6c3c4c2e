//! `ping` module: transport liveness check.

use async_trait::async_trait;

use super::{Module, ModuleContext, ModuleOutput, ModuleParams, ModuleResult, ParamExt};

#[derive(Debug)]
pub struct PingModule;

#[async_trait]
impl Module for PingModule {
    fn name(&self) -> &'static str {
        "ping"
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        // `data: crash` mirrors the conventional self-test hook.
        if params.get_str("data").as_deref() == Some("crash") {
            return Ok(ModuleOutput::failed("boom"));
        }
        if !ctx.connection.is_alive().await {
            return Ok(ModuleOutput::failed("connection is not alive"));
        }
        let pong = params.get_str("data").unwrap_or_else(|| "pong".to_string());
        Ok(ModuleOutput::ok("").with_data("ping", serde_json::json!(pong)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::tests_support::local_context;

    #[tokio::test]
    async fn ping_pongs() {
        let ctx = local_context(false, false);
        let out = PingModule
            .execute(&ModuleParams::new(), &ctx)
            .await
            .unwrap();
        assert_eq!(out.data["ping"], "pong");
        assert!(!out.changed);
    }

    #[tokio::test]
    async fn crash_data_fails() {
        let ctx = local_context(false, false);
        let p: ModuleParams = serde_yaml::from_str("{data: crash}").unwrap();
        let out = PingModule.execute(&p, &ctx).await.unwrap();
        assert!(out.failed);
    }
}
