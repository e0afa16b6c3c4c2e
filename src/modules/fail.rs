//! `fail` module: unconditionally fail with a message.

use async_trait::async_trait;

use super::{Module, ModuleContext, ModuleOutput, ModuleParams, ModuleResult, ParamExt};

#[derive(Debug)]
pub struct FailModule;

#[async_trait]
impl Module for FailModule {
    fn name(&self) -> &'static str {
        "fail"
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        _ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let msg = params
            .get_str("msg")
            .unwrap_or_else(|| "Failed as requested from task".to_string());
        Ok(ModuleOutput::failed(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::tests_support::local_context;

    #[tokio::test]
    async fn always_fails() {
        let ctx = local_context(false, false);
        let out = FailModule
            .execute(&ModuleParams::new(), &ctx)
            .await
            .unwrap();
        assert!(out.failed);
        assert!(out.msg.contains("Failed as requested"));
    }
}
