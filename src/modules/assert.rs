//! `assert` module: evaluate conditions against the host's variables.

use async_trait::async_trait;

use super::{Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult, ParamExt};

#[derive(Debug)]
pub struct AssertModule;

#[async_trait]
impl Module for AssertModule {
    fn name(&self) -> &'static str {
        "assert"
    }

    fn required_params(&self) -> &'static [&'static str] {
        &["that"]
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let conditions = params
            .get_seq("that")
            .ok_or_else(|| ModuleError::MissingParameter("that".to_string()))?;
        let fail_msg = params
            .get_str("fail_msg")
            .or_else(|| params.get_str("msg"));
        let success_msg = params
            .get_str("success_msg")
            .unwrap_or_else(|| "All assertions passed".to_string());

        for condition in &conditions {
            let holds = ctx.engine.evaluate_when(condition, &ctx.vars)?;
            if !holds {
                let rendered = serde_yaml::to_string(condition)
                    .unwrap_or_default()
                    .trim_end()
                    .to_string();
                let msg = fail_msg
                    .clone()
                    .unwrap_or_else(|| format!("Assertion failed: {}", rendered));
                return Ok(ModuleOutput::failed(msg)
                    .with_data("assertion", serde_json::json!(rendered))
                    .with_data("evaluated_to", serde_json::json!(false)));
            }
        }

        Ok(ModuleOutput::ok(success_msg))
    }
}
