//! `debug` module: print a message or a variable's value.

use async_trait::async_trait;

use super::{Module, ModuleContext, ModuleOutput, ModuleParams, ModuleResult, ParamExt};

#[derive(Debug)]
pub struct DebugModule;

#[async_trait]
impl Module for DebugModule {
    fn name(&self) -> &'static str {
        "debug"
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        if let Some(var) = params.get_str("var") {
            let rendered = ctx
                .engine
                .render_value(&format!("{{{{ {} }}}}", var), &ctx.vars)?;
            let text = match &rendered {
                serde_yaml::Value::String(s) => s.clone(),
                other => serde_yaml::to_string(other)
                    .unwrap_or_default()
                    .trim_end()
                    .to_string(),
            };
            return Ok(ModuleOutput::ok(format!("{}: {}", var, text)).with_data(
                var,
                serde_json::to_value(&rendered).unwrap_or(serde_json::Value::Null),
            ));
        }

        let msg = params
            .get_str("msg")
            .unwrap_or_else(|| "Hello world!".to_string());
        Ok(ModuleOutput::ok(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::tests_support::local_context;

    #[tokio::test]
    async fn msg_is_echoed() {
        let ctx = local_context(false, false);
        let p: ModuleParams = serde_yaml::from_str("{msg: 'hello web1'}").unwrap();
        let out = DebugModule.execute(&p, &ctx).await.unwrap();
        assert_eq!(out.msg, "hello web1");
        assert!(!out.changed);
    }

    #[tokio::test]
    async fn var_is_resolved_from_context() {
        let mut ctx = local_context(false, false);
        ctx.vars
            .insert("answer".into(), serde_yaml::Value::Number(42.into()));
        let p: ModuleParams = serde_yaml::from_str("{var: answer}").unwrap();
        let out = DebugModule.execute(&p, &ctx).await.unwrap();
        assert!(out.msg.contains("42"));
    }

    #[tokio::test]
    async fn undefined_var_is_an_error() {
        let ctx = local_context(false, false);
        let p: ModuleParams = serde_yaml::from_str("{var: nope}").unwrap();
        assert!(DebugModule.execute(&p, &ctx).await.is_err());
    }
}
