//! `set_fact` module: every parameter becomes a host fact.
//!
//! The module only reports the facts; merging them into the host context
//! is the executor's job.

use async_trait::async_trait;

use super::{Module, ModuleContext, ModuleOutput, ModuleParams, ModuleResult};

#[derive(Debug)]
pub struct SetFactModule;

#[async_trait]
impl Module for SetFactModule {
    fn name(&self) -> &'static str {
        "set_fact"
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        _ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let mut facts = serde_json::Map::new();
        for (key, value) in params {
            if key == "cacheable" {
                continue;
            }
            facts.insert(
                key.clone(),
                serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
            );
        }
        Ok(ModuleOutput::ok("").with_data("ansible_facts", serde_json::Value::Object(facts)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::tests_support::local_context;

    #[tokio::test]
    async fn params_become_facts() {
        let ctx = local_context(false, false);
        let p: ModuleParams =
            serde_yaml::from_str("{app_port: 8080, app_name: web, cacheable: true}").unwrap();
        let out = SetFactModule.execute(&p, &ctx).await.unwrap();
        let facts = out.data["ansible_facts"].as_object().unwrap();
        assert_eq!(facts["app_port"], 8080);
        assert_eq!(facts["app_name"], "web");
        assert!(!facts.contains_key("cacheable"));
    }
}
