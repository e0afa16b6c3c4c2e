//! `include_vars` module: load a YAML variables file into the host
//! context.
//!
//! Loaded variables become visible to all subsequent tasks of the same
//! host within the play (they merge through the same path as
//! `set_fact`).

use async_trait::async_trait;

use super::{Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult, ParamExt};

#[derive(Debug)]
pub struct IncludeVarsModule;

#[async_trait]
impl Module for IncludeVarsModule {
    fn name(&self) -> &'static str {
        "include_vars"
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let file = params
            .get_str("file")
            .or_else(|| params.get_str("_raw_params"))
            .ok_or_else(|| ModuleError::MissingParameter("file".to_string()))?;

        let path = {
            let p = std::path::Path::new(&file);
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                ctx.base_dir.join(p)
            }
        };

        let content = std::fs::read_to_string(&path).map_err(|e| {
            ModuleError::ExecutionFailed(format!("cannot read {}: {}", path.display(), e))
        })?;
        let vars: serde_json::Value = serde_yaml::from_str(&content)
            .map_err(|e| ModuleError::ExecutionFailed(format!("{}: {}", path.display(), e)))?;

        let facts = match vars {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            _ => {
                return Err(ModuleError::ExecutionFailed(format!(
                    "{} must contain a mapping",
                    path.display()
                )))
            }
        };

        let count = facts.len();
        Ok(
            ModuleOutput::ok(format!("loaded {} variables from {}", count, file))
                .with_data("ansible_facts", serde_json::Value::Object(facts)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::tests_support::local_context;

    #[tokio::test]
    async fn loads_yaml_mapping() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("extra.yml"), "color: red\nsize: 9\n").unwrap();
        let mut ctx = local_context(false, false);
        ctx.base_dir = dir.path().to_path_buf();
        let p: ModuleParams = serde_yaml::from_str("{file: extra.yml}").unwrap();

        let out = IncludeVarsModule.execute(&p, &ctx).await.unwrap();
        let facts = out.data["ansible_facts"].as_object().unwrap();
        assert_eq!(facts["color"], "red");
        assert_eq!(facts["size"], 9);
    }

    #[tokio::test]
    async fn non_mapping_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("list.yml"), "- a\n- b\n").unwrap();
        let mut ctx = local_context(false, false);
        ctx.base_dir = dir.path().to_path_buf();
        let p: ModuleParams = serde_yaml::from_str("{file: list.yml}").unwrap();
        assert!(IncludeVarsModule.execute(&p, &ctx).await.is_err());
    }
}
