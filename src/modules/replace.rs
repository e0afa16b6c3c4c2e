//! `replace` module: regex substitution across a whole file.

use async_trait::async_trait;
use regex::Regex;

use super::{
    file_diff, Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult,
    ParamExt,
};

#[derive(Debug)]
pub struct ReplaceModule;

#[async_trait]
impl Module for ReplaceModule {
    fn name(&self) -> &'static str {
        "replace"
    }

    fn required_params(&self) -> &'static [&'static str] {
        &["path", "regexp"]
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let path = params.get_str_required("path")?;
        let pattern = params.get_str_required("regexp")?;
        let replacement = params.get_str("replace").unwrap_or_default();

        let re = Regex::new(&pattern).map_err(|e| {
            ModuleError::InvalidParameter(format!("invalid regexp '{}': {}", pattern, e))
        })?;

        let stat = ctx.connection.stat(&path).await?;
        if !stat.exists {
            return Ok(ModuleOutput::failed(format!("{} does not exist", path)));
        }
        let before = String::from_utf8(ctx.connection.get_content(&path).await?)
            .map_err(|_| ModuleError::ExecutionFailed(format!("{} is not a text file", path)))?;

        let after = re.replace_all(&before, replacement.as_str()).into_owned();
        if after == before {
            return Ok(ModuleOutput::ok("no matches to replace"));
        }

        let mut output = if ctx.check_mode {
            ModuleOutput::changed(format!("would replace matches in {}", path))
        } else {
            ctx.connection
                .put_content(after.as_bytes(), &path, None)
                .await?;
            ModuleOutput::changed(format!("replaced matches in {}", path))
        };
        if ctx.diff_mode {
            output = output.with_diff(file_diff(&before, &after, &path));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::tests_support::local_context;

    #[tokio::test]
    async fn replaces_all_matches_once() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("conf");
        std::fs::write(&file, "v1 and v1\n").unwrap();
        let ctx = local_context(false, false);
        let p: ModuleParams = serde_yaml::from_str(&format!(
            "{{path: '{}', regexp: 'v1', replace: 'v2'}}",
            file.display()
        ))
        .unwrap();

        let first = ReplaceModule.execute(&p, &ctx).await.unwrap();
        assert!(first.changed);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "v2 and v2\n");

        let second = ReplaceModule.execute(&p, &ctx).await.unwrap();
        assert!(!second.changed);
    }

    #[tokio::test]
    async fn capture_groups_work() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("conf");
        std::fs::write(&file, "port 80\n").unwrap();
        let ctx = local_context(false, false);
        let p: ModuleParams = serde_yaml::from_str(&format!(
            "{{path: '{}', regexp: 'port (\\\\d+)', replace: 'listen $1'}}",
            file.display()
        ))
        .unwrap();
        ReplaceModule.execute(&p, &ctx).await.unwrap();
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "listen 80\n");
    }
}
