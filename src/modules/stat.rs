//! `stat` module: file metadata query.

use async_trait::async_trait;

use super::{Module, ModuleContext, ModuleOutput, ModuleParams, ModuleResult, ParamExt};

#[derive(Debug)]
pub struct StatModule;

#[async_trait]
impl Module for StatModule {
    fn name(&self) -> &'static str {
        "stat"
    }

    fn required_params(&self) -> &'static [&'static str] {
        &["path"]
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let path = params.get_str_required("path")?;
        let stat = ctx.connection.stat(&path).await?;

        let payload = serde_json::json!({
            "exists": stat.exists,
            "isdir": stat.is_dir,
            "isreg": stat.is_file,
            "islnk": stat.is_link,
            "size": stat.size,
            "mtime": stat.mtime,
            "mode": stat.mode.map(|m| format!("{:04o}", m)),
            "checksum": stat.checksum,
            "path": path,
        });

        Ok(ModuleOutput::ok("").with_data("stat", payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::tests_support::local_context;

    #[tokio::test]
    async fn stat_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("probe");
        std::fs::write(&file, "1234").unwrap();
        let ctx = local_context(false, false);
        let p: ModuleParams =
            serde_yaml::from_str(&format!("{{path: '{}'}}", file.display())).unwrap();

        let out = StatModule.execute(&p, &ctx).await.unwrap();
        assert!(!out.changed);
        let stat = &out.data["stat"];
        assert_eq!(stat["exists"], true);
        assert_eq!(stat["isreg"], true);
        assert_eq!(stat["size"], 4);
        assert!(stat["checksum"].is_string());
    }

    #[tokio::test]
    async fn stat_missing_path_reports_absent() {
        let ctx = local_context(false, false);
        let p: ModuleParams = serde_yaml::from_str("{path: '/absent/path'}").unwrap();
        let out = StatModule.execute(&p, &ctx).await.unwrap();
        assert_eq!(out.data["stat"]["exists"], false);
    }
}
