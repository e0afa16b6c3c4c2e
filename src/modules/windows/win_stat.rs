//! `win_stat`: file metadata query on Windows targets.

use async_trait::async_trait;

use crate::modules::{Module, ModuleContext, ModuleOutput, ModuleParams, ModuleResult, ParamExt};

#[derive(Debug)]
pub struct WinStatModule;

#[async_trait]
impl Module for WinStatModule {
    fn name(&self) -> &'static str {
        "win_stat"
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
            "size": stat.size,
            "lastwritetime": stat.mtime,
            "checksum": stat.checksum,
            "path": path,
        });
        Ok(ModuleOutput::ok("").with_data("stat", payload))
    }
}
