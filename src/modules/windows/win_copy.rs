//! `win_copy`: upload a file to a Windows target through the chunked
//! transfer protocol, idempotent by SHA-256 checksum.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::PathBuf;

use crate::modules::{
    Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult, ParamExt,
};

#[derive(Debug)]
pub struct WinCopyModule;

#[async_trait]
impl Module for WinCopyModule {
    fn name(&self) -> &'static str {
        "win_copy"
    }

    fn required_params(&self) -> &'static [&'static str] {
        &["dest"]
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        ctx: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let dest = params.get_str_required("dest")?;

        let content: Vec<u8> = match (params.get_str("content"), params.get_str("src")) {
            (Some(content), _) => content.into_bytes(),
            (None, Some(src)) => {
                let path = PathBuf::from(&src);
                let path = if path.is_absolute() {
                    path
                } else {
                    let in_files = ctx.base_dir.join("files").join(&src);
                    if in_files.exists() {
                        in_files
                    } else {
                        ctx.base_dir.join(&src)
                    }
                };
                std::fs::read(&path).map_err(|e| {
                    ModuleError::ExecutionFailed(format!(
                        "could not read source {}: {}",
                        path.display(),
                        e
                    ))
                })?
            }
            (None, None) => {
                return Err(ModuleError::MissingParameter(
                    "either 'src' or 'content' is required".to_string(),
                ))
            }
        };

        let checksum = hex::encode(Sha256::digest(&content));
        let stat = ctx.connection.stat(&dest).await?;
        if stat.exists && stat.is_file && stat.checksum.as_deref() == Some(checksum.as_str()) {
            return Ok(ModuleOutput::ok("file is already up to date")
                .with_data("checksum", serde_json::json!(checksum)));
        }

        if ctx.check_mode {
            return Ok(ModuleOutput::changed(format!("would copy to {}", dest))
                .with_data("checksum", serde_json::json!(checksum)));
        }

        // The transport handles chunking, the temp file, and the atomic
        // rename; `mode` passes through untranslated.
        ctx.connection
            .put_content(&content, &dest, params.get_mode("mode")?)
            .await?;

        Ok(ModuleOutput::changed(format!("copied to {}", dest))
            .with_data("checksum", serde_json::json!(checksum))
            .with_data("size", serde_json::json!(content.len())))
    }
}
