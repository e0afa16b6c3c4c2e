//! `copy` module: upload a file (or inline content) to the target.
//!
//! Idempotent by content checksum: identical source and destination
//! report `changed=false`. In diff mode a changed text file carries the
//! before/after payload.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::PathBuf;

use super::{
    file_diff, Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult,
    ParamExt,
};

#[derive(Debug)]
pub struct CopyModule;

impl CopyModule {
    /// Resolves `src` against the playbook directory, preferring the
    /// conventional `files/` subdirectory.
    fn resolve_src(&self, src: &str, ctx: &ModuleContext) -> ModuleResult<PathBuf> {
        let direct = PathBuf::from(src);
        if direct.is_absolute() {
            return Ok(direct);
        }
        let in_files = ctx.base_dir.join("files").join(src);
        if in_files.exists() {
            return Ok(in_files);
        }
        Ok(ctx.base_dir.join(src))
    }
}

#[async_trait]
impl Module for CopyModule {
    fn name(&self) -> &'static str {
        "copy"
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
        let mode = params.get_mode("mode")?;

        let content: Vec<u8> = match (params.get_str("content"), params.get_str("src")) {
            (Some(content), _) => content.into_bytes(),
            (None, Some(src)) => {
                let path = self.resolve_src(&src, ctx)?;
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
                .with_data("checksum", serde_json::json!(checksum))
                .with_data("dest", serde_json::json!(dest)));
        }

        // Before-image for the diff, only when it is worth fetching.
        let before = if ctx.diff_mode && stat.exists && stat.is_file {
            ctx.connection
                .get_content(&dest)
                .await
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        } else if !stat.exists {
            Some(String::new())
        } else {
            None
        };

        let mut output = if ctx.check_mode {
            ModuleOutput::changed(format!("would copy to {}", dest))
        } else {
            ctx.connection.put_content(&content, &dest, mode).await?;
            ModuleOutput::changed(format!("copied to {}", dest))
        };

        if ctx.diff_mode {
            if let (Some(before), Ok(after)) = (before, String::from_utf8(content.clone())) {
                output = output.with_diff(file_diff(&before, &after, &dest));
            }
        }

        Ok(output
            .with_data("checksum", serde_json::json!(checksum))
            .with_data("dest", serde_json::json!(dest)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::tests_support::local_context;

    fn params(yaml: &str) -> ModuleParams {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[tokio::test]
    async fn copy_then_recopy_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.txt");
        let ctx = local_context(false, false);
        let p = params(&format!(
            "{{content: 'payload', dest: '{}'}}",
            dest.display()
        ));

        let first = CopyModule.execute(&p, &ctx).await.unwrap();
        assert!(first.changed);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "payload");

        let second = CopyModule.execute(&p, &ctx).await.unwrap();
        assert!(!second.changed);
    }

    #[tokio::test]
    async fn check_mode_does_not_write() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.txt");
        let ctx = local_context(true, false);
        let p = params(&format!(
            "{{content: 'payload', dest: '{}'}}",
            dest.display()
        ));

        let out = CopyModule.execute(&p, &ctx).await.unwrap();
        assert!(out.changed);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn diff_mode_reports_before_and_after() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.txt");
        std::fs::write(&dest, "old\n").unwrap();
        let ctx = local_context(false, true);
        let p = params(&format!(
            "{{content: \"new\\n\", dest: '{}'}}",
            dest.display()
        ));

        let out = CopyModule.execute(&p, &ctx).await.unwrap();
        let diff = out.diff.expect("diff payload");
        assert_eq!(diff.before, "old\n");
        assert_eq!(diff.after, "new\n");
    }

    #[tokio::test]
    async fn src_resolves_from_files_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("files")).unwrap();
        std::fs::write(dir.path().join("files/app.conf"), "k=v").unwrap();
        let dest = dir.path().join("app.conf");

        let mut ctx = local_context(false, false);
        ctx.base_dir = dir.path().to_path_buf();
        let p = params(&format!(
            "{{src: 'app.conf', dest: '{}'}}",
            dest.display()
        ));

        let out = CopyModule.execute(&p, &ctx).await.unwrap();
        assert!(out.changed);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "k=v");
    }

    #[tokio::test]
    async fn missing_src_and_content_is_an_error() {
        let ctx = local_context(false, false);
        let p = params("{dest: '/tmp/x'}");
        assert!(CopyModule.execute(&p, &ctx).await.is_err());
    }
}
