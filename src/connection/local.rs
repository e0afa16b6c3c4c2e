//! Local transport: commands run as child processes of the control node.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, trace};

use super::{
    split_command, wrap_command, Connection, ConnectionError, ConnectionResult, FileStat,
    RunOptions, RunOutput, ShellKind,
};
use crate::inventory::TransportKind;

/// Executes everything on the control node itself.
#[derive(Debug, Clone)]
pub struct LocalConnection {
    identifier: String,
}

impl Default for LocalConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalConnection {
    /// Creates a local connection named after the control node.
    pub fn new() -> Self {
        let identifier = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string());
        Self { identifier }
    }

    fn build_command(&self, command: &str, options: &RunOptions) -> ConnectionResult<Command> {
        let mut cmd = match options.shell {
            ShellKind::Sh => {
                let wrapped = wrap_command(command, options);
                let mut c = Command::new("sh");
                c.arg("-c").arg(wrapped);
                // cwd/env are baked into the wrapped string.
                c
            }
            ShellKind::None => {
                if options.escalate.is_some() {
                    // Escalation needs the shell prefix form.
                    let wrapped = wrap_command(command, options);
                    let mut c = Command::new("sh");
                    c.arg("-c").arg(wrapped);
                    c
                } else {
                    let argv = split_command(command);
                    let program = argv.first().ok_or_else(|| {
                        ConnectionError::ExecutionFailed("empty command".to_string())
                    })?;
                    let mut c = Command::new(program);
                    c.args(&argv[1..]);
                    if let Some(cwd) = &options.cwd {
                        c.current_dir(cwd);
                    }
                    for (k, v) in &options.env {
                        c.env(k, v);
                    }
                    c
                }
            }
            ShellKind::PowerShell => {
                return Err(ConnectionError::Unsupported(
                    "PowerShell is not available on the local transport".to_string(),
                ))
            }
        };

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }
}

#[async_trait]
impl Connection for LocalConnection {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Local
    }

    async fn run(&self, command: &str, options: RunOptions) -> ConnectionResult<RunOutput> {
        debug!(command, "executing local command");
        let mut cmd = self.build_command(command, &options)?;

        let mut child = cmd
            .spawn()
            .map_err(|e| ConnectionError::ExecutionFailed(format!("spawn failed: {}", e)))?;

        // Escalation password first, then the payload stdin.
        let mut stdin_payload = String::new();
        if let Some(esc) = &options.escalate {
            if let Some(password) = &esc.password {
                stdin_payload.push_str(password);
                stdin_payload.push('\n');
            }
        }
        if let Some(payload) = &options.stdin {
            stdin_payload.push_str(payload);
        }
        if let Some(mut stdin) = child.stdin.take() {
            if !stdin_payload.is_empty() {
                stdin
                    .write_all(stdin_payload.as_bytes())
                    .await
                    .map_err(|e| {
                        ConnectionError::ExecutionFailed(format!("stdin write failed: {}", e))
                    })?;
            }
            drop(stdin);
        }

        let wait = child.wait_with_output();
        let output = match options.timeout {
            Some(secs) => {
                match tokio::time::timeout(std::time::Duration::from_secs(secs), wait).await {
                    Ok(result) => result,
                    Err(_) => return Err(ConnectionError::Timeout(secs)),
                }
            }
            None => wait.await,
        }
        .map_err(|e| ConnectionError::ExecutionFailed(format!("wait failed: {}", e)))?;

        let rc = output.status.code().unwrap_or(-1);
        trace!(rc, "local command finished");
        Ok(RunOutput {
            rc,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn put(&self, local: &Path, remote: &str, mode: Option<u32>) -> ConnectionResult<()> {
        let content = tokio::fs::read(local).await.map_err(|e| {
            ConnectionError::TransferFailed(format!("read {} failed: {}", local.display(), e))
        })?;
        self.put_content(&content, remote, mode).await
    }

    async fn put_content(
        &self,
        content: &[u8],
        remote: &str,
        mode: Option<u32>,
    ) -> ConnectionResult<()> {
        let path = Path::new(remote);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    ConnectionError::TransferFailed(format!(
                        "mkdir {} failed: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        tokio::fs::write(path, content).await.map_err(|e| {
            ConnectionError::TransferFailed(format!("write {} failed: {}", remote, e))
        })?;
        if let Some(mode) = mode {
            set_mode(path, mode)?;
        }
        Ok(())
    }

    async fn get(&self, remote: &str, local: &Path) -> ConnectionResult<()> {
        if let Some(parent) = local.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    ConnectionError::TransferFailed(format!(
                        "mkdir {} failed: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        tokio::fs::copy(remote, local).await.map_err(|e| {
            ConnectionError::TransferFailed(format!("copy {} failed: {}", remote, e))
        })?;
        Ok(())
    }

    async fn get_content(&self, remote: &str) -> ConnectionResult<Vec<u8>> {
        tokio::fs::read(remote)
            .await
            .map_err(|e| ConnectionError::TransferFailed(format!("read {} failed: {}", remote, e)))
    }

    async fn stat(&self, remote: &str) -> ConnectionResult<FileStat> {
        let path = Path::new(remote);
        let metadata = match tokio::fs::symlink_metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(FileStat::default());
            }
            Err(e) => {
                return Err(ConnectionError::TransferFailed(format!(
                    "stat {} failed: {}",
                    remote, e
                )))
            }
        };

        let checksum = if metadata.is_file() {
            let content = tokio::fs::read(path).await?;
            Some(hex::encode(Sha256::digest(&content)))
        } else {
            None
        };

        #[cfg(unix)]
        let (mode, mtime) = {
            use std::os::unix::fs::MetadataExt;
            (Some(metadata.mode() & 0o7777), metadata.mtime())
        };
        #[cfg(not(unix))]
        let (mode, mtime) = (None, 0i64);

        Ok(FileStat {
            exists: true,
            is_dir: metadata.is_dir(),
            is_file: metadata.is_file(),
            is_link: metadata.file_type().is_symlink(),
            size: metadata.len(),
            mtime,
            mode,
            checksum,
        })
    }

    async fn mkdir(&self, remote: &str, mode: Option<u32>) -> ConnectionResult<()> {
        let path = Path::new(remote);
        tokio::fs::create_dir_all(path).await.map_err(|e| {
            ConnectionError::TransferFailed(format!("mkdir {} failed: {}", remote, e))
        })?;
        if let Some(mode) = mode {
            set_mode(path, mode)?;
        }
        Ok(())
    }

    async fn close(&self) -> ConnectionResult<()> {
        Ok(())
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> ConnectionResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
        ConnectionError::TransferFailed(format!("chmod {} failed: {}", path.display(), e))
    })
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> ConnectionResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_captures_output() {
        let conn = LocalConnection::new();
        let out = conn
            .run("echo hello && echo oops >&2", RunOptions::sh())
            .await
            .unwrap();
        assert_eq!(out.rc, 0);
        assert!(out.stdout.contains("hello"));
        assert!(out.stderr.contains("oops"));
    }

    #[tokio::test]
    async fn run_nonzero_exit_is_not_an_error() {
        let conn = LocalConnection::new();
        let out = conn.run("exit 3", RunOptions::sh()).await.unwrap();
        assert_eq!(out.rc, 3);
    }

    #[tokio::test]
    async fn raw_shell_kind_bypasses_the_shell() {
        let conn = LocalConnection::new();
        let out = conn
            .run("echo '$HOME'", RunOptions::raw())
            .await
            .unwrap();
        // No shell expansion: the literal text survives.
        assert_eq!(out.stdout.trim(), "$HOME");
    }

    #[tokio::test]
    async fn timeout_is_reported() {
        let conn = LocalConnection::new();
        let result = conn
            .run("sleep 5", RunOptions::sh().with_timeout(1))
            .await;
        assert!(matches!(result, Err(ConnectionError::Timeout(1))));
    }

    #[tokio::test]
    async fn stdin_is_delivered() {
        let conn = LocalConnection::new();
        let mut options = RunOptions::sh();
        options.stdin = Some("from stdin".to_string());
        let out = conn.run("cat", options).await.unwrap();
        assert_eq!(out.stdout, "from stdin");
    }

    #[tokio::test]
    async fn put_get_stat_round_trip() {
        let conn = LocalConnection::new();
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("sub/file.txt");
        let dest_str = dest.to_string_lossy().into_owned();

        conn.put_content(b"payload", &dest_str, Some(0o600))
            .await
            .unwrap();

        let stat = conn.stat(&dest_str).await.unwrap();
        assert!(stat.exists && stat.is_file);
        assert_eq!(stat.size, 7);
        assert_eq!(stat.mode, Some(0o600));
        assert!(stat.checksum.is_some());

        let content = conn.get_content(&dest_str).await.unwrap();
        assert_eq!(content, b"payload");
    }

    #[tokio::test]
    async fn stat_missing_path() {
        let conn = LocalConnection::new();
        let stat = conn.stat("/definitely/not/here").await.unwrap();
        assert!(!stat.exists);
    }

    #[tokio::test]
    async fn mkdir_creates_parents() {
        let conn = LocalConnection::new();
        let dir = tempfile::tempdir().unwrap();
        let deep = dir.path().join("a/b/c");
        conn.mkdir(&deep.to_string_lossy(), None).await.unwrap();
        assert!(deep.is_dir());
    }
}
