//! Transport abstraction.
//!
//! Every transport implements the [`Connection`] contract: run a command,
//! transfer files, query file metadata, create directories, tear down.
//! Connections are created lazily per host by the [`ConnectionManager`],
//! cached for the remainder of the play, and closed at play end.
//!
//! Transports never retry on their own; only connection establishment is
//! retried, a small fixed number of times with exponential backoff and
//! jitter, by the manager.

pub mod local;
pub mod ssh;
pub mod winrm;

use async_trait::async_trait;
use indexmap::IndexMap;
use rand::Rng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::{HostKeyPolicy, CONNECT_ATTEMPTS, CONNECT_BACKOFF_BASE_SECS};
use crate::inventory::{Host, TransportKind};

/// Errors from connection operations, split into the two classes the
/// runner's state machine distinguishes: unreachable (connect, auth,
/// session lost) and everything else (the host stays reachable).
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Could not establish a session.
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// The remote rejected our credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// An established session died.
    #[error("connection lost: {0}")]
    SessionLost(String),

    /// The command could not be executed (spawn failure, protocol error).
    /// A non-zero exit code is not an error at this layer.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// File upload or download failed.
    #[error("file transfer failed: {0}")]
    TransferFailed(String),

    /// The operation exceeded its deadline.
    #[error("operation timed out after {0} seconds")]
    Timeout(u64),

    /// The transport cannot perform the requested operation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// IO error on the control node.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectionError {
    /// True for failures that mark the host unreachable for the rest of
    /// the play.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            ConnectionError::ConnectFailed(_)
                | ConnectionError::AuthenticationFailed(_)
                | ConnectionError::SessionLost(_)
        )
    }
}

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Which command interpreter `run` should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShellKind {
    /// Execute the argv directly, no interpreter.
    None,
    /// POSIX `sh -c`.
    #[default]
    Sh,
    /// PowerShell (the only interpreter on the Windows transport).
    PowerShell,
}

/// Privilege escalation settings attached to a command.
#[derive(Debug, Clone)]
pub struct Escalation {
    /// Target user (`root`, or `Administrator` on Windows).
    pub user: String,
    /// Method: `sudo`, `su`, or `runas`.
    pub method: String,
    /// Password, fed through stdin, never the command line.
    pub password: Option<String>,
}

/// Options for a single `run` call.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Interpreter selection.
    pub shell: ShellKind,
    /// Deadline in seconds.
    pub timeout: Option<u64>,
    /// Working directory.
    pub cwd: Option<String>,
    /// Environment for the command.
    pub env: IndexMap<String, String>,
    /// Bytes written to the command's stdin.
    pub stdin: Option<String>,
    /// Privilege escalation, when requested.
    pub escalate: Option<Escalation>,
}

impl RunOptions {
    /// Options using the POSIX shell.
    pub fn sh() -> Self {
        Self::default()
    }

    /// Options executing argv directly.
    pub fn raw() -> Self {
        Self {
            shell: ShellKind::None,
            ..Self::default()
        }
    }

    /// Options using PowerShell.
    pub fn powershell() -> Self {
        Self {
            shell: ShellKind::PowerShell,
            ..Self::default()
        }
    }

    /// Sets the timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Some(secs);
        self
    }

    /// Sets the working directory.
    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

/// The outcome of one executed command.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Exit code.
    pub rc: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl RunOutput {
    /// True when the command exited zero.
    pub fn success(&self) -> bool {
        self.rc == 0
    }
}

/// Remote file metadata.
#[derive(Debug, Clone, Default)]
pub struct FileStat {
    /// Whether the path exists at all.
    pub exists: bool,
    /// Directory?
    pub is_dir: bool,
    /// Regular file?
    pub is_file: bool,
    /// Symlink?
    pub is_link: bool,
    /// Size in bytes.
    pub size: u64,
    /// Modification time, Unix seconds.
    pub mtime: i64,
    /// Permission bits, when the platform has them.
    pub mode: Option<u32>,
    /// SHA-256 of the content, for regular files when cheap to compute.
    pub checksum: Option<String>,
}

/// The uniform transport contract.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Host name or address this connection talks to.
    fn identifier(&self) -> &str;

    /// Which transport this is.
    fn kind(&self) -> TransportKind;

    /// Executes a single command.
    async fn run(&self, command: &str, options: RunOptions) -> ConnectionResult<RunOutput>;

    /// Uploads a local file.
    async fn put(&self, local: &Path, remote: &str, mode: Option<u32>) -> ConnectionResult<()>;

    /// Writes bytes to a remote file.
    async fn put_content(
        &self,
        content: &[u8],
        remote: &str,
        mode: Option<u32>,
    ) -> ConnectionResult<()>;

    /// Downloads a remote file.
    async fn get(&self, remote: &str, local: &Path) -> ConnectionResult<()>;

    /// Reads a remote file into memory.
    async fn get_content(&self, remote: &str) -> ConnectionResult<Vec<u8>>;

    /// Queries file metadata. A missing path is not an error; it yields
    /// `exists: false`.
    async fn stat(&self, remote: &str) -> ConnectionResult<FileStat>;

    /// Creates a directory, parents as needed. Idempotent.
    async fn mkdir(&self, remote: &str, mode: Option<u32>) -> ConnectionResult<()>;

    /// Tears the session down. Idempotent.
    async fn close(&self) -> ConnectionResult<()>;

    /// Cheap liveness probe for cached connections.
    async fn is_alive(&self) -> bool {
        true
    }
}

/// Settings the manager applies when building connections.
#[derive(Debug, Clone)]
pub struct ConnectSettings {
    /// Connect timeout in seconds.
    pub timeout: u64,
    /// SSH host-key policy.
    pub host_key_policy: HostKeyPolicy,
    /// CLI-level remote user override.
    pub remote_user: Option<String>,
    /// CLI-level private key override.
    pub private_key: Option<PathBuf>,
    /// CLI-level transport override.
    pub transport: Option<TransportKind>,
}

impl Default for ConnectSettings {
    fn default() -> Self {
        Self {
            timeout: crate::config::DEFAULT_TIMEOUT_SECS,
            host_key_policy: HostKeyPolicy::default(),
            remote_user: None,
            private_key: None,
            transport: None,
        }
    }
}

/// Lazily creates, caches, and tears down one connection per host.
pub struct ConnectionManager {
    settings: ConnectSettings,
    cache: Mutex<HashMap<String, Arc<dyn Connection>>>,
}

impl ConnectionManager {
    /// Creates a manager with the given settings.
    pub fn new(settings: ConnectSettings) -> Self {
        Self {
            settings,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached connection for a host, establishing one (with
    /// the bounded retry) on first use.
    pub async fn get(&self, host: &Host) -> ConnectionResult<Arc<dyn Connection>> {
        {
            let cache = self.cache.lock().await;
            if let Some(conn) = cache.get(&host.name) {
                if conn.is_alive().await {
                    return Ok(conn.clone());
                }
            }
        }

        let conn = self.connect_with_retry(host).await?;
        self.cache
            .lock()
            .await
            .insert(host.name.clone(), conn.clone());
        Ok(conn)
    }

    /// Drops a host's cached connection (after a timeout or session
    /// failure); the next task reconnects lazily.
    pub async fn discard(&self, host_name: &str) {
        if let Some(conn) = self.cache.lock().await.remove(host_name) {
            let _ = conn.close().await;
        }
    }

    /// Closes every cached connection.
    pub async fn close_all(&self) {
        let connections: Vec<_> = self.cache.lock().await.drain().map(|(_, c)| c).collect();
        for conn in connections {
            let _ = conn.close().await;
        }
    }

    async fn connect_with_retry(&self, host: &Host) -> ConnectionResult<Arc<dyn Connection>> {
        let mut last_err = None;
        for attempt in 0..CONNECT_ATTEMPTS {
            if attempt > 0 {
                let base = CONNECT_BACKOFF_BASE_SECS * (1 << (attempt - 1)) as u64;
                let jitter = rand::thread_rng().gen_range(0.0..0.25);
                let delay = std::time::Duration::from_secs_f64(base as f64 * (1.0 + jitter));
                debug!(host = %host.name, attempt, ?delay, "retrying connection");
                tokio::time::sleep(delay).await;
            }
            match self.connect(host).await {
                Ok(conn) => return Ok(conn),
                Err(e) if e.is_unreachable() => {
                    warn!(host = %host.name, attempt, error = %e, "connection attempt failed");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err
            .unwrap_or_else(|| ConnectionError::ConnectFailed("no attempts made".to_string())))
    }

    async fn connect(&self, host: &Host) -> ConnectionResult<Arc<dyn Connection>> {
        let transport = self.settings.transport.unwrap_or_else(|| host.transport());
        match transport {
            TransportKind::Local => Ok(Arc::new(local::LocalConnection::new())),
            TransportKind::Ssh => {
                let conn = ssh::SshConnection::connect(host, &self.settings).await?;
                Ok(Arc::new(conn))
            }
            TransportKind::Winrm => {
                let conn = winrm::WinRmConnection::connect(host, &self.settings).await?;
                Ok(Arc::new(conn))
            }
        }
    }
}

/// Composes the final command line for sh-family transports: escalation
/// prefix, environment assignments, and working directory.
pub(crate) fn wrap_command(command: &str, options: &RunOptions) -> String {
    let mut inner = String::new();

    if let Some(cwd) = &options.cwd {
        inner.push_str(&format!("cd {} && ", sh_quote(cwd)));
    }
    for (key, value) in &options.env {
        inner.push_str(&format!("{}={} ", key, sh_quote(value)));
    }
    inner.push_str(command);

    match &options.escalate {
        Some(esc) if esc.method == "su" => {
            format!("su - {} -c {}", esc.user, sh_quote(&inner))
        }
        Some(esc) => {
            // sudo: -S reads the password from stdin, -n forbids an
            // interactive prompt when no password was supplied.
            let prompt_flags = if esc.password.is_some() {
                "-S -p ''"
            } else {
                "-n"
            };
            format!(
                "sudo {} -H -u {} sh -c {}",
                prompt_flags,
                esc.user,
                sh_quote(&inner)
            )
        }
        None => inner,
    }
}

/// Single-quote a string for POSIX sh.
pub(crate) fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Splits a command string into argv, honoring single and double quotes.
pub(crate) fn split_command(command: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for ch in command.chars() {
        match quote {
            Some(q) => {
                if ch == q {
                    quote = None;
                } else {
                    current.push(ch);
                }
            }
            None => match ch {
                '\'' | '"' => quote = Some(ch),
                c if c.is_whitespace() => {
                    if !current.is_empty() {
                        out.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            },
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ConnectionError::ConnectFailed("x".into()).is_unreachable());
        assert!(ConnectionError::AuthenticationFailed("x".into()).is_unreachable());
        assert!(ConnectionError::SessionLost("x".into()).is_unreachable());
        assert!(!ConnectionError::Timeout(5).is_unreachable());
        assert!(!ConnectionError::ExecutionFailed("x".into()).is_unreachable());
    }

    #[test]
    fn wrap_plain_command() {
        let options = RunOptions::sh();
        assert_eq!(wrap_command("ls /", &options), "ls /");
    }

    #[test]
    fn wrap_with_cwd_and_env() {
        let mut options = RunOptions::sh().with_cwd("/opt");
        options.env.insert("MODE".into(), "fast".into());
        assert_eq!(wrap_command("make", &options), "cd '/opt' && MODE='fast' make");
    }

    #[test]
    fn wrap_with_sudo() {
        let mut options = RunOptions::sh();
        options.escalate = Some(Escalation {
            user: "root".into(),
            method: "sudo".into(),
            password: None,
        });
        assert_eq!(
            wrap_command("whoami", &options),
            "sudo -n -H -u root sh -c 'whoami'"
        );
    }

    #[test]
    fn sudo_with_password_reads_stdin() {
        let mut options = RunOptions::sh();
        options.escalate = Some(Escalation {
            user: "deploy".into(),
            method: "sudo".into(),
            password: Some("secret".into()),
        });
        let wrapped = wrap_command("id", &options);
        assert!(wrapped.starts_with("sudo -S -p ''"));
        assert!(!wrapped.contains("secret"));
    }

    #[test]
    fn split_command_honors_quotes() {
        assert_eq!(
            split_command(r#"cp "my file" 'dest dir'/x"#),
            vec!["cp", "my file", "dest dir/x"]
        );
        assert_eq!(split_command("echo  a   b"), vec!["echo", "a", "b"]);
    }
}
