//! SSH transport (libssh2 via the `ssh2` crate).
//!
//! One session per host, reused for the duration of a play. Authentication
//! order: agent, then explicit key file, then password. File transfer uses
//! the SFTP subsystem. libssh2 calls are blocking, so every operation runs
//! on the blocking thread pool with the session behind a mutex.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use ssh2::{CheckResult, KnownHostFileKind, OpenFlags, OpenType, Session};

use super::{
    wrap_command, ConnectSettings, Connection, ConnectionError, ConnectionResult, FileStat,
    RunOptions, RunOutput,
};
use crate::config::HostKeyPolicy;
use crate::inventory::{Host, TransportKind};

/// An established SSH session to one host.
pub struct SshConnection {
    identifier: String,
    session: Arc<Mutex<Session>>,
}

impl SshConnection {
    /// Connects and authenticates to a host.
    pub async fn connect(host: &Host, settings: &ConnectSettings) -> ConnectionResult<Self> {
        let address = host.address();
        let port = host.port();
        let user = settings
            .remote_user
            .clone()
            .or_else(|| host.user())
            .unwrap_or_else(whoami);
        let password = host.password();
        let key_file = settings
            .private_key
            .clone()
            .or_else(|| host.private_key_file().map(PathBuf::from));
        let policy = settings.host_key_policy;
        let timeout = settings.timeout;
        let name = host.name.clone();

        let session = tokio::task::spawn_blocking(move || {
            blocking_connect(&name, &address, port, &user, password, key_file, policy, timeout)
        })
        .await
        .map_err(|e| ConnectionError::ExecutionFailed(format!("join error: {}", e)))??;

        Ok(Self {
            identifier: host.name.clone(),
            session: Arc::new(Mutex::new(session)),
        })
    }

    async fn blocking<T, F>(&self, op: F) -> ConnectionResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Session) -> ConnectionResult<T> + Send + 'static,
    {
        let session = self.session.clone();
        tokio::task::spawn_blocking(move || {
            let guard = session.lock();
            op(&guard)
        })
        .await
        .map_err(|e| ConnectionError::ExecutionFailed(format!("join error: {}", e)))?
    }
}

#[allow(clippy::too_many_arguments)]
fn blocking_connect(
    host_name: &str,
    address: &str,
    port: u16,
    user: &str,
    password: Option<String>,
    key_file: Option<PathBuf>,
    policy: HostKeyPolicy,
    timeout: u64,
) -> ConnectionResult<Session> {
    let addr = format!("{}:{}", address, port)
        .to_socket_addrs()
        .map_err(|e| ConnectionError::ConnectFailed(format!("{}: {}", host_name, e)))?
        .next()
        .ok_or_else(|| {
            ConnectionError::ConnectFailed(format!("{}: address did not resolve", host_name))
        })?;

    let tcp = TcpStream::connect_timeout(&addr, Duration::from_secs(timeout))
        .map_err(|e| ConnectionError::ConnectFailed(format!("{}: {}", host_name, e)))?;

    let mut session = Session::new()
        .map_err(|e| ConnectionError::ConnectFailed(format!("session init: {}", e)))?;
    session.set_timeout((timeout * 1000) as u32);
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| ConnectionError::ConnectFailed(format!("handshake: {}", e)))?;

    check_host_key(&session, address, port, policy)?;

    // Agent and identity files first, explicit key next, password last.
    let _ = session.userauth_agent(user);
    if !session.authenticated() {
        if let Some(key) = &key_file {
            if let Err(e) = session.userauth_pubkey_file(user, None, key, None) {
                if password.is_none() {
                    return Err(ConnectionError::AuthenticationFailed(format!(
                        "key {}: {}",
                        key.display(),
                        e
                    )));
                }
            }
        }
    }
    if !session.authenticated() {
        if let Some(password) = &password {
            session
                .userauth_password(user, password)
                .map_err(|e| ConnectionError::AuthenticationFailed(e.to_string()))?;
        }
    }

    if !session.authenticated() {
        return Err(ConnectionError::AuthenticationFailed(format!(
            "no authentication method succeeded for {}@{}",
            user, address
        )));
    }

    debug!(host = host_name, %address, port, "ssh session established");
    Ok(session)
}

fn check_host_key(
    session: &Session,
    address: &str,
    port: u16,
    policy: HostKeyPolicy,
) -> ConnectionResult<()> {
    if policy == HostKeyPolicy::Insecure {
        return Ok(());
    }

    let mut known_hosts = session
        .known_hosts()
        .map_err(|e| ConnectionError::ConnectFailed(format!("known_hosts: {}", e)))?;

    let path = known_hosts_path();
    if path.exists() {
        known_hosts
            .read_file(&path, KnownHostFileKind::OpenSSH)
            .map_err(|e| ConnectionError::ConnectFailed(format!("known_hosts read: {}", e)))?;
    }

    let (key, _key_type) = session.host_key().ok_or_else(|| {
        ConnectionError::ConnectFailed("server presented no host key".to_string())
    })?;

    match known_hosts.check_port(address, port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::Mismatch => Err(ConnectionError::ConnectFailed(format!(
            "host key mismatch for {} (remove the stale entry from {} if the key change is expected)",
            address,
            path.display()
        ))),
        CheckResult::NotFound | CheckResult::Failure => match policy {
            HostKeyPolicy::Strict => Err(ConnectionError::ConnectFailed(format!(
                "host key for {} is not in {} and the policy is strict",
                address,
                path.display()
            ))),
            _ => Ok(()),
        },
    }
}

fn known_hosts_path() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/root"))
        .join(".ssh/known_hosts")
}

fn whoami() -> String {
    std::env::var("USER").unwrap_or_else(|_| "root".to_string())
}

fn sftp_of(session: &Session) -> ConnectionResult<ssh2::Sftp> {
    session
        .sftp()
        .map_err(|e| ConnectionError::SessionLost(format!("sftp subsystem: {}", e)))
}

/// Creates every missing ancestor of `path` through SFTP.
fn ensure_parents(sftp: &ssh2::Sftp, path: &Path) -> ConnectionResult<()> {
    let mut stack = Vec::new();
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir.as_os_str().is_empty() || dir == Path::new("/") {
            break;
        }
        if sftp.stat(dir).is_ok() {
            break;
        }
        stack.push(dir.to_path_buf());
        current = dir.parent();
    }
    for dir in stack.into_iter().rev() {
        sftp.mkdir(&dir, 0o755)
            .map_err(|e| ConnectionError::TransferFailed(format!("mkdir {}: {}", dir.display(), e)))?;
    }
    Ok(())
}

#[async_trait]
impl Connection for SshConnection {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Ssh
    }

    async fn run(&self, command: &str, options: RunOptions) -> ConnectionResult<RunOutput> {
        let wrapped = wrap_command(command, &options);
        trace!(command = %wrapped, "ssh exec");

        let stdin_payload = {
            let mut payload = String::new();
            if let Some(esc) = &options.escalate {
                if let Some(password) = &esc.password {
                    payload.push_str(password);
                    payload.push('\n');
                }
            }
            if let Some(stdin) = &options.stdin {
                payload.push_str(stdin);
            }
            payload
        };

        let timeout = options.timeout;
        let exec = self.blocking(move |session| {
            let mut channel = session
                .channel_session()
                .map_err(|e| ConnectionError::SessionLost(format!("channel: {}", e)))?;
            channel
                .exec(&wrapped)
                .map_err(|e| ConnectionError::ExecutionFailed(format!("exec: {}", e)))?;

            if !stdin_payload.is_empty() {
                channel
                    .write_all(stdin_payload.as_bytes())
                    .map_err(|e| ConnectionError::ExecutionFailed(format!("stdin: {}", e)))?;
            }
            channel
                .send_eof()
                .map_err(|e| ConnectionError::ExecutionFailed(format!("eof: {}", e)))?;

            let mut stdout = String::new();
            channel
                .read_to_string(&mut stdout)
                .map_err(|e| ConnectionError::ExecutionFailed(format!("read stdout: {}", e)))?;
            let mut stderr = String::new();
            channel
                .stderr()
                .read_to_string(&mut stderr)
                .map_err(|e| ConnectionError::ExecutionFailed(format!("read stderr: {}", e)))?;

            channel
                .wait_close()
                .map_err(|e| ConnectionError::SessionLost(format!("close: {}", e)))?;
            let rc = channel
                .exit_status()
                .map_err(|e| ConnectionError::ExecutionFailed(format!("exit status: {}", e)))?;

            Ok(RunOutput { rc, stdout, stderr })
        });

        match timeout {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), exec)
                .await
                .map_err(|_| ConnectionError::Timeout(secs))?,
            None => exec.await,
        }
    }

    async fn put(&self, local: &Path, remote: &str, mode: Option<u32>) -> ConnectionResult<()> {
        let content = tokio::fs::read(local).await.map_err(|e| {
            ConnectionError::TransferFailed(format!("read {}: {}", local.display(), e))
        })?;
        self.put_content(&content, remote, mode).await
    }

    async fn put_content(
        &self,
        content: &[u8],
        remote: &str,
        mode: Option<u32>,
    ) -> ConnectionResult<()> {
        let remote = remote.to_string();
        let content = content.to_vec();
        self.blocking(move |session| {
            let sftp = sftp_of(session)?;
            let path = Path::new(&remote);
            ensure_parents(&sftp, path)?;
            let mut file = sftp
                .open_mode(
                    path,
                    OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
                    mode.unwrap_or(0o644) as i32,
                    OpenType::File,
                )
                .map_err(|e| {
                    ConnectionError::TransferFailed(format!("open {}: {}", remote, e))
                })?;
            file.write_all(&content)
                .map_err(|e| ConnectionError::TransferFailed(format!("write {}: {}", remote, e)))?;
            Ok(())
        })
        .await
    }

    async fn get(&self, remote: &str, local: &Path) -> ConnectionResult<()> {
        let content = self.get_content(remote).await?;
        if let Some(parent) = local.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(local, content).await.map_err(|e| {
            ConnectionError::TransferFailed(format!("write {}: {}", local.display(), e))
        })?;
        Ok(())
    }

    async fn get_content(&self, remote: &str) -> ConnectionResult<Vec<u8>> {
        let remote = remote.to_string();
        self.blocking(move |session| {
            let sftp = sftp_of(session)?;
            let mut file = sftp
                .open(Path::new(&remote))
                .map_err(|e| ConnectionError::TransferFailed(format!("open {}: {}", remote, e)))?;
            let mut content = Vec::new();
            file.read_to_end(&mut content)
                .map_err(|e| ConnectionError::TransferFailed(format!("read {}: {}", remote, e)))?;
            Ok(content)
        })
        .await
    }

    async fn stat(&self, remote: &str) -> ConnectionResult<FileStat> {
        let remote_path = remote.to_string();
        let mut stat = self
            .blocking(move |session| {
                let sftp = sftp_of(session)?;
                let path = Path::new(&remote_path);
                let lstat = match sftp.lstat(path) {
                    Ok(s) => s,
                    Err(_) => return Ok(FileStat::default()),
                };
                let is_link = lstat.file_type().is_symlink();
                // Follow the link for the remaining fields.
                let st = sftp.stat(path).unwrap_or_else(|_| lstat.clone());
                Ok(FileStat {
                    exists: true,
                    is_dir: st.is_dir(),
                    is_file: st.is_file(),
                    is_link,
                    size: st.size.unwrap_or(0),
                    mtime: st.mtime.unwrap_or(0) as i64,
                    mode: st.perm.map(|p| p & 0o7777),
                    checksum: None,
                })
            })
            .await?;

        if stat.is_file {
            let out = self
                .run(
                    &format!("sha256sum -- {}", super::sh_quote(remote)),
                    RunOptions::sh(),
                )
                .await?;
            if out.success() {
                stat.checksum = out.stdout.split_whitespace().next().map(str::to_string);
            }
        }
        Ok(stat)
    }

    async fn mkdir(&self, remote: &str, mode: Option<u32>) -> ConnectionResult<()> {
        let remote = remote.to_string();
        self.blocking(move |session| {
            let sftp = sftp_of(session)?;
            let path = Path::new(&remote);
            if sftp.stat(path).is_ok() {
                return Ok(());
            }
            ensure_parents(&sftp, path)?;
            sftp.mkdir(path, mode.unwrap_or(0o755) as i32)
                .map_err(|e| ConnectionError::TransferFailed(format!("mkdir {}: {}", remote, e)))?;
            Ok(())
        })
        .await
    }

    async fn close(&self) -> ConnectionResult<()> {
        self.blocking(|session| {
            let _ = session.disconnect(None, "closing", None);
            Ok(())
        })
        .await
    }

    async fn is_alive(&self) -> bool {
        self.blocking(|session| Ok(session.authenticated()))
            .await
            .unwrap_or(false)
    }
}
