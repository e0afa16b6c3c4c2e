//! Windows remote-shell transport (WinRM).
//!
//! Speaks the WS-Management SOAP protocol over HTTP(S): a remote shell is
//! created once per session, commands run through it as
//! `powershell.exe -EncodedCommand` invocations, and output streams come
//! back base64-encoded in Receive responses.
//!
//! Two protocol constraints shape this module:
//!
//! - the command envelope is text-only, so `put` cannot stream binary
//!   data; it uses the chunked base64 upload below, and
//! - the session is logically synchronous, so all calls on one connection
//!   are serialized behind an async mutex.
//!
//! Upload protocol: ensure the destination parent exists (removing a
//! directory squatting on the destination), open a temp file with a
//! stable prefix next to it, append fixed-size base64 chunks strictly in
//! order, then atomically move the temp file over the destination. Any
//! chunk failure aborts the transfer and deletes the temp file.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use once_cell::sync::Lazy;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, trace};
use uuid::Uuid;

use super::{
    ConnectSettings, Connection, ConnectionError, ConnectionResult, FileStat, RunOptions,
    RunOutput,
};
use crate::config::WINRM_CHUNK_SIZE;
use crate::inventory::{Host, TransportKind};

const SHELL_RESOURCE_URI: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/cmd";
const ACTION_CREATE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Create";
const ACTION_DELETE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Delete";
const ACTION_COMMAND: &str =
    "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Command";
const ACTION_RECEIVE: &str =
    "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Receive";
const ACTION_SIGNAL: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Signal";

/// Stable prefix for upload temp files, so interrupted transfers are
/// recognizable and cleanable.
const UPLOAD_TMP_PREFIX: &str = ".runbook-upload-";

static SHELL_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<(?:\w+:)?Selector Name="ShellId">([^<]+)<"#).expect("regex"));
static SHELL_ID_BODY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(?:\w+:)?ShellId>([^<]+)<").expect("regex"));
static COMMAND_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(?:\w+:)?CommandId>([^<]+)<").expect("regex"));
static STREAM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<(?:\w+:)?Stream[^>]*Name="(stdout|stderr)"[^>]*>([^<]*)</"#).expect("regex")
});
static EXIT_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(?:\w+:)?ExitCode>(-?\d+)<").expect("regex"));
static FAULT_TEXT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(?:\w+:)?Text[^>]*>([^<]+)<").expect("regex"));

/// A WinRM session to one Windows host.
pub struct WinRmConnection {
    identifier: String,
    endpoint: String,
    username: String,
    password: SecretString,
    client: reqwest::Client,
    /// Shell id; `None` after close. The mutex also serializes every
    /// protocol exchange on this session.
    shell: Mutex<Option<String>>,
}

impl WinRmConnection {
    /// Connects, authenticates, and opens the remote shell.
    pub async fn connect(host: &Host, settings: &ConnectSettings) -> ConnectionResult<Self> {
        let scheme = match host.get_var("ansible_winrm_scheme") {
            Some(serde_yaml::Value::String(s)) if s == "https" => "https",
            _ if host.port() == 5986 => "https",
            _ => "http",
        };
        let endpoint = format!("{}://{}:{}/wsman", scheme, host.address(), host.port());
        let username = settings
            .remote_user
            .clone()
            .or_else(|| host.user())
            .unwrap_or_else(|| "Administrator".to_string());
        let password = SecretString::from(host.password().unwrap_or_default());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout.max(30)))
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| ConnectionError::ConnectFailed(e.to_string()))?;

        let conn = Self {
            identifier: host.name.clone(),
            endpoint,
            username,
            password,
            client,
            shell: Mutex::new(None),
        };

        let shell_id = conn.open_shell().await?;
        debug!(host = %conn.identifier, shell_id = %shell_id, "winrm shell opened");
        *conn.shell.lock().await = Some(shell_id);
        Ok(conn)
    }

    async fn soap(&self, envelope: String) -> ConnectionResult<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.username, Some(self.password.expose_secret()))
            .header("Content-Type", "application/soap+xml;charset=UTF-8")
            .body(envelope)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    ConnectionError::ConnectFailed(e.to_string())
                } else {
                    ConnectionError::SessionLost(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ConnectionError::SessionLost(e.to_string()))?;

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ConnectionError::AuthenticationFailed(format!(
                "{} rejected credentials for {}",
                self.endpoint, self.username
            )));
        }
        if !status.is_success() {
            let fault = FAULT_TEXT_RE
                .captures(&body)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_else(|| format!("HTTP {}", status));
            return Err(ConnectionError::ExecutionFailed(format!(
                "wsman fault: {}",
                fault
            )));
        }
        Ok(body)
    }

    async fn open_shell(&self) -> ConnectionResult<String> {
        let body = r#"<rsp:Shell xmlns:rsp="http://schemas.microsoft.com/wbem/wsman/1/windows/shell">
  <rsp:InputStreams>stdin</rsp:InputStreams>
  <rsp:OutputStreams>stdout stderr</rsp:OutputStreams>
</rsp:Shell>"#;
        let response = self
            .soap(self.envelope(ACTION_CREATE, None, body))
            .await?;
        SHELL_ID_RE
            .captures(&response)
            .or_else(|| SHELL_ID_BODY_RE.captures(&response))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| {
                ConnectionError::ConnectFailed("shell create returned no ShellId".to_string())
            })
    }

    fn envelope(&self, action: &str, shell_id: Option<&str>, body: &str) -> String {
        let message_id = Uuid::new_v4();
        let selector = shell_id
            .map(|id| {
                format!(
                    r#"<w:SelectorSet><w:Selector Name="ShellId">{}</w:Selector></w:SelectorSet>"#,
                    id
                )
            })
            .unwrap_or_default();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"
            xmlns:a="http://schemas.xmlsoap.org/ws/2004/08/addressing"
            xmlns:w="http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd">
  <s:Header>
    <a:To>{endpoint}</a:To>
    <a:ReplyTo><a:Address s:mustUnderstand="true">http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous</a:Address></a:ReplyTo>
    <w:ResourceURI s:mustUnderstand="true">{resource}</w:ResourceURI>
    <a:Action s:mustUnderstand="true">{action}</a:Action>
    <w:MaxEnvelopeSize s:mustUnderstand="true">1048576</w:MaxEnvelopeSize>
    <a:MessageID>uuid:{message_id}</a:MessageID>
    <w:OperationTimeout>PT60S</w:OperationTimeout>
    {selector}
  </s:Header>
  <s:Body>{body}</s:Body>
</s:Envelope>"#,
            endpoint = self.endpoint,
            resource = SHELL_RESOURCE_URI,
            action = action,
            message_id = message_id,
            selector = selector,
            body = body,
        )
    }

    /// Runs one PowerShell script through the shell. Callers must hold the
    /// session lock.
    async fn run_locked(&self, shell_id: &str, script: &str) -> ConnectionResult<RunOutput> {
        trace!(bytes = script.len(), "winrm command");

        // powershell.exe -EncodedCommand takes base64 UTF-16LE; this keeps
        // arbitrary quoting out of the XML envelope.
        let encoded = encode_powershell(script);
        let command_body = format!(
            r#"<rsp:CommandLine xmlns:rsp="http://schemas.microsoft.com/wbem/wsman/1/windows/shell">
  <rsp:Command>powershell.exe</rsp:Command>
  <rsp:Arguments>-NoProfile -NonInteractive -EncodedCommand {}</rsp:Arguments>
</rsp:CommandLine>"#,
            encoded
        );
        let response = self
            .soap(self.envelope(ACTION_COMMAND, Some(shell_id), &command_body))
            .await?;
        let command_id = COMMAND_ID_RE
            .captures(&response)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| {
                ConnectionError::ExecutionFailed("command start returned no CommandId".to_string())
            })?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut rc = 0i32;

        loop {
            let receive_body = format!(
                r#"<rsp:Receive xmlns:rsp="http://schemas.microsoft.com/wbem/wsman/1/windows/shell">
  <rsp:DesiredStream CommandId="{}">stdout stderr</rsp:DesiredStream>
</rsp:Receive>"#,
                command_id
            );
            let response = self
                .soap(self.envelope(ACTION_RECEIVE, Some(shell_id), &receive_body))
                .await?;

            for caps in STREAM_RE.captures_iter(&response) {
                let stream = caps.get(1).map_or("", |m| m.as_str());
                let data = caps.get(2).map_or("", |m| m.as_str());
                if data.is_empty() {
                    continue;
                }
                let decoded = BASE64.decode(data).unwrap_or_default();
                let text = String::from_utf8_lossy(&decoded);
                match stream {
                    "stdout" => stdout.push_str(&text),
                    _ => stderr.push_str(&text),
                }
            }

            if response.contains("CommandState/Done") {
                if let Some(caps) = EXIT_CODE_RE.captures(&response) {
                    rc = caps
                        .get(1)
                        .and_then(|m| m.as_str().parse().ok())
                        .unwrap_or(0);
                }
                break;
            }
        }

        // Release the remote command slot.
        let signal_body = format!(
            r#"<rsp:Signal xmlns:rsp="http://schemas.microsoft.com/wbem/wsman/1/windows/shell" CommandId="{}">
  <rsp:Code>http://schemas.microsoft.com/wbem/wsman/1/windows/shell/signal/terminate</rsp:Code>
</rsp:Signal>"#,
            command_id
        );
        let _ = self
            .soap(self.envelope(ACTION_SIGNAL, Some(shell_id), &signal_body))
            .await;

        Ok(RunOutput { rc, stdout, stderr })
    }

    /// Serialized PowerShell execution through the session shell.
    async fn run_powershell(&self, script: &str, timeout: Option<u64>) -> ConnectionResult<RunOutput> {
        let guard = self.shell.lock().await;
        let shell_id = guard
            .as_ref()
            .ok_or_else(|| ConnectionError::SessionLost("shell is closed".to_string()))?
            .clone();

        let exec = self.run_locked(&shell_id, script);
        match timeout {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), exec)
                .await
                .map_err(|_| ConnectionError::Timeout(secs))?,
            None => exec.await,
        }
    }
}

/// base64(UTF-16LE) for `powershell.exe -EncodedCommand`.
fn encode_powershell(script: &str) -> String {
    let utf16: Vec<u8> = script
        .encode_utf16()
        .flat_map(|unit| unit.to_le_bytes())
        .collect();
    BASE64.encode(utf16)
}

/// Single-quote a string for PowerShell.
fn ps_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn windows_path(path: &str) -> String {
    path.replace('/', "\\")
}

fn parent_of(path: &str) -> Option<String> {
    let normalized = windows_path(path);
    normalized
        .rsplit_once('\\')
        .map(|(parent, _)| parent.to_string())
        .filter(|p| !p.is_empty())
}

#[async_trait]
impl Connection for WinRmConnection {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Winrm
    }

    async fn run(&self, command: &str, options: RunOptions) -> ConnectionResult<RunOutput> {
        let mut script = String::new();
        if let Some(cwd) = &options.cwd {
            script.push_str(&format!("Set-Location -Path {}\n", ps_quote(cwd)));
        }
        for (key, value) in &options.env {
            script.push_str(&format!("$env:{} = {}\n", key, ps_quote(value)));
        }
        match options.shell {
            super::ShellKind::PowerShell | super::ShellKind::Sh => {
                script.push_str(command);
                // Surface the native exit code of the last command.
                script.push_str(
                    "\nif ($LASTEXITCODE -ne $null) { exit $LASTEXITCODE } elseif (-not $?) { exit 1 }",
                );
            }
            super::ShellKind::None => {
                script.push_str(&format!("cmd.exe /c {}\nexit $LASTEXITCODE", command));
            }
        }
        self.run_powershell(&script, options.timeout).await
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
        _mode: Option<u32>,
    ) -> ConnectionResult<()> {
        let dest = windows_path(remote);

        // A directory squatting on the destination blocks the final move.
        let probe = self
            .run_powershell(
                &format!(
                    "if (Test-Path {p} -PathType Container) {{ Remove-Item {p} -Recurse -Force }}",
                    p = ps_quote(&dest)
                ),
                None,
            )
            .await?;
        if !probe.success() {
            return Err(ConnectionError::TransferFailed(format!(
                "cannot clear destination {}: {}",
                dest, probe.stderr
            )));
        }

        if let Some(parent) = parent_of(&dest) {
            self.mkdir(&parent, None).await?;
        }

        let tmp = match parent_of(&dest) {
            Some(parent) => format!("{}\\{}{}.part", parent, UPLOAD_TMP_PREFIX, Uuid::new_v4()),
            None => format!("{}{}.part", UPLOAD_TMP_PREFIX, Uuid::new_v4()),
        };

        if content.is_empty() {
            let out = self
                .run_powershell(
                    &format!("New-Item -ItemType File -Force -Path {} | Out-Null", ps_quote(&dest)),
                    None,
                )
                .await?;
            if !out.success() {
                return Err(ConnectionError::TransferFailed(out.stderr));
            }
            return Ok(());
        }

        // Ordered fixed-size chunks; each append is one command. Chunk size
        // accounts for base64 expansion against the envelope cap.
        let total_chunks = content.len().div_ceil(WINRM_CHUNK_SIZE);
        for (index, chunk) in content.chunks(WINRM_CHUNK_SIZE).enumerate() {
            let encoded = BASE64.encode(chunk);
            let script = format!(
                r#"$bytes = [Convert]::FromBase64String('{encoded}')
$stream = [System.IO.File]::Open({tmp}, [System.IO.FileMode]::Append)
$stream.Write($bytes, 0, $bytes.Length)
$stream.Close()"#,
                encoded = encoded,
                tmp = ps_quote(&tmp),
            );
            let out = self.run_powershell(&script, None).await;
            let failed = match &out {
                Ok(o) => !o.success(),
                Err(_) => true,
            };
            if failed {
                // Abort: delete the partial temp file.
                let _ = self
                    .run_powershell(
                        &format!(
                            "if (Test-Path {t}) {{ Remove-Item {t} -Force }}",
                            t = ps_quote(&tmp)
                        ),
                        None,
                    )
                    .await;
                return match out {
                    Ok(o) => Err(ConnectionError::TransferFailed(format!(
                        "chunk {}/{} append failed: {}",
                        index + 1,
                        total_chunks,
                        o.stderr
                    ))),
                    Err(e) => Err(e),
                };
            }
            trace!(chunk = index + 1, total_chunks, "uploaded chunk");
        }

        // Atomic move over the destination.
        let out = self
            .run_powershell(
                &format!(
                    "Move-Item -Force -Path {} -Destination {}",
                    ps_quote(&tmp),
                    ps_quote(&dest)
                ),
                None,
            )
            .await?;
        if !out.success() {
            let _ = self
                .run_powershell(
                    &format!(
                        "if (Test-Path {t}) {{ Remove-Item {t} -Force }}",
                        t = ps_quote(&tmp)
                    ),
                    None,
                )
                .await;
            return Err(ConnectionError::TransferFailed(format!(
                "final rename failed: {}",
                out.stderr
            )));
        }

        // `mode` is accepted without translation: Windows ACLs have no
        // POSIX bit mapping.
        Ok(())
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
        let src = windows_path(remote);
        let size_out = self
            .run_powershell(&format!("(Get-Item {}).Length", ps_quote(&src)), None)
            .await?;
        if !size_out.success() {
            return Err(ConnectionError::TransferFailed(format!(
                "stat {}: {}",
                src, size_out.stderr
            )));
        }
        let size: u64 = size_out.stdout.trim().parse().unwrap_or(0);

        let mut content = Vec::with_capacity(size as usize);
        let mut offset = 0u64;
        while offset < size {
            let chunk = (size - offset).min(WINRM_CHUNK_SIZE as u64);
            let script = format!(
                r#"$stream = [System.IO.File]::OpenRead({src})
$stream.Seek({offset}, [System.IO.SeekOrigin]::Begin) | Out-Null
$buffer = New-Object byte[] {chunk}
$read = $stream.Read($buffer, 0, {chunk})
$stream.Close()
[Convert]::ToBase64String($buffer, 0, $read)"#,
                src = ps_quote(&src),
                offset = offset,
                chunk = chunk,
            );
            let out = self.run_powershell(&script, None).await?;
            if !out.success() {
                return Err(ConnectionError::TransferFailed(format!(
                    "download chunk at {}: {}",
                    offset, out.stderr
                )));
            }
            let decoded = BASE64
                .decode(out.stdout.trim())
                .map_err(|e| ConnectionError::TransferFailed(format!("bad chunk: {}", e)))?;
            content.extend_from_slice(&decoded);
            offset += chunk;
        }
        Ok(content)
    }

    async fn stat(&self, remote: &str) -> ConnectionResult<FileStat> {
        let target = windows_path(remote);
        let script = format!(
            r#"if (Test-Path {p}) {{
  $item = Get-Item {p}
  $hash = if ($item.PSIsContainer) {{ $null }} else {{ (Get-FileHash -Algorithm SHA256 -Path {p}).Hash.ToLower() }}
  @{{
    exists = $true
    isdir = $item.PSIsContainer
    size = if ($item.PSIsContainer) {{ 0 }} else {{ $item.Length }}
    mtime = [int64](([DateTimeOffset]$item.LastWriteTimeUtc).ToUnixTimeSeconds())
    checksum = $hash
  }} | ConvertTo-Json -Compress
}} else {{ '{{"exists": false}}' }}"#,
            p = ps_quote(&target)
        );
        let out = self.run_powershell(&script, None).await?;
        if !out.success() {
            return Err(ConnectionError::TransferFailed(format!(
                "stat {}: {}",
                target, out.stderr
            )));
        }

        let parsed: serde_json::Value = serde_json::from_str(out.stdout.trim())
            .map_err(|e| ConnectionError::TransferFailed(format!("stat parse: {}", e)))?;
        let exists = parsed["exists"].as_bool().unwrap_or(false);
        if !exists {
            return Ok(FileStat::default());
        }
        let is_dir = parsed["isdir"].as_bool().unwrap_or(false);
        Ok(FileStat {
            exists: true,
            is_dir,
            is_file: !is_dir,
            is_link: false,
            size: parsed["size"].as_u64().unwrap_or(0),
            mtime: parsed["mtime"].as_i64().unwrap_or(0),
            mode: None,
            checksum: parsed["checksum"].as_str().map(str::to_string),
        })
    }

    async fn mkdir(&self, remote: &str, _mode: Option<u32>) -> ConnectionResult<()> {
        let target = windows_path(remote);
        let out = self
            .run_powershell(
                &format!(
                    "New-Item -ItemType Directory -Force -Path {} | Out-Null",
                    ps_quote(&target)
                ),
                None,
            )
            .await?;
        if !out.success() {
            return Err(ConnectionError::TransferFailed(format!(
                "mkdir {}: {}",
                target, out.stderr
            )));
        }
        Ok(())
    }

    async fn close(&self) -> ConnectionResult<()> {
        let mut guard = self.shell.lock().await;
        if let Some(shell_id) = guard.take() {
            let _ = self
                .soap(self.envelope(ACTION_DELETE, Some(&shell_id), ""))
                .await;
        }
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        self.shell.lock().await.is_some()
    }
}

/// Chunk layout planning, separated from the transport so the math is
/// testable without a live endpoint.
pub fn plan_chunks(total: usize, chunk_size: usize) -> Vec<usize> {
    if total == 0 {
        return Vec::new();
    }
    let mut sizes = Vec::with_capacity(total.div_ceil(chunk_size));
    let mut remaining = total;
    while remaining > 0 {
        let size = remaining.min(chunk_size);
        sizes.push(size);
        remaining -= size;
    }
    sizes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_plan_for_two_and_a_half_mib() {
        // 2.5 MiB at 700 KiB plaintext per chunk: 700 + 700 + 700 + 460.
        let total = 2 * 1024 * 1024 + 512 * 1024;
        let sizes = plan_chunks(total, WINRM_CHUNK_SIZE);
        assert_eq!(sizes.len(), 4);
        assert_eq!(sizes[0], 700 * 1024);
        assert_eq!(sizes[1], 700 * 1024);
        assert_eq!(sizes[2], 700 * 1024);
        assert_eq!(sizes[3], total - 3 * 700 * 1024);
        assert_eq!(sizes.iter().sum::<usize>(), total);
    }

    #[test]
    fn encoded_chunk_fits_envelope() {
        // base64 of a full chunk must stay under the 1 MiB envelope cap.
        let encoded_len = WINRM_CHUNK_SIZE.div_ceil(3) * 4;
        assert!(encoded_len < 1024 * 1024);
    }

    #[test]
    fn empty_content_needs_no_chunks() {
        assert!(plan_chunks(0, WINRM_CHUNK_SIZE).is_empty());
    }

    #[test]
    fn powershell_encoding_is_utf16le_base64() {
        // "hi" => 68 00 69 00
        assert_eq!(encode_powershell("hi"), BASE64.encode([0x68, 0, 0x69, 0]));
    }

    #[test]
    fn ps_quote_doubles_single_quotes() {
        assert_eq!(ps_quote("it's"), "'it''s'");
    }

    #[test]
    fn path_normalization() {
        assert_eq!(windows_path("C:/Temp/app.bin"), "C:\\Temp\\app.bin");
        assert_eq!(parent_of("C:/Temp/app.bin").as_deref(), Some("C:\\Temp"));
        assert_eq!(parent_of("app.bin"), None);
    }

    #[test]
    fn stream_regex_extracts_output() {
        let body = r#"<rsp:Stream Name="stdout" CommandId="x">aGVsbG8=</rsp:Stream>"#;
        let caps = STREAM_RE.captures(body).unwrap();
        assert_eq!(&caps[1], "stdout");
        assert_eq!(BASE64.decode(&caps[2]).unwrap(), b"hello");
    }
}
