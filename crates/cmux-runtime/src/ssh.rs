// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! [`Runtime`] backend that executes over `ssh`. Binary-safe file I/O is
//! built on `cat`/`dd` with base64 framing, since the wire is a text pipe.

use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use base64::Engine;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::RuntimeError;
use crate::traits::{join_workspace_path, ExecOptions, ExecResult, FileStat, Runtime};

#[derive(Debug, Clone)]
pub struct SshRuntime {
    pub host: String,
    pub src_base_dir: String,
    pub identity_file: Option<String>,
    pub port: Option<u16>,
}

impl SshRuntime {
    pub fn new(host: impl Into<String>, src_base_dir: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            src_base_dir: src_base_dir.into(),
            identity_file: None,
            port: None,
        }
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-o").arg("BatchMode=yes");
        if let Some(identity) = &self.identity_file {
            cmd.arg("-i").arg(identity);
        }
        if let Some(port) = self.port {
            cmd.arg("-p").arg(port.to_string());
        }
        cmd.arg(&self.host);
        cmd
    }

    async fn run_remote(&self, remote_command: &str, opts: &ExecOptions) -> Result<ExecResult, RuntimeError> {
        debug!(host = %self.host, cmd = %remote_command, "ssh exec");
        let mut cmd = self.base_command();
        cmd.arg(remote_command);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| RuntimeError::Transport(format!("ssh spawn failed: {e}")))?;

        if let Some(input) = &opts.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.write_all(input).await;
            }
        } else {
            child.stdin.take();
        }

        let wait = child.wait_with_output();
        let output = match opts.timeout_secs {
            Some(secs) => tokio::time::timeout(std::time::Duration::from_secs(secs), wait)
                .await
                .map_err(|_| RuntimeError::Timeout(secs))?
                .map_err(|e| RuntimeError::Transport(e.to_string()))?,
            None => wait.await.map_err(|e| RuntimeError::Transport(e.to_string()))?,
        };

        Ok(ExecResult {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.status.code(),
            duration: started.elapsed(),
        })
    }
}

#[async_trait]
impl Runtime for SshRuntime {
    async fn exec(&self, command: &str, opts: ExecOptions) -> Result<ExecResult, RuntimeError> {
        let mut wrapped = String::new();
        if let Some(cwd) = &opts.cwd {
            wrapped.push_str(&format!("cd {} && ", shell_quote(cwd)));
        }
        for (k, v) in &opts.env {
            wrapped.push_str(&format!("{}={} ", k, shell_quote(v)));
        }
        if let Some(nice) = opts.niceness {
            wrapped.push_str(&format!("nice -n {nice} "));
        }
        wrapped.push_str(command);

        // Binary-safe stdin: base64-encode locally, decode remotely, so the
        // ssh text pipe never has to carry raw control bytes.
        let has_stdin = opts.stdin.is_some();
        let (remote_command, opts) = if has_stdin {
            let encoded = base64::engine::general_purpose::STANDARD.encode(opts.stdin.as_deref().unwrap());
            let piped = format!("(echo {} | base64 -d | ({wrapped}))", shell_quote(&encoded));
            (piped, ExecOptions { stdin: None, ..opts })
        } else {
            (wrapped, opts)
        };

        self.run_remote(&remote_command, &opts).await
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, RuntimeError> {
        let cmd = format!("cat {} | base64", shell_quote(path));
        let res = self.run_remote(&cmd, &ExecOptions::default()).await?;
        if res.exit_code != Some(0) {
            return Err(classify_remote_error(&res, path));
        }
        let decoded_text = String::from_utf8_lossy(&res.stdout);
        base64::engine::general_purpose::STANDARD
            .decode(decoded_text.trim())
            .map_err(|e| RuntimeError::Transport(format!("base64 decode: {e}")))
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), RuntimeError> {
        let parent = std::path::Path::new(path).parent().map(|p| p.to_string_lossy().into_owned());
        let tmp_path = format!("{path}.cmux-tmp");
        let mut script = String::new();
        if let Some(parent) = parent.filter(|p| !p.is_empty()) {
            script.push_str(&format!("mkdir -p {} && ", shell_quote(&parent)));
        }
        script.push_str(&format!(
            "base64 -d | dd of={} 2>/dev/null && mv {} {}",
            shell_quote(&tmp_path),
            shell_quote(&tmp_path),
            shell_quote(path),
        ));
        let opts = ExecOptions { stdin: Some(contents.to_vec()), ..Default::default() };
        let res = self.exec(&script, opts).await?;
        if res.exit_code != Some(0) {
            return Err(classify_remote_error(&res, path));
        }
        Ok(())
    }

    async fn stat(&self, path: &str) -> Result<FileStat, RuntimeError> {
        // `%s` size, `%Y` mtime (epoch seconds), `%F` file type — GNU stat.
        let cmd = format!("stat -c '%s|%Y|%F' {}", shell_quote(path));
        let res = self.run_remote(&cmd, &ExecOptions::default()).await?;
        if res.exit_code != Some(0) {
            return Err(classify_remote_error(&res, path));
        }
        let text = String::from_utf8_lossy(&res.stdout);
        let mut parts = text.trim().splitn(3, '|');
        let size: u64 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| RuntimeError::Transport("malformed stat output".into()))?;
        let mtime: i64 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| RuntimeError::Transport("malformed stat output".into()))?;
        let is_directory = parts.next().map(|k| k.contains("directory")).unwrap_or(false);
        let modified_time = chrono::DateTime::from_timestamp(mtime, 0).unwrap_or_else(chrono::Utc::now);
        Ok(FileStat { size, is_directory, modified_time })
    }

    fn get_workspace_path(&self, project_name: &str, workspace_name: &str) -> String {
        join_workspace_path(&self.src_base_dir, project_name, workspace_name)
    }
}

fn classify_remote_error(res: &ExecResult, path: &str) -> RuntimeError {
    let stderr = String::from_utf8_lossy(&res.stderr);
    if stderr.contains("No such file or directory") {
        RuntimeError::NotFound(path.to_string())
    } else if stderr.contains("Not a directory") {
        RuntimeError::NotADirectory(path.to_string())
    } else if stderr.contains("Permission denied") {
        RuntimeError::PermissionDenied(path.to_string())
    } else {
        RuntimeError::Transport(stderr.trim().to_string())
    }
}

/// Minimal POSIX single-quote escaping for embedding into a remote command
/// string built up on our side before it crosses the ssh text pipe.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
