// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Direct-syscall [`Runtime`] backend: runs commands and touches files on
//! the machine the host process itself runs on.

use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::RuntimeError;
use crate::traits::{classify_io_error, join_workspace_path, ExecOptions, ExecResult, FileStat, Runtime};

#[derive(Debug, Clone)]
pub struct LocalRuntime {
    pub src_base_dir: String,
}

impl LocalRuntime {
    pub fn new(src_base_dir: impl Into<String>) -> Self {
        Self { src_base_dir: src_base_dir.into() }
    }
}

#[async_trait]
impl Runtime for LocalRuntime {
    async fn exec(&self, command: &str, opts: ExecOptions) -> Result<ExecResult, RuntimeError> {
        debug!(cmd = %command, "local exec");
        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(command);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        if let Some(cwd) = &opts.cwd {
            cmd.current_dir(cwd);
        }
        for (k, v) in &opts.env {
            cmd.env(k, v);
        }
        #[cfg(unix)]
        if let Some(nice) = opts.niceness {
            unsafe {
                cmd.pre_exec(move || {
                    libc::nice(nice);
                    Ok(())
                });
            }
        }

        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| RuntimeError::Transport(format!("spawn failed: {e}")))?;

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

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, RuntimeError> {
        tokio::fs::read(path).await.map_err(|e| classify_io_error(&e, path))
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), RuntimeError> {
        let target = std::path::Path::new(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| classify_io_error(&e, path))?;
        }
        let tmp_name = format!(
            "{}.cmux-tmp-{}",
            target.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
            std::process::id()
        );
        let tmp = target.with_file_name(tmp_name);
        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|e| classify_io_error(&e, path))?;
        tokio::fs::rename(&tmp, target)
            .await
            .map_err(|e| classify_io_error(&e, path))?;
        Ok(())
    }

    async fn stat(&self, path: &str) -> Result<FileStat, RuntimeError> {
        let meta = tokio::fs::metadata(path).await.map_err(|e| classify_io_error(&e, path))?;
        let modified_time = meta
            .modified()
            .ok()
            .map(chrono::DateTime::<chrono::Utc>::from)
            .unwrap_or_else(chrono::Utc::now);
        Ok(FileStat {
            size: meta.len(),
            is_directory: meta.is_dir(),
            modified_time,
        })
    }

    fn get_workspace_path(&self, project_name: &str, workspace_name: &str) -> String {
        join_workspace_path(&self.src_base_dir, project_name, workspace_name)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
