// SPDX-License-Identifier: MIT
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::RuntimeError;

/// Options for a single command execution.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Working directory, absolute. `None` uses the runtime's default root.
    pub cwd: Option<String>,
    /// Extra environment variables layered on top of the ambient environment.
    pub env: Vec<(String, String)>,
    /// Bytes written to the child's stdin before it is closed.
    pub stdin: Option<Vec<u8>>,
    /// Hard wall-clock timeout. `None` means no timeout.
    pub timeout_secs: Option<u64>,
    /// Unix `nice` value (-20..=19). Ignored on platforms without it.
    pub niceness: Option<i32>,
}

/// Result of a completed (or timed-out) command execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Metadata about a file or directory.
#[derive(Debug, Clone, Copy)]
pub struct FileStat {
    pub size: u64,
    pub is_directory: bool,
    pub modified_time: DateTime<Utc>,
}

/// Filesystem/exec capability set a tool or `WorkspaceManager` operates
/// against. One instance is bound per workspace, constructed from that
/// workspace's `RuntimeConfig` (spec §3).
///
/// Both [`crate::local::LocalRuntime`] and [`crate::ssh::SshRuntime`]
/// implement this identically from the caller's point of view: paths are
/// always absolute, and a successful `write_file` is atomic from the
/// reader's perspective.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Run a command and collect its full output.
    async fn exec(&self, command: &str, opts: ExecOptions) -> Result<ExecResult, RuntimeError>;

    /// Read a file's full contents. Binary-safe.
    async fn read_file(&self, path: &str) -> Result<Vec<u8>, RuntimeError>;

    /// Write a file's full contents, creating parent directories as needed.
    /// Atomic from the reader's perspective (temp file + rename).
    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), RuntimeError>;

    /// Stat a path.
    async fn stat(&self, path: &str) -> Result<FileStat, RuntimeError>;

    /// Compute the absolute workspace path for a (project, workspace-name)
    /// pair under this runtime's configured source base directory.
    fn get_workspace_path(&self, project_name: &str, workspace_name: &str) -> String;
}

pub(crate) fn classify_io_error(err: &std::io::Error, path: &str) -> RuntimeError {
    use std::io::ErrorKind::*;
    match err.kind() {
        NotFound => RuntimeError::NotFound(path.to_string()),
        PermissionDenied => RuntimeError::PermissionDenied(path.to_string()),
        _ => {
            // `NotADirectory` is unstable on some targets; detect via errno text.
            let msg = err.to_string();
            if msg.contains("Not a directory") {
                RuntimeError::NotADirectory(path.to_string())
            } else {
                RuntimeError::Transport(msg)
            }
        }
    }
}

pub(crate) fn join_workspace_path(src_base_dir: &str, project_name: &str, workspace_name: &str) -> String {
    Path::new(src_base_dir)
        .join(project_name)
        .join(workspace_name)
        .to_string_lossy()
        .into_owned()
}
