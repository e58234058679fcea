// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Filesystem/exec backend for cmux workspaces and tools.
//!
//! A workspace is bound to exactly one [`Runtime`] instance, constructed
//! from its `runtimeConfig` (local or SSH). Tools and the workspace manager
//! never touch the filesystem directly — they go through this trait so the
//! same code path works whether the workspace lives on the host machine or
//! on a remote box reached over SSH.

mod error;
mod local;
mod ssh;
mod traits;

pub use error::RuntimeError;
pub use local::LocalRuntime;
pub use ssh::SshRuntime;
pub use traits::{ExecOptions, ExecResult, FileStat, Runtime};

use std::sync::Arc;

/// Configuration a workspace carries to describe which [`Runtime`] backs it
/// (spec §3 `runtimeConfig`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RuntimeConfig {
    Local {
        #[serde(rename = "srcBaseDir")]
        src_base_dir: String,
    },
    Ssh {
        host: String,
        #[serde(rename = "srcBaseDir")]
        src_base_dir: String,
        #[serde(rename = "identityFile", skip_serializing_if = "Option::is_none")]
        identity_file: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
    },
}

impl RuntimeConfig {
    pub fn src_base_dir(&self) -> &str {
        match self {
            RuntimeConfig::Local { src_base_dir } => src_base_dir,
            RuntimeConfig::Ssh { src_base_dir, .. } => src_base_dir,
        }
    }

    /// Build the concrete [`Runtime`] this config describes.
    pub fn build(&self) -> Arc<dyn Runtime> {
        match self {
            RuntimeConfig::Local { src_base_dir } => Arc::new(LocalRuntime::new(src_base_dir.clone())),
            RuntimeConfig::Ssh { host, src_base_dir, identity_file, port } => Arc::new(SshRuntime {
                host: host.clone(),
                src_base_dir: src_base_dir.clone(),
                identity_file: identity_file.clone(),
                port: *port,
            }),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
