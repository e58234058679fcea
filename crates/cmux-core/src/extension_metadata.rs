// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Single-file workspace recency/streaming metadata consumed by external
//! observers such as an editor extension (spec §4.5, §6
//! `<home>/.cmux/extensionMetadata.json`).

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

const CURRENT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ExtensionMetadataError {
    #[error("io error: {0}")]
    Io(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceExtensionMetadata {
    /// Milliseconds since the epoch.
    pub recency: i64,
    pub streaming: bool,
    #[serde(default)]
    pub last_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionMetadataEntry {
    pub workspace_id: String,
    #[serde(flatten)]
    pub metadata: WorkspaceExtensionMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileShape {
    version: u32,
    #[serde(default)]
    workspaces: HashMap<String, WorkspaceExtensionMetadata>,
}

impl Default for FileShape {
    fn default() -> Self {
        Self { version: CURRENT_VERSION, workspaces: HashMap::new() }
    }
}

pub struct ExtensionMetadataStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ExtensionMetadataStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path, write_lock: Mutex::new(()) }
    }

    pub fn at_default_path() -> Self {
        Self::new(cmux_config::extension_metadata_path())
    }

    async fn load(&self) -> Result<FileShape, ExtensionMetadataError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => match serde_json::from_slice::<FileShape>(&bytes) {
                Ok(shape) if shape.version == CURRENT_VERSION => Ok(shape),
                Ok(shape) => {
                    tracing::warn!(version = shape.version, "unrecognized extensionMetadata version, resetting");
                    Ok(FileShape::default())
                }
                Err(e) => {
                    tracing::warn!(error = %e, "malformed extensionMetadata file, resetting");
                    Ok(FileShape::default())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileShape::default()),
            Err(e) => Err(ExtensionMetadataError::Io(e.to_string())),
        }
    }

    async fn save(&self, shape: &FileShape) -> Result<(), ExtensionMetadataError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| ExtensionMetadataError::Io(e.to_string()))?;
        }
        let bytes = serde_json::to_vec_pretty(shape).map_err(|e| ExtensionMetadataError::Io(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await.map_err(|e| ExtensionMetadataError::Io(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| ExtensionMetadataError::Io(e.to_string()))?;
        Ok(())
    }

    pub async fn get_metadata(&self, workspace_id: &str) -> Result<Option<WorkspaceExtensionMetadata>, ExtensionMetadataError> {
        Ok(self.load().await?.workspaces.remove(workspace_id))
    }

    /// Entries ordered by recency, most recent first.
    pub async fn get_all_ordered(&self) -> Result<Vec<ExtensionMetadataEntry>, ExtensionMetadataError> {
        let shape = self.load().await?;
        let mut entries: Vec<ExtensionMetadataEntry> = shape
            .workspaces
            .into_iter()
            .map(|(workspace_id, metadata)| ExtensionMetadataEntry { workspace_id, metadata })
            .collect();
        entries.sort_by(|a, b| b.metadata.recency.cmp(&a.metadata.recency));
        Ok(entries)
    }

    pub async fn update_recency(&self, workspace_id: &str, recency_ms: i64) -> Result<(), ExtensionMetadataError> {
        let _guard = self.write_lock.lock().await;
        let mut shape = self.load().await?;
        shape.workspaces.entry(workspace_id.to_string()).or_insert(WorkspaceExtensionMetadata {
            recency: recency_ms,
            streaming: false,
            last_model: None,
        }).recency = recency_ms;
        self.save(&shape).await
    }

    pub async fn set_streaming(
        &self,
        workspace_id: &str,
        streaming: bool,
        model: Option<String>,
    ) -> Result<(), ExtensionMetadataError> {
        let _guard = self.write_lock.lock().await;
        let mut shape = self.load().await?;
        let entry = shape.workspaces.entry(workspace_id.to_string()).or_insert(WorkspaceExtensionMetadata {
            recency: 0,
            streaming: false,
            last_model: None,
        });
        entry.streaming = streaming;
        if model.is_some() {
            entry.last_model = model;
        }
        self.save(&shape).await
    }

    pub async fn delete(&self, workspace_id: &str) -> Result<(), ExtensionMetadataError> {
        let _guard = self.write_lock.lock().await;
        let mut shape = self.load().await?;
        shape.workspaces.remove(workspace_id);
        self.save(&shape).await
    }

    /// Clears `streaming` for every entry. Call once at process startup
    /// (spec §3 ExtensionMetadata invariant: crash reset).
    pub async fn clear_stale_streaming(&self) -> Result<(), ExtensionMetadataError> {
        let _guard = self.write_lock.lock().await;
        let mut shape = self.load().await?;
        for entry in shape.workspaces.values_mut() {
            entry.streaming = false;
        }
        self.save(&shape).await
    }
}
