// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The on-disk project/workspace registry: `<home>/.cmux/config.json`
//! (spec §6). Shape is fixed by the spec — `{projects: [[path, entry], ...]}`
//! — so `Config::projects` is a `Vec<(String, ProjectEntry)>` rather than a
//! map: serde_json serializes a tuple as a two-element array, giving the
//! exact wire shape without a custom `Serialize` impl.

use std::path::Path;

use chrono::{DateTime, Utc};
use cmux_runtime::RuntimeConfig;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::home::config_path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceMetadata {
    pub workspace_id: String,
    pub name: String,
    pub project_path: String,
    pub project_name: String,
    /// Derived: `join(runtime.srcBaseDir, projectName, name)`.
    pub workspace_path: String,
    pub runtime_config: RuntimeConfig,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProjectEntry {
    pub path: String,
    #[serde(default)]
    pub workspaces: Vec<WorkspaceMetadata>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub projects: Vec<(String, ProjectEntry)>,
}

impl Config {
    pub async fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_path()).await
    }

    pub async fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|source| ConfigError::Malformed { path: path.display().to_string(), source }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
            Err(source) => Err(ConfigError::Io { path: path.display().to_string(), source }),
        }
    }

    pub async fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&config_path()).await
    }

    /// Atomic write: serialize to a sibling temp file, then rename over the
    /// target (spec §6 "Written atomically").
    pub async fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ConfigError::Io { path: parent.display().to_string(), source })?;
        }
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|source| ConfigError::Malformed { path: path.display().to_string(), source })?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|source| ConfigError::Io { path: tmp.display().to_string(), source })?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        tracing::debug!(path = %path.display(), "wrote config registry");
        Ok(())
    }

    pub fn project(&self, project_path: &str) -> Option<&ProjectEntry> {
        self.projects.iter().find(|(p, _)| p == project_path).map(|(_, e)| e)
    }

    fn project_mut(&mut self, project_path: &str) -> Option<&mut ProjectEntry> {
        self.projects.iter_mut().find(|(p, _)| p == project_path).map(|(_, e)| e)
    }

    /// Idempotent: returns the existing entry if the project is already
    /// registered.
    pub fn add_project(&mut self, project_path: &str) -> &mut ProjectEntry {
        if self.project(project_path).is_none() {
            self.projects.push((
                project_path.to_string(),
                ProjectEntry { path: project_path.to_string(), workspaces: Vec::new() },
            ));
        }
        self.project_mut(project_path).expect("just inserted")
    }

    pub fn remove_project(&mut self, project_path: &str) -> Result<(), ConfigError> {
        let before = self.projects.len();
        self.projects.retain(|(p, _)| p != project_path);
        if self.projects.len() == before {
            return Err(ConfigError::ProjectNotFound(project_path.to_string()));
        }
        Ok(())
    }

    pub fn add_workspace(&mut self, project_path: &str, workspace: WorkspaceMetadata) {
        self.add_project(project_path).workspaces.push(workspace);
    }

    pub fn remove_workspace(&mut self, workspace_id: &str) -> Result<(), ConfigError> {
        for (_, entry) in self.projects.iter_mut() {
            let before = entry.workspaces.len();
            entry.workspaces.retain(|w| w.workspace_id != workspace_id);
            if entry.workspaces.len() != before {
                return Ok(());
            }
        }
        Err(ConfigError::WorkspaceNotFound(workspace_id.to_string()))
    }

    pub fn find_workspace(&self, workspace_id: &str) -> Option<&WorkspaceMetadata> {
        self.projects.iter().flat_map(|(_, e)| &e.workspaces).find(|w| w.workspace_id == workspace_id)
    }

    pub fn find_workspace_mut(&mut self, workspace_id: &str) -> Option<&mut WorkspaceMetadata> {
        self.projects.iter_mut().flat_map(|(_, e)| e.workspaces.iter_mut()).find(|w| w.workspace_id == workspace_id)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
