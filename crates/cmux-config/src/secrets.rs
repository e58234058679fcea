// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Provider API key storage: `<home>/.cmux/secrets.json`, `{provider: key}`
//! (SPEC_FULL.md §B.3). Written by the `providers.setConfig` control-API
//! call, read at provider-client construction time.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::home::secrets_path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Secrets {
    #[serde(flatten)]
    keys: HashMap<String, String>,
}

impl Secrets {
    pub async fn load() -> Result<Self, ConfigError> {
        Self::load_from(&secrets_path()).await
    }

    pub async fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|source| ConfigError::Malformed { path: path.display().to_string(), source }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Secrets::default()),
            Err(source) => Err(ConfigError::Io { path: path.display().to_string(), source }),
        }
    }

    pub async fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&secrets_path()).await
    }

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
        Ok(())
    }

    pub fn get(&self, provider: &str) -> Option<&str> {
        self.keys.get(provider).map(String::as_str)
    }

    pub fn set(&mut self, provider: impl Into<String>, api_key: impl Into<String>) {
        self.keys.insert(provider.into(), api_key.into());
    }

    pub fn remove(&mut self, provider: &str) -> Option<String> {
        self.keys.remove(provider)
    }

    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
