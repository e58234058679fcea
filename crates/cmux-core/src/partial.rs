// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Durable store for the in-progress (not-yet-committed) assistant message
//! (spec §4.4, §6 `<home>/.cmux/partial/<workspaceId>.json`). At most one
//! partial exists per workspace.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use cmux_model::Message;
use thiserror::Error;

use crate::history::{HistoryError, HistoryStore};
use crate::keyed_mutex::KeyedMutex;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PartialError {
    #[error("io error: {0}")]
    Io(String),
    #[error("history error committing partial: {0}")]
    History(String),
}

impl From<HistoryError> for PartialError {
    fn from(e: HistoryError) -> Self {
        PartialError::History(e.to_string())
    }
}

pub struct PartialStore {
    dir: PathBuf,
    locks: KeyedMutex,
}

impl PartialStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir, locks: KeyedMutex::new() }
    }

    pub fn at_default_dir() -> Self {
        Self::new(cmux_config::partial_dir())
    }

    fn path(&self, workspace_id: &str) -> PathBuf {
        self.dir.join(format!("{workspace_id}.json"))
    }

    pub async fn read_partial(&self, workspace_id: &str) -> Result<Option<Message>, PartialError> {
        self.locks.with_lock(workspace_id, || self.read(workspace_id)).await
    }

    async fn read(&self, workspace_id: &str) -> Result<Option<Message>, PartialError> {
        let path = self.path(workspace_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let msg = serde_json::from_slice(&bytes).map_err(|e| PartialError::Io(e.to_string()))?;
                Ok(Some(msg))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PartialError::Io(e.to_string())),
        }
    }

    /// Atomic write (temp file + rename); replaces any existing partial.
    pub async fn write_partial(&self, workspace_id: &str, msg: &Message) -> Result<(), PartialError> {
        let path = self.path(workspace_id);
        self.locks
            .with_lock(workspace_id, || async {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| PartialError::Io(e.to_string()))?;
                }
                let bytes = serde_json::to_vec(msg).map_err(|e| PartialError::Io(e.to_string()))?;
                let tmp = path.with_extension("json.tmp");
                tokio::fs::write(&tmp, &bytes).await.map_err(|e| PartialError::Io(e.to_string()))?;
                tokio::fs::rename(&tmp, &path).await.map_err(|e| PartialError::Io(e.to_string()))?;
                Ok(())
            })
            .await
    }

    pub async fn clear(&self, workspace_id: &str) -> Result<(), PartialError> {
        let path = self.path(workspace_id);
        self.locks
            .with_lock(workspace_id, || async {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(PartialError::Io(e.to_string())),
                }
            })
            .await
    }

    /// Move the partial (if any) into `history`, then clear it. A no-op
    /// returning `Ok(None)` when there is no partial.
    pub async fn commit_to_history(
        &self,
        workspace_id: &str,
        history: &HistoryStore,
    ) -> Result<Option<Message>, PartialError> {
        let Some(msg) = self.read_partial(workspace_id).await? else {
            return Ok(None);
        };
        let committed = history.append(workspace_id, msg).await?;
        self.clear(workspace_id).await?;
        Ok(Some(committed))
    }
}

/// Rate-limits `PartialStore` flushes during a stream to roughly one write
/// per 100ms of deltas (spec §4.4), with forced flushes at tool boundaries
/// and stream end.
pub struct PartialFlushThrottle {
    last_flush: Option<Instant>,
    min_interval: Duration,
}

impl PartialFlushThrottle {
    pub fn new() -> Self {
        Self { last_flush: None, min_interval: Duration::from_millis(100) }
    }

    /// Returns `true` if a flush should happen now. Always `true` when
    /// `force` is set (tool boundary / stream end) or no flush has happened
    /// yet.
    pub fn should_flush(&mut self, force: bool) -> bool {
        let due = force
            || match self.last_flush {
                None => true,
                Some(t) => t.elapsed() >= self.min_interval,
            };
        if due {
            self.last_flush = Some(Instant::now());
        }
        due
    }
}

impl Default for PartialFlushThrottle {
    fn default() -> Self {
        Self::new()
    }
}
