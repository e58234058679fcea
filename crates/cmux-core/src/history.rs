// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Append-only durable message log, one JSONL file per workspace (spec §4.3,
//! §6 `<home>/.cmux/history/<workspaceId>.jsonl`). All mutations are
//! serialized per `workspaceId` via [`KeyedMutex`].

use std::path::{Path, PathBuf};

use cmux_model::Message;
use thiserror::Error;

use crate::keyed_mutex::KeyedMutex;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("message not found: {0}")]
    NotFound(String),
    #[error("duplicate historySequence: {0}")]
    DuplicateSequence(i64),
    #[error("io error: {0}")]
    Io(String),
}

pub struct HistoryStore {
    dir: PathBuf,
    locks: KeyedMutex,
}

impl HistoryStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir, locks: KeyedMutex::new() }
    }

    pub fn at_default_dir() -> Self {
        Self::new(cmux_config::history_dir())
    }

    fn path(&self, workspace_id: &str) -> PathBuf {
        self.dir.join(format!("{workspace_id}.jsonl"))
    }

    /// Ordered messages for a workspace. Malformed lines are skipped with a
    /// warning rather than failing the read (spec §4.3).
    pub async fn get(&self, workspace_id: &str) -> Result<Vec<Message>, HistoryError> {
        self.locks.with_lock(workspace_id, || self.read_all(&self.path(workspace_id))).await
    }

    async fn read_all(&self, path: &Path) -> Result<Vec<Message>, HistoryError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(HistoryError::Io(e.to_string())),
        };
        let text = String::from_utf8_lossy(&bytes);
        let mut messages = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Message>(line) {
                Ok(msg) => messages.push(msg),
                Err(e) => tracing::warn!(path = %path.display(), lineno, error = %e, "skipping malformed history line"),
            }
        }
        messages.sort_by_key(|m| m.metadata.history_sequence);
        Ok(messages)
    }

    /// Assigns `historySequence = maxSeq + 1` when the caller leaves it at
    /// the default (0); rejects an explicit sequence that would collide.
    pub async fn append(&self, workspace_id: &str, mut msg: Message) -> Result<Message, HistoryError> {
        let path = self.path(workspace_id);
        self.locks
            .with_lock(workspace_id, || async {
                let existing = self.read_all(&path).await?;
                let max_seq = existing.iter().map(|m| m.metadata.history_sequence).max().unwrap_or(0);
                if msg.metadata.history_sequence == 0 {
                    msg.metadata.history_sequence = max_seq + 1;
                } else if existing.iter().any(|m| m.metadata.history_sequence == msg.metadata.history_sequence) {
                    return Err(HistoryError::DuplicateSequence(msg.metadata.history_sequence));
                }
                self.append_line(&path, &msg).await?;
                Ok(msg)
            })
            .await
    }

    async fn append_line(&self, path: &Path, msg: &Message) -> Result<(), HistoryError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| HistoryError::Io(e.to_string()))?;
        }
        let mut line = serde_json::to_string(msg).map_err(|e| HistoryError::Io(e.to_string()))?;
        line.push('\n');
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| HistoryError::Io(e.to_string()))?;
        file.write_all(line.as_bytes()).await.map_err(|e| HistoryError::Io(e.to_string()))?;
        Ok(())
    }

    /// Replace a message by id, preserving its original `historySequence`.
    pub async fn update(&self, workspace_id: &str, msg: Message) -> Result<(), HistoryError> {
        let path = self.path(workspace_id);
        self.locks
            .with_lock(workspace_id, || async {
                let mut existing = self.read_all(&path).await?;
                let slot = existing
                    .iter_mut()
                    .find(|m| m.id == msg.id)
                    .ok_or_else(|| HistoryError::NotFound(msg.id.clone()))?;
                let sequence = slot.metadata.history_sequence;
                let mut replacement = msg;
                replacement.metadata.history_sequence = sequence;
                *slot = replacement;
                self.rewrite_all(&path, &existing).await
            })
            .await
    }

    /// Delete all messages with sequence strictly greater than `message_id`'s.
    pub async fn truncate_after(&self, workspace_id: &str, message_id: &str) -> Result<(), HistoryError> {
        let path = self.path(workspace_id);
        self.locks
            .with_lock(workspace_id, || async {
                let existing = self.read_all(&path).await?;
                let target_seq = existing
                    .iter()
                    .find(|m| m.id == message_id)
                    .map(|m| m.metadata.history_sequence)
                    .ok_or_else(|| HistoryError::NotFound(message_id.to_string()))?;
                let kept: Vec<Message> =
                    existing.into_iter().filter(|m| m.metadata.history_sequence <= target_seq).collect();
                self.rewrite_all(&path, &kept).await
            })
            .await
    }

    /// Remove a workspace's history file entirely (spec §3 "destroyed by
    /// remove ... delete history"). Idempotent — a missing file is not an
    /// error.
    pub async fn delete(&self, workspace_id: &str) -> Result<(), HistoryError> {
        let path = self.path(workspace_id);
        self.locks
            .with_lock(workspace_id, || async {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(HistoryError::Io(e.to_string())),
                }
            })
            .await
    }

    async fn rewrite_all(&self, path: &Path, messages: &[Message]) -> Result<(), HistoryError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| HistoryError::Io(e.to_string()))?;
        }
        let mut body = String::new();
        for msg in messages {
            body.push_str(&serde_json::to_string(msg).map_err(|e| HistoryError::Io(e.to_string()))?);
            body.push('\n');
        }
        let tmp = path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, body.as_bytes()).await.map_err(|e| HistoryError::Io(e.to_string()))?;
        tokio::fs::rename(&tmp, path).await.map_err(|e| HistoryError::Io(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (HistoryStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (HistoryStore::new(dir.path().to_path_buf()), dir)
    }

    #[tokio::test]
    async fn append_assigns_monotonic_sequence() {
        let (store, _dir) = store();
        let a = store.append("ws1", Message::user("a", 0, "hello")).await.unwrap();
        let b = store.append("ws1", Message::user("b", 0, "world")).await.unwrap();
        assert_eq!(a.metadata.history_sequence, 1);
        assert_eq!(b.metadata.history_sequence, 2);
    }

    #[tokio::test]
    async fn duplicate_explicit_sequence_is_rejected() {
        let (store, _dir) = store();
        store.append("ws1", Message::user("a", 1, "hello")).await.unwrap();
        let err = store.append("ws1", Message::user("b", 1, "dup")).await.unwrap_err();
        assert_eq!(err, HistoryError::DuplicateSequence(1));
    }

    #[tokio::test]
    async fn get_returns_ordered_messages() {
        let (store, _dir) = store();
        store.append("ws1", Message::user("a", 0, "1")).await.unwrap();
        store.append("ws1", Message::user("b", 0, "2")).await.unwrap();
        let all = store.get("ws1").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "a");
        assert_eq!(all[1].id, "b");
    }

    #[tokio::test]
    async fn update_preserves_sequence() {
        let (store, _dir) = store();
        store.append("ws1", Message::user("a", 0, "1")).await.unwrap();
        let mut replacement = Message::user("a", 999, "edited");
        replacement.id = "a".into();
        store.update("ws1", replacement).await.unwrap();
        let all = store.get("ws1").await.unwrap();
        assert_eq!(all[0].metadata.history_sequence, 1);
        assert_eq!(all[0].as_text().unwrap(), "edited");
    }

    #[tokio::test]
    async fn update_missing_id_is_not_found() {
        let (store, _dir) = store();
        let err = store.update("ws1", Message::user("missing", 0, "x")).await.unwrap_err();
        assert_eq!(err, HistoryError::NotFound("missing".into()));
    }

    #[tokio::test]
    async fn truncate_after_removes_strictly_later_messages() {
        let (store, _dir) = store();
        store.append("ws1", Message::user("u1", 0, "1")).await.unwrap();
        store.append("ws1", Message::assistant("a1", 0)).await.unwrap();
        store.append("ws1", Message::user("u2", 0, "2")).await.unwrap();
        store.truncate_after("ws1", "u1").await.unwrap();
        let all = store.get("ws1").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "u1");
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let (store, dir) = store();
        store.append("ws1", Message::user("a", 0, "1")).await.unwrap();
        let path = dir.path().join("ws1.jsonl");
        let mut existing = tokio::fs::read_to_string(&path).await.unwrap();
        existing.push_str("not json\n");
        tokio::fs::write(&path, existing).await.unwrap();
        let all = store.get("ws1").await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn missing_workspace_file_returns_empty() {
        let (store, _dir) = store();
        let all = store.get("never-written").await.unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn delete_removes_history_and_is_idempotent() {
        let (store, _dir) = store();
        store.append("ws1", Message::user("a", 0, "1")).await.unwrap();
        store.delete("ws1").await.unwrap();
        assert!(store.get("ws1").await.unwrap().is_empty());
        store.delete("ws1").await.unwrap();
    }
}
