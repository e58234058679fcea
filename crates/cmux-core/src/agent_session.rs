// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! One `AgentSession` per workspace (spec §4.7): binds `HistoryStore`,
//! `PartialStore`, `ToolRegistry`, `ExtensionMetadataStore`, and a
//! `StreamManager` together behind the public surface a control API (the
//! not-yet-built `cmux-bridge`) dispatches into.

use std::sync::Arc;

use chrono::Utc;
use cmux_config::Mode;
use cmux_model::{CompletionRequest, Message, ModelProvider, SendMessageError};
use cmux_tools::{ToolPolicy, ToolRegistry};
use thiserror::Error;
use uuid::Uuid;

use crate::extension_metadata::ExtensionMetadataStore;
use crate::history::HistoryStore;
use crate::partial::PartialStore;
use crate::stream_manager::{StreamEvent, StreamManager, StreamManagerError};
use crate::tokenizer::Tokenizer;

/// Options accepted by [`AgentSession::send_message`].
#[derive(Debug, Clone)]
pub struct SendMessageOptions {
    pub model: String,
    pub mode: Mode,
    /// When set, truncate history after this message id before appending
    /// the new user message (spec §4.7 "editMessageId").
    pub edit_message_id: Option<String>,
}

/// Tagged error surface (spec §4.7 "`{ok,value} | {err,kind}`" /
/// §7 SendMessage kinds). `kind()` is what a transport boundary serializes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentSessionError {
    #[error("no model specified")]
    MissingModel,
    #[error("message is empty and has no attachments")]
    EmptyMessage,
    #[error("history error: {0}")]
    History(String),
    #[error("tool policy error: {0}")]
    Policy(String),
    #[error(transparent)]
    Send(#[from] SendMessageError),
    #[error("a stream is already active for this workspace")]
    AlreadyStreaming,
}

impl AgentSessionError {
    pub fn kind(&self) -> &'static str {
        match self {
            AgentSessionError::Send(e) => e.kind(),
            AgentSessionError::AlreadyStreaming => "already_streaming",
            _ => "unknown",
        }
    }
}

/// One event of `subscribeChat`'s initial snapshot (spec §4.7,
/// `history-events -> replay-events -> caught-up`).
#[derive(Debug, Clone)]
pub enum ChatEvent {
    History(Message),
    Stream(StreamEvent),
}

pub struct AgentSession {
    workspace_id: String,
    history: Arc<HistoryStore>,
    partial: Arc<PartialStore>,
    tools: Arc<ToolRegistry>,
    stream_manager: Arc<StreamManager>,
    extension_metadata: Arc<ExtensionMetadataStore>,
    tokenizer: Arc<dyn Tokenizer>,
}

impl AgentSession {
    pub fn new(
        workspace_id: impl Into<String>,
        history: Arc<HistoryStore>,
        partial: Arc<PartialStore>,
        tools: Arc<ToolRegistry>,
        extension_metadata: Arc<ExtensionMetadataStore>,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Self {
        let workspace_id = workspace_id.into();
        let stream_manager = Arc::new(StreamManager::new(workspace_id.clone(), history.clone(), partial.clone(), tools.clone()));
        Self { workspace_id, history, partial, tools, stream_manager, extension_metadata, tokenizer }
    }

    /// Token count under this session's tokenizer. Since the only shipped
    /// tokenizer is the synchronous `ceil(len/4)` approximation (spec §9),
    /// "preloading" per-model encoders ahead of `sendMessage` is a no-op
    /// here; this exists as the seam a real async-loaded encoder would hang
    /// off.
    pub fn token_count(&self, text: &str) -> usize {
        self.tokenizer.count(text)
    }

    pub fn stream_manager(&self) -> &Arc<StreamManager> {
        &self.stream_manager
    }

    /// Initial chat snapshot plus a receiver for subsequent live events
    /// (spec §4.7 "subscribeChat"). The receiver is obtained before reading
    /// replay/partial state so no event can be missed between snapshot and
    /// live subscription (spec §5 "never sees duplicate historySequences").
    pub async fn subscribe_chat(&self) -> Result<(Vec<ChatEvent>, tokio::sync::broadcast::Receiver<StreamEvent>), AgentSessionError> {
        let history = self.history.get(&self.workspace_id).await.map_err(|e| AgentSessionError::History(e.to_string()))?;
        let mut events: Vec<ChatEvent> = history.into_iter().map(ChatEvent::History).collect();

        let live_rx = self.stream_manager.subscribe();

        let replay = self.stream_manager.replay_active().await;
        if !replay.is_empty() {
            events.extend(replay.into_iter().map(ChatEvent::Stream));
        } else if let Some(partial) = self.partial.read_partial(&self.workspace_id).await.map_err(|e| AgentSessionError::History(e.to_string()))? {
            events.push(ChatEvent::History(partial));
        }
        events.push(ChatEvent::Stream(StreamEvent::CaughtUp));

        Ok((events, live_rx))
    }

    /// Send a new user message and begin a stream (spec §4.7
    /// "sendMessage"). Commits any partial left over from a prior
    /// interruption first, so it is sequenced before the new message.
    pub async fn send_message(
        &self,
        text: &str,
        options: SendMessageOptions,
        resolve: impl Fn(&str) -> Result<Box<dyn ModelProvider>, SendMessageError>,
    ) -> Result<String, AgentSessionError> {
        if options.model.is_empty() {
            return Err(AgentSessionError::MissingModel);
        }
        if text.trim().is_empty() {
            return Err(AgentSessionError::EmptyMessage);
        }

        if let Some(edit_id) = &options.edit_message_id {
            self.history.truncate_after(&self.workspace_id, edit_id).await.map_err(|e| AgentSessionError::History(e.to_string()))?;
        }

        self.partial.commit_to_history(&self.workspace_id, &self.history).await.map_err(|e| AgentSessionError::History(e.to_string()))?;

        let mut history = self.history.get(&self.workspace_id).await.map_err(|e| AgentSessionError::History(e.to_string()))?;
        let next_sequence = history.iter().map(|m| m.metadata.history_sequence).max().unwrap_or(0) + 1;
        let user_message = Message::user(Uuid::new_v4().to_string(), next_sequence, text);
        let appended = self.history.append(&self.workspace_id, user_message).await.map_err(|e| AgentSessionError::History(e.to_string()))?;
        history.push(appended);

        let provider: Arc<dyn ModelProvider> = Arc::from(resolve(&options.model)?);
        let request = self.build_request(history, options.mode);

        self.stream_manager
            .start_stream(provider, request, options.model)
            .await
            .map_err(|StreamManagerError::AlreadyStreaming| AgentSessionError::AlreadyStreaming)
    }

    /// Resume a stream against existing history without appending a new
    /// user message (spec §4.7 "resumeStream"). `Ok(None)` if already
    /// streaming — a no-op, not an error.
    pub async fn resume_stream(
        &self,
        model: &str,
        mode: Mode,
        resolve: impl Fn(&str) -> Result<Box<dyn ModelProvider>, SendMessageError>,
    ) -> Result<Option<String>, AgentSessionError> {
        if self.stream_manager.is_streaming().await {
            return Ok(None);
        }
        let history = self.history.get(&self.workspace_id).await.map_err(|e| AgentSessionError::History(e.to_string()))?;
        let provider: Arc<dyn ModelProvider> = Arc::from(resolve(model)?);
        let request = self.build_request(history, mode);

        match self.stream_manager.start_stream(provider, request, model.to_string()).await {
            Ok(id) => Ok(Some(id)),
            Err(StreamManagerError::AlreadyStreaming) => Ok(None),
        }
    }

    /// Request an abort (spec §4.7 "interruptStream"). Idempotent; a no-op
    /// when idle.
    pub async fn interrupt_stream(&self) -> bool {
        self.stream_manager.interrupt().await
    }

    /// Idempotently record this workspace's recency/streaming state in the
    /// shared `ExtensionMetadataStore` (spec §4.7 "ensureMetadata").
    pub async fn ensure_metadata(&self, model: Option<String>) -> Result<(), AgentSessionError> {
        self.extension_metadata
            .update_recency(&self.workspace_id, Utc::now().timestamp_millis())
            .await
            .map_err(|e| AgentSessionError::History(e.to_string()))?;
        self.extension_metadata
            .set_streaming(&self.workspace_id, self.stream_manager.is_streaming().await, model)
            .await
            .map_err(|e| AgentSessionError::History(e.to_string()))
    }

    fn build_request(&self, messages: Vec<Message>, mode: Mode) -> CompletionRequest {
        let policy = ToolPolicy::canonical_for(mode);
        let enabled = policy.apply(&self.tools.names_for_mode(mode)).unwrap_or_default();
        let tools = self.tools.schemas_for_names(&enabled);
        let tools = tools
            .into_iter()
            .map(|t| cmux_model::ToolSchema { name: t.name, description: t.description, parameters: t.parameters })
            .collect();
        CompletionRequest { messages, tools, stream: true, system_dynamic_suffix: None }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cmux_model::{MockProvider, ScriptedMockProvider};

    use super::*;
    use crate::tokenizer::ApproxTokenizer;

    fn session(ws: &str) -> (Arc<AgentSession>, tempfile::TempDir, tempfile::TempDir, tempfile::TempDir) {
        let history_dir = tempfile::tempdir().unwrap();
        let partial_dir = tempfile::tempdir().unwrap();
        let meta_dir = tempfile::tempdir().unwrap();
        let history = Arc::new(HistoryStore::new(history_dir.path().to_path_buf()));
        let partial = Arc::new(PartialStore::new(partial_dir.path().to_path_buf()));
        let tools = Arc::new(ToolRegistry::new());
        let meta = Arc::new(ExtensionMetadataStore::new(meta_dir.path().join("extensionMetadata.json")));
        let session = AgentSession::new(ws, history, partial, tools, meta, Arc::new(ApproxTokenizer));
        (Arc::new(session), history_dir, partial_dir, meta_dir)
    }

    fn mock_resolve(_model: &str) -> Result<Box<dyn ModelProvider>, SendMessageError> {
        Ok(Box::new(MockProvider::named("planner")))
    }

    #[tokio::test]
    async fn missing_model_is_rejected() {
        let (session, ..) = session("ws1");
        let err = session
            .send_message("hi", SendMessageOptions { model: String::new(), mode: Mode::Exec, edit_message_id: None }, mock_resolve)
            .await
            .unwrap_err();
        assert_eq!(err, AgentSessionError::MissingModel);
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let (session, ..) = session("ws1");
        let err = session
            .send_message("   ", SendMessageOptions { model: "mock:planner".into(), mode: Mode::Exec, edit_message_id: None }, mock_resolve)
            .await
            .unwrap_err();
        assert_eq!(err, AgentSessionError::EmptyMessage);
    }

    #[tokio::test]
    async fn s1_basic_turn_appends_user_then_assistant() {
        let (session, ..) = session("ws1");
        session
            .send_message(
                "List 3 programming languages",
                SendMessageOptions { model: "mock:planner".into(), mode: Mode::Plan, edit_message_id: None },
                mock_resolve,
            )
            .await
            .unwrap();

        for _ in 0..50 {
            if !session.stream_manager.is_streaming().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let history = session.history.get("ws1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].metadata.history_sequence, 1);
        assert_eq!(history[1].metadata.history_sequence, 2);
    }

    #[tokio::test]
    async fn s3_edit_prior_turn_truncates_then_appends() {
        let (session, ..) = session("ws1");
        session.history.append("ws1", Message::user("u1", 0, "first")).await.unwrap();
        session.history.append("ws1", Message::assistant("a1", 0)).await.unwrap();
        session.history.append("ws1", Message::user("u2", 0, "second")).await.unwrap();
        session.history.append("ws1", Message::assistant("a2", 0)).await.unwrap();

        session
            .send_message(
                "new",
                SendMessageOptions { model: "mock:planner".into(), mode: Mode::Exec, edit_message_id: Some("u2".into()) },
                mock_resolve,
            )
            .await
            .unwrap();

        for _ in 0..50 {
            if !session.stream_manager.is_streaming().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let history = session.history.get("ws1").await.unwrap();
        // u1, a1, u2 survive the truncate; "new" and the model's reply are appended after.
        assert_eq!(history.len(), 5);
        assert_eq!(history[0].id, "u1");
        assert_eq!(history[1].id, "a1");
        assert_eq!(history[2].id, "u2");
        assert_eq!(history[3].as_text().as_deref(), Some("new"));
        assert_eq!(history[4].role, cmux_model::Role::Assistant);
    }

    #[tokio::test]
    async fn s4_authentication_error_is_not_retryable() {
        let (session, ..) = session("ws1");
        let resolve = |_model: &str| -> Result<Box<dyn ModelProvider>, SendMessageError> {
            Ok(Box::new(ScriptedMockProvider::new(vec![vec![cmux_model::ResponseEvent::Error("invalid api key".into())]])))
        };
        let mut rx = session.stream_manager.subscribe();
        session
            .send_message("hello", SendMessageOptions { model: "mock:planner".into(), mode: Mode::Exec, edit_message_id: None }, resolve)
            .await
            .unwrap();

        let mut error_type = None;
        for _ in 0..50 {
            match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
                Ok(Ok(StreamEvent::StreamError { error_type: et, .. })) => {
                    error_type = Some(et);
                    break;
                }
                Ok(Ok(_)) => continue,
                _ => break,
            }
        }
        let error_type = error_type.expect("expected a StreamError event");
        assert!(!error_type.is_retryable());
    }

    #[tokio::test]
    async fn resume_stream_is_noop_when_already_streaming() {
        let (session, ..) = session("ws1");
        session
            .send_message("hi", SendMessageOptions { model: "mock:planner".into(), mode: Mode::Exec, edit_message_id: None }, mock_resolve)
            .await
            .unwrap();
        // The mock provider resolves near-instantly, so this race is best-effort;
        // either outcome (None because already done, or None because streaming)
        // is acceptable — resume_stream must never error here.
        let _ = session.resume_stream("mock:planner", Mode::Exec, mock_resolve).await.unwrap();
    }

    #[tokio::test]
    async fn interrupt_stream_is_noop_when_idle() {
        let (session, ..) = session("ws1");
        assert!(!session.interrupt_stream().await);
    }

    #[tokio::test]
    async fn ensure_metadata_records_recency() {
        let (session, ..) = session("ws1");
        session.ensure_metadata(Some("mock:planner".into())).await.unwrap();
        let meta = session.extension_metadata.get_metadata("ws1").await.unwrap().unwrap();
        assert_eq!(meta.last_model.as_deref(), Some("mock:planner"));
        assert!(!meta.streaming);
    }

    #[tokio::test]
    async fn subscribe_chat_yields_history_then_caught_up() {
        let (session, ..) = session("ws1");
        session.history.append("ws1", Message::user("u1", 0, "hi")).await.unwrap();
        let (events, _rx) = session.subscribe_chat().await.unwrap();
        assert!(matches!(events[0], ChatEvent::History(_)));
        assert!(matches!(events.last().unwrap(), ChatEvent::Stream(StreamEvent::CaughtUp)));
    }
}
