// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Shared state behind every control-API operation: the workspace registry,
//! provider secrets, and a cache of one [`AgentSession`] per live workspace.
//! Grounded on `sven_node::node`'s subsystem-assembly pattern (several
//! stores + a per-session cache behind one shared handle), generalized from
//! the teacher's single always-on session to cmux's N-workspace model.

use std::collections::HashMap;
use std::sync::Arc;

use cmux_config::Secrets;
use cmux_core::{AgentSession, ExtensionMetadataStore, HistoryStore, PartialStore};
use cmux_runtime::{ExecOptions, ExecResult, RuntimeError};
use cmux_tools::{
    AskQuestionTool, CompactTool, DeleteFileTool, EditFileTool, FindFileTool, GlobFileSearchTool, GlobTool, GrepTool,
    ListDirTool, ProposePlanTool, ReadFileTool, ReadImageTool, ReadLintsTool, RunTerminalCommandTool, SearchCodebaseTool,
    ShellTool, SwitchModeTool, TodoWriteTool, ToolEvent, ToolRegistry, WebFetchTool, WebSearchTool, WriteTool,
};
use cmux_workspace::{WorkspaceManager, WorkspaceManagerError};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::commands::CommandRegistry;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Workspace(#[from] WorkspaceManagerError),
    #[error("workspace not found: {0}")]
    WorkspaceNotFound(String),
    #[error(transparent)]
    AgentSession(#[from] cmux_core::AgentSessionError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Config(#[from] cmux_config::ConfigError),
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl BridgeError {
    /// Stable error kind serialized at the HTTP/WS boundary (SPEC_FULL.md §A.1).
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::Workspace(_) => "workspace_error",
            BridgeError::WorkspaceNotFound(_) => "workspace_not_found",
            BridgeError::AgentSession(e) => e.kind(),
            BridgeError::Runtime(_) => "runtime_error",
            BridgeError::Config(_) => "config_error",
            BridgeError::BadRequest(_) => "bad_request",
        }
    }
}

/// Everything a control-API dispatch needs, shared across HTTP/WS handlers.
pub struct BridgeState {
    pub workspaces: Arc<WorkspaceManager>,
    pub commands: CommandRegistry,
    secrets: RwLock<Secrets>,
    sessions: Mutex<HashMap<String, Arc<AgentSession>>>,
    history: Arc<HistoryStore>,
    partial: Arc<PartialStore>,
    extension_metadata: Arc<ExtensionMetadataStore>,
}

impl BridgeState {
    pub async fn new() -> Result<Self, BridgeError> {
        let workspaces = Arc::new(WorkspaceManager::new().await?);
        let secrets = Secrets::load().await?;
        Ok(Self {
            workspaces,
            commands: CommandRegistry::with_builtins(),
            secrets: RwLock::new(secrets),
            sessions: Mutex::new(HashMap::new()),
            history: Arc::new(HistoryStore::at_default_dir()),
            partial: Arc::new(PartialStore::at_default_dir()),
            extension_metadata: Arc::new(ExtensionMetadataStore::at_default_path()),
        })
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    pub async fn has_secret(&self, provider: &str) -> bool {
        self.secrets.read().await.get(provider).is_some()
    }

    /// A point-in-time clone of the secrets store, for sync closures like
    /// [`cmux_model::resolve_provider`]'s `has_secret` predicate that can't
    /// await the shared lock mid-call.
    pub async fn secrets_snapshot(&self) -> Secrets {
        self.secrets.read().await.clone()
    }

    pub async fn set_secret(&self, provider: &str, api_key: &str) -> Result<(), BridgeError> {
        let mut secrets = self.secrets.write().await;
        secrets.set(provider, api_key);
        secrets.save().await?;
        Ok(())
    }

    pub async fn list_providers(&self) -> Vec<ProviderStatus> {
        let secrets = self.secrets.read().await;
        cmux_model::list_drivers()
            .iter()
            .map(|d| ProviderStatus { id: d.id.to_string(), name: d.name.to_string(), configured: secrets.get(d.id).is_some() })
            .collect()
    }

    /// The `AgentSession` for a workspace, constructing and caching one on
    /// first use (spec §4.7 "one `AgentSession` per workspace, created
    /// lazily").
    pub async fn session_for(&self, workspace_id: &str) -> Result<Arc<AgentSession>, BridgeError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(workspace_id) {
            return Ok(session.clone());
        }
        if self.workspaces.get_workspace(workspace_id).await.is_none() {
            return Err(BridgeError::WorkspaceNotFound(workspace_id.to_string()));
        }
        let tools = Arc::new(build_tool_registry());
        let session = Arc::new(AgentSession::new(
            workspace_id,
            self.history.clone(),
            self.partial.clone(),
            tools,
            self.extension_metadata.clone(),
            Arc::new(cmux_core::ApproxTokenizer),
        ));
        sessions.insert(workspace_id.to_string(), session.clone());
        Ok(session)
    }

    /// Drop a workspace's cached session (spec §3 "destroyed by remove").
    pub async fn drop_session(&self, workspace_id: &str) {
        self.sessions.lock().await.remove(workspace_id);
    }

    /// `workspace.executeBash` (SPEC_FULL.md §B.4): runs a command directly
    /// against the workspace's runtime, bypassing history/tools/the LLM loop
    /// entirely.
    pub async fn execute_bash(&self, workspace_id: &str, command: &str) -> Result<ExecResult, BridgeError> {
        let workspace =
            self.workspaces.get_workspace(workspace_id).await.ok_or_else(|| BridgeError::WorkspaceNotFound(workspace_id.to_string()))?;
        let runtime = workspace.runtime_config.build();
        let result = runtime
            .exec(command, ExecOptions { cwd: Some(workspace.workspace_path.clone()), ..Default::default() })
            .await?;
        Ok(result)
    }

    /// `workspace.truncateHistory` (SPEC_FULL.md §B.4): a direct
    /// `HistoryStore::truncate_after`, independent of `sendMessage`'s own
    /// edit-message truncation path.
    pub async fn truncate_history(&self, workspace_id: &str, message_id: &str) -> Result<(), BridgeError> {
        self.history.truncate_after(workspace_id, message_id).await.map_err(|e| BridgeError::BadRequest(e.to_string()))
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ProviderStatus {
    pub id: String,
    pub name: String,
    pub configured: bool,
}

/// Build a fresh tool registry for one workspace (spec §4.8). Stateful
/// tools (`todo_write`/`switch_mode`/`propose_plan`/`compact`) share one
/// `ToolEvent` channel whose receiver is drained into a log line — nothing
/// in the control API surfaces these events to clients yet.
fn build_tool_registry() -> ToolRegistry {
    let (tx, mut rx) = tokio::sync::mpsc::channel::<ToolEvent>(32);
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            tracing::debug!(?event, "tool event");
        }
    });

    let mut registry = ToolRegistry::new();
    registry.register(ShellTool::default());
    registry.register(RunTerminalCommandTool::default());
    registry.register(EditFileTool);
    registry.register(ReadFileTool);
    registry.register(WriteTool);
    registry.register(DeleteFileTool);
    registry.register(ListDirTool);
    registry.register(FindFileTool);
    registry.register(GlobTool);
    registry.register(GlobFileSearchTool);
    registry.register(GrepTool);
    registry.register(SearchCodebaseTool);
    registry.register(WebFetchTool);
    registry.register(WebSearchTool::default());
    registry.register(ReadImageTool);
    registry.register(ReadLintsTool);
    registry.register(AskQuestionTool::new());
    registry.register(TodoWriteTool::new(Arc::new(tokio::sync::Mutex::new(Vec::new())), tx.clone()));
    registry.register(SwitchModeTool::new(Arc::new(tokio::sync::Mutex::new(cmux_config::Mode::Exec)), tx.clone()));
    registry.register(ProposePlanTool::new(tx.clone()));
    registry.register(CompactTool::new(tx));
    registry
}
