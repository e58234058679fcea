// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// Cross-crate integration tests exercising the real workspace lifecycle,
/// the streaming agent session, and the control-API dispatch layer together
/// (rather than each crate's own unit tests in isolation).
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cmux_bridge::{ipc, BridgeState};
use cmux_config::Mode;
use cmux_core::{AgentSession, ExtensionMetadataStore, HistoryStore, PartialStore, SendMessageOptions, StreamEvent};
use cmux_model::{ModelProvider, SendMessageError};
use cmux_runtime::{ExecOptions, LocalRuntime, Runtime, RuntimeConfig};
use cmux_tools::ToolRegistry;
use cmux_workspace::{RemoveWorkspaceOptions, WorkspaceManager};

/// `CMUX_TEST_ROOT` is a process-wide env var; serialize every test that
/// touches it so parallel test threads don't race on each other's value.
static ENV_LOCK: Mutex<()> = Mutex::new(());

async fn init_repo(dir: &Path) -> String {
    let repo = dir.join("proj");
    tokio::fs::create_dir_all(&repo).await.unwrap();
    let rt = LocalRuntime::new(dir.to_str().unwrap());
    let init = "git init -q && git config user.email t@example.com && git config user.name T \
                 && git commit --allow-empty -q -m init && git branch -M main";
    rt.exec(init, ExecOptions { cwd: Some(repo.to_str().unwrap().to_string()), ..Default::default() }).await.unwrap();
    repo.to_str().unwrap().to_string()
}

fn mock_resolve(model: &str) -> Result<Box<dyn ModelProvider>, SendMessageError> {
    cmux_model::resolve_provider(model, |_| false)
}

/// Spec §4.11: create → rename (new id, moved worktree) → fork (sibling
/// worktree) → remove, each mutation persisted through the on-disk registry.
#[tokio::test]
async fn workspace_lifecycle_create_rename_fork_remove() {
    let _guard = ENV_LOCK.lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    std::env::set_var("CMUX_TEST_ROOT", dir.path());

    let manager = WorkspaceManager::at_path(dir.path().join("config.json")).await.unwrap();
    let project_path = init_repo(dir.path()).await;
    let runtime_config = RuntimeConfig::Local { src_base_dir: dir.path().join("src").to_string_lossy().into_owned() };

    let created = manager.create_workspace(&project_path, "feature-x", "main", Some(runtime_config)).await.unwrap();
    assert!(Path::new(&created.workspace_path).join(".git").exists());

    let branches = manager.list_branches(&project_path).await.unwrap();
    assert_eq!(branches.recommended_trunk.as_deref(), Some("main"));

    let renamed = manager.rename_workspace(&created.workspace_id, "feature-y").await.unwrap();
    assert_ne!(renamed.workspace_id, created.workspace_id);
    assert!(manager.get_workspace(&created.workspace_id).await.is_none());

    let forked = manager.fork_workspace(&renamed.workspace_id, "feature-y-fork").await.unwrap();
    assert!(Path::new(&forked.workspace_path).join(".git").exists());

    let listed = manager.list_workspaces(&project_path).await;
    assert_eq!(listed.len(), 2, "renamed workspace plus its fork");

    manager.remove_workspace(&forked.workspace_id, RemoveWorkspaceOptions { delete_history: true }).await.unwrap();
    assert!(manager.get_workspace(&forked.workspace_id).await.is_none());
    assert!(!Path::new(&forked.workspace_path).exists());

    std::env::remove_var("CMUX_TEST_ROOT");
}

/// Spec §4.6/§4.7: sending a message appends to history, drives a real
/// stream against the mock provider, and ends with the assistant's reply
/// committed — observed purely through the public chat-event subscription,
/// the same surface a bridge client sees.
#[tokio::test]
async fn agent_session_send_message_streams_to_completion() {
    let history_dir = tempfile::tempdir().unwrap();
    let partial_dir = tempfile::tempdir().unwrap();
    let meta_dir = tempfile::tempdir().unwrap();

    let history = Arc::new(HistoryStore::new(history_dir.path().to_path_buf()));
    let partial = Arc::new(PartialStore::new(partial_dir.path().to_path_buf()));
    let tools = Arc::new(ToolRegistry::new());
    let extension_metadata = Arc::new(ExtensionMetadataStore::new(meta_dir.path().join("extensionMetadata.json")));
    let session =
        Arc::new(AgentSession::new("ws-integration", history.clone(), partial, tools, extension_metadata, Arc::new(cmux_core::ApproxTokenizer)));

    let (backlog, mut rx) = session.subscribe_chat().await.unwrap();
    assert!(backlog.is_empty(), "fresh workspace has no history yet");

    session
        .send_message(
            "hello there",
            SendMessageOptions { model: "mock:planner".into(), mode: Mode::Exec, edit_message_id: None },
            mock_resolve,
        )
        .await
        .unwrap();

    let mut reply = None;
    for _ in 0..64 {
        match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Ok(StreamEvent::StreamEnd { message, .. })) => {
                reply = message.as_text();
                break;
            }
            Ok(Ok(_)) => continue,
            _ => break,
        }
    }
    assert_eq!(reply.as_deref(), Some("MOCK: hello there"));

    let committed = history.get("ws-integration").await.unwrap();
    assert_eq!(committed.len(), 2, "user message plus assistant reply");
    assert_eq!(committed[0].as_text().as_deref(), Some("hello there"));

    session.ensure_metadata(Some("mock:planner".into())).await.unwrap();
}

/// End-to-end through the control-API dispatch surface (spec §6): register
/// a project, create a workspace, send a message, read it back — all via
/// `ipc::dispatch`'s `(channel, args)` shape, the same path both
/// `POST /ipc/<channel>` and a resolved slash command go through.
#[tokio::test]
async fn control_api_dispatch_drives_a_full_workspace_turn() {
    let _guard = ENV_LOCK.lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    std::env::set_var("CMUX_TEST_ROOT", dir.path());

    let project_path = init_repo(dir.path()).await;
    let state = BridgeState::new().await.unwrap();

    let create_project = ipc::dispatch(&state, "projects.create", vec![serde_json::json!(project_path)]).await;
    assert!(create_project.success, "{:?}", create_project.error);

    let create_workspace = ipc::dispatch(
        &state,
        "workspace.create",
        vec![serde_json::json!(project_path), serde_json::json!("feature-z"), serde_json::json!("main")],
    )
    .await;
    assert!(create_workspace.success, "{:?}", create_workspace.error);
    let workspace_id = create_workspace.data.unwrap()["workspace_id"].as_str().unwrap().to_string();

    let send = ipc::dispatch(
        &state,
        "workspace.sendMessage",
        vec![
            serde_json::json!(workspace_id),
            serde_json::json!("ping"),
            serde_json::json!({ "model": "mock:planner", "mode": "exec" }),
        ],
    )
    .await;
    assert!(send.success, "{:?}", send.error);

    tokio::time::sleep(Duration::from_millis(100)).await;

    let history = state.history().get(&workspace_id).await.unwrap();
    assert!(history.iter().any(|m| m.as_text().as_deref() == Some("ping")));

    let unknown = ipc::dispatch(&state, "not.a.real.channel", vec![]).await;
    assert!(!unknown.success);

    let resolved =
        ipc::dispatch(&state, "commands.submit", vec![serde_json::json!(workspace_id), serde_json::json!("/abort")]).await;
    assert!(resolved.success);
    let dispatch = resolved.data.unwrap();
    assert_eq!(dispatch["type"], "dispatch");
    assert_eq!(dispatch["channel"], "workspace.interruptStream");
    assert_eq!(dispatch["args"], serde_json::json!([workspace_id]));

    std::env::remove_var("CMUX_TEST_ROOT");
}
