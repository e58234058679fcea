// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! `WorkspaceManager` (spec §4.11): creates and destroys git worktrees,
//! keeps the `<home>/.cmux/config.json` registry in sync with them, and
//! broadcasts `workspace-metadata` events on every mutation so subscribers
//! (the not-yet-built `cmux-bridge`) can push live updates to clients.

use std::path::{Path, PathBuf};

use cmux_config::{Config, ConfigError, ProjectEntry, WorkspaceMetadata};
use cmux_core::{ExtensionMetadataStore, HistoryStore, PartialStore};
use cmux_runtime::{ExecOptions, Runtime, RuntimeConfig, RuntimeError};
use chrono::Utc;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum WorkspaceManagerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("io error: {0}")]
    Io(String),
    #[error("project not registered: {0}")]
    ProjectNotFound(String),
    #[error("workspace not found: {0}")]
    WorkspaceNotFound(String),
}

/// Result of [`WorkspaceManager::list_branches`] (spec §4.11).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchList {
    pub branches: Vec<String>,
    pub recommended_trunk: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RemoveWorkspaceOptions {
    /// Delete the workspace's history/partial/extension-metadata state too
    /// (spec §3 "destroyed by remove: stop streams, remove worktree, delete
    /// history"). `false` leaves the durable state around for inspection.
    pub delete_history: bool,
}

/// `workspace-metadata` events (spec §3), broadcast after every registry
/// mutation this manager makes.
#[derive(Debug, Clone)]
pub enum WorkspaceManagerEvent {
    Created(WorkspaceMetadata),
    Renamed { old_id: String, workspace: WorkspaceMetadata },
    Forked { source_id: String, workspace: WorkspaceMetadata },
    Removed { workspace_id: String },
}

pub struct WorkspaceManager {
    config_path: PathBuf,
    config: AsyncMutex<Config>,
    history: HistoryStore,
    partial: PartialStore,
    extension_metadata: ExtensionMetadataStore,
    events_tx: broadcast::Sender<WorkspaceManagerEvent>,
}

impl WorkspaceManager {
    pub async fn new() -> Result<Self, WorkspaceManagerError> {
        Self::at_path(cmux_config::config_path()).await
    }

    pub async fn at_path(config_path: impl Into<PathBuf>) -> Result<Self, WorkspaceManagerError> {
        let config_path = config_path.into();
        let config = Config::load_from(&config_path).await?;
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            config_path,
            config: AsyncMutex::new(config),
            history: HistoryStore::at_default_dir(),
            partial: PartialStore::at_default_dir(),
            extension_metadata: ExtensionMetadataStore::at_default_path(),
            events_tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkspaceManagerEvent> {
        self.events_tx.subscribe()
    }

    fn emit(&self, event: WorkspaceManagerEvent) {
        // No subscribers yet is not an error — the event is simply dropped.
        let _ = self.events_tx.send(event);
    }

    pub async fn list_projects(&self) -> Vec<ProjectEntry> {
        self.config.lock().await.projects.iter().map(|(_, e)| e.clone()).collect()
    }

    pub async fn add_project(&self, project_path: &str) -> Result<ProjectEntry, WorkspaceManagerError> {
        let mut config = self.config.lock().await;
        let entry = config.add_project(project_path).clone();
        config.save_to(&self.config_path).await?;
        Ok(entry)
    }

    pub async fn remove_project(&self, project_path: &str) -> Result<(), WorkspaceManagerError> {
        let mut config = self.config.lock().await;
        config.remove_project(project_path)?;
        config.save_to(&self.config_path).await?;
        Ok(())
    }

    pub async fn get_workspace(&self, workspace_id: &str) -> Option<WorkspaceMetadata> {
        self.config.lock().await.find_workspace(workspace_id).cloned()
    }

    pub async fn list_workspaces(&self, project_path: &str) -> Vec<WorkspaceMetadata> {
        self.config.lock().await.project(project_path).map(|e| e.workspaces.clone()).unwrap_or_default()
    }

    /// List local branches for `project_path` plus a recommended trunk
    /// (`main`, falling back to `master`, falling back to the first branch
    /// found). Runs against whichever runtime config one of the project's
    /// existing workspaces already carries, or a local runtime otherwise.
    pub async fn list_branches(&self, project_path: &str) -> Result<BranchList, WorkspaceManagerError> {
        let runtime_config = self.resolve_runtime_config(project_path).await;
        let runtime = runtime_config.build();
        let result = runtime
            .exec(
                "git branch --format='%(refname:short)'",
                ExecOptions { cwd: Some(project_path.to_string()), ..Default::default() },
            )
            .await?;
        let branches: Vec<String> =
            String::from_utf8_lossy(&result.stdout).lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect();
        let recommended_trunk = ["main", "master"]
            .into_iter()
            .find(|b| branches.iter().any(|x| x == b))
            .map(str::to_string)
            .or_else(|| branches.first().cloned());
        Ok(BranchList { branches, recommended_trunk })
    }

    /// Create a workspace: allocate a git worktree under the runtime's
    /// `srcBaseDir` and persist its metadata (spec §4.11, §3 "created by
    /// WorkspaceManager").
    pub async fn create_workspace(
        &self,
        project_path: &str,
        name: &str,
        trunk_branch: &str,
        runtime_config: Option<RuntimeConfig>,
    ) -> Result<WorkspaceMetadata, WorkspaceManagerError> {
        let runtime_config = match runtime_config {
            Some(rc) => rc,
            None => self.resolve_runtime_config(project_path).await,
        };
        let runtime = runtime_config.build();
        let project_name = project_name_from_path(project_path);
        let workspace_path = runtime.get_workspace_path(&project_name, name);

        let cmd = format!(
            "git worktree add -b {} {} {}",
            shell_quote(name),
            shell_quote(&workspace_path),
            shell_quote(trunk_branch)
        );
        runtime.exec(&cmd, ExecOptions { cwd: Some(project_path.to_string()), ..Default::default() }).await?;

        let workspace = WorkspaceMetadata {
            workspace_id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            project_path: project_path.to_string(),
            project_name,
            workspace_path,
            runtime_config,
            created_at: Utc::now(),
        };

        let mut config = self.config.lock().await;
        config.add_workspace(project_path, workspace.clone());
        config.save_to(&self.config_path).await?;
        drop(config);

        self.emit(WorkspaceManagerEvent::Created(workspace.clone()));
        Ok(workspace)
    }

    /// Rename a workspace. Per spec this is a create-new + delete-old at the
    /// config level: a fresh `workspaceId` is minted and history/partial/
    /// extension-metadata state is carried over to it, since every durable
    /// store is keyed by workspace id.
    pub async fn rename_workspace(&self, workspace_id: &str, new_name: &str) -> Result<WorkspaceMetadata, WorkspaceManagerError> {
        let mut config = self.config.lock().await;
        let old = config
            .find_workspace(workspace_id)
            .cloned()
            .ok_or_else(|| WorkspaceManagerError::WorkspaceNotFound(workspace_id.to_string()))?;

        let runtime = old.runtime_config.build();
        let new_path = runtime.get_workspace_path(&old.project_name, new_name);
        self.move_worktree(&runtime, &old.project_path, &old.workspace_path, &new_path).await?;

        let new_id = Uuid::new_v4().to_string();
        let renamed = WorkspaceMetadata {
            workspace_id: new_id.clone(),
            name: new_name.to_string(),
            workspace_path: new_path,
            created_at: old.created_at,
            ..old.clone()
        };

        config.remove_workspace(workspace_id)?;
        config.add_workspace(&renamed.project_path, renamed.clone());
        config.save_to(&self.config_path).await?;
        drop(config);

        self.migrate_workspace_state(workspace_id, &new_id).await?;

        self.emit(WorkspaceManagerEvent::Renamed { old_id: workspace_id.to_string(), workspace: renamed.clone() });
        Ok(renamed)
    }

    /// Fork a workspace: a new worktree branched from the source workspace's
    /// current commit (spec §4.11 "copies branch state"), with its own fresh
    /// history.
    pub async fn fork_workspace(&self, source_id: &str, new_name: &str) -> Result<WorkspaceMetadata, WorkspaceManagerError> {
        let mut config = self.config.lock().await;
        let source = config
            .find_workspace(source_id)
            .cloned()
            .ok_or_else(|| WorkspaceManagerError::WorkspaceNotFound(source_id.to_string()))?;

        let runtime = source.runtime_config.build();
        let new_path = runtime.get_workspace_path(&source.project_name, new_name);

        let head = runtime
            .exec(
                &format!("git -C {} rev-parse HEAD", shell_quote(&source.workspace_path)),
                ExecOptions::default(),
            )
            .await?;
        let commit = String::from_utf8_lossy(&head.stdout).trim().to_string();

        let cmd = format!("git worktree add -b {} {} {}", shell_quote(new_name), shell_quote(&new_path), shell_quote(&commit));
        runtime.exec(&cmd, ExecOptions { cwd: Some(source.project_path.clone()), ..Default::default() }).await?;

        let forked = WorkspaceMetadata {
            workspace_id: Uuid::new_v4().to_string(),
            name: new_name.to_string(),
            workspace_path: new_path,
            created_at: Utc::now(),
            ..source.clone()
        };
        config.add_workspace(&forked.project_path, forked.clone());
        config.save_to(&self.config_path).await?;
        drop(config);

        self.emit(WorkspaceManagerEvent::Forked { source_id: source_id.to_string(), workspace: forked.clone() });
        Ok(forked)
    }

    /// Destroy a workspace: remove its worktree, drop it from the registry,
    /// and (when requested) delete its durable history/partial/extension
    /// metadata. Stopping any in-flight stream is the caller's
    /// responsibility — this manager has no handle on a workspace's
    /// `AgentSession`.
    pub async fn remove_workspace(&self, workspace_id: &str, opts: RemoveWorkspaceOptions) -> Result<(), WorkspaceManagerError> {
        let mut config = self.config.lock().await;
        let workspace = config
            .find_workspace(workspace_id)
            .cloned()
            .ok_or_else(|| WorkspaceManagerError::WorkspaceNotFound(workspace_id.to_string()))?;

        let runtime = workspace.runtime_config.build();
        let cmd = format!("git worktree remove --force {}", shell_quote(&workspace.workspace_path));
        runtime.exec(&cmd, ExecOptions { cwd: Some(workspace.project_path.clone()), ..Default::default() }).await?;

        config.remove_workspace(workspace_id)?;
        config.save_to(&self.config_path).await?;
        drop(config);

        if opts.delete_history {
            self.history.delete(workspace_id).await.map_err(|e| WorkspaceManagerError::Io(e.to_string()))?;
            self.partial.clear(workspace_id).await.map_err(|e| WorkspaceManagerError::Io(e.to_string()))?;
            self.extension_metadata.delete(workspace_id).await.map_err(|e| WorkspaceManagerError::Io(e.to_string()))?;
        }

        self.emit(WorkspaceManagerEvent::Removed { workspace_id: workspace_id.to_string() });
        Ok(())
    }

    /// Use an existing workspace's runtime config for the same project if
    /// one is registered, otherwise fall back to a local runtime rooted
    /// beside the project.
    async fn resolve_runtime_config(&self, project_path: &str) -> RuntimeConfig {
        let config = self.config.lock().await;
        config
            .project(project_path)
            .and_then(|e| e.workspaces.first())
            .map(|w| w.runtime_config.clone())
            .unwrap_or_else(|| RuntimeConfig::Local {
                src_base_dir: Path::new(project_path).parent().map(|p| p.to_string_lossy().into_owned()).unwrap_or_else(|| "/tmp".to_string()),
            })
    }

    /// Move a worktree directory: atomic `git worktree move` when it
    /// succeeds, copy-then-delete-then-repair otherwise (spec §4.11
    /// "atomic-rename when possible, copy+delete otherwise").
    async fn move_worktree(&self, runtime: &std::sync::Arc<dyn Runtime>, project_path: &str, old_path: &str, new_path: &str) -> Result<(), WorkspaceManagerError> {
        let cmd = format!(
            "git worktree move {old} {new} || (cp -r {old} {new} && rm -rf {old} && git worktree repair {new})",
            old = shell_quote(old_path),
            new = shell_quote(new_path),
        );
        runtime.exec(&cmd, ExecOptions { cwd: Some(project_path.to_string()), ..Default::default() }).await?;
        Ok(())
    }

    /// Carry a workspace's durable state over to a new id after a rename.
    async fn migrate_workspace_state(&self, old_id: &str, new_id: &str) -> Result<(), WorkspaceManagerError> {
        rename_if_exists(&cmux_config::history_dir().join(format!("{old_id}.jsonl")), &cmux_config::history_dir().join(format!("{new_id}.jsonl")))
            .await
            .map_err(WorkspaceManagerError::Io)?;
        rename_if_exists(&cmux_config::partial_dir().join(format!("{old_id}.json")), &cmux_config::partial_dir().join(format!("{new_id}.json")))
            .await
            .map_err(WorkspaceManagerError::Io)?;

        if let Some(meta) = self.extension_metadata.get_metadata(old_id).await.map_err(|e| WorkspaceManagerError::Io(e.to_string()))? {
            self.extension_metadata.delete(old_id).await.map_err(|e| WorkspaceManagerError::Io(e.to_string()))?;
            self.extension_metadata.update_recency(new_id, meta.recency).await.map_err(|e| WorkspaceManagerError::Io(e.to_string()))?;
            self.extension_metadata
                .set_streaming(new_id, meta.streaming, meta.last_model)
                .await
                .map_err(|e| WorkspaceManagerError::Io(e.to_string()))?;
        }
        Ok(())
    }
}

async fn rename_if_exists(from: &Path, to: &Path) -> Result<(), String> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

fn project_name_from_path(project_path: &str) -> String {
    Path::new(project_path).file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| project_path.to_string())
}

/// Single-quote a shell argument, escaping embedded single quotes.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// `CMUX_TEST_ROOT` is a process-wide env var; serialize every test that
    /// touches it so parallel test threads don't race on each other's value.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    async fn manager() -> (WorkspaceManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("CMUX_TEST_ROOT", dir.path());
        let config_path = dir.path().join("config.json");
        let manager = WorkspaceManager::at_path(config_path).await.unwrap();
        (manager, dir)
    }

    async fn init_repo(dir: &Path) -> String {
        let repo = dir.join("proj");
        tokio::fs::create_dir_all(&repo).await.unwrap();
        let rt = cmux_runtime::LocalRuntime::new(dir.to_str().unwrap());
        let init = "git init -q && git config user.email t@example.com && git config user.name T \
                     && git commit --allow-empty -q -m init && git branch -M main";
        rt.exec(init, ExecOptions { cwd: Some(repo.to_str().unwrap().to_string()), ..Default::default() }).await.unwrap();
        repo.to_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn create_workspace_adds_a_worktree_and_persists_metadata() {
        let _guard = ENV_LOCK.lock().unwrap();
        let (manager, dir) = manager().await;
        let project_path = init_repo(dir.path()).await;
        let runtime_config = RuntimeConfig::Local { src_base_dir: dir.path().join("src").to_string_lossy().into_owned() };

        let ws = manager.create_workspace(&project_path, "feature-x", "main", Some(runtime_config)).await.unwrap();
        assert_eq!(ws.name, "feature-x");
        assert!(Path::new(&ws.workspace_path).join(".git").exists());

        let listed = manager.list_workspaces(&project_path).await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].workspace_id, ws.workspace_id);
        std::env::remove_var("CMUX_TEST_ROOT");
    }

    #[tokio::test]
    async fn remove_workspace_drops_worktree_and_registry_entry() {
        let _guard = ENV_LOCK.lock().unwrap();
        let (manager, dir) = manager().await;
        let project_path = init_repo(dir.path()).await;
        let runtime_config = RuntimeConfig::Local { src_base_dir: dir.path().join("src").to_string_lossy().into_owned() };
        let ws = manager.create_workspace(&project_path, "feature-x", "main", Some(runtime_config)).await.unwrap();

        manager.remove_workspace(&ws.workspace_id, RemoveWorkspaceOptions::default()).await.unwrap();

        assert!(manager.get_workspace(&ws.workspace_id).await.is_none());
        assert!(!Path::new(&ws.workspace_path).exists());
        std::env::remove_var("CMUX_TEST_ROOT");
    }

    #[tokio::test]
    async fn remove_workspace_missing_id_is_not_found() {
        let _guard = ENV_LOCK.lock().unwrap();
        let (manager, _dir) = manager().await;
        let err = manager.remove_workspace("missing", RemoveWorkspaceOptions::default()).await.unwrap_err();
        assert!(matches!(err, WorkspaceManagerError::WorkspaceNotFound(_)));
        std::env::remove_var("CMUX_TEST_ROOT");
    }

    #[tokio::test]
    async fn rename_workspace_mints_a_new_id_and_moves_the_worktree() {
        let _guard = ENV_LOCK.lock().unwrap();
        let (manager, dir) = manager().await;
        let project_path = init_repo(dir.path()).await;
        let runtime_config = RuntimeConfig::Local { src_base_dir: dir.path().join("src").to_string_lossy().into_owned() };
        let ws = manager.create_workspace(&project_path, "feature-x", "main", Some(runtime_config)).await.unwrap();

        let renamed = manager.rename_workspace(&ws.workspace_id, "feature-y").await.unwrap();
        assert_ne!(renamed.workspace_id, ws.workspace_id);
        assert_eq!(renamed.name, "feature-y");
        assert!(Path::new(&renamed.workspace_path).join(".git").exists());
        assert!(manager.get_workspace(&ws.workspace_id).await.is_none());
        std::env::remove_var("CMUX_TEST_ROOT");
    }

    #[tokio::test]
    async fn fork_workspace_creates_a_sibling_worktree() {
        let _guard = ENV_LOCK.lock().unwrap();
        let (manager, dir) = manager().await;
        let project_path = init_repo(dir.path()).await;
        let runtime_config = RuntimeConfig::Local { src_base_dir: dir.path().join("src").to_string_lossy().into_owned() };
        let ws = manager.create_workspace(&project_path, "feature-x", "main", Some(runtime_config)).await.unwrap();

        let forked = manager.fork_workspace(&ws.workspace_id, "feature-x-fork").await.unwrap();
        assert_ne!(forked.workspace_id, ws.workspace_id);
        assert!(Path::new(&forked.workspace_path).join(".git").exists());
        std::env::remove_var("CMUX_TEST_ROOT");
    }

    #[tokio::test]
    async fn list_branches_reports_main_as_recommended_trunk() {
        let _guard = ENV_LOCK.lock().unwrap();
        let (manager, dir) = manager().await;
        let project_path = init_repo(dir.path()).await;

        let result = manager.list_branches(&project_path).await.unwrap();
        assert!(result.branches.iter().any(|b| b == "main"));
        assert_eq!(result.recommended_trunk.as_deref(), Some("main"));
        std::env::remove_var("CMUX_TEST_ROOT");
    }
}
