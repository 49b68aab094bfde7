use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[cfg(any(test, feature = "test-mocks"))]
use mockall::automock;

use super::models::{CreateWorkspaceRequest, TerminalSession, Workspace, WorkspaceMode};
use crate::config::{ProjectConfig, WorkspaceConfig};
use crate::git;

/// Registry file kept in the data directory
pub const REGISTRY_FILE: &str = "workspaces.json";

/// Backing service for the workspace store
#[cfg_attr(any(test, feature = "test-mocks"), automock)]
#[async_trait]
pub trait WorkspaceOperations: Send + Sync {
    async fn create(&self, request: &CreateWorkspaceRequest) -> Result<Workspace>;

    async fn delete(&self, workspace: &Workspace) -> Result<()>;

    /// Whether the workspace still exists in the backing system
    async fn verify(&self, workspace: &Workspace) -> Result<bool>;

    async fn get_all(&self) -> Result<Vec<Workspace>>;

    /// Run the project's start scripts, returning the new terminal session ids
    async fn run_start(&self, workspace: &Workspace) -> Result<Vec<String>>;

    async fn is_running(&self, task_id: &str) -> Result<bool>;

    async fn get_terminals(&self, task_id: &str) -> Result<Vec<TerminalSession>>;
}

struct StartProcess {
    task_id: String,
    command: String,
    child: tokio::process::Child,
}

/// Workspaces on the local machine: git worktrees under the project's
/// `.taskdock/worktrees` and a JSON registry in the data directory
pub struct LocalWorkspaceOps {
    registry_path: PathBuf,
    config: WorkspaceConfig,
    registry_lock: tokio::sync::Mutex<()>,
    processes: Mutex<HashMap<String, StartProcess>>,
}

impl LocalWorkspaceOps {
    pub fn new(data_dir: &Path, config: &WorkspaceConfig) -> Self {
        Self {
            registry_path: data_dir.join(REGISTRY_FILE),
            config: config.clone(),
            registry_lock: tokio::sync::Mutex::new(()),
            processes: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry_path(&self) -> &Path {
        &self.registry_path
    }

    fn processes(&self) -> MutexGuard<'_, HashMap<String, StartProcess>> {
        self.processes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn load(&self) -> Result<Vec<Workspace>> {
        if !self.registry_path.exists() {
            return Ok(Vec::new());
        }
        let content = tokio::fs::read_to_string(&self.registry_path)
            .await
            .with_context(|| format!("Failed to read {:?}", self.registry_path))?;
        serde_json::from_str(&content).context("Failed to parse workspace registry")
    }

    async fn save(&self, workspaces: &[Workspace]) -> Result<()> {
        if let Some(parent) = self.registry_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.registry_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_string_pretty(workspaces)?).await?;
        tokio::fs::rename(&tmp, &self.registry_path)
            .await
            .context("Failed to write workspace registry")?;
        Ok(())
    }

    /// Read-modify-write the registry under the registry lock
    async fn modify_registry(&self, modify: impl FnOnce(&mut Vec<Workspace>)) -> Result<()> {
        let _guard = self.registry_lock.lock().await;
        let mut workspaces = self.load().await?;
        modify(&mut workspaces);
        self.save(&workspaces).await
    }

    /// The request's base branch, else the configured one for the project.
    /// A configured branch the repository lacks falls back to its main branch.
    async fn resolve_base_branch(
        &self,
        request: &CreateWorkspaceRequest,
        project: &ProjectConfig,
    ) -> Result<String> {
        if let Some(base) = &request.base_branch {
            return Ok(base.clone());
        }
        let base = self.config.base_branch_for(project);
        if git::branch_exists(&request.folder_path, &base).await {
            return Ok(base);
        }
        let detected = git::detect_main_branch(&request.folder_path).await?;
        tracing::debug!(
            configured = %base,
            detected = %detected,
            "configured base branch missing, using main branch"
        );
        Ok(detected)
    }

    fn kill_processes(&self, task_id: &str) {
        let mut processes = self.processes();
        processes.retain(|id, process| {
            if process.task_id != task_id {
                return true;
            }
            if let Err(err) = process.child.start_kill() {
                tracing::debug!(session = %id, error = %err, "start script already exited");
            }
            false
        });
    }
}

#[async_trait]
impl WorkspaceOperations for LocalWorkspaceOps {
    async fn create(&self, request: &CreateWorkspaceRequest) -> Result<Workspace> {
        let mut workspace = Workspace::local(
            request.task_id.clone(),
            request.folder_id.clone(),
            request.folder_path.clone(),
        );
        workspace.mode = request.mode;

        if request.mode != WorkspaceMode::Cloud {
            if !request.folder_path.is_dir() {
                anyhow::bail!("Folder {:?} does not exist", request.folder_path);
            }
            let project = ProjectConfig::load(&request.folder_path)?;
            workspace.has_start_scripts = project.has_start_scripts();

            if request.mode == WorkspaceMode::Worktree {
                let name = git::slugify(&request.task_id);
                if name.is_empty() {
                    anyhow::bail!("Task id '{}' cannot name a worktree", request.task_id);
                }
                let branch = request
                    .branch_name
                    .clone()
                    .unwrap_or_else(|| format!("task/{}", name));
                let base = self.resolve_base_branch(request, &project).await?;
                let path =
                    git::create_worktree(&request.folder_path, &name, &branch, Some(&base)).await?;

                workspace.worktree_path = Some(path);
                workspace.worktree_name = Some(name);
                workspace.branch_name = Some(branch);
                workspace.base_branch = Some(base);
            }
        }

        let entry = workspace.clone();
        let saved = self
            .modify_registry(|all| {
                all.retain(|existing| existing.task_id != entry.task_id);
                all.push(entry);
            })
            .await;

        if let Err(err) = saved {
            if let Some(path) = &workspace.worktree_path {
                if let Err(cleanup) = git::remove_worktree(&workspace.folder_path, path).await {
                    tracing::warn!(error = %cleanup, "failed to remove worktree after registry error");
                }
            }
            return Err(err);
        }

        tracing::info!(
            task = %workspace.task_id,
            mode = workspace.mode.as_str(),
            dir = %workspace.working_dir().display(),
            "workspace created"
        );
        Ok(workspace)
    }

    async fn delete(&self, workspace: &Workspace) -> Result<()> {
        self.kill_processes(&workspace.task_id);

        if let Some(path) = workspace.worktree_path.as_ref().filter(|p| p.exists()) {
            git::remove_worktree(&workspace.folder_path, path).await?;
        }

        let task_id = workspace.task_id.clone();
        self.modify_registry(|all| all.retain(|existing| existing.task_id != task_id))
            .await?;

        tracing::info!(task = %workspace.task_id, "workspace deleted");
        Ok(())
    }

    async fn verify(&self, workspace: &Workspace) -> Result<bool> {
        let registered = self
            .load()
            .await?
            .iter()
            .any(|existing| existing.task_id == workspace.task_id);
        if !registered {
            return Ok(false);
        }

        Ok(match workspace.mode {
            WorkspaceMode::Local => workspace.folder_path.is_dir(),
            WorkspaceMode::Worktree => workspace
                .worktree_path
                .as_ref()
                .is_some_and(|path| path.join(".git").exists()),
            WorkspaceMode::Cloud => true,
        })
    }

    async fn get_all(&self) -> Result<Vec<Workspace>> {
        self.load().await
    }

    async fn run_start(&self, workspace: &Workspace) -> Result<Vec<String>> {
        if workspace.mode == WorkspaceMode::Cloud {
            anyhow::bail!("Cloud workspaces are started remotely");
        }
        let project = ProjectConfig::load(&workspace.folder_path)?;
        let scripts = project
            .start_scripts
            .iter()
            .filter(|script| !script.trim().is_empty());

        let mut session_ids = Vec::new();
        for (index, script) in scripts.enumerate() {
            let id = format!("{}:start:{}", workspace.task_id, index);
            let child = tokio::process::Command::new("sh")
                .args(["-c", script.as_str()])
                .current_dir(workspace.working_dir())
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .with_context(|| format!("Failed to run start script '{}'", script))?;

            tracing::info!(task = %workspace.task_id, session = %id, script = %script, "start script launched");
            let previous = self.processes().insert(
                id.clone(),
                StartProcess {
                    task_id: workspace.task_id.clone(),
                    command: script.clone(),
                    child,
                },
            );
            if let Some(mut previous) = previous {
                if let Err(err) = previous.child.start_kill() {
                tracing::debug!(session = %id, error = %err, "start script already exited");
            }
            }
            session_ids.push(id);
        }

        let task_id = workspace.task_id.clone();
        let ids = session_ids.clone();
        self.modify_registry(|all| {
            if let Some(entry) = all.iter_mut().find(|existing| existing.task_id == task_id) {
                for id in ids {
                    if !entry.terminal_session_ids.contains(&id) {
                        entry.terminal_session_ids.push(id);
                    }
                }
            }
        })
        .await?;

        Ok(session_ids)
    }

    async fn is_running(&self, task_id: &str) -> Result<bool> {
        let mut processes = self.processes();
        Ok(processes
            .values_mut()
            .filter(|process| process.task_id == task_id)
            .any(|process| matches!(process.child.try_wait(), Ok(None))))
    }

    async fn get_terminals(&self, task_id: &str) -> Result<Vec<TerminalSession>> {
        let mut processes = self.processes();
        let mut terminals: Vec<_> = processes
            .iter_mut()
            .filter(|(_, process)| process.task_id == task_id)
            .map(|(id, process)| TerminalSession {
                id: id.clone(),
                command: process.command.clone(),
                running: matches!(process.child.try_wait(), Ok(None)),
            })
            .collect();
        terminals.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(terminals)
    }
}
