use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Where a task's code lives while it runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceMode {
    /// Directly in the registered folder
    #[default]
    Local,
    /// In a linked git worktree on its own branch
    Worktree,
    /// In a remote sandbox; nothing is created locally
    Cloud,
}

impl WorkspaceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceMode::Local => "local",
            WorkspaceMode::Worktree => "worktree",
            WorkspaceMode::Cloud => "cloud",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "local" => Some(WorkspaceMode::Local),
            "worktree" => Some(WorkspaceMode::Worktree),
            "cloud" => Some(WorkspaceMode::Cloud),
            _ => None,
        }
    }
}

/// Per-task execution context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub task_id: String,
    pub folder_id: String,
    /// Main repository path
    pub folder_path: PathBuf,
    pub mode: WorkspaceMode,
    #[serde(default)]
    pub worktree_path: Option<PathBuf>,
    #[serde(default)]
    pub worktree_name: Option<String>,
    #[serde(default)]
    pub branch_name: Option<String>,
    #[serde(default)]
    pub base_branch: Option<String>,
    #[serde(default)]
    pub terminal_session_ids: Vec<String>,
    #[serde(default)]
    pub has_start_scripts: bool,
    pub created_at: DateTime<Utc>,
}

impl Workspace {
    /// Workspace that runs directly in `folder_path`
    pub fn local(
        task_id: impl Into<String>,
        folder_id: impl Into<String>,
        folder_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            folder_id: folder_id.into(),
            folder_path: folder_path.into(),
            mode: WorkspaceMode::Local,
            worktree_path: None,
            worktree_name: None,
            branch_name: None,
            base_branch: None,
            terminal_session_ids: Vec::new(),
            has_start_scripts: false,
            created_at: Utc::now(),
        }
    }

    /// Directory commands for this workspace run in
    pub fn working_dir(&self) -> &Path {
        match (&self.mode, &self.worktree_path) {
            (WorkspaceMode::Worktree, Some(path)) => path,
            _ => &self.folder_path,
        }
    }

    pub fn is_worktree(&self) -> bool {
        self.mode == WorkspaceMode::Worktree
    }
}

/// Request to create a workspace for a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateWorkspaceRequest {
    pub task_id: String,
    pub folder_id: String,
    pub folder_path: PathBuf,
    pub mode: WorkspaceMode,
    /// Branch for worktree mode, derived from the task id when absent
    pub branch_name: Option<String>,
    pub base_branch: Option<String>,
}

impl CreateWorkspaceRequest {
    pub fn new(
        task_id: impl Into<String>,
        folder_id: impl Into<String>,
        folder_path: impl Into<PathBuf>,
        mode: WorkspaceMode,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            folder_id: folder_id.into(),
            folder_path: folder_path.into(),
            mode,
            branch_name: None,
            base_branch: None,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch_name = Some(branch.into());
        self
    }

    pub fn with_base_branch(mut self, base: impl Into<String>) -> Self {
        self.base_branch = Some(base.into());
        self
    }
}

/// A terminal session attached to a workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalSession {
    pub id: String,
    pub command: String,
    pub running: bool,
}

/// Observable workspace store state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceState {
    pub workspaces: HashMap<String, Workspace>,
    /// Set once the initial load from the backing service finished
    pub hydrated: bool,
    /// Task ids with a creation in flight
    pub creating: Vec<String>,
    pub error: Option<String>,
}

impl WorkspaceState {
    pub fn get(&self, task_id: &str) -> Option<&Workspace> {
        self.workspaces.get(task_id)
    }

    pub fn is_creating(&self, task_id: &str) -> bool {
        self.creating.iter().any(|id| id == task_id)
    }
}
