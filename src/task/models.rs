use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::workspace::{Workspace, WorkspaceMode};

const MAX_TITLE_LEN: usize = 80;

/// A unit of agent work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub content: String,
    pub folder_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title_from_content(&content),
            content,
            folder_id: None,
            created_at: Utc::now(),
        }
    }
}

/// Title shown for a task: the first non-empty line of its content
pub fn title_from_content(content: &str) -> String {
    let line = content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("Untitled task");
    if line.chars().count() <= MAX_TITLE_LEN {
        return line.to_string();
    }
    let mut title: String = line.chars().take(MAX_TITLE_LEN - 3).collect();
    title.push_str("...");
    title
}

/// Data needed to create a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    pub content: String,
}

impl NewTask {
    pub fn from_content(content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            title: title_from_content(&content),
            content,
        }
    }
}

/// A repository folder registered with the application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: String,
    pub path: PathBuf,
    pub name: String,
}

impl Folder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            path,
            name,
        }
    }

    pub fn matches(&self, path: &Path) -> bool {
        if self.path == path {
            return true;
        }
        match (self.path.canonicalize(), path.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

/// Settings for running a task in a remote sandbox
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudSettings {
    pub environment: Option<String>,
    pub model: Option<String>,
}

/// A started remote run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudRun {
    pub run_id: String,
    pub url: Option<String>,
}

/// Input of the task creation saga. With `task_id` set an existing task is
/// fetched, otherwise a new one is created from `content`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskCreationInput {
    pub task_id: Option<String>,
    pub content: Option<String>,
    pub repo_path: Option<PathBuf>,
    pub workspace_mode: Option<WorkspaceMode>,
    pub branch: Option<String>,
    pub cloud: Option<CloudSettings>,
}

impl TaskCreationInput {
    pub fn create(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn fetch(task_id: impl Into<String>) -> Self {
        Self {
            task_id: Some(task_id.into()),
            ..Default::default()
        }
    }

    pub fn with_repo(mut self, repo_path: impl Into<PathBuf>) -> Self {
        self.repo_path = Some(repo_path.into());
        self
    }

    pub fn with_mode(mut self, mode: WorkspaceMode) -> Self {
        self.workspace_mode = Some(mode);
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_cloud(mut self, cloud: CloudSettings) -> Self {
        self.cloud = Some(cloud);
        self
    }

    pub fn is_create(&self) -> bool {
        self.task_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCreationOutput {
    pub task: Task,
    pub mode: WorkspaceMode,
    /// Set when a repository folder was resolved
    pub folder: Option<Folder>,
    pub workspace: Option<Workspace>,
    pub cloud_run: Option<CloudRun>,
    pub agent_session: Option<String>,
}
