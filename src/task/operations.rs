//! Services the task creation saga talks to.

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[cfg(any(test, feature = "test-mocks"))]
use mockall::automock;

use super::models::{CloudRun, CloudSettings, Folder, NewTask, Task};

#[cfg_attr(any(test, feature = "test-mocks"), automock)]
#[async_trait]
pub trait TaskOperations: Send + Sync {
    async fn create_task(&self, task: &NewTask) -> Result<Task>;

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>>;

    async fn delete_task(&self, task_id: &str) -> Result<()>;
}

#[cfg_attr(any(test, feature = "test-mocks"), automock)]
#[async_trait]
pub trait FolderOperations: Send + Sync {
    async fn get_folders(&self) -> Result<Vec<Folder>>;

    async fn add_folder(&self, path: &Path) -> Result<Folder>;
}

#[cfg_attr(any(test, feature = "test-mocks"), automock)]
#[async_trait]
pub trait CloudRunOperations: Send + Sync {
    async fn start_run(&self, task: &Task, settings: &CloudSettings) -> Result<CloudRun>;
}

#[cfg_attr(any(test, feature = "test-mocks"), automock)]
#[async_trait]
pub trait AgentSessionOperations: Send + Sync {
    /// Attach an agent session to the task, returning the session id
    async fn connect_to_task(&self, task_id: &str, working_dir: Option<PathBuf>) -> Result<String>;

    async fn disconnect_from_task(&self, task_id: &str) -> Result<()>;
}
