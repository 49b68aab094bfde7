use anyhow::Context;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::models::{
    CloudRun, Folder, NewTask, Task, TaskCreationInput, TaskCreationOutput,
};
use super::operations::{
    AgentSessionOperations, CloudRunOperations, FolderOperations, TaskOperations,
};
use crate::config::WorkspaceConfig;
use crate::saga::{self, Saga, SagaError, SagaTransaction, Step};
use crate::workspace::{CreateWorkspaceRequest, Workspace, WorkspaceMode, WorkspaceStore};

#[derive(Debug, thiserror::Error)]
pub enum TaskCreationError {
    #[error("Task content is required to create a task")]
    MissingContent,

    #[error(transparent)]
    Saga(#[from] SagaError),
}

/// Create or fetch a task and set up everything it needs to run
pub struct TaskCreationSaga {
    tasks: Arc<dyn TaskOperations>,
    folders: Arc<dyn FolderOperations>,
    cloud: Arc<dyn CloudRunOperations>,
    agents: Arc<dyn AgentSessionOperations>,
    workspaces: Arc<WorkspaceStore>,
    default_mode: WorkspaceMode,
}

impl TaskCreationSaga {
    /// `workspaces` must be hydrated (or have a [`WorkspaceStore::hydrate`]
    /// call under way): fetching a task without an explicit mode and repo
    /// waits for hydration before it reads the stored mapping, and waits
    /// forever on a store nobody hydrates.
    pub fn new(
        tasks: Arc<dyn TaskOperations>,
        folders: Arc<dyn FolderOperations>,
        cloud: Arc<dyn CloudRunOperations>,
        agents: Arc<dyn AgentSessionOperations>,
        workspaces: Arc<WorkspaceStore>,
        config: &WorkspaceConfig,
    ) -> Self {
        Self {
            tasks,
            folders,
            cloud,
            agents,
            workspaces,
            default_mode: config.default_mode,
        }
    }

    pub async fn run(&self, input: TaskCreationInput) -> Result<TaskCreationOutput, TaskCreationError> {
        let has_content = input
            .content
            .as_deref()
            .is_some_and(|content| !content.trim().is_empty());
        if input.is_create() && !has_content {
            return Err(TaskCreationError::MissingContent);
        }
        Ok(saga::run(self, input).await?)
    }

    /// Explicit input wins, then the stored workspace of the task, then the
    /// configured default
    async fn resolve(&self, input: &TaskCreationInput) -> (WorkspaceMode, Option<PathBuf>) {
        let fully_explicit = input.workspace_mode.is_some() && input.repo_path.is_some();
        let stored = match &input.task_id {
            Some(task_id) if !fully_explicit => {
                self.workspaces.wait_until_hydrated().await;
                self.workspaces.get(task_id)
            }
            _ => None,
        };

        let mode = input
            .workspace_mode
            .or(stored.as_ref().map(|workspace| workspace.mode))
            .unwrap_or(self.default_mode);
        let repo_path = input
            .repo_path
            .clone()
            .or_else(|| stored.map(|workspace| workspace.folder_path));
        (mode, repo_path)
    }

    async fn register_folder(&self, path: &Path) -> anyhow::Result<Folder> {
        let folders = self.folders.get_folders().await?;
        if let Some(folder) = folders.into_iter().find(|folder| folder.matches(path)) {
            return Ok(folder);
        }
        self.folders.add_folder(path).await
    }

    async fn task_step(&self, tx: &SagaTransaction, input: &TaskCreationInput) -> Result<Task, SagaError> {
        match &input.task_id {
            Some(task_id) => {
                tx.step(Step::read_only("fetch_task"), async {
                    self.tasks
                        .get_task(task_id)
                        .await?
                        .with_context(|| format!("Task {} not found", task_id))
                })
                .await
            }
            None => {
                let new_task = NewTask::from_content(input.content.clone().unwrap_or_default());
                let tasks = Arc::clone(&self.tasks);
                tx.step(
                    Step::with_rollback("task_creation", move |task: &Task| {
                        let task_id = task.id.clone();
                        async move { tasks.delete_task(&task_id).await }
                    }),
                    self.tasks.create_task(&new_task),
                )
                .await
            }
        }
    }

    async fn workspace_step(
        &self,
        tx: &SagaTransaction,
        task: &Task,
        folder: &Folder,
        mode: WorkspaceMode,
        branch: Option<String>,
    ) -> Result<Workspace, SagaError> {
        // A workspace that predates this run is never rolled back
        if let Some(existing) = self.workspaces.get(&task.id) {
            return Ok(existing);
        }

        let mut request =
            CreateWorkspaceRequest::new(task.id.clone(), folder.id.clone(), folder.path.clone(), mode);
        request.branch_name = branch;

        let workspaces = Arc::clone(&self.workspaces);
        tx.step(
            Step::with_rollback("workspace_creation", move |workspace: &Workspace| {
                let task_id = workspace.task_id.clone();
                async move {
                    workspaces
                        .delete(&task_id)
                        .await
                        .map_err(anyhow::Error::from)
                }
            }),
            async {
                self.workspaces
                    .ensure(request)
                    .await
                    .map_err(anyhow::Error::from)
            },
        )
        .await
    }
}

#[async_trait]
impl Saga for TaskCreationSaga {
    type Input = TaskCreationInput;
    type Output = TaskCreationOutput;

    fn name(&self) -> &'static str {
        "task-creation"
    }

    async fn execute(
        &self,
        tx: &SagaTransaction,
        input: TaskCreationInput,
    ) -> Result<TaskCreationOutput, SagaError> {
        let (mode, repo_path) = self.resolve(&input).await;
        let cloud_create = input.is_create() && mode == WorkspaceMode::Cloud;
        tracing::debug!(
            mode = mode.as_str(),
            repo = ?repo_path,
            create = input.is_create(),
            "task creation resolved"
        );

        // Folder lookup depends only on the input, so it overlaps the task step
        let folder_step = async {
            match &repo_path {
                Some(path) => tx
                    .step(Step::read_only("folder_registration"), self.register_folder(path))
                    .await
                    .map(Some),
                None => Ok(None),
            }
        };
        let (task, folder) = tokio::join!(self.task_step(tx, &input), folder_step);
        let task = task?;
        let folder = folder?;

        let workspace = match &folder {
            Some(folder) => Some(
                self.workspace_step(tx, &task, folder, mode, input.branch.clone())
                    .await?,
            ),
            None => None,
        };

        let cloud_run = if mode == WorkspaceMode::Cloud {
            let settings = input.cloud.clone().unwrap_or_default();
            let run = tx
                .step(
                    Step::with_rollback("cloud_run", |run: &CloudRun| {
                        let run_id = run.run_id.clone();
                        async move {
                            tracing::warn!(run = %run_id, "cloud run cannot be undone, leaving it running");
                            anyhow::Ok(())
                        }
                    }),
                    self.cloud.start_run(&task, &settings),
                )
                .await?;
            Some(run)
        } else {
            None
        };

        let agent_session = if cloud_create {
            tracing::debug!(task = %task.id, "remote sandbox owns execution, no agent session");
            None
        } else {
            let agents = Arc::clone(&self.agents);
            let task_id = task.id.clone();
            let working_dir = workspace
                .as_ref()
                .map(|workspace| workspace.working_dir().to_path_buf());
            let session = tx
                .step(
                    Step::with_rollback("agent_session", move |_: &String| async move {
                        agents.disconnect_from_task(&task_id).await
                    }),
                    self.agents.connect_to_task(&task.id, working_dir),
                )
                .await?;
            Some(session)
        };

        tracing::info!(
            task = %task.id,
            mode = mode.as_str(),
            workspace = workspace.is_some(),
            "task ready"
        );
        Ok(TaskCreationOutput {
            task,
            mode,
            folder,
            workspace,
            cloud_run,
            agent_session,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::operations::{
        MockAgentSessionOperations, MockCloudRunOperations, MockFolderOperations,
        MockTaskOperations,
    };
    use crate::workspace::MockWorkspaceOperations;

    struct Mocks {
        tasks: MockTaskOperations,
        folders: MockFolderOperations,
        cloud: MockCloudRunOperations,
        agents: MockAgentSessionOperations,
        workspaces: MockWorkspaceOperations,
    }

    impl Mocks {
        fn new() -> Self {
            Self {
                tasks: MockTaskOperations::new(),
                folders: MockFolderOperations::new(),
                cloud: MockCloudRunOperations::new(),
                agents: MockAgentSessionOperations::new(),
                workspaces: MockWorkspaceOperations::new(),
            }
        }

        fn known_folder(&mut self) {
            self.folders.expect_get_folders().returning(|| {
                Ok(vec![Folder {
                    id: "folder-1".to_string(),
                    path: PathBuf::from("/repo"),
                    name: "repo".to_string(),
                }])
            });
        }

        async fn build(self) -> TaskCreationSaga {
            let store = Arc::new(WorkspaceStore::new(Arc::new(self.workspaces)));
            let _ = store.hydrate().await;
            TaskCreationSaga::new(
                Arc::new(self.tasks),
                Arc::new(self.folders),
                Arc::new(self.cloud),
                Arc::new(self.agents),
                store,
                &WorkspaceConfig::default(),
            )
        }
    }

    fn created_task() -> impl Fn(&NewTask) -> anyhow::Result<Task> + Send + 'static {
        |new_task| Ok(Task::new(new_task.content.clone()))
    }

    #[tokio::test]
    async fn test_create_local_task() {
        let mut mocks = Mocks::new();
        mocks.known_folder();
        mocks.tasks.expect_create_task().times(1).returning(created_task());
        mocks.workspaces.expect_get_all().returning(|| Ok(vec![]));
        mocks.workspaces.expect_create().times(1).returning(|req| {
            Ok(Workspace::local(req.task_id.clone(), req.folder_id.clone(), req.folder_path.clone()))
        });
        mocks
            .agents
            .expect_connect_to_task()
            .withf(|_, dir| dir.as_deref() == Some(Path::new("/repo")))
            .returning(|_, _| Ok("session-1".to_string()));
        mocks.cloud.expect_start_run().never();

        let saga = mocks.build().await;
        let output = saga
            .run(TaskCreationInput::create("Fix the login page").with_repo("/repo"))
            .await
            .unwrap();

        assert_eq!(output.task.title, "Fix the login page");
        assert_eq!(output.mode, WorkspaceMode::Local);
        assert_eq!(output.folder.unwrap().id, "folder-1");
        assert_eq!(output.workspace.unwrap().task_id, output.task.id);
        assert_eq!(output.agent_session.as_deref(), Some("session-1"));
        assert!(output.cloud_run.is_none());
    }

    #[tokio::test]
    async fn test_missing_content_runs_nothing() {
        let mut mocks = Mocks::new();
        mocks.workspaces.expect_get_all().returning(|| Ok(vec![]));
        mocks.tasks.expect_create_task().never();

        let saga = mocks.build().await;
        let err = saga
            .run(TaskCreationInput::create("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskCreationError::MissingContent));
    }

    #[tokio::test]
    async fn test_cloud_create_skips_agent_session() {
        let mut mocks = Mocks::new();
        mocks.tasks.expect_create_task().returning(created_task());
        mocks.workspaces.expect_get_all().returning(|| Ok(vec![]));
        mocks.cloud.expect_start_run().times(1).returning(|task, _| {
            Ok(CloudRun {
                run_id: format!("run-{}", task.id),
                url: None,
            })
        });
        mocks.agents.expect_connect_to_task().never();

        let saga = mocks.build().await;
        let output = saga
            .run(TaskCreationInput::create("Refactor").with_mode(WorkspaceMode::Cloud))
            .await
            .unwrap();

        assert!(output.workspace.is_none());
        assert!(output.agent_session.is_none());
        assert!(output.cloud_run.is_some());
    }

    #[tokio::test]
    async fn test_agent_failure_rolls_back_workspace_and_task() {
        let mut mocks = Mocks::new();
        mocks.known_folder();
        mocks.tasks.expect_create_task().returning(created_task());
        mocks.tasks.expect_delete_task().times(1).returning(|_| Ok(()));
        mocks.workspaces.expect_get_all().returning(|| Ok(vec![]));
        mocks.workspaces.expect_create().returning(|req| {
            Ok(Workspace::local(req.task_id.clone(), req.folder_id.clone(), req.folder_path.clone()))
        });
        mocks.workspaces.expect_delete().times(1).returning(|_| Ok(()));
        mocks
            .agents
            .expect_connect_to_task()
            .returning(|_, _| Err(anyhow::anyhow!("agent unavailable")));
        mocks.agents.expect_disconnect_from_task().never();

        let saga = mocks.build().await;
        let err = saga
            .run(TaskCreationInput::create("Fix").with_repo("/repo"))
            .await
            .unwrap_err();

        match err {
            TaskCreationError::Saga(err) => {
                assert_eq!(err.saga, "task-creation");
                assert_eq!(err.step, "agent_session");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(saga.workspaces.state().workspaces.is_empty());
    }

    #[tokio::test]
    async fn test_folder_failure_deletes_created_task() {
        let mut mocks = Mocks::new();
        mocks
            .folders
            .expect_get_folders()
            .returning(|| Err(anyhow::anyhow!("folders unavailable")));
        mocks.tasks.expect_create_task().returning(created_task());
        mocks.tasks.expect_delete_task().times(1).returning(|_| Ok(()));
        mocks.workspaces.expect_get_all().returning(|| Ok(vec![]));
        mocks.workspaces.expect_create().never();

        let saga = mocks.build().await;
        let err = saga
            .run(TaskCreationInput::create("Fix").with_repo("/repo"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("folders unavailable"));
    }

    #[tokio::test]
    async fn test_fetch_uses_stored_workspace_mapping() {
        let mut mocks = Mocks::new();
        mocks.known_folder();
        mocks.tasks.expect_get_task().returning(|id| {
            let mut task = Task::new("Existing");
            task.id = id.to_string();
            Ok(Some(task))
        });
        mocks.tasks.expect_delete_task().never();
        mocks.workspaces.expect_get_all().returning(|| {
            let mut workspace = Workspace::local("t1", "folder-1", "/repo");
            workspace.mode = WorkspaceMode::Worktree;
            workspace.worktree_path = Some(PathBuf::from("/repo/.taskdock/worktrees/t1"));
            Ok(vec![workspace])
        });
        mocks.workspaces.expect_create().never();
        mocks
            .agents
            .expect_connect_to_task()
            .withf(|_, dir| dir.as_deref() == Some(Path::new("/repo/.taskdock/worktrees/t1")))
            .returning(|_, _| Ok("session-1".to_string()));

        let saga = mocks.build().await;
        let output = saga.run(TaskCreationInput::fetch("t1")).await.unwrap();

        assert_eq!(output.mode, WorkspaceMode::Worktree);
        assert_eq!(output.folder.unwrap().path, PathBuf::from("/repo"));
    }

    #[tokio::test]
    async fn test_explicit_mode_beats_stored_mapping() {
        let mut mocks = Mocks::new();
        mocks.known_folder();
        mocks.tasks.expect_get_task().returning(|id| {
            let mut task = Task::new("Existing");
            task.id = id.to_string();
            Ok(Some(task))
        });
        mocks
            .workspaces
            .expect_get_all()
            .returning(|| Ok(vec![Workspace::local("t1", "folder-1", "/repo")]));
        mocks.cloud.expect_start_run().times(1).returning(|_, _| {
            Ok(CloudRun {
                run_id: "run-1".to_string(),
                url: None,
            })
        });
        // Fetching is not a cloud create, so the agent still attaches
        mocks
            .agents
            .expect_connect_to_task()
            .times(1)
            .returning(|_, _| Ok("session-1".to_string()));

        let saga = mocks.build().await;
        let output = saga
            .run(TaskCreationInput::fetch("t1").with_mode(WorkspaceMode::Cloud))
            .await
            .unwrap();

        assert_eq!(output.mode, WorkspaceMode::Cloud);
        assert!(output.cloud_run.is_some());
    }

    #[tokio::test]
    async fn test_explicit_fetch_does_not_wait_for_hydration() {
        let mut mocks = Mocks::new();
        mocks.known_folder();
        mocks.tasks.expect_get_task().returning(|id| {
            let mut task = Task::new("Existing");
            task.id = id.to_string();
            Ok(Some(task))
        });
        mocks.workspaces.expect_get_all().never();
        mocks.workspaces.expect_create().returning(|req| {
            Ok(Workspace::local(req.task_id.clone(), req.folder_id.clone(), req.folder_path.clone()))
        });
        mocks
            .agents
            .expect_connect_to_task()
            .returning(|_, _| Ok("session-1".to_string()));

        let store = Arc::new(WorkspaceStore::new(Arc::new(mocks.workspaces)));
        let saga = TaskCreationSaga::new(
            Arc::new(mocks.tasks),
            Arc::new(mocks.folders),
            Arc::new(mocks.cloud),
            Arc::new(mocks.agents),
            Arc::clone(&store),
            &WorkspaceConfig::default(),
        );

        let input = TaskCreationInput::fetch("t1")
            .with_repo("/repo")
            .with_mode(WorkspaceMode::Local);
        let output = tokio::time::timeout(std::time::Duration::from_secs(5), saga.run(input))
            .await
            .expect("explicit fetch waited for hydration")
            .unwrap();

        assert!(!store.is_hydrated());
        assert_eq!(output.workspace.unwrap().task_id, "t1");
    }

    #[tokio::test]
    async fn test_unknown_task_fails_fetch() {
        let mut mocks = Mocks::new();
        mocks.tasks.expect_get_task().returning(|_| Ok(None));
        mocks.workspaces.expect_get_all().returning(|| Ok(vec![]));

        let saga = mocks.build().await;
        let err = saga.run(TaskCreationInput::fetch("ghost")).await.unwrap_err();
        assert_eq!(err.to_string(), "Task ghost not found");
    }
}
