use anyhow::{bail, Result};
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use taskdock::config::{ProjectConfig, WorkspaceConfig};
use taskdock::workspace::{
    CreateWorkspaceRequest, LocalWorkspaceOps, TerminalSession, Workspace, WorkspaceError,
    WorkspaceMode, WorkspaceOperations, WorkspaceStore, REGISTRY_FILE,
};

// =============================================================================
// Slow in-memory service for de-duplication tests
// =============================================================================

struct SlowOps {
    creates: AtomicUsize,
    fail: bool,
}

impl SlowOps {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            creates: AtomicUsize::new(0),
            fail,
        })
    }

    fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkspaceOperations for SlowOps {
    async fn create(&self, request: &CreateWorkspaceRequest) -> Result<Workspace> {
        let attempt = self.creates.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        if self.fail {
            bail!("disk full (attempt {})", attempt);
        }
        Ok(Workspace::local(
            request.task_id.clone(),
            request.folder_id.clone(),
            request.folder_path.clone(),
        ))
    }

    async fn delete(&self, _workspace: &Workspace) -> Result<()> {
        Ok(())
    }

    async fn verify(&self, _workspace: &Workspace) -> Result<bool> {
        Ok(true)
    }

    async fn get_all(&self) -> Result<Vec<Workspace>> {
        Ok(Vec::new())
    }

    async fn run_start(&self, _workspace: &Workspace) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn is_running(&self, _task_id: &str) -> Result<bool> {
        Ok(false)
    }

    async fn get_terminals(&self, _task_id: &str) -> Result<Vec<TerminalSession>> {
        Ok(Vec::new())
    }
}

fn request(task_id: &str) -> CreateWorkspaceRequest {
    CreateWorkspaceRequest::new(task_id, "folder-1", "/repo", WorkspaceMode::Local)
}

#[tokio::test]
async fn test_concurrent_ensure_creates_once() {
    let ops = SlowOps::new(false);
    let store = WorkspaceStore::new(ops.clone());

    let (a, b, c) = tokio::join!(
        store.ensure(request("t1")),
        store.ensure(request("t1")),
        store.ensure(request("t1")),
    );

    let a = a.unwrap();
    assert_eq!(a, b.unwrap());
    assert_eq!(a, c.unwrap());
    assert_eq!(ops.creates(), 1);
    assert_eq!(store.get("t1"), Some(a));
    assert!(!store.state().is_creating("t1"));
}

#[tokio::test]
async fn test_concurrent_ensure_for_different_tasks() {
    let ops = SlowOps::new(false);
    let store = WorkspaceStore::new(ops.clone());

    let (a, b) = tokio::join!(store.ensure(request("t1")), store.ensure(request("t2")));

    assert_eq!(a.unwrap().task_id, "t1");
    assert_eq!(b.unwrap().task_id, "t2");
    assert_eq!(ops.creates(), 2);
}

#[tokio::test]
async fn test_concurrent_ensure_shares_failure() {
    let ops = SlowOps::new(true);
    let store = WorkspaceStore::new(ops.clone());

    let (a, b) = tokio::join!(store.ensure(request("t1")), store.ensure(request("t1")));

    let messages: Vec<String> = [a, b]
        .into_iter()
        .map(|result| match result {
            Err(WorkspaceError::Creation { message, .. }) => message,
            other => panic!("expected creation error, got {:?}", other),
        })
        .collect();
    assert_eq!(messages[0], "disk full (attempt 0)");
    assert_eq!(messages[0], messages[1]);
    assert_eq!(ops.creates(), 1);

    // A later call starts a fresh attempt
    assert!(store.ensure(request("t1")).await.is_err());
    assert_eq!(ops.creates(), 2);
}

#[tokio::test]
async fn test_ensure_returns_existing_workspace() {
    let ops = SlowOps::new(false);
    let store = WorkspaceStore::new(ops.clone());

    let created = store.create(request("t1")).await.unwrap();
    let ensured = store.ensure(request("t1")).await.unwrap();

    assert_eq!(created, ensured);
    assert_eq!(ops.creates(), 1);
}

#[tokio::test]
async fn test_creating_flag_is_visible_while_in_flight() {
    let ops = SlowOps::new(false);
    let store = WorkspaceStore::new(ops);
    let mut rx = store.subscribe();

    let watcher = async {
        rx.wait_for(|state| state.is_creating("t1")).await.unwrap();
        true
    };
    let (seen, created) = tokio::join!(watcher, store.ensure(request("t1")));

    assert!(seen);
    assert!(created.is_ok());
    assert!(!store.state().is_creating("t1"));
}

// =============================================================================
// LocalWorkspaceOps against a real repository
// =============================================================================

fn git_cmd(path: &Path, args: &[&str]) {
    Command::new("git")
        .current_dir(path)
        .args(args)
        .output()
        .expect("Failed to run git");
}

fn setup_git_repo() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path();
    git_cmd(path, &["init"]);
    git_cmd(path, &["config", "user.email", "test@test.com"]);
    git_cmd(path, &["config", "user.name", "Test User"]);
    std::fs::write(path.join("README.md"), "# Test").unwrap();
    git_cmd(path, &["add", "."]);
    git_cmd(path, &["commit", "-m", "Initial commit"]);
    git_cmd(path, &["branch", "-M", "main"]);
    temp_dir
}

fn local_ops(data_dir: &TempDir) -> LocalWorkspaceOps {
    LocalWorkspaceOps::new(data_dir.path(), &WorkspaceConfig::default())
}

#[tokio::test]
async fn test_local_worktree_lifecycle() {
    let repo = setup_git_repo();
    let data = TempDir::new().unwrap();
    let ops = local_ops(&data);

    let request = CreateWorkspaceRequest::new(
        "Fix Login",
        "folder-1",
        repo.path(),
        WorkspaceMode::Worktree,
    );
    let workspace = ops.create(&request).await.unwrap();

    assert_eq!(workspace.worktree_name.as_deref(), Some("fix-login"));
    assert_eq!(workspace.branch_name.as_deref(), Some("task/fix-login"));
    assert_eq!(workspace.base_branch.as_deref(), Some("main"));
    let worktree = workspace.worktree_path.clone().unwrap();
    assert!(worktree.join(".git").exists());
    assert_eq!(workspace.working_dir(), worktree.as_path());
    assert!(data.path().join(REGISTRY_FILE).exists());

    assert!(ops.verify(&workspace).await.unwrap());
    assert_eq!(ops.get_all().await.unwrap(), vec![workspace.clone()]);

    ops.delete(&workspace).await.unwrap();
    assert!(!worktree.exists());
    assert!(ops.get_all().await.unwrap().is_empty());
    assert!(!ops.verify(&workspace).await.unwrap());
}

#[tokio::test]
async fn test_local_worktree_uses_requested_branch() {
    let repo = setup_git_repo();
    let data = TempDir::new().unwrap();
    let ops = local_ops(&data);

    let request = CreateWorkspaceRequest::new("t1", "f", repo.path(), WorkspaceMode::Worktree)
        .with_branch("feature/custom");
    let workspace = ops.create(&request).await.unwrap();
    assert_eq!(workspace.branch_name.as_deref(), Some("feature/custom"));
}

#[tokio::test]
async fn test_local_mode_requires_existing_folder() {
    let data = TempDir::new().unwrap();
    let ops = local_ops(&data);

    let request = CreateWorkspaceRequest::new(
        "t1",
        "f",
        data.path().join("missing"),
        WorkspaceMode::Local,
    );
    assert!(ops.create(&request).await.is_err());
    assert!(ops.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_verify_detects_removed_folder() {
    let folder = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let ops = Arc::new(local_ops(&data));
    let store = WorkspaceStore::new(ops.clone());

    let request = CreateWorkspaceRequest::new("t1", "f", folder.path(), WorkspaceMode::Local);
    store.create(request).await.unwrap();
    assert!(store.verify("t1").await.unwrap());

    drop(folder);
    assert_eq!(store.verify_all().await.unwrap(), vec!["t1".to_string()]);
    assert!(store.get("t1").is_none());
}

#[tokio::test]
async fn test_hydrate_from_registry() {
    let folder = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();

    let ops = local_ops(&data);
    let request = CreateWorkspaceRequest::new("t1", "f", folder.path(), WorkspaceMode::Local);
    ops.create(&request).await.unwrap();

    // A new process reads the registry back
    let store = WorkspaceStore::new(Arc::new(local_ops(&data)));
    assert!(!store.is_hydrated());
    assert_eq!(store.hydrate().await.unwrap(), 1);
    store.wait_until_hydrated().await;
    assert_eq!(store.get("t1").unwrap().folder_path, folder.path());
}

#[tokio::test]
async fn test_start_scripts() {
    let folder = TempDir::new().unwrap();
    ProjectConfig {
        start_scripts: vec!["sleep 5".to_string(), "  ".to_string()],
        ..Default::default()
    }
    .save(folder.path())
    .unwrap();

    let data = TempDir::new().unwrap();
    let store = WorkspaceStore::new(Arc::new(local_ops(&data)));
    let request = CreateWorkspaceRequest::new("t1", "f", folder.path(), WorkspaceMode::Local);
    let workspace = store.create(request).await.unwrap();
    assert!(workspace.has_start_scripts);

    let sessions = store.run_start("t1").await.unwrap();
    assert_eq!(sessions, vec!["t1:start:0".to_string()]);
    assert!(store.is_running("t1").await.unwrap());
    assert_eq!(store.get("t1").unwrap().terminal_session_ids, sessions);

    let terminals = store.terminals("t1").await.unwrap();
    assert_eq!(terminals.len(), 1);
    assert_eq!(terminals[0].command, "sleep 5");
    assert!(terminals[0].running);

    store.delete("t1").await.unwrap();
    assert!(store.terminals("t1").await.unwrap().is_empty());
    assert!(matches!(
        store.run_start("t1").await,
        Err(WorkspaceError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_worktree_base_branch_follows_project_config() {
    let repo = setup_git_repo();
    git_cmd(repo.path(), &["branch", "develop"]);
    ProjectConfig {
        base_branch: Some("develop".to_string()),
        ..Default::default()
    }
    .save(repo.path())
    .unwrap();

    let data = TempDir::new().unwrap();
    let ops = local_ops(&data);
    let request = CreateWorkspaceRequest::new("t1", "f", repo.path(), WorkspaceMode::Worktree);
    let workspace = ops.create(&request).await.unwrap();
    assert_eq!(workspace.base_branch.as_deref(), Some("develop"));
}

#[tokio::test]
async fn test_missing_configured_base_branch_falls_back_to_main() {
    let repo = setup_git_repo();
    let data = TempDir::new().unwrap();
    let config = WorkspaceConfig {
        base_branch: "trunk".to_string(),
        ..Default::default()
    };
    let ops = LocalWorkspaceOps::new(data.path(), &config);

    let request = CreateWorkspaceRequest::new("t1", "f", repo.path(), WorkspaceMode::Worktree);
    let workspace = ops.create(&request).await.unwrap();
    assert_eq!(workspace.base_branch.as_deref(), Some("main"));
}

#[tokio::test]
async fn test_rerunning_start_scripts_replaces_processes() {
    let folder = TempDir::new().unwrap();
    ProjectConfig {
        start_scripts: vec!["sleep 5".to_string()],
        ..Default::default()
    }
    .save(folder.path())
    .unwrap();

    let data = TempDir::new().unwrap();
    let store = WorkspaceStore::new(Arc::new(local_ops(&data)));
    let request = CreateWorkspaceRequest::new("t1", "f", folder.path(), WorkspaceMode::Local);
    store.create(request).await.unwrap();

    let first = store.run_start("t1").await.unwrap();
    let second = store.run_start("t1").await.unwrap();
    assert_eq!(first, second);

    let terminals = store.terminals("t1").await.unwrap();
    assert_eq!(terminals.len(), 1);
    assert!(terminals[0].running);

    store.delete("t1").await.unwrap();
}
