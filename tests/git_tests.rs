use pretty_assertions::assert_eq;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;

use taskdock::config::FocusConfig;
use taskdock::focus::{EnableFocusParams, FocusStore, RefStatus};
use taskdock::git::{self, GitOperations, RealGitOps};

// =============================================================================
// Pure function tests (no git repo needed)
// =============================================================================

#[test]
fn test_worktree_path_nested_project() {
    let project = PathBuf::from("/home/user/projects/rust/app");
    let path = git::worktree_path(&project, "feature-abc");
    assert_eq!(
        path,
        PathBuf::from("/home/user/projects/rust/app/.taskdock/worktrees/feature-abc")
    );
}

#[test]
fn test_worktree_exists_false_for_nonexistent() {
    let temp_dir = TempDir::new().unwrap();
    assert!(!git::worktree_exists(temp_dir.path(), "nonexistent-task"));
}

// =============================================================================
// Integration tests (require git)
// =============================================================================

fn git_cmd(path: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(path)
        .args(args)
        .output()
        .expect("Failed to run git");
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn setup_git_repo() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path();

    git_cmd(path, &["init"]);
    git_cmd(path, &["config", "user.email", "test@test.com"]);
    git_cmd(path, &["config", "user.name", "Test User"]);

    // Create initial commit (needed for worktrees)
    std::fs::write(path.join("README.md"), "# Test").unwrap();
    git_cmd(path, &["add", "."]);
    git_cmd(path, &["commit", "-m", "Initial commit"]);

    // Rename branch to main (in case default is master)
    git_cmd(path, &["branch", "-M", "main"]);

    temp_dir
}

#[tokio::test]
async fn test_is_git_repo() {
    let repo = setup_git_repo();
    assert!(git::is_git_repo(repo.path()).await);

    let plain = TempDir::new().unwrap();
    assert!(!git::is_git_repo(plain.path()).await);
}

#[tokio::test]
async fn test_repo_root() {
    let repo = setup_git_repo();
    let root = git::repo_root(repo.path()).await.unwrap();
    // Canonicalize both paths to handle macOS /var -> /private/var symlink
    assert_eq!(
        root.canonicalize().unwrap(),
        repo.path().canonicalize().unwrap()
    );
}

#[tokio::test]
async fn test_current_branch_and_detection() {
    let repo = setup_git_repo();
    assert_eq!(
        git::current_branch(repo.path()).await.unwrap().as_deref(),
        Some("main")
    );
    assert_eq!(git::detect_main_branch(repo.path()).await.unwrap(), "main");
    assert!(git::branch_exists(repo.path(), "main").await);
    assert!(!git::branch_exists(repo.path(), "nope").await);
}

#[tokio::test]
async fn test_create_and_remove_worktree() {
    let repo = setup_git_repo();

    let worktree = git::create_worktree(repo.path(), "test-task", "task/test", None)
        .await
        .unwrap();
    assert!(worktree.join(".git").exists());
    assert!(git::worktree_exists(repo.path(), "test-task"));

    // The worktree directory never shows up as an untracked change
    assert!(!git::has_uncommitted_changes(repo.path()).await.unwrap());

    let entries = git::list_worktrees(repo.path()).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].branch.as_deref(), Some("task/test"));

    git::remove_worktree(repo.path(), &worktree).await.unwrap();
    assert!(!worktree.exists());
}

#[tokio::test]
async fn test_create_worktree_idempotent() {
    let repo = setup_git_repo();

    let first = git::create_worktree(repo.path(), "same", "task/same", None)
        .await
        .unwrap();
    let second = git::create_worktree(repo.path(), "same", "task/same", None)
        .await
        .unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_create_worktree_on_non_git_directory() {
    let temp_dir = TempDir::new().unwrap();
    let result = git::create_worktree(temp_dir.path(), "should-fail", "task/x", None).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_changed_files_lists_tracked_and_untracked() {
    let repo = setup_git_repo();
    std::fs::write(repo.path().join("README.md"), "# Changed").unwrap();
    std::fs::write(repo.path().join("new.txt"), "new").unwrap();

    let files = git::changed_files(repo.path()).await.unwrap();
    assert_eq!(files, vec![PathBuf::from("README.md"), PathBuf::from("new.txt")]);
}

#[tokio::test]
async fn test_deleted_files_reports_removed_and_renamed_paths() {
    let repo = setup_git_repo();
    std::fs::write(repo.path().join("other.txt"), "other").unwrap();
    git_cmd(repo.path(), &["add", "."]);
    git_cmd(repo.path(), &["commit", "-m", "Add other"]);

    std::fs::remove_file(repo.path().join("other.txt")).unwrap();
    git_cmd(repo.path(), &["mv", "README.md", "docs.md"]);

    assert_eq!(
        git::deleted_files(repo.path()).await.unwrap(),
        vec![PathBuf::from("README.md"), PathBuf::from("other.txt")]
    );
    assert_eq!(
        git::changed_files(repo.path()).await.unwrap(),
        vec![PathBuf::from("docs.md")]
    );
}

// =============================================================================
// RealGitOps
// =============================================================================

#[tokio::test]
async fn test_validate_focus_operation() {
    let repo = setup_git_repo();
    git::create_worktree(repo.path(), "t1", "task/1", None)
        .await
        .unwrap();
    let ops = RealGitOps;

    assert!(ops
        .validate_focus_operation(repo.path(), "main", "task/1")
        .await
        .unwrap()
        .is_none());
    assert!(ops
        .validate_focus_operation(repo.path(), "main", "main")
        .await
        .unwrap()
        .is_some());
    assert!(ops
        .validate_focus_operation(repo.path(), "main", "task/missing")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_find_worktree_by_branch() {
    let repo = setup_git_repo();
    git::create_worktree(repo.path(), "t1", "task/1", None)
        .await
        .unwrap();
    let ops = RealGitOps;

    let found = ops
        .find_worktree_by_branch(repo.path(), "task/1")
        .await
        .unwrap()
        .unwrap();
    assert!(found.ends_with(".taskdock/worktrees/t1"));
    assert!(ops
        .find_worktree_by_branch(repo.path(), "task/none")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_stash_roundtrip() {
    let repo = setup_git_repo();
    let ops = RealGitOps;
    assert_eq!(ops.stash(repo.path(), "nothing").await.unwrap(), None);

    std::fs::write(repo.path().join("README.md"), "# Dirty").unwrap();
    let stash = ops.stash(repo.path(), "dirty").await.unwrap().unwrap();
    assert!(!ops.has_uncommitted_changes(repo.path()).await.unwrap());

    ops.stash_pop(repo.path(), &stash).await.unwrap();
    assert_eq!(
        std::fs::read_to_string(repo.path().join("README.md")).unwrap(),
        "# Dirty"
    );
    assert!(ops.stash_pop(repo.path(), &stash).await.is_err());
}

// =============================================================================
// Focus end to end
// =============================================================================

fn focus_store() -> FocusStore {
    FocusStore::new(Arc::new(RealGitOps), &FocusConfig::default())
}

#[tokio::test]
async fn test_focus_on_clean_repo() {
    let repo = setup_git_repo();
    let worktree = git::create_worktree(repo.path(), "t123", "task/123", None)
        .await
        .unwrap();
    let store = focus_store();

    let outcome = store
        .enable_focus(EnableFocusParams::new(repo.path(), &worktree, "task/123"))
        .await
        .unwrap();

    assert_eq!(outcome.session.original_branch, "main");
    assert_eq!(outcome.session.main_stash_ref, None);
    assert_eq!(git_cmd(repo.path(), &["rev-parse", "--abbrev-ref", "HEAD"]), "task/123");
    assert_eq!(git_cmd(&worktree, &["rev-parse", "--abbrev-ref", "HEAD"]), "HEAD");

    let state = RealGitOps.get_current_state(repo.path()).await.unwrap();
    assert_eq!(state.ref_data.unwrap().status, RefStatus::Idle);

    let disabled = store.disable_focus().await.unwrap();
    assert_eq!(disabled.stash_pop_warning, None);
    assert_eq!(git_cmd(repo.path(), &["rev-parse", "--abbrev-ref", "HEAD"]), "main");
    assert_eq!(git_cmd(&worktree, &["rev-parse", "--abbrev-ref", "HEAD"]), "task/123");
    assert!(RealGitOps
        .get_current_state(repo.path())
        .await
        .unwrap()
        .ref_data
        .is_none());
}

#[tokio::test]
async fn test_focus_with_uncommitted_changes() {
    let repo = setup_git_repo();
    let worktree = git::create_worktree(repo.path(), "t123", "task/123", None)
        .await
        .unwrap();
    std::fs::write(repo.path().join("README.md"), "# Work in progress").unwrap();
    let store = focus_store();

    let outcome = store
        .enable_focus(EnableFocusParams::new(repo.path(), &worktree, "task/123"))
        .await
        .unwrap();
    assert!(outcome.session.main_stash_ref.is_some());
    assert_eq!(
        std::fs::read_to_string(repo.path().join("README.md")).unwrap(),
        "# Test"
    );

    let disabled = store.disable_focus().await.unwrap();
    assert_eq!(disabled.stash_pop_warning, None);
    assert_eq!(
        std::fs::read_to_string(repo.path().join("README.md")).unwrap(),
        "# Work in progress"
    );
    assert_eq!(git_cmd(repo.path(), &["stash", "list"]), "");
}

#[tokio::test]
async fn test_worktree_edits_move_into_main_while_focused() {
    let repo = setup_git_repo();
    let worktree = git::create_worktree(repo.path(), "t1", "task/1", None)
        .await
        .unwrap();
    std::fs::write(worktree.join("notes.txt"), "agent output").unwrap();
    let store = focus_store();

    store
        .enable_focus(EnableFocusParams::new(repo.path(), &worktree, "task/1"))
        .await
        .unwrap();
    assert_eq!(
        std::fs::read_to_string(repo.path().join("notes.txt")).unwrap(),
        "agent output"
    );
    assert!(!worktree.join("notes.txt").exists());

    store.disable_focus().await.unwrap();
    assert!(!repo.path().join("notes.txt").exists());
    assert_eq!(
        std::fs::read_to_string(worktree.join("notes.txt")).unwrap(),
        "agent output"
    );
}

#[tokio::test]
async fn test_restore_after_restart() {
    let repo = setup_git_repo();
    let worktree = git::create_worktree(repo.path(), "t1", "task/1", None)
        .await
        .unwrap();

    let session = focus_store()
        .enable_focus(EnableFocusParams::new(repo.path(), &worktree, "task/1"))
        .await
        .unwrap()
        .session;

    let restarted = focus_store();
    let restored = restarted.restore(repo.path()).await.unwrap();
    assert_eq!(restored.branch, session.branch);
    assert_eq!(restored.original_branch, "main");
    assert!(restarted.is_focused());

    restarted.disable_focus().await.unwrap();
    assert_eq!(git_cmd(repo.path(), &["rev-parse", "--abbrev-ref", "HEAD"]), "main");
}

#[tokio::test]
async fn test_worktree_deletion_follows_the_branch() {
    let repo = setup_git_repo();
    let worktree = git::create_worktree(repo.path(), "t1", "task/1", None)
        .await
        .unwrap();
    std::fs::remove_file(worktree.join("README.md")).unwrap();
    std::fs::write(worktree.join("notes.txt"), "agent output").unwrap();
    let store = focus_store();

    store
        .enable_focus(EnableFocusParams::new(repo.path(), &worktree, "task/1"))
        .await
        .unwrap();
    assert!(!repo.path().join("README.md").exists());
    assert!(repo.path().join("notes.txt").exists());

    store.disable_focus().await.unwrap();
    assert!(repo.path().join("README.md").exists());
    assert!(!worktree.join("README.md").exists());
    assert_eq!(
        std::fs::read_to_string(worktree.join("notes.txt")).unwrap(),
        "agent output"
    );
}

#[tokio::test]
async fn test_worktree_rename_follows_the_branch() {
    let repo = setup_git_repo();
    let worktree = git::create_worktree(repo.path(), "t1", "task/1", None)
        .await
        .unwrap();
    git_cmd(&worktree, &["mv", "README.md", "GUIDE.md"]);
    let store = focus_store();

    store
        .enable_focus(EnableFocusParams::new(repo.path(), &worktree, "task/1"))
        .await
        .unwrap();
    assert!(!repo.path().join("README.md").exists());
    assert_eq!(
        std::fs::read_to_string(repo.path().join("GUIDE.md")).unwrap(),
        "# Test"
    );

    store.disable_focus().await.unwrap();
    assert!(!worktree.join("README.md").exists());
    assert!(worktree.join("GUIDE.md").exists());
    assert!(repo.path().join("README.md").exists());
    assert!(!repo.path().join("GUIDE.md").exists());
}

#[tokio::test]
async fn test_deletion_in_main_while_focused_moves_to_worktree() {
    let repo = setup_git_repo();
    let worktree = git::create_worktree(repo.path(), "t1", "task/1", None)
        .await
        .unwrap();
    let store = focus_store();

    store
        .enable_focus(EnableFocusParams::new(repo.path(), &worktree, "task/1"))
        .await
        .unwrap();
    std::fs::remove_file(repo.path().join("README.md")).unwrap();

    store.disable_focus().await.unwrap();
    assert_eq!(git_cmd(repo.path(), &["rev-parse", "--abbrev-ref", "HEAD"]), "main");
    assert!(repo.path().join("README.md").exists());
    assert!(!worktree.join("README.md").exists());
    assert_eq!(
        git_cmd(&worktree, &["status", "--porcelain"]),
        "D README.md"
    );
}

#[tokio::test]
async fn test_focus_labels_session_with_remote() {
    let repo = setup_git_repo();
    git_cmd(
        repo.path(),
        &["remote", "add", "origin", "git@github.com:acme/widgets.git"],
    );
    let worktree = git::create_worktree(repo.path(), "t1", "task/1", None)
        .await
        .unwrap();
    let store = focus_store();

    store
        .enable_focus(EnableFocusParams::new(repo.path(), &worktree, "task/1"))
        .await
        .unwrap();
    let info = store.focused_repo().unwrap();
    assert_eq!(info.organization, "acme");
    assert_eq!(info.repository, "widgets");

    store.disable_focus().await.unwrap();
    assert!(store.focused_repo().is_none());
}
