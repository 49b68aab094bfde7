//! The git/focus service boundary, mockable for tests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[cfg(any(test, feature = "test-mocks"))]
use mockall::automock;

use super::run;
use crate::focus::FocusRef;

/// File holding the focus ref, inside the repository's git common dir
pub const REF_FILE: &str = "taskdock-focus.json";
/// Directory (inside the git common dir) where uncommitted files are parked
pub const PARKING_DIR: &str = "taskdock-parking";
const PARKED_FILES_DIR: &str = "files";
/// Tracked files the parked checkout had deleted, as a JSON list
const DELETED_MANIFEST: &str = "deleted.json";

/// Hosting coordinates of a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoInfo {
    pub organization: String,
    pub repository: String,
}

/// What `get_current_state` reports for a main repository
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FocusRepoState {
    pub ref_data: Option<FocusRef>,
    pub current_branch: Option<String>,
}

/// Git and focus operations used by the focus sagas and stores
#[cfg_attr(any(test, feature = "test-mocks"), automock)]
#[async_trait]
pub trait GitOperations: Send + Sync {
    /// Branch checked out in `repo_path`, `None` when detached
    async fn current_branch(&self, repo_path: &Path) -> Result<Option<String>>;

    async fn detect_repo(&self, repo_path: &Path) -> Result<Option<RepoInfo>>;

    /// Returns a user-facing reason when focusing `target_branch` is not allowed
    async fn validate_focus_operation(
        &self,
        main_repo_path: &Path,
        current_branch: &str,
        target_branch: &str,
    ) -> Result<Option<String>>;

    async fn get_current_state(&self, main_repo_path: &Path) -> Result<FocusRepoState>;

    async fn write_ref(&self, main_repo_path: &Path, focus_ref: &FocusRef) -> Result<()>;

    async fn delete_ref(&self, main_repo_path: &Path) -> Result<()>;

    /// Stash uncommitted changes (including untracked files).
    /// Returns the stash commit, or `None` when there was nothing to stash.
    async fn stash(&self, repo_path: &Path, message: &str) -> Result<Option<String>>;

    async fn stash_pop(&self, repo_path: &Path, stash_ref: &str) -> Result<()>;

    async fn checkout(&self, repo_path: &Path, branch: &str) -> Result<()>;

    async fn has_uncommitted_changes(&self, repo_path: &Path) -> Result<bool>;

    /// Release the worktree's branch by detaching its HEAD. Uncommitted files
    /// are parked first; returns the parking location if anything was parked.
    async fn detach_worktree(
        &self,
        main_repo_path: &Path,
        worktree_path: &Path,
    ) -> Result<Option<PathBuf>>;

    /// Check `branch` out in the worktree again and restore parked files
    async fn reattach_worktree(
        &self,
        worktree_path: &Path,
        branch: &str,
        local_worktree_path: Option<PathBuf>,
    ) -> Result<()>;

    /// Move parked worktree files into the focused main checkout
    async fn start_sync(
        &self,
        main_repo_path: &Path,
        worktree_path: &Path,
        local_worktree_path: Option<PathBuf>,
    ) -> Result<()>;

    /// Stop syncing and park the main checkout's uncommitted edits.
    /// Returns the parking location if anything was parked.
    async fn stop_sync(&self, main_repo_path: &Path, worktree_path: &Path)
        -> Result<Option<PathBuf>>;

    /// Linked worktree that belongs to `branch`
    async fn find_worktree_by_branch(
        &self,
        main_repo_path: &Path,
        branch: &str,
    ) -> Result<Option<PathBuf>>;
}

/// Real implementation using actual git commands
pub struct RealGitOps;

impl RealGitOps {
    async fn ref_path(main_repo_path: &Path) -> Result<PathBuf> {
        Ok(super::git_common_dir(main_repo_path).await?.join(REF_FILE))
    }

    async fn read_ref(main_repo_path: &Path) -> Result<Option<FocusRef>> {
        let path = Self::ref_path(main_repo_path).await?;
        if !path.exists() {
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read focus ref at {:?}", path))?;

        match serde_json::from_str(&content) {
            Ok(focus_ref) => Ok(Some(focus_ref)),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "unreadable focus ref, ignoring");
                Ok(None)
            }
        }
    }

    async fn parking_dir(main_repo_path: &Path, worktree_path: &Path) -> Result<PathBuf> {
        let name = worktree_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "worktree".to_string());
        Ok(super::git_common_dir(main_repo_path)
            .await?
            .join(PARKING_DIR)
            .join(name))
    }

    /// Copy uncommitted files of `repo_path` into `parking` and record the
    /// tracked files it deleted, then reset the checkout to a clean state.
    /// Returns false when there was nothing to park.
    async fn park_changes(repo_path: &Path, parking: &Path) -> Result<bool> {
        let files = super::changed_files(repo_path).await?;
        let deleted = super::deleted_files(repo_path).await?;
        if files.is_empty() && deleted.is_empty() {
            return Ok(false);
        }

        if parking.exists() {
            tokio::fs::remove_dir_all(parking).await?;
        }
        let parked_files = parking.join(PARKED_FILES_DIR);
        tokio::fs::create_dir_all(&parked_files).await?;
        for file in &files {
            let dst = parked_files.join(file);
            if let Some(parent) = dst.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(repo_path.join(file), &dst)
                .await
                .with_context(|| format!("Failed to park {:?}", file))?;
        }
        let manifest = serde_json::to_string_pretty(&deleted)?;
        tokio::fs::write(parking.join(DELETED_MANIFEST), manifest).await?;

        run(repo_path, &["reset", "--hard", "HEAD"]).await?;
        run(repo_path, &["clean", "-fd"]).await?;

        tracing::debug!(
            repo = %repo_path.display(),
            parking = %parking.display(),
            files = files.len(),
            deleted = deleted.len(),
            "parked uncommitted changes"
        );
        Ok(true)
    }

    /// Replay parked changes onto `dst`: copy the parked files over and
    /// remove the recorded deletions.
    async fn unpark(parking: &Path, dst: &Path) -> Result<()> {
        let src = parking.join(PARKED_FILES_DIR);
        if src.exists() {
            let target = dst.to_path_buf();
            tokio::task::spawn_blocking(move || copy_tree(&src, &target))
                .await
                .context("Parking copy task panicked")?
                .context("Failed to restore parked files")?;
        }

        let manifest_path = parking.join(DELETED_MANIFEST);
        if manifest_path.exists() {
            let manifest = tokio::fs::read_to_string(&manifest_path).await?;
            let deleted: Vec<PathBuf> = serde_json::from_str(&manifest)
                .with_context(|| format!("Corrupt deletion manifest at {:?}", manifest_path))?;
            for file in deleted {
                let path = dst.join(&file);
                if path.is_file() {
                    tokio::fs::remove_file(&path)
                        .await
                        .with_context(|| format!("Failed to remove {:?}", file))?;
                }
            }
        }
        Ok(())
    }
}

fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            std::fs::create_dir_all(&target)?;
            copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn same_path(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[async_trait]
impl GitOperations for RealGitOps {
    async fn current_branch(&self, repo_path: &Path) -> Result<Option<String>> {
        super::current_branch(repo_path).await
    }

    async fn detect_repo(&self, repo_path: &Path) -> Result<Option<RepoInfo>> {
        match run(repo_path, &["remote", "get-url", "origin"]).await {
            Ok(url) => Ok(super::parse_remote_url(&url)),
            Err(_) => Ok(None),
        }
    }

    async fn validate_focus_operation(
        &self,
        main_repo_path: &Path,
        current_branch: &str,
        target_branch: &str,
    ) -> Result<Option<String>> {
        if current_branch == target_branch {
            return Ok(Some(format!(
                "Branch '{}' is already checked out in the main repository",
                target_branch
            )));
        }

        if !super::branch_exists(main_repo_path, target_branch).await {
            return Ok(Some(format!("Branch '{}' does not exist", target_branch)));
        }

        let holders = super::list_worktrees(main_repo_path)
            .await?
            .into_iter()
            .skip(1)
            .filter(|entry| entry.branch.as_deref() == Some(target_branch))
            .count();
        if holders > 1 {
            return Ok(Some(format!(
                "Branch '{}' is checked out in more than one worktree",
                target_branch
            )));
        }

        let common_dir = super::git_common_dir(main_repo_path).await?;
        if ["MERGE_HEAD", "rebase-merge", "rebase-apply"]
            .iter()
            .any(|marker| common_dir.join(marker).exists())
        {
            return Ok(Some(
                "The main repository has a merge or rebase in progress".to_string(),
            ));
        }

        Ok(None)
    }

    async fn get_current_state(&self, main_repo_path: &Path) -> Result<FocusRepoState> {
        Ok(FocusRepoState {
            ref_data: Self::read_ref(main_repo_path).await?,
            current_branch: super::current_branch(main_repo_path).await?,
        })
    }

    async fn write_ref(&self, main_repo_path: &Path, focus_ref: &FocusRef) -> Result<()> {
        let path = Self::ref_path(main_repo_path).await?;
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(focus_ref)?;

        // Write-then-rename so a crash never leaves a half-written ref
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to write focus ref at {:?}", path))?;
        Ok(())
    }

    async fn delete_ref(&self, main_repo_path: &Path) -> Result<()> {
        let path = Self::ref_path(main_repo_path).await?;
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }

    async fn stash(&self, repo_path: &Path, message: &str) -> Result<Option<String>> {
        if !super::has_uncommitted_changes(repo_path).await? {
            return Ok(None);
        }

        run(repo_path, &["stash", "push", "--include-untracked", "-m", message]).await?;
        let stash_ref = run(repo_path, &["rev-parse", "refs/stash"]).await?;
        Ok(Some(stash_ref))
    }

    async fn stash_pop(&self, repo_path: &Path, stash_ref: &str) -> Result<()> {
        let stashes = run(repo_path, &["stash", "list", "--format=%H"]).await?;
        let index = stashes
            .lines()
            .position(|line| line.trim() == stash_ref)
            .with_context(|| format!("Stash {} not found", stash_ref))?;

        let entry = format!("stash@{{{}}}", index);
        run(repo_path, &["stash", "pop", &entry]).await?;
        Ok(())
    }

    async fn checkout(&self, repo_path: &Path, branch: &str) -> Result<()> {
        run(repo_path, &["checkout", branch]).await?;
        Ok(())
    }

    async fn has_uncommitted_changes(&self, repo_path: &Path) -> Result<bool> {
        super::has_uncommitted_changes(repo_path).await
    }

    async fn detach_worktree(
        &self,
        main_repo_path: &Path,
        worktree_path: &Path,
    ) -> Result<Option<PathBuf>> {
        let parking = Self::parking_dir(main_repo_path, worktree_path).await?;
        let parked = Self::park_changes(worktree_path, &parking).await?;

        if let Err(err) = run(worktree_path, &["checkout", "--detach"]).await {
            if parked {
                Self::unpark(&parking, worktree_path).await?;
                tokio::fs::remove_dir_all(&parking).await?;
            }
            return Err(err);
        }

        Ok(parked.then_some(parking))
    }

    async fn reattach_worktree(
        &self,
        worktree_path: &Path,
        branch: &str,
        local_worktree_path: Option<PathBuf>,
    ) -> Result<()> {
        run(worktree_path, &["checkout", branch]).await?;

        if let Some(parking) = local_worktree_path.filter(|p| p.exists()) {
            Self::unpark(&parking, worktree_path).await?;
            tokio::fs::remove_dir_all(&parking).await?;
        }
        Ok(())
    }

    async fn start_sync(
        &self,
        main_repo_path: &Path,
        worktree_path: &Path,
        local_worktree_path: Option<PathBuf>,
    ) -> Result<()> {
        // Parked files move into main; from here on main holds the live copy
        if let Some(parking) = local_worktree_path.filter(|p| p.exists()) {
            Self::unpark(&parking, main_repo_path).await?;
            tokio::fs::remove_dir_all(&parking).await?;
        }
        tracing::debug!(
            main = %main_repo_path.display(),
            worktree = %worktree_path.display(),
            "focus sync started"
        );
        Ok(())
    }

    async fn stop_sync(
        &self,
        main_repo_path: &Path,
        worktree_path: &Path,
    ) -> Result<Option<PathBuf>> {
        let parking = Self::parking_dir(main_repo_path, worktree_path).await?;
        if Self::park_changes(main_repo_path, &parking).await? {
            return Ok(Some(parking));
        }

        // Nothing edited while focused: drop any stale copy
        if parking.exists() {
            tokio::fs::remove_dir_all(&parking).await?;
        }
        Ok(None)
    }

    async fn find_worktree_by_branch(
        &self,
        main_repo_path: &Path,
        branch: &str,
    ) -> Result<Option<PathBuf>> {
        let linked: Vec<_> = super::list_worktrees(main_repo_path)
            .await?
            .into_iter()
            .skip(1)
            .collect();

        if let Some(entry) = linked
            .iter()
            .find(|entry| entry.branch.as_deref() == Some(branch))
        {
            return Ok(Some(entry.path.clone()));
        }

        // While focused the worktree is detached; fall back to the ref
        let recorded = Self::read_ref(main_repo_path)
            .await?
            .filter(|focus_ref| focus_ref.target_branch == branch)
            .and_then(|focus_ref| focus_ref.worktree_path);

        Ok(recorded.and_then(|path| {
            linked
                .iter()
                .find(|entry| same_path(&entry.path, &path))
                .map(|entry| entry.path.clone())
        }))
    }
}
