mod operations;
mod worktree;

pub use operations::{FocusRepoState, GitOperations, RealGitOps, RepoInfo};
pub use worktree::*;

#[cfg(any(test, feature = "test-mocks"))]
pub use operations::MockGitOperations;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Run git in `path` and return trimmed stdout, failing with stderr on a
/// non-zero exit.
pub(crate) async fn run(path: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .current_dir(path)
        .args(args)
        .output()
        .await
        .with_context(|| format!("Failed to run git {}", args.join(" ")))?;

    if !output.status.success() {
        anyhow::bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Check if a path is inside a git repository
pub async fn is_git_repo(path: &Path) -> bool {
    Command::new("git")
        .current_dir(path)
        .args(["rev-parse", "--git-dir"])
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Get the root directory of the git repository
pub async fn repo_root(path: &Path) -> Result<PathBuf> {
    let root = run(path, &["rev-parse", "--show-toplevel"])
        .await
        .context("Failed to get git root")?;
    Ok(PathBuf::from(root))
}

/// Get current branch name, `None` when HEAD is detached
pub async fn current_branch(path: &Path) -> Result<Option<String>> {
    let branch = run(path, &["rev-parse", "--abbrev-ref", "HEAD"])
        .await
        .context("Failed to get current branch")?;

    if branch.is_empty() || branch == "HEAD" {
        return Ok(None);
    }
    Ok(Some(branch))
}

/// Directory shared by the main checkout and all of its linked worktrees
pub async fn git_common_dir(path: &Path) -> Result<PathBuf> {
    let dir = run(path, &["rev-parse", "--git-common-dir"])
        .await
        .context("Failed to get git common dir")?;
    let dir = PathBuf::from(dir);

    // Relative when run from the main checkout
    if dir.is_relative() {
        Ok(path.join(dir))
    } else {
        Ok(dir)
    }
}

pub async fn branch_exists(path: &Path, branch: &str) -> bool {
    let reference = format!("refs/heads/{}", branch);
    run(path, &["rev-parse", "--verify", "--quiet", &reference])
        .await
        .is_ok()
}

pub async fn has_uncommitted_changes(path: &Path) -> Result<bool> {
    let status = run(path, &["status", "--porcelain"]).await?;
    Ok(!status.is_empty())
}

/// Files that differ from HEAD (staged or not) plus untracked files,
/// relative to the repository root. Deleted files are skipped, see
/// [`deleted_files`].
pub async fn changed_files(path: &Path) -> Result<Vec<PathBuf>> {
    let tracked = run(path, &["diff", "--no-renames", "--name-only", "HEAD"]).await?;
    let untracked = run(path, &["ls-files", "--others", "--exclude-standard"]).await?;

    let mut files: Vec<PathBuf> = tracked
        .lines()
        .chain(untracked.lines())
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .filter(|file| path.join(file).is_file())
        .collect();
    files.sort();
    files.dedup();
    Ok(files)
}

/// Tracked files removed from the working tree (staged or not), relative to
/// the repository root. A rename shows up as the deletion of its old path.
pub async fn deleted_files(path: &Path) -> Result<Vec<PathBuf>> {
    let deleted = run(
        path,
        &["diff", "--no-renames", "--name-only", "--diff-filter=D", "HEAD"],
    )
    .await?;

    let mut files: Vec<PathBuf> = deleted
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .filter(|file| !path.join(file).exists())
        .collect();
    files.sort();
    Ok(files)
}

/// Parse `organization/repository` out of a GitHub-style remote URL.
///
/// Handles `git@host:org/repo.git`, `https://host/org/repo(.git)` and
/// `ssh://git@host/org/repo.git`.
pub fn parse_remote_url(url: &str) -> Option<RepoInfo> {
    let url = url.trim().trim_end_matches('/');
    let path = if let Some((_, rest)) = url.split_once("://") {
        rest.split_once('/').map(|(_, path)| path)?
    } else if let Some((_, path)) = url.split_once(':') {
        path
    } else {
        return None;
    };

    let path = path.trim_end_matches(".git");
    let mut parts = path.rsplitn(2, '/');
    let repository = parts.next()?.to_string();
    let organization = parts.next()?.rsplit('/').next()?.to_string();

    if organization.is_empty() || repository.is_empty() {
        return None;
    }

    Some(RepoInfo {
        organization,
        repository,
    })
}
