use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::run;

/// Directory name for taskdock data within a project
pub const TASKDOCK_DIR: &str = ".taskdock";
const WORKTREES_DIR: &str = "worktrees";

/// One entry of `git worktree list --porcelain`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    pub head: Option<String>,
    /// Short branch name, `None` when detached
    pub branch: Option<String>,
    pub detached: bool,
    pub bare: bool,
}

/// Parse the porcelain output of `git worktree list`.
/// The first entry is always the main checkout.
pub fn parse_worktree_list(output: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut current: Option<WorktreeEntry> = None;

    for line in output.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            current = Some(WorktreeEntry {
                path: PathBuf::from(path),
                head: None,
                branch: None,
                detached: false,
                bare: false,
            });
            continue;
        }

        let Some(entry) = current.as_mut() else {
            continue;
        };

        if let Some(head) = line.strip_prefix("HEAD ") {
            entry.head = Some(head.to_string());
        } else if let Some(branch) = line.strip_prefix("branch ") {
            let branch = branch.strip_prefix("refs/heads/").unwrap_or(branch);
            entry.branch = Some(branch.to_string());
        } else if line == "detached" {
            entry.detached = true;
        } else if line == "bare" {
            entry.bare = true;
        }
    }

    if let Some(entry) = current {
        entries.push(entry);
    }
    entries
}

/// List the main checkout and all linked worktrees
pub async fn list_worktrees(project_path: &Path) -> Result<Vec<WorktreeEntry>> {
    let output = run(project_path, &["worktree", "list", "--porcelain"])
        .await
        .context("Failed to list git worktrees")?;
    Ok(parse_worktree_list(&output))
}

/// Create a git worktree named `name` on a new branch forked from `base_branch`.
/// An existing valid worktree at the same location is reused.
pub async fn create_worktree(
    project_path: &Path,
    name: &str,
    branch: &str,
    base_branch: Option<&str>,
) -> Result<PathBuf> {
    let worktree_path = worktree_path(project_path, name);

    // If worktree already exists and is valid, return it
    if worktree_path.exists() && worktree_path.join(".git").exists() {
        return Ok(worktree_path);
    }

    // Clean up any partial worktree
    if worktree_path.exists() {
        let _ = tokio::fs::remove_dir_all(&worktree_path).await;
        let _ = run(project_path, &["worktree", "prune"]).await;
    }

    if let Some(parent) = worktree_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    ensure_excluded(project_path).await?;

    let base = match base_branch {
        Some(base) => base.to_string(),
        None => detect_main_branch(project_path).await?,
    };
    let target = worktree_path.to_string_lossy().to_string();

    if super::branch_exists(project_path, branch).await {
        run(project_path, &["worktree", "add", &target, branch])
            .await
            .context("Failed to create worktree for existing branch")?;
    } else {
        run(project_path, &["worktree", "add", &target, "-b", branch, &base])
            .await
            .context("Failed to create worktree")?;
    }

    Ok(worktree_path)
}

/// Keep the taskdock directory out of `git status` of the main checkout so
/// stashing or cleaning it never touches linked worktrees.
pub async fn ensure_excluded(project_path: &Path) -> Result<()> {
    let exclude = super::git_common_dir(project_path)
        .await?
        .join("info")
        .join("exclude");
    let pattern = format!("/{}/", TASKDOCK_DIR);

    let existing = tokio::fs::read_to_string(&exclude).await.unwrap_or_default();
    if existing.lines().any(|line| line.trim() == pattern) {
        return Ok(());
    }

    if let Some(parent) = exclude.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut content = existing;
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(&pattern);
    content.push('\n');
    tokio::fs::write(&exclude, content)
        .await
        .context("Failed to update git exclude file")?;
    Ok(())
}

/// Detect the main branch name (main or master)
pub async fn detect_main_branch(project_path: &Path) -> Result<String> {
    for candidate in ["main", "master"] {
        if super::branch_exists(project_path, candidate).await {
            return Ok(candidate.to_string());
        }
    }

    // Fallback: get the current branch
    super::current_branch(project_path)
        .await?
        .context("Could not detect a base branch")
}

/// Remove a git worktree, pruning stale metadata if removal fails
pub async fn remove_worktree(project_path: &Path, worktree_path: &Path) -> Result<()> {
    let target = worktree_path.to_string_lossy().to_string();

    // Force in case of uncommitted changes
    if run(project_path, &["worktree", "remove", "--force", &target])
        .await
        .is_err()
    {
        if worktree_path.exists() {
            tokio::fs::remove_dir_all(worktree_path).await?;
        }
        run(project_path, &["worktree", "prune"]).await?;
    }

    Ok(())
}

/// Get the worktree path for a worktree name
pub fn worktree_path(project_path: &Path, name: &str) -> PathBuf {
    project_path
        .join(TASKDOCK_DIR)
        .join(WORKTREES_DIR)
        .join(name)
}

/// Check if a named worktree exists
pub fn worktree_exists(project_path: &Path, name: &str) -> bool {
    worktree_path(project_path, name).exists()
}

/// Turn a task title or id into a worktree/branch friendly slug
pub fn slugify(input: &str) -> String {
    let slug: String = input
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();

    let mut collapsed = String::with_capacity(slug.len());
    for c in slug.chars() {
        if c == '-' && collapsed.ends_with('-') {
            continue;
        }
        collapsed.push(c);
    }
    collapsed.trim_matches('-').chars().take(40).collect()
}
