use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::git::RepoInfo;

/// Progress marker stored in the durable ref record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefStatus {
    /// An enable was in flight
    Focusing,
    /// A disable was in flight
    Unfocusing,
    /// No operation in flight; the ref describes a settled focus
    Idle,
}

impl RefStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefStatus::Focusing => "focusing",
            RefStatus::Unfocusing => "unfocusing",
            RefStatus::Idle => "idle",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "focusing" => Some(RefStatus::Focusing),
            "unfocusing" => Some(RefStatus::Unfocusing),
            "idle" => Some(RefStatus::Idle),
            _ => None,
        }
    }
}

/// Durable record written next to the repository so an interrupted focus
/// operation can be detected and resolved on the next restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusRef {
    pub status: RefStatus,
    pub original_branch: String,
    pub target_branch: String,
    #[serde(default)]
    pub main_stash_ref: Option<String>,
    #[serde(default)]
    pub local_worktree_path: Option<PathBuf>,
    /// Worktree the target branch was detached from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<PathBuf>,
}

impl FocusRef {
    pub fn focusing(
        original_branch: impl Into<String>,
        target_branch: impl Into<String>,
        worktree_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            status: RefStatus::Focusing,
            original_branch: original_branch.into(),
            target_branch: target_branch.into(),
            main_stash_ref: None,
            local_worktree_path: None,
            worktree_path: Some(worktree_path.into()),
        }
    }

    /// A ref whose original and target branch match can never have been
    /// produced by a real focus and must be discarded.
    pub fn is_corrupt(&self) -> bool {
        self.original_branch == self.target_branch
    }

    pub fn with_status(&self, status: RefStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

/// The main repository currently has a task's branch checked out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusSession {
    pub main_repo_path: PathBuf,
    pub worktree_path: PathBuf,
    pub branch: String,
    pub original_branch: String,
    pub main_stash_ref: Option<String>,
    pub local_worktree_path: Option<PathBuf>,
}

impl FocusSession {
    /// The ref record describing this session once it has settled
    pub fn to_ref(&self) -> FocusRef {
        FocusRef {
            status: RefStatus::Idle,
            original_branch: self.original_branch.clone(),
            target_branch: self.branch.clone(),
            main_stash_ref: self.main_stash_ref.clone(),
            local_worktree_path: self.local_worktree_path.clone(),
            worktree_path: Some(self.worktree_path.clone()),
        }
    }
}

/// Parameters for `FocusStore::enable_focus`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnableFocusParams {
    pub main_repo_path: PathBuf,
    pub worktree_path: PathBuf,
    pub branch: String,
}

impl EnableFocusParams {
    pub fn new(
        main_repo_path: impl Into<PathBuf>,
        worktree_path: impl Into<PathBuf>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            main_repo_path: main_repo_path.into(),
            worktree_path: worktree_path.into(),
            branch: branch.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnableOutcome {
    pub session: FocusSession,
    /// A previous session was disabled before this one was enabled
    pub was_swap: bool,
    /// Stash warning carried over from the swap's disable
    pub stash_pop_warning: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisableOutcome {
    /// Set when the main repo's stash could not be re-applied cleanly.
    /// The operation still succeeded; the stash is left for the user.
    pub stash_pop_warning: Option<String>,
}

/// Observable focus state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FocusState {
    pub session: Option<FocusSession>,
    /// Hosting coordinates of the focused repository's `origin` remote
    pub repo: Option<RepoInfo>,
    pub is_enabling: bool,
    pub is_disabling: bool,
    pub error: Option<String>,
}

impl FocusState {
    pub fn is_focused(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_loading(&self) -> bool {
        self.is_enabling || self.is_disabling
    }

    /// Branch focused in `repo_path`, if that repo holds the session
    pub fn focused_branch(&self, repo_path: &std::path::Path) -> Option<&str> {
        self.session
            .as_ref()
            .filter(|session| session.main_repo_path == repo_path)
            .map(|session| session.branch.as_str())
    }

    pub fn is_focused_on_worktree(&self, worktree_path: &std::path::Path) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.worktree_path == worktree_path)
    }
}
