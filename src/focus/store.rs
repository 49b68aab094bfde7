use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[cfg(any(test, feature = "test-mocks"))]
use mockall::automock;

use super::models::{
    DisableOutcome, EnableFocusParams, EnableOutcome, FocusRef, FocusSession, FocusState,
    RefStatus,
};
use super::sagas::{
    CompleteUnfocusSaga, DisableFocusSaga, EnableFocusInput, EnableFocusSaga, RecoveryInput,
    RollbackFocusSaga,
};
use crate::config::FocusConfig;
use crate::git::{GitOperations, RepoInfo};
use crate::saga::{self, SagaError};

/// Caches that go stale whenever a focus operation rewrites a checkout
#[cfg_attr(any(test, feature = "test-mocks"), automock)]
pub trait CacheInvalidator: Send + Sync {
    fn invalidate_diff_stats(&self, repo_path: &Path);
    fn invalidate_changed_files(&self, repo_path: &Path);
}

#[derive(Debug, thiserror::Error)]
pub enum FocusError {
    #[error("No active focus session")]
    NoActiveSession,

    #[error("Could not determine the current branch of {}", .0.display())]
    BranchUnknown(PathBuf),

    #[error("{0}")]
    Validation(String),

    #[error("Could not release the previous focus session: {0}")]
    Swap(#[source] SagaError),

    #[error(transparent)]
    Saga(#[from] SagaError),

    #[error(transparent)]
    Git(#[from] anyhow::Error),
}

/// Process-wide owner of the single focus session
pub struct FocusStore {
    git: Arc<dyn GitOperations>,
    invalidator: Option<Arc<dyn CacheInvalidator>>,
    settle_delay: Duration,
    state: watch::Sender<FocusState>,
}

impl FocusStore {
    pub fn new(git: Arc<dyn GitOperations>, config: &FocusConfig) -> Self {
        let (state, _) = watch::channel(FocusState::default());
        Self {
            git,
            invalidator: None,
            settle_delay: config.settle_delay(),
            state,
        }
    }

    pub fn with_cache_invalidator(mut self, invalidator: Arc<dyn CacheInvalidator>) -> Self {
        self.invalidator = Some(invalidator);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<FocusState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> FocusState {
        self.state.borrow().clone()
    }

    pub fn session(&self) -> Option<FocusSession> {
        self.state.borrow().session.clone()
    }

    pub fn is_focused(&self) -> bool {
        self.state.borrow().is_focused()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading()
    }

    pub fn focused_branch(&self, repo_path: &Path) -> Option<String> {
        self.state
            .borrow()
            .focused_branch(repo_path)
            .map(str::to_string)
    }

    pub fn is_focused_on_worktree(&self, worktree_path: &Path) -> bool {
        self.state.borrow().is_focused_on_worktree(worktree_path)
    }

    pub fn focused_repo(&self) -> Option<RepoInfo> {
        self.state.borrow().repo.clone()
    }

    fn update(&self, modify: impl FnOnce(&mut FocusState)) {
        self.state.send_modify(modify);
    }

    /// Check `params.branch` out in the main repository. An existing session
    /// on another worktree is disabled first.
    pub async fn enable_focus(
        &self,
        params: EnableFocusParams,
    ) -> Result<EnableOutcome, FocusError> {
        if let Some(session) = self.session() {
            if session.main_repo_path == params.main_repo_path
                && session.worktree_path == params.worktree_path
                && session.branch == params.branch
            {
                return Ok(EnableOutcome {
                    session,
                    was_swap: false,
                    stash_pop_warning: None,
                });
            }
        }

        self.update(|state| {
            state.is_enabling = true;
            state.error = None;
        });

        let result = self.run_enable(params).await;
        let repo = match &result {
            Ok(outcome) => self.detect_repo(&outcome.session.main_repo_path).await,
            Err(_) => None,
        };

        self.update(|state| {
            state.is_enabling = false;
            match &result {
                Ok(outcome) => {
                    state.session = Some(outcome.session.clone());
                    state.repo = repo;
                }
                Err(err) => state.error = Some(err.to_string()),
            }
        });

        match &result {
            Ok(outcome) => {
                tracing::info!(
                    main = %outcome.session.main_repo_path.display(),
                    branch = %outcome.session.branch,
                    swap = outcome.was_swap,
                    "focus enabled"
                );
                self.schedule_invalidation(&outcome.session);
            }
            Err(err) => tracing::error!(error = %err, "enable focus failed"),
        }
        result
    }

    async fn run_enable(&self, params: EnableFocusParams) -> Result<EnableOutcome, FocusError> {
        let mut was_swap = false;
        let mut stash_pop_warning = None;

        if let Some(previous) = self.session() {
            tracing::info!(
                from = %previous.branch,
                to = %params.branch,
                "swapping focus"
            );
            let outcome = saga::run(&DisableFocusSaga::new(Arc::clone(&self.git)), previous).await;
            // Whatever the disable did, the old session can no longer be trusted
            self.update(|state| {
                state.session = None;
                state.repo = None;
            });
            stash_pop_warning = outcome.map_err(FocusError::Swap)?.stash_pop_warning;
            was_swap = true;
        }

        let main = &params.main_repo_path;
        let original_branch = self
            .git
            .current_branch(main)
            .await?
            .ok_or_else(|| FocusError::BranchUnknown(main.clone()))?;

        if let Some(message) = self
            .git
            .validate_focus_operation(main, &original_branch, &params.branch)
            .await?
        {
            return Err(FocusError::Validation(message));
        }

        let session = saga::run(
            &EnableFocusSaga::new(Arc::clone(&self.git)),
            EnableFocusInput {
                main_repo_path: params.main_repo_path,
                worktree_path: params.worktree_path,
                branch: params.branch,
                original_branch,
            },
        )
        .await?;

        Ok(EnableOutcome {
            session,
            was_swap,
            stash_pop_warning,
        })
    }

    /// Return the main repository to its original branch
    pub async fn disable_focus(&self) -> Result<DisableOutcome, FocusError> {
        let Some(session) = self.session() else {
            return Err(FocusError::NoActiveSession);
        };

        self.update(|state| {
            state.is_disabling = true;
            state.error = None;
        });

        let result = saga::run(&DisableFocusSaga::new(Arc::clone(&self.git)), session.clone()).await;

        self.update(|state| {
            state.is_disabling = false;
            match &result {
                Ok(_) => {
                    if state.session.as_ref() == Some(&session) {
                        state.session = None;
                        state.repo = None;
                    }
                }
                Err(err) => state.error = Some(err.to_string()),
            }
        });

        match &result {
            Ok(outcome) => {
                tracing::info!(
                    main = %session.main_repo_path.display(),
                    branch = %session.branch,
                    stash_warning = outcome.stash_pop_warning.is_some(),
                    "focus disabled"
                );
                self.schedule_invalidation(&session);
            }
            Err(err) => tracing::error!(error = %err, "disable focus failed"),
        }
        result.map_err(FocusError::from)
    }

    /// Reconcile the store with the ref record of `main_repo_path`, resolving
    /// any operation a previous process left half done. Never fails; problems
    /// are logged and leave no session for the repository.
    pub async fn restore(&self, main_repo_path: &Path) -> Option<FocusSession> {
        let result = self.resolve_ref(main_repo_path).await;
        let repo = match &result {
            Ok(Some(_)) => self.detect_repo(main_repo_path).await,
            _ => None,
        };

        let owns_session =
            |state: &FocusState| state.focused_branch(main_repo_path).is_some();
        self.update(|state| match &result {
            Ok(Some(session)) => {
                state.session = Some(session.clone());
                state.repo = repo;
            }
            Ok(None) => {
                if owns_session(&*state) {
                    state.session = None;
                    state.repo = None;
                }
            }
            Err(err) => {
                if owns_session(&*state) {
                    state.session = None;
                    state.repo = None;
                }
                state.error = Some(err.to_string());
            }
        });

        match result {
            Ok(session) => session,
            Err(err) => {
                tracing::error!(
                    main = %main_repo_path.display(),
                    error = %err,
                    "focus restore failed"
                );
                None
            }
        }
    }

    async fn resolve_ref(&self, main: &Path) -> Result<Option<FocusSession>, FocusError> {
        let repo_state = self.git.get_current_state(main).await?;
        let Some(focus_ref) = repo_state.ref_data else {
            return Ok(None);
        };

        if focus_ref.is_corrupt() {
            tracing::warn!(
                main = %main.display(),
                branch = %focus_ref.target_branch,
                "focus ref names the same original and target branch, discarding"
            );
            self.git.delete_ref(main).await?;
            return Ok(None);
        }

        let input = RecoveryInput {
            main_repo_path: main.to_path_buf(),
            focus_ref: focus_ref.clone(),
            current_branch: repo_state.current_branch.clone(),
        };

        let outcome = match focus_ref.status {
            RefStatus::Focusing => {
                tracing::warn!(main = %main.display(), "rolling back interrupted focus");
                saga::run(&RollbackFocusSaga::new(Arc::clone(&self.git)), input).await?
            }
            RefStatus::Unfocusing => {
                tracing::warn!(main = %main.display(), "completing interrupted unfocus");
                saga::run(&CompleteUnfocusSaga::new(Arc::clone(&self.git)), input).await?
            }
            RefStatus::Idle => {
                return self
                    .reconcile_idle(main, focus_ref, repo_state.current_branch)
                    .await;
            }
        };

        if let Some(warning) = outcome.stash_pop_warning {
            self.update(|state| state.error = Some(warning));
        }
        Ok(None)
    }

    async fn reconcile_idle(
        &self,
        main: &Path,
        focus_ref: FocusRef,
        current_branch: Option<String>,
    ) -> Result<Option<FocusSession>, FocusError> {
        if current_branch.as_deref() != Some(focus_ref.target_branch.as_str()) {
            tracing::warn!(
                main = %main.display(),
                expected = %focus_ref.target_branch,
                actual = current_branch.as_deref().unwrap_or("(detached)"),
                "main checkout moved off the focused branch, discarding ref"
            );
            self.git.delete_ref(main).await?;
            return Ok(None);
        }

        let Some(worktree_path) = self
            .git
            .find_worktree_by_branch(main, &focus_ref.target_branch)
            .await?
        else {
            tracing::warn!(
                main = %main.display(),
                branch = %focus_ref.target_branch,
                "no worktree for focused branch, discarding ref"
            );
            self.git.delete_ref(main).await?;
            return Ok(None);
        };

        let session = FocusSession {
            main_repo_path: main.to_path_buf(),
            worktree_path,
            branch: focus_ref.target_branch,
            original_branch: focus_ref.original_branch,
            main_stash_ref: focus_ref.main_stash_ref,
            local_worktree_path: focus_ref.local_worktree_path,
        };
        self.git
            .start_sync(
                main,
                &session.worktree_path,
                session.local_worktree_path.clone(),
            )
            .await?;

        tracing::info!(
            main = %main.display(),
            branch = %session.branch,
            "focus session restored"
        );
        Ok(Some(session))
    }

    /// Remote detection only labels the session; failures leave it unset
    async fn detect_repo(&self, main: &Path) -> Option<RepoInfo> {
        self.git.detect_repo(main).await.unwrap_or_else(|err| {
            tracing::debug!(main = %main.display(), error = %err, "could not detect repository remote");
            None
        })
    }

    fn schedule_invalidation(&self, session: &FocusSession) {
        let Some(invalidator) = self.invalidator.clone() else {
            return;
        };
        let delay = self.settle_delay;
        let paths = [
            session.main_repo_path.clone(),
            session.worktree_path.clone(),
        ];

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            for path in &paths {
                invalidator.invalidate_diff_stats(path);
                invalidator.invalidate_changed_files(path);
            }
        });
    }
}
