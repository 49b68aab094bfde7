//! The four focus sagas. Every step talks to [`GitOperations`]; the ref
//! record is written before the git operation it guards.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::models::{DisableOutcome, FocusRef, FocusSession, RefStatus};
use crate::git::GitOperations;
use crate::saga::{Saga, SagaError, SagaTransaction, Step};

/// Input of [`EnableFocusSaga`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnableFocusInput {
    pub main_repo_path: PathBuf,
    pub worktree_path: PathBuf,
    pub branch: String,
    pub original_branch: String,
}

/// Input of the two recovery sagas, read from the repository at restore time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryInput {
    pub main_repo_path: PathBuf,
    pub focus_ref: FocusRef,
    pub current_branch: Option<String>,
}

/// Log the outcome of an in-step cleanup that must not mask the real error.
fn log_cleanup(result: anyhow::Result<()>, what: &str) {
    if let Err(err) = result {
        tracing::warn!(error = %err, "cleanup after failed {} did not succeed", what);
    }
}

/// Pop `stash_ref` if present. A failed pop is not an error: the stash stays
/// in the stash list and a warning is returned for the user.
async fn pop_stash(
    tx: &SagaTransaction,
    git: &Arc<dyn GitOperations>,
    main_repo_path: &Path,
    stash_ref: Option<&str>,
    branch: &str,
) -> Result<Option<String>, SagaError> {
    let Some(stash_ref) = stash_ref else {
        return Ok(None);
    };

    tx.step(Step::mutating("pop_stash"), async {
        match git.stash_pop(main_repo_path, stash_ref).await {
            Ok(()) => anyhow::Ok(None),
            Err(err) => {
                tracing::warn!(
                    main = %main_repo_path.display(),
                    stash = stash_ref,
                    error = %err,
                    "stash pop failed"
                );
                Ok(Some(format!(
                    "Your uncommitted changes on '{}' could not be re-applied automatically ({}). \
                     They are still saved in the stash.",
                    branch, err
                )))
            }
        }
    })
    .await
}

/// Check a task's branch out in the main repository
pub struct EnableFocusSaga {
    git: Arc<dyn GitOperations>,
}

impl EnableFocusSaga {
    pub fn new(git: Arc<dyn GitOperations>) -> Self {
        Self { git }
    }
}

#[async_trait]
impl Saga for EnableFocusSaga {
    type Input = EnableFocusInput;
    type Output = FocusSession;

    fn name(&self) -> &'static str {
        "enable-focus"
    }

    async fn execute(
        &self,
        tx: &SagaTransaction,
        input: EnableFocusInput,
    ) -> Result<FocusSession, SagaError> {
        let git = &self.git;
        let EnableFocusInput {
            main_repo_path: main,
            worktree_path: worktree,
            branch,
            original_branch: original,
        } = input;
        let mut focus_ref = FocusRef::focusing(original.clone(), branch.clone(), worktree.clone());

        tx.step(
            Step::with_rollback("write_ref", {
                let git = Arc::clone(git);
                let main = main.clone();
                move |_: &()| async move { git.delete_ref(&main).await }
            }),
            git.write_ref(&main, &focus_ref),
        )
        .await?;

        let message = format!("taskdock: focus {}", branch);
        let main_stash_ref = tx
            .step(
                Step::with_rollback("stash_main", {
                    let git = Arc::clone(git);
                    let main = main.clone();
                    move |stash_ref: &Option<String>| {
                        let stash_ref = stash_ref.clone();
                        async move {
                            match stash_ref {
                                Some(stash_ref) => git.stash_pop(&main, &stash_ref).await,
                                None => Ok(()),
                            }
                        }
                    }
                }),
                async {
                    let stash_ref = git.stash(&main, &message).await?;
                    if let Some(stash) = &stash_ref {
                        focus_ref.main_stash_ref = Some(stash.clone());
                        if let Err(err) = git.write_ref(&main, &focus_ref).await {
                            log_cleanup(git.stash_pop(&main, stash).await, "stash_main");
                            return Err(err);
                        }
                    }
                    anyhow::Ok(stash_ref)
                },
            )
            .await?;

        let local_worktree_path = tx
            .step(
                Step::with_rollback("detach_worktree", {
                    let git = Arc::clone(git);
                    let worktree = worktree.clone();
                    let branch = branch.clone();
                    move |local: &Option<PathBuf>| {
                        let local = local.clone();
                        async move { git.reattach_worktree(&worktree, &branch, local).await }
                    }
                }),
                async {
                    let local = git.detach_worktree(&main, &worktree).await?;
                    if local.is_some() {
                        focus_ref.local_worktree_path = local.clone();
                        if let Err(err) = git.write_ref(&main, &focus_ref).await {
                            log_cleanup(
                                git.reattach_worktree(&worktree, &branch, local).await,
                                "detach_worktree",
                            );
                            return Err(err);
                        }
                    }
                    anyhow::Ok(local)
                },
            )
            .await?;

        tx.step(
            Step::with_rollback("checkout_branch", {
                let git = Arc::clone(git);
                let main = main.clone();
                let original = original.clone();
                move |_: &()| async move { git.checkout(&main, &original).await }
            }),
            git.checkout(&main, &branch),
        )
        .await?;

        tx.step(
            Step::with_rollback("start_sync", {
                let git = Arc::clone(git);
                let main = main.clone();
                let worktree = worktree.clone();
                move |_: &()| async move { git.stop_sync(&main, &worktree).await.map(|_| ()) }
            }),
            git.start_sync(&main, &worktree, local_worktree_path.clone()),
        )
        .await?;

        focus_ref.status = RefStatus::Idle;
        tx.step(Step::mutating("mark_idle"), git.write_ref(&main, &focus_ref))
            .await?;

        Ok(FocusSession {
            main_repo_path: main,
            worktree_path: worktree,
            branch,
            original_branch: original,
            main_stash_ref,
            local_worktree_path,
        })
    }
}

/// Return the main repository to the branch it had before focusing
pub struct DisableFocusSaga {
    git: Arc<dyn GitOperations>,
}

impl DisableFocusSaga {
    pub fn new(git: Arc<dyn GitOperations>) -> Self {
        Self { git }
    }
}

#[async_trait]
impl Saga for DisableFocusSaga {
    type Input = FocusSession;
    type Output = DisableOutcome;

    fn name(&self) -> &'static str {
        "disable-focus"
    }

    async fn execute(
        &self,
        tx: &SagaTransaction,
        session: FocusSession,
    ) -> Result<DisableOutcome, SagaError> {
        let git = &self.git;
        let main = session.main_repo_path.clone();
        let worktree = session.worktree_path.clone();
        let settled_ref = session.to_ref();
        let mut focus_ref = settled_ref.with_status(RefStatus::Unfocusing);

        tx.step(
            Step::with_rollback("mark_unfocusing", {
                let git = Arc::clone(git);
                let main = main.clone();
                move |_: &()| async move { git.write_ref(&main, &settled_ref).await }
            }),
            git.write_ref(&main, &focus_ref),
        )
        .await?;

        let local_worktree_path = tx
            .step(
                Step::with_rollback("stop_sync", {
                    let git = Arc::clone(git);
                    let main = main.clone();
                    let worktree = worktree.clone();
                    move |parked: &Option<PathBuf>| {
                        let parked = parked.clone();
                        async move { git.start_sync(&main, &worktree, parked).await }
                    }
                }),
                async {
                    let parked = git.stop_sync(&main, &worktree).await?;
                    focus_ref.local_worktree_path = parked.clone();
                    if let Err(err) = git.write_ref(&main, &focus_ref).await {
                        log_cleanup(
                            git.start_sync(&main, &worktree, parked).await,
                            "stop_sync",
                        );
                        return Err(err);
                    }
                    anyhow::Ok(parked)
                },
            )
            .await?;

        tx.step(
            Step::with_rollback("checkout_original", {
                let git = Arc::clone(git);
                let main = main.clone();
                let branch = session.branch.clone();
                move |_: &()| async move { git.checkout(&main, &branch).await }
            }),
            git.checkout(&main, &session.original_branch),
        )
        .await?;

        tx.step(
            Step::with_rollback("reattach_worktree", {
                let git = Arc::clone(git);
                let main = main.clone();
                let worktree = worktree.clone();
                move |_: &()| async move { git.detach_worktree(&main, &worktree).await.map(|_| ()) }
            }),
            git.reattach_worktree(&worktree, &session.branch, local_worktree_path),
        )
        .await?;

        let stash_pop_warning = pop_stash(
            tx,
            git,
            &main,
            session.main_stash_ref.as_deref(),
            &session.original_branch,
        )
        .await?;

        tx.step(Step::mutating("delete_ref"), git.delete_ref(&main))
            .await?;

        Ok(DisableOutcome { stash_pop_warning })
    }
}

/// Drive a half-finished focus operation to the unfocused state using only
/// what the ref record and the repository report.
async fn resolve_unfocused(
    tx: &SagaTransaction,
    git: &Arc<dyn GitOperations>,
    input: RecoveryInput,
) -> Result<DisableOutcome, SagaError> {
    let RecoveryInput {
        main_repo_path: main,
        focus_ref,
        current_branch,
    } = input;
    let on_target = current_branch.as_deref() == Some(focus_ref.target_branch.as_str());

    let worktree = tx
        .step(
            Step::read_only("find_worktree"),
            git.find_worktree_by_branch(&main, &focus_ref.target_branch),
        )
        .await?;

    let mut local_worktree_path = focus_ref.local_worktree_path.clone();
    if on_target {
        if let Some(worktree) = &worktree {
            let dirty = tx
                .step(
                    Step::read_only("inspect_main"),
                    git.has_uncommitted_changes(&main),
                )
                .await?;
            // A clean main means the edits were already parked before the crash
            if dirty {
                local_worktree_path = tx
                    .step(Step::mutating("stop_sync"), git.stop_sync(&main, worktree))
                    .await?;
            }
        }
    }

    if current_branch.as_deref() != Some(focus_ref.original_branch.as_str()) {
        tx.step(
            Step::mutating("checkout_original"),
            git.checkout(&main, &focus_ref.original_branch),
        )
        .await?;
    }

    match &worktree {
        Some(worktree) => {
            tx.step(
                Step::mutating("reattach_worktree"),
                git.reattach_worktree(worktree, &focus_ref.target_branch, local_worktree_path),
            )
            .await?;
        }
        None => {
            tracing::warn!(
                saga = tx.saga(),
                branch = %focus_ref.target_branch,
                "no worktree found for branch, leaving parked files in place"
            );
        }
    }

    let stash_pop_warning = pop_stash(
        tx,
        git,
        &main,
        focus_ref.main_stash_ref.as_deref(),
        &focus_ref.original_branch,
    )
    .await?;

    tx.step(Step::mutating("delete_ref"), git.delete_ref(&main))
        .await?;

    Ok(DisableOutcome { stash_pop_warning })
}

/// Undo an enable that was interrupted (ref status `focusing`)
pub struct RollbackFocusSaga {
    git: Arc<dyn GitOperations>,
}

impl RollbackFocusSaga {
    pub fn new(git: Arc<dyn GitOperations>) -> Self {
        Self { git }
    }
}

#[async_trait]
impl Saga for RollbackFocusSaga {
    type Input = RecoveryInput;
    type Output = DisableOutcome;

    fn name(&self) -> &'static str {
        "rollback-focus"
    }

    async fn execute(
        &self,
        tx: &SagaTransaction,
        input: RecoveryInput,
    ) -> Result<DisableOutcome, SagaError> {
        resolve_unfocused(tx, &self.git, input).await
    }
}

/// Finish a disable that was interrupted (ref status `unfocusing`)
pub struct CompleteUnfocusSaga {
    git: Arc<dyn GitOperations>,
}

impl CompleteUnfocusSaga {
    pub fn new(git: Arc<dyn GitOperations>) -> Self {
        Self { git }
    }
}

#[async_trait]
impl Saga for CompleteUnfocusSaga {
    type Input = RecoveryInput;
    type Output = DisableOutcome;

    fn name(&self) -> &'static str {
        "complete-unfocus"
    }

    async fn execute(
        &self,
        tx: &SagaTransaction,
        input: RecoveryInput,
    ) -> Result<DisableOutcome, SagaError> {
        resolve_unfocused(tx, &self.git, input).await
    }
}
