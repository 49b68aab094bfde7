//! Saga runtime: runs named, reversible steps one at a time and unwinds the
//! completed ones in reverse order when a later step fails.
//!
//! A saga definition implements [`Saga`] and drives its steps through the
//! [`SagaTransaction`] handed to it by [`run`]. Every mutating step that
//! completes is pushed onto the transaction's completed stack together with
//! its (optional) rollback. Read-only steps are never registered.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use thiserror::Error;

/// Owned, type-erased future used for rollback actions.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

type RollbackFn<T> = Box<dyn FnOnce(&T) -> BoxFuture<anyhow::Result<()>> + Send>;

/// A step failed while a saga was moving forward.
///
/// Displays as the underlying error so callers can surface the original
/// message unchanged.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct SagaError {
    pub saga: &'static str,
    pub step: &'static str,
    #[source]
    pub source: anyhow::Error,
}

impl SagaError {
    pub fn new(saga: &'static str, step: &'static str, source: anyhow::Error) -> Self {
        Self { saga, step, source }
    }
}

/// Whether a step has side effects that must be undone on failure.
pub enum StepKind<T> {
    /// No side effect; never registered on the completed stack.
    ReadOnly,
    /// Registered on completion. `None` means there is nothing to undo
    /// (or it cannot be undone), but the step still shows up in the unwind log.
    Mutating(Option<RollbackFn<T>>),
}

/// A named saga step. The work itself is passed to [`SagaTransaction::step`].
pub struct Step<T> {
    name: &'static str,
    kind: StepKind<T>,
}

impl<T: Send + 'static> Step<T> {
    pub fn read_only(name: &'static str) -> Self {
        Self {
            name,
            kind: StepKind::ReadOnly,
        }
    }

    /// A mutating step without a compensating action.
    pub fn mutating(name: &'static str) -> Self {
        Self {
            name,
            kind: StepKind::Mutating(None),
        }
    }

    /// A mutating step undone by `rollback`, which receives the step's result.
    pub fn with_rollback<F, Fut>(name: &'static str, rollback: F) -> Self
    where
        F: FnOnce(&T) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let rollback: RollbackFn<T> =
            Box::new(move |result: &T| -> BoxFuture<anyhow::Result<()>> { Box::pin(rollback(result)) });
        Self {
            name,
            kind: StepKind::Mutating(Some(rollback)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self.kind, StepKind::ReadOnly)
    }
}

struct CompletedStep {
    name: &'static str,
    rollback: Option<BoxFuture<anyhow::Result<()>>>,
}

/// Bookkeeping for one saga invocation.
pub struct SagaTransaction {
    saga: &'static str,
    completed: Mutex<Vec<CompletedStep>>,
}

impl SagaTransaction {
    fn new(saga: &'static str) -> Self {
        Self {
            saga,
            completed: Mutex::new(Vec::new()),
        }
    }

    pub fn saga(&self) -> &'static str {
        self.saga
    }

    fn completed(&self) -> MutexGuard<'_, Vec<CompletedStep>> {
        self.completed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Names of the mutating steps that completed so far, in completion order.
    pub fn completed_steps(&self) -> Vec<&'static str> {
        self.completed().iter().map(|step| step.name).collect()
    }

    /// Run one step. On success a mutating step is registered for rollback and
    /// its result returned; on failure the error is tagged with the step name.
    pub async fn step<T, Fut>(&self, step: Step<T>, execute: Fut) -> Result<T, SagaError>
    where
        T: Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send,
    {
        tracing::debug!(saga = self.saga, step = step.name, "executing step");

        let result = match execute.await {
            Ok(result) => result,
            Err(source) => {
                tracing::warn!(
                    saga = self.saga,
                    step = step.name,
                    error = %source,
                    "step failed"
                );
                return Err(SagaError::new(self.saga, step.name, source));
            }
        };

        if let StepKind::Mutating(rollback) = step.kind {
            let rollback = rollback.map(|rollback| rollback(&result));
            self.completed().push(CompletedStep {
                name: step.name,
                rollback,
            });
        }

        Ok(result)
    }

    /// Pop the completed stack, running rollbacks newest first. Rollback
    /// errors are logged and never stop the unwind.
    async fn unwind(&self) {
        let completed = std::mem::take(&mut *self.completed());

        for step in completed.into_iter().rev() {
            let Some(rollback) = step.rollback else {
                tracing::debug!(saga = self.saga, step = step.name, "no rollback registered");
                continue;
            };

            tracing::info!(saga = self.saga, step = step.name, "rolling back step");
            if let Err(err) = rollback.await {
                tracing::warn!(
                    saga = self.saga,
                    step = step.name,
                    error = %err,
                    "rollback failed, continuing unwind"
                );
            }
        }
    }
}

/// A saga definition: a fixed sequence of steps over a typed input.
#[async_trait]
pub trait Saga: Send + Sync {
    type Input: Send + 'static;
    type Output: Send;

    fn name(&self) -> &'static str;

    async fn execute(
        &self,
        tx: &SagaTransaction,
        input: Self::Input,
    ) -> Result<Self::Output, SagaError>;
}

/// Execute `saga`. If any step fails, the completed steps are rolled back in
/// reverse order and the original failure is returned.
pub async fn run<S: Saga>(saga: &S, input: S::Input) -> Result<S::Output, SagaError> {
    let tx = SagaTransaction::new(saga.name());
    tracing::info!(saga = saga.name(), "saga started");

    match saga.execute(&tx, input).await {
        Ok(output) => {
            tracing::info!(
                saga = saga.name(),
                steps = ?tx.completed_steps(),
                "saga completed"
            );
            Ok(output)
        }
        Err(err) => {
            tracing::error!(
                saga = err.saga,
                step = err.step,
                error = %err.source,
                "saga failed, rolling back"
            );
            tx.unwind().await;
            Err(err)
        }
    }
}
