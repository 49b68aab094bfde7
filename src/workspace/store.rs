use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{watch, OnceCell};

use super::models::{CreateWorkspaceRequest, TerminalSession, Workspace, WorkspaceState};
use super::operations::WorkspaceOperations;

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("No workspace for task {0}")]
    NotFound(String),

    #[error("Failed to create workspace for task {task_id}: {message}")]
    Creation { task_id: String, message: String },

    #[error(transparent)]
    Operation(#[from] anyhow::Error),
}

type PendingCreation = Arc<OnceCell<Result<Workspace, String>>>;

/// Task to workspace mapping, backed by a [`WorkspaceOperations`] service
pub struct WorkspaceStore {
    ops: Arc<dyn WorkspaceOperations>,
    state: watch::Sender<WorkspaceState>,
    in_flight: Mutex<HashMap<String, PendingCreation>>,
}

impl WorkspaceStore {
    pub fn new(ops: Arc<dyn WorkspaceOperations>) -> Self {
        let (state, _) = watch::channel(WorkspaceState::default());
        Self {
            ops,
            state,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkspaceState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> WorkspaceState {
        self.state.borrow().clone()
    }

    pub fn get(&self, task_id: &str) -> Option<Workspace> {
        self.state.borrow().get(task_id).cloned()
    }

    pub fn is_hydrated(&self) -> bool {
        self.state.borrow().hydrated
    }

    fn update(&self, modify: impl FnOnce(&mut WorkspaceState)) {
        self.state.send_modify(modify);
    }

    /// Load all known workspaces from the backing service. The store counts
    /// as hydrated afterwards even on failure so waiters are released.
    pub async fn hydrate(&self) -> Result<usize, WorkspaceError> {
        let result = self.ops.get_all().await;

        self.update(|state| {
            state.hydrated = true;
            match &result {
                Ok(workspaces) => {
                    for workspace in workspaces {
                        state
                            .workspaces
                            .insert(workspace.task_id.clone(), workspace.clone());
                    }
                }
                Err(err) => state.error = Some(err.to_string()),
            }
        });

        let workspaces = result?;
        tracing::debug!(count = workspaces.len(), "workspace store hydrated");
        Ok(workspaces.len())
    }

    /// Resolve once [`hydrate`](Self::hydrate) has finished. Pending until
    /// someone calls it.
    pub async fn wait_until_hydrated(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait
        let _ = rx.wait_for(|state| state.hydrated).await;
    }

    pub async fn create(&self, request: CreateWorkspaceRequest) -> Result<Workspace, WorkspaceError> {
        let task_id = request.task_id.clone();
        self.update(|state| {
            if !state.is_creating(&task_id) {
                state.creating.push(task_id.clone());
            }
            state.error = None;
        });

        let result = self.ops.create(&request).await;

        self.update(|state| {
            state.creating.retain(|id| id != &task_id);
            match &result {
                Ok(workspace) => {
                    state
                        .workspaces
                        .insert(workspace.task_id.clone(), workspace.clone());
                }
                Err(err) => state.error = Some(err.to_string()),
            }
        });

        result.map_err(|err| {
            tracing::error!(task = %task_id, error = %err, "workspace creation failed");
            WorkspaceError::Creation {
                task_id,
                message: format!("{:#}", err),
            }
        })
    }

    /// Return the task's workspace, creating it if needed. Concurrent calls
    /// for the same task share one creation and receive the same result.
    pub async fn ensure(&self, request: CreateWorkspaceRequest) -> Result<Workspace, WorkspaceError> {
        let task_id = request.task_id.clone();

        let pending = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            // Checked under the lock so a creation finishing concurrently is seen
            if let Some(existing) = self.get(&task_id) {
                return Ok(existing);
            }
            Arc::clone(in_flight.entry(task_id.clone()).or_default())
        };

        let result = pending
            .get_or_init(|| async move {
                self.create(request)
                    .await
                    .map_err(|err| match err {
                        WorkspaceError::Creation { message, .. } => message,
                        other => other.to_string(),
                    })
            })
            .await
            .clone();

        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if in_flight
                .get(&task_id)
                .is_some_and(|cell| Arc::ptr_eq(cell, &pending))
            {
                in_flight.remove(&task_id);
            }
        }

        result.map_err(|message| WorkspaceError::Creation { task_id, message })
    }

    pub async fn delete(&self, task_id: &str) -> Result<(), WorkspaceError> {
        let workspace = self
            .get(task_id)
            .ok_or_else(|| WorkspaceError::NotFound(task_id.to_string()))?;

        self.ops.delete(&workspace).await?;
        self.update(|state| {
            state.workspaces.remove(task_id);
        });
        Ok(())
    }

    /// Check the task's workspace against the backing service, evicting it
    /// when it no longer exists there
    pub async fn verify(&self, task_id: &str) -> Result<bool, WorkspaceError> {
        let Some(workspace) = self.get(task_id) else {
            return Ok(false);
        };

        let exists = self.ops.verify(&workspace).await?;
        if !exists {
            tracing::warn!(task = %task_id, "evicting stale workspace");
            self.update(|state| {
                state.workspaces.remove(task_id);
            });
        }
        Ok(exists)
    }

    /// Verify every workspace, returning the evicted task ids
    pub async fn verify_all(&self) -> Result<Vec<String>, WorkspaceError> {
        let mut task_ids: Vec<_> = self.state.borrow().workspaces.keys().cloned().collect();
        task_ids.sort();

        let mut evicted = Vec::new();
        for task_id in task_ids {
            if !self.verify(&task_id).await? {
                evicted.push(task_id);
            }
        }
        Ok(evicted)
    }

    pub async fn run_start(&self, task_id: &str) -> Result<Vec<String>, WorkspaceError> {
        let workspace = self
            .get(task_id)
            .ok_or_else(|| WorkspaceError::NotFound(task_id.to_string()))?;

        let session_ids = self.ops.run_start(&workspace).await?;
        self.update(|state| {
            if let Some(workspace) = state.workspaces.get_mut(task_id) {
                for id in &session_ids {
                    if !workspace.terminal_session_ids.contains(id) {
                        workspace.terminal_session_ids.push(id.clone());
                    }
                }
            }
        });
        Ok(session_ids)
    }

    pub async fn is_running(&self, task_id: &str) -> Result<bool, WorkspaceError> {
        Ok(self.ops.is_running(task_id).await?)
    }

    pub async fn terminals(&self, task_id: &str) -> Result<Vec<TerminalSession>, WorkspaceError> {
        Ok(self.ops.get_terminals(task_id).await?)
    }
}
