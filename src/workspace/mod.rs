//! Task workspaces: where a task's code lives and what runs in it.

mod models;
mod operations;
mod store;

pub use models::*;
pub use operations::{LocalWorkspaceOps, WorkspaceOperations, REGISTRY_FILE};
pub use store::{WorkspaceError, WorkspaceStore};

#[cfg(any(test, feature = "test-mocks"))]
pub use operations::MockWorkspaceOperations;
