//! Task creation: task record, folder, workspace, cloud run and agent
//! session, set up as one saga.

mod creation;
mod models;
mod operations;

pub use creation::{TaskCreationError, TaskCreationSaga};
pub use models::*;
pub use operations::{AgentSessionOperations, CloudRunOperations, FolderOperations, TaskOperations};

#[cfg(any(test, feature = "test-mocks"))]
pub use operations::{
    MockAgentSessionOperations, MockCloudRunOperations, MockFolderOperations, MockTaskOperations,
};
