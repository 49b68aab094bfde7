//! Focus: checking a task's branch out in the main repository.
//!
//! A focus session moves the task branch from its linked worktree into the
//! main checkout. Every transition goes through a saga and is guarded by a
//! ref record so an interrupted transition is resolved on the next
//! [`FocusStore::restore`].

mod models;
mod sagas;
mod store;

pub use models::*;
pub use sagas::{
    CompleteUnfocusSaga, DisableFocusSaga, EnableFocusInput, EnableFocusSaga, RecoveryInput,
    RollbackFocusSaga,
};
pub use store::{CacheInvalidator, FocusError, FocusStore};

#[cfg(any(test, feature = "test-mocks"))]
pub use store::MockCacheInvalidator;
