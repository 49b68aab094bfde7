//! Orchestration core for agent-driven coding tasks: focus sagas that move a
//! task branch between a git worktree and the main checkout, the workspace and
//! task creation services, and the docking panel layouts.

pub mod config;
pub mod focus;
pub mod git;
pub mod logging;
pub mod panels;
pub mod saga;
pub mod task;
pub mod workspace;
