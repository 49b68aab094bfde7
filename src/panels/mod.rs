//! Docking panel layouts: a split/tab tree per task view and one for the
//! dashboard.

mod store;
mod tab;
mod tree;

pub use store::{LayoutKey, PanelStore};
pub use tab::{Tab, TabData};
pub use tree::{
    Direction, Leaf, LayoutError, NodeId, PanelLayout, PanelNode, PanelSnapshot, TOTAL_SIZE,
};
