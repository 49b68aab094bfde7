use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use super::tab::{Tab, TabData};

/// Sizes of a group's children always add up to this
pub const TOTAL_SIZE: f64 = 100.0;
const SIZE_EPSILON: f64 = 0.01;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum LayoutError {
    #[error("No panel layout for {0}")]
    UnknownLayout(String),

    #[error("Panel {0} not found")]
    PanelNotFound(NodeId),

    #[error("Tab {0} not found")]
    TabNotFound(String),

    #[error("Panel {0} is not a leaf")]
    NotALeaf(NodeId),

    #[error("Panel {0} is not a group")]
    NotAGroup(NodeId),

    #[error("Expected {expected} sizes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Panel sizes must be positive and finite")]
    InvalidSizes,

    #[error("Corrupt panel layout: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Horizontal,
    Vertical,
}

/// A tabbed panel
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    pub tabs: Vec<Tab>,
    pub active_tab_id: Option<String>,
    pub show_tabs: bool,
    pub droppable: bool,
}

impl Leaf {
    fn new() -> Self {
        Self {
            tabs: Vec::new(),
            active_tab_id: None,
            show_tabs: true,
            droppable: true,
        }
    }

    pub fn tab(&self, tab_id: &str) -> Option<&Tab> {
        self.tabs.iter().find(|tab| tab.id == tab_id)
    }

    pub fn active_tab(&self) -> Option<&Tab> {
        self.active_tab_id.as_deref().and_then(|id| self.tab(id))
    }

    fn position(&self, tab_id: &str) -> Option<usize> {
        self.tabs.iter().position(|tab| tab.id == tab_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PanelNode {
    Group {
        direction: Direction,
        children: Vec<NodeId>,
        sizes: Vec<f64>,
    },
    Leaf(Leaf),
}

#[derive(Debug, Clone)]
struct Slot {
    parent: Option<NodeId>,
    node: PanelNode,
}

/// Recursive, id-free form of a layout used for persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PanelSnapshot {
    Group {
        direction: Direction,
        children: Vec<PanelSnapshot>,
        sizes: Vec<f64>,
    },
    Leaf {
        tabs: Vec<Tab>,
        #[serde(rename = "activeTabId", default)]
        active_tab_id: Option<String>,
        #[serde(rename = "showTabs", default = "default_true")]
        show_tabs: bool,
        #[serde(default = "default_true")]
        droppable: bool,
    },
}

fn default_true() -> bool {
    true
}

/// Scale `sizes` to add up to [`TOTAL_SIZE`]. The last entry absorbs
/// rounding so the sum is exact.
fn normalize(sizes: &mut [f64]) {
    if sizes.is_empty() {
        return;
    }
    let total: f64 = sizes.iter().sum();
    let count = sizes.len() as f64;
    for size in sizes.iter_mut() {
        *size = if total > 0.0 {
            *size / total * TOTAL_SIZE
        } else {
            TOTAL_SIZE / count
        };
    }
    let rest: f64 = sizes[..sizes.len() - 1].iter().sum();
    if let Some(last) = sizes.last_mut() {
        *last = TOTAL_SIZE - rest;
    }
}

/// Split/tab tree stored as an arena of nodes plus a tab index
#[derive(Debug, Clone)]
pub struct PanelLayout {
    root: NodeId,
    next_id: u64,
    nodes: HashMap<NodeId, Slot>,
    /// Tab id to the leaf holding it
    tab_index: HashMap<String, NodeId>,
    /// Leaf that receives newly opened tabs
    active_leaf: NodeId,
    preview_diff: Option<String>,
}

impl PanelLayout {
    /// A single leaf holding `tabs`; the first one is active
    pub fn new(tabs: Vec<Tab>) -> Self {
        let root = NodeId(0);
        let mut layout = Self {
            root,
            next_id: 1,
            nodes: HashMap::new(),
            tab_index: HashMap::new(),
            active_leaf: root,
            preview_diff: None,
        };

        let mut leaf = Leaf::new();
        for tab in tabs {
            if layout.tab_index.insert(tab.id.clone(), root).is_none() {
                leaf.tabs.push(tab);
            }
        }
        leaf.active_tab_id = leaf.tabs.first().map(|tab| tab.id.clone());
        layout.nodes.insert(
            root,
            Slot {
                parent: None,
                node: PanelNode::Leaf(leaf),
            },
        );
        layout
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn active_leaf(&self) -> NodeId {
        self.active_leaf
    }

    pub fn preview_diff(&self) -> Option<&str> {
        self.preview_diff.as_deref()
    }

    pub fn node(&self, id: NodeId) -> Option<&PanelNode> {
        self.nodes.get(&id).map(|slot| &slot.node)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|slot| slot.parent)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn tab_count(&self) -> usize {
        self.tab_index.len()
    }

    pub fn leaf(&self, id: NodeId) -> Result<&Leaf, LayoutError> {
        match self.node(id) {
            Some(PanelNode::Leaf(leaf)) => Ok(leaf),
            Some(PanelNode::Group { .. }) => Err(LayoutError::NotALeaf(id)),
            None => Err(LayoutError::PanelNotFound(id)),
        }
    }

    fn leaf_mut(&mut self, id: NodeId) -> Result<&mut Leaf, LayoutError> {
        match self.nodes.get_mut(&id).map(|slot| &mut slot.node) {
            Some(PanelNode::Leaf(leaf)) => Ok(leaf),
            Some(PanelNode::Group { .. }) => Err(LayoutError::NotALeaf(id)),
            None => Err(LayoutError::PanelNotFound(id)),
        }
    }

    fn group_mut(&mut self, id: NodeId) -> Result<(&mut Vec<NodeId>, &mut Vec<f64>), LayoutError> {
        match self.nodes.get_mut(&id).map(|slot| &mut slot.node) {
            Some(PanelNode::Group {
                children, sizes, ..
            }) => Ok((children, sizes)),
            Some(PanelNode::Leaf(_)) => Err(LayoutError::NotAGroup(id)),
            None => Err(LayoutError::PanelNotFound(id)),
        }
    }

    fn group_direction(&self, id: NodeId) -> Option<Direction> {
        match self.node(id) {
            Some(PanelNode::Group { direction, .. }) => Some(*direction),
            _ => None,
        }
    }

    pub fn leaf_of_tab(&self, tab_id: &str) -> Option<NodeId> {
        self.tab_index.get(tab_id).copied()
    }

    pub fn tab(&self, tab_id: &str) -> Option<&Tab> {
        let leaf = self.leaf_of_tab(tab_id)?;
        self.leaf(leaf).ok()?.tab(tab_id)
    }

    /// Leaf ids in depth-first order
    pub fn leaves(&self) -> Vec<NodeId> {
        let mut leaves = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            match self.node(id) {
                Some(PanelNode::Group { children, .. }) => stack.extend(children.iter().rev()),
                Some(PanelNode::Leaf(_)) => leaves.push(id),
                None => {}
            }
        }
        leaves
    }

    fn first_leaf(&self) -> NodeId {
        self.leaves().first().copied().unwrap_or(self.root)
    }

    fn alloc(&mut self, parent: Option<NodeId>, node: PanelNode) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, Slot { parent, node });
        id
    }

    /// Open `tab` in `target` (or the active leaf). A tab with the same id
    /// is activated instead of duplicated.
    pub fn open_tab(&mut self, tab: Tab, target: Option<NodeId>) -> Result<String, LayoutError> {
        if self.tab_index.contains_key(&tab.id) {
            self.set_active_tab(&tab.id)?;
            return Ok(tab.id);
        }

        let leaf_id = target.unwrap_or(self.active_leaf);
        let id = tab.id.clone();
        let leaf = self.leaf_mut(leaf_id)?;
        let at = leaf
            .active_tab_id
            .as_deref()
            .and_then(|active| leaf.position(active))
            .map_or(leaf.tabs.len(), |index| index + 1);
        leaf.tabs.insert(at, tab);
        leaf.active_tab_id = Some(id.clone());

        self.tab_index.insert(id.clone(), leaf_id);
        self.active_leaf = leaf_id;
        Ok(id)
    }

    pub fn open_file(&mut self, path: &Path) -> Result<String, LayoutError> {
        self.open_tab(
            Tab::new(TabData::File {
                path: path.to_path_buf(),
            }),
            None,
        )
    }

    pub fn open_artifact(&mut self, path: &Path) -> Result<String, LayoutError> {
        self.open_tab(
            Tab::new(TabData::Artifact {
                path: path.to_path_buf(),
            }),
            None,
        )
    }

    /// Open the diff of `path`. A preview replaces the previous preview tab
    /// in place; opening a previewed diff permanently promotes it.
    pub fn open_diff(&mut self, path: &Path, preview: bool) -> Result<String, LayoutError> {
        let tab = Tab::new(TabData::Diff {
            path: path.to_path_buf(),
        });
        let id = tab.id.clone();

        if self.tab_index.contains_key(&id) {
            if !preview && self.preview_diff.as_deref() == Some(id.as_str()) {
                self.promote_preview()?;
            }
            self.set_active_tab(&id)?;
            return Ok(id);
        }

        if !preview {
            return self.open_tab(tab, None);
        }

        match self.preview_diff.clone() {
            Some(old_id) => {
                let leaf_id = self
                    .leaf_of_tab(&old_id)
                    .ok_or_else(|| LayoutError::TabNotFound(old_id.clone()))?;
                let leaf = self.leaf_mut(leaf_id)?;
                let index = leaf
                    .position(&old_id)
                    .ok_or_else(|| LayoutError::TabNotFound(old_id.clone()))?;
                leaf.tabs[index] = tab.preview();
                leaf.active_tab_id = Some(id.clone());

                self.tab_index.remove(&old_id);
                self.tab_index.insert(id.clone(), leaf_id);
                self.active_leaf = leaf_id;
            }
            None => {
                self.open_tab(tab.preview(), None)?;
            }
        }
        self.preview_diff = Some(id.clone());
        Ok(id)
    }

    fn promote_preview(&mut self) -> Result<(), LayoutError> {
        let Some(id) = self.preview_diff.take() else {
            return Ok(());
        };
        let leaf_id = self
            .leaf_of_tab(&id)
            .ok_or_else(|| LayoutError::TabNotFound(id.clone()))?;
        if let Some(tab) = self.leaf_mut(leaf_id)?.tabs.iter_mut().find(|tab| tab.id == id) {
            tab.preview = false;
        }
        Ok(())
    }

    pub fn set_active_tab(&mut self, tab_id: &str) -> Result<(), LayoutError> {
        let leaf_id = self
            .leaf_of_tab(tab_id)
            .ok_or_else(|| LayoutError::TabNotFound(tab_id.to_string()))?;
        self.leaf_mut(leaf_id)?.active_tab_id = Some(tab_id.to_string());
        self.active_leaf = leaf_id;
        Ok(())
    }

    /// Remove a tab from its leaf without collapsing the leaf
    fn detach_tab(&mut self, tab_id: &str) -> Result<(Tab, NodeId), LayoutError> {
        let leaf_id = self
            .leaf_of_tab(tab_id)
            .ok_or_else(|| LayoutError::TabNotFound(tab_id.to_string()))?;
        let leaf = self.leaf_mut(leaf_id)?;
        let index = leaf
            .position(tab_id)
            .ok_or_else(|| LayoutError::Corrupt(format!("tab {} missing from {}", tab_id, leaf_id)))?;
        let tab = leaf.tabs.remove(index);

        if leaf.active_tab_id.as_deref() == Some(tab_id) {
            // Prefer the right neighbour, like closing an editor tab
            let next = leaf
                .tabs
                .get(index)
                .or_else(|| index.checked_sub(1).and_then(|i| leaf.tabs.get(i)))
                .map(|tab| tab.id.clone());
            leaf.active_tab_id = next;
        }

        self.tab_index.remove(tab_id);
        if self.preview_diff.as_deref() == Some(tab_id) {
            self.preview_diff = None;
        }
        Ok((tab, leaf_id))
    }

    fn collapse_if_empty(&mut self, leaf_id: NodeId) -> Result<(), LayoutError> {
        if leaf_id != self.root && self.leaf(leaf_id)?.tabs.is_empty() {
            self.remove_node(leaf_id)?;
        }
        Ok(())
    }

    pub fn close_tab(&mut self, tab_id: &str) -> Result<Tab, LayoutError> {
        let (tab, leaf_id) = self.detach_tab(tab_id)?;
        self.collapse_if_empty(leaf_id)?;
        Ok(tab)
    }

    /// Move a tab into another leaf, collapsing the source if it empties
    pub fn move_tab(&mut self, tab_id: &str, target: NodeId) -> Result<(), LayoutError> {
        self.leaf(target)?;
        if self.leaf_of_tab(tab_id) == Some(target) {
            return self.set_active_tab(tab_id);
        }
        let was_preview = self.preview_diff.as_deref() == Some(tab_id);
        let (tab, source) = self.detach_tab(tab_id)?;
        self.open_tab(tab, Some(target))?;
        if was_preview {
            self.preview_diff = Some(tab_id.to_string());
        }
        self.collapse_if_empty(source)
    }

    /// Remove a non-root node from its parent group. A group left with a
    /// single child is replaced by that child.
    fn remove_node(&mut self, id: NodeId) -> Result<(), LayoutError> {
        let slot = self
            .nodes
            .remove(&id)
            .ok_or(LayoutError::PanelNotFound(id))?;
        let Some(parent_id) = slot.parent else {
            return Err(LayoutError::Corrupt("the root panel cannot be removed".to_string()));
        };

        let (children, sizes) = self.group_mut(parent_id)?;
        let index = children
            .iter()
            .position(|child| *child == id)
            .ok_or_else(|| LayoutError::Corrupt(format!("{} is not a child of {}", id, parent_id)))?;
        children.remove(index);
        sizes.remove(index);
        normalize(sizes);
        let only_child = match children.as_slice() {
            [only] => Some(*only),
            _ => None,
        };

        if let Some(only) = only_child {
            self.collapse_group(parent_id, only)?;
        }

        if !self.nodes.contains_key(&self.active_leaf) {
            self.active_leaf = self.first_leaf();
        }
        Ok(())
    }

    fn collapse_group(&mut self, group_id: NodeId, child: NodeId) -> Result<(), LayoutError> {
        let group = self
            .nodes
            .remove(&group_id)
            .ok_or(LayoutError::PanelNotFound(group_id))?;

        match group.parent {
            None => self.root = child,
            Some(grandparent) => {
                let (children, _) = self.group_mut(grandparent)?;
                if let Some(slot) = children.iter_mut().find(|slot| **slot == group_id) {
                    *slot = child;
                }
            }
        }
        if let Some(slot) = self.nodes.get_mut(&child) {
            slot.parent = group.parent;
        }
        Ok(())
    }

    /// Split `leaf_id` in `direction`, returning the new empty leaf (or the
    /// leaf `move_tab` was moved into). Splitting along the parent's own
    /// direction adds a sibling instead of nesting a group.
    pub fn split_panel(
        &mut self,
        leaf_id: NodeId,
        direction: Direction,
        move_tab: Option<&str>,
    ) -> Result<NodeId, LayoutError> {
        self.leaf(leaf_id)?;
        if let Some(tab_id) = move_tab {
            if self.leaf_of_tab(tab_id).is_none() {
                return Err(LayoutError::TabNotFound(tab_id.to_string()));
            }
        }

        let parent = self.parent(leaf_id);
        let new_leaf = match parent {
            Some(parent_id) if self.group_direction(parent_id) == Some(direction) => {
                let new_leaf = self.alloc(Some(parent_id), PanelNode::Leaf(Leaf::new()));
                let (children, sizes) = self.group_mut(parent_id)?;
                let index = children
                    .iter()
                    .position(|child| *child == leaf_id)
                    .ok_or_else(|| LayoutError::Corrupt(format!("{} is not a child of {}", leaf_id, parent_id)))?;
                let half = sizes[index] / 2.0;
                sizes[index] = half;
                children.insert(index + 1, new_leaf);
                sizes.insert(index + 1, half);
                normalize(sizes);
                new_leaf
            }
            _ => {
                let group_id = self.alloc(
                    parent,
                    PanelNode::Group {
                        direction,
                        children: Vec::new(),
                        sizes: Vec::new(),
                    },
                );
                let new_leaf = self.alloc(Some(group_id), PanelNode::Leaf(Leaf::new()));

                match parent {
                    None => self.root = group_id,
                    Some(parent_id) => {
                        let (children, _) = self.group_mut(parent_id)?;
                        if let Some(slot) = children.iter_mut().find(|slot| **slot == leaf_id) {
                            *slot = group_id;
                        }
                    }
                }
                if let Some(slot) = self.nodes.get_mut(&leaf_id) {
                    slot.parent = Some(group_id);
                }
                let (children, sizes) = self.group_mut(group_id)?;
                *children = vec![leaf_id, new_leaf];
                *sizes = vec![TOTAL_SIZE / 2.0, TOTAL_SIZE / 2.0];
                new_leaf
            }
        };

        if let Some(tab_id) = move_tab {
            self.move_tab(tab_id, new_leaf)?;
        }
        Ok(new_leaf)
    }

    /// Set a group's child sizes; they are rescaled to add up to 100
    pub fn resize_group(&mut self, group_id: NodeId, sizes: Vec<f64>) -> Result<(), LayoutError> {
        let (children, current) = self.group_mut(group_id)?;
        if sizes.len() != children.len() {
            return Err(LayoutError::SizeMismatch {
                expected: children.len(),
                actual: sizes.len(),
            });
        }
        if sizes.iter().any(|size| !size.is_finite() || *size <= 0.0) {
            return Err(LayoutError::InvalidSizes);
        }
        *current = sizes;
        normalize(current);
        Ok(())
    }

    /// Close every diff tab showing `path`, returning how many were closed
    pub fn close_diff_tabs_for_file(&mut self, path: &Path) -> Result<usize, LayoutError> {
        let mut matching: Vec<String> = self
            .tab_index
            .keys()
            .filter(|id| self.tab(id).is_some_and(|tab| tab.data.is_diff_of(path)))
            .cloned()
            .collect();
        matching.sort();

        for id in &matching {
            self.close_tab(id)?;
        }
        Ok(matching.len())
    }

    pub fn clear_preview_diff(&mut self) -> Result<Option<Tab>, LayoutError> {
        match self.preview_diff.clone() {
            Some(id) => self.close_tab(&id).map(Some),
            None => Ok(None),
        }
    }

    /// Whether the diff tab of `path` is the active tab of its leaf
    pub fn is_diff_tab_active_in_tree(&self, path: &Path) -> bool {
        let id = TabData::Diff {
            path: path.to_path_buf(),
        }
        .tab_id();
        self.leaf_of_tab(&id)
            .and_then(|leaf| self.leaf(leaf).ok())
            .is_some_and(|leaf| leaf.active_tab_id.as_deref() == Some(id.as_str()))
    }

    /// Verify the structural invariants of the tree
    pub fn check_invariants(&self) -> Result<(), LayoutError> {
        let corrupt = |message: String| Err(LayoutError::Corrupt(message));

        if self.parent(self.root).is_some() {
            return corrupt(format!("root {} has a parent", self.root));
        }

        let mut visited = HashSet::new();
        let mut seen_tabs = HashSet::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                return corrupt(format!("{} is reachable twice", id));
            }
            let Some(node) = self.node(id) else {
                return Err(LayoutError::PanelNotFound(id));
            };
            match node {
                PanelNode::Group {
                    children, sizes, ..
                } => {
                    if children.len() < 2 {
                        return corrupt(format!("group {} has {} children", id, children.len()));
                    }
                    if sizes.len() != children.len() {
                        return Err(LayoutError::SizeMismatch {
                            expected: children.len(),
                            actual: sizes.len(),
                        });
                    }
                    let total: f64 = sizes.iter().sum();
                    if (total - TOTAL_SIZE).abs() > SIZE_EPSILON {
                        return corrupt(format!("sizes of {} add up to {}", id, total));
                    }
                    for child in children {
                        if self.parent(*child) != Some(id) {
                            return corrupt(format!("{} does not point back to {}", child, id));
                        }
                        stack.push(*child);
                    }
                }
                PanelNode::Leaf(leaf) => {
                    for tab in &leaf.tabs {
                        if !seen_tabs.insert(tab.id.as_str()) {
                            return corrupt(format!("duplicate tab id {}", tab.id));
                        }
                        if self.tab_index.get(&tab.id) != Some(&id) {
                            return corrupt(format!("tab {} is not indexed to {}", tab.id, id));
                        }
                    }
                    if let Some(active) = &leaf.active_tab_id {
                        if leaf.tab(active).is_none() {
                            return corrupt(format!("active tab {} is not in {}", active, id));
                        }
                    }
                }
            }
        }

        if visited.len() != self.nodes.len() {
            return corrupt(format!(
                "{} panels are detached from the tree",
                self.nodes.len() - visited.len()
            ));
        }
        if seen_tabs.len() != self.tab_index.len() {
            return corrupt("tab index lists tabs that are not in the tree".to_string());
        }
        self.leaf(self.active_leaf)?;
        if let Some(preview) = &self.preview_diff {
            if !self.tab(preview).is_some_and(|tab| tab.preview) {
                return corrupt(format!("preview tab {} is missing", preview));
            }
        }
        Ok(())
    }

    pub fn to_snapshot(&self) -> PanelSnapshot {
        self.snapshot_node(self.root)
    }

    fn snapshot_node(&self, id: NodeId) -> PanelSnapshot {
        match self.node(id) {
            Some(PanelNode::Group {
                direction,
                children,
                sizes,
            }) => PanelSnapshot::Group {
                direction: *direction,
                children: children.iter().map(|child| self.snapshot_node(*child)).collect(),
                sizes: sizes.clone(),
            },
            Some(PanelNode::Leaf(leaf)) => PanelSnapshot::Leaf {
                tabs: leaf.tabs.clone(),
                active_tab_id: leaf.active_tab_id.clone(),
                show_tabs: leaf.show_tabs,
                droppable: leaf.droppable,
            },
            None => PanelSnapshot::Leaf {
                tabs: Vec::new(),
                active_tab_id: None,
                show_tabs: true,
                droppable: true,
            },
        }
    }

    /// Rebuild a layout from a snapshot, rejecting snapshots that break the
    /// tree invariants
    pub fn from_snapshot(snapshot: PanelSnapshot) -> Result<Self, LayoutError> {
        let mut layout = Self {
            root: NodeId(0),
            next_id: 0,
            nodes: HashMap::new(),
            tab_index: HashMap::new(),
            active_leaf: NodeId(0),
            preview_diff: None,
        };
        layout.root = layout.build(snapshot, None)?;
        layout.active_leaf = layout.first_leaf();
        layout.check_invariants()?;
        Ok(layout)
    }

    fn build(&mut self, snapshot: PanelSnapshot, parent: Option<NodeId>) -> Result<NodeId, LayoutError> {
        match snapshot {
            PanelSnapshot::Group {
                direction,
                mut children,
                mut sizes,
            } => {
                if children.is_empty() {
                    return Err(LayoutError::Corrupt("empty group".to_string()));
                }
                if sizes.len() != children.len() {
                    return Err(LayoutError::Corrupt(format!(
                        "group has {} children but {} sizes",
                        children.len(),
                        sizes.len()
                    )));
                }
                if children.len() == 1 {
                    return self.build(children.remove(0), parent);
                }
                if sizes.iter().any(|size| !size.is_finite() || *size <= 0.0) {
                    return Err(LayoutError::InvalidSizes);
                }
                normalize(&mut sizes);

                let group_id = self.alloc(
                    parent,
                    PanelNode::Group {
                        direction,
                        children: Vec::new(),
                        sizes: Vec::new(),
                    },
                );
                let mut ids = Vec::with_capacity(children.len());
                for child in children {
                    ids.push(self.build(child, Some(group_id))?);
                }
                let (slot_children, slot_sizes) = self.group_mut(group_id)?;
                *slot_children = ids;
                *slot_sizes = sizes;
                Ok(group_id)
            }
            PanelSnapshot::Leaf {
                tabs,
                active_tab_id,
                show_tabs,
                droppable,
            } => {
                let leaf_id = self.alloc(parent, PanelNode::Leaf(Leaf::new()));
                for tab in &tabs {
                    if self.tab_index.insert(tab.id.clone(), leaf_id).is_some() {
                        return Err(LayoutError::Corrupt(format!("duplicate tab id {}", tab.id)));
                    }
                    if tab.preview {
                        if self.preview_diff.is_some() {
                            return Err(LayoutError::Corrupt("more than one preview tab".to_string()));
                        }
                        self.preview_diff = Some(tab.id.clone());
                    }
                }
                let leaf = self.leaf_mut(leaf_id)?;
                leaf.tabs = tabs;
                leaf.active_tab_id = active_tab_id;
                leaf.show_tabs = show_tabs;
                leaf.droppable = droppable;
                Ok(leaf_id)
            }
        }
    }
}
