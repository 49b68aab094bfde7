use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use super::tab::{Tab, TabData};
use super::tree::{Direction, LayoutError, NodeId, PanelLayout, PanelSnapshot};

/// Which layout an operation targets
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LayoutKey {
    Task(String),
    Dashboard,
}

impl LayoutKey {
    pub fn task(task_id: impl Into<String>) -> Self {
        LayoutKey::Task(task_id.into())
    }

    /// Tabs a fresh layout starts with
    pub fn default_tabs(&self) -> Vec<Tab> {
        match self {
            LayoutKey::Task(_) => vec![Tab::new(TabData::Logs)],
            LayoutKey::Dashboard => vec![Tab::new(TabData::Workspace)],
        }
    }
}

impl fmt::Display for LayoutKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutKey::Task(task_id) => write!(f, "task:{}", task_id),
            LayoutKey::Dashboard => write!(f, "dashboard"),
        }
    }
}

impl FromStr for LayoutKey {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("task", task_id)) if !task_id.is_empty() => Ok(LayoutKey::task(task_id)),
            None if s == "dashboard" => Ok(LayoutKey::Dashboard),
            _ => Err(LayoutError::UnknownLayout(s.to_string())),
        }
    }
}

/// Panel layouts of every task view plus the dashboard.
///
/// Opening something creates the target layout on demand; operations that
/// address existing panels or tabs fail with [`LayoutError::UnknownLayout`]
/// when the layout was never created.
#[derive(Debug, Default)]
pub struct PanelStore {
    layouts: HashMap<LayoutKey, PanelLayout>,
}

impl PanelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layout(&self, key: &LayoutKey) -> Option<&PanelLayout> {
        self.layouts.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &LayoutKey> {
        self.layouts.keys()
    }

    fn layout_or_default(&mut self, key: &LayoutKey) -> &mut PanelLayout {
        self.layouts
            .entry(key.clone())
            .or_insert_with(|| PanelLayout::new(key.default_tabs()))
    }

    fn existing(&mut self, key: &LayoutKey) -> Result<&mut PanelLayout, LayoutError> {
        self.layouts
            .get_mut(key)
            .ok_or_else(|| LayoutError::UnknownLayout(key.to_string()))
    }

    pub fn open_tab(
        &mut self,
        key: &LayoutKey,
        tab: Tab,
        target: Option<NodeId>,
    ) -> Result<String, LayoutError> {
        self.layout_or_default(key).open_tab(tab, target)
    }

    pub fn open_file(&mut self, key: &LayoutKey, path: &Path) -> Result<String, LayoutError> {
        self.layout_or_default(key).open_file(path)
    }

    pub fn open_diff(
        &mut self,
        key: &LayoutKey,
        path: &Path,
        preview: bool,
    ) -> Result<String, LayoutError> {
        self.layout_or_default(key).open_diff(path, preview)
    }

    pub fn open_artifact(&mut self, key: &LayoutKey, path: &Path) -> Result<String, LayoutError> {
        self.layout_or_default(key).open_artifact(path)
    }

    pub fn set_active_tab(&mut self, key: &LayoutKey, tab_id: &str) -> Result<(), LayoutError> {
        self.existing(key)?.set_active_tab(tab_id)
    }

    pub fn close_tab(&mut self, key: &LayoutKey, tab_id: &str) -> Result<Tab, LayoutError> {
        self.existing(key)?.close_tab(tab_id)
    }

    pub fn move_tab(
        &mut self,
        key: &LayoutKey,
        tab_id: &str,
        target: NodeId,
    ) -> Result<(), LayoutError> {
        self.existing(key)?.move_tab(tab_id, target)
    }

    /// Close diff tabs of `path` in one layout, e.g. after the file was
    /// reverted in that task's workspace. Returns the number of tabs closed;
    /// an unknown layout has none.
    pub fn close_diff_tabs_for_file(
        &mut self,
        key: &LayoutKey,
        path: &Path,
    ) -> Result<usize, LayoutError> {
        match self.layouts.get_mut(key) {
            Some(layout) => layout.close_diff_tabs_for_file(path),
            None => Ok(0),
        }
    }

    pub fn clear_preview_diff(&mut self, key: &LayoutKey) -> Result<Option<Tab>, LayoutError> {
        match self.layouts.get_mut(key) {
            Some(layout) => layout.clear_preview_diff(),
            None => Ok(None),
        }
    }

    pub fn split_panel(
        &mut self,
        key: &LayoutKey,
        leaf: NodeId,
        direction: Direction,
        move_tab: Option<&str>,
    ) -> Result<NodeId, LayoutError> {
        self.existing(key)?.split_panel(leaf, direction, move_tab)
    }

    pub fn resize_group(
        &mut self,
        key: &LayoutKey,
        group: NodeId,
        sizes: Vec<f64>,
    ) -> Result<(), LayoutError> {
        self.existing(key)?.resize_group(group, sizes)
    }

    pub fn is_diff_tab_active_in_tree(&self, key: &LayoutKey, path: &Path) -> bool {
        self.layouts
            .get(key)
            .is_some_and(|layout| layout.is_diff_tab_active_in_tree(path))
    }

    /// Replace the layout with the default one
    pub fn reset_layout(&mut self, key: &LayoutKey) {
        tracing::debug!(layout = %key, "Resetting panel layout");
        self.layouts
            .insert(key.clone(), PanelLayout::new(key.default_tabs()));
    }

    /// Drop a layout, e.g. once its task is deleted
    pub fn remove_layout(&mut self, key: &LayoutKey) -> Option<PanelLayout> {
        self.layouts.remove(key)
    }

    pub fn snapshot(&self, key: &LayoutKey) -> Result<String, LayoutError> {
        let layout = self
            .layouts
            .get(key)
            .ok_or_else(|| LayoutError::UnknownLayout(key.to_string()))?;
        serde_json::to_string(&layout.to_snapshot())
            .map_err(|err| LayoutError::Corrupt(err.to_string()))
    }

    /// Load a layout from JSON. A snapshot that fails to parse or breaks the
    /// tree invariants leaves the current layout untouched.
    pub fn load_snapshot(&mut self, key: &LayoutKey, json: &str) -> Result<(), LayoutError> {
        let snapshot: PanelSnapshot =
            serde_json::from_str(json).map_err(|err| LayoutError::Corrupt(err.to_string()))?;
        let layout = PanelLayout::from_snapshot(snapshot).inspect_err(|err| {
            tracing::warn!(layout = %key, error = %err, "Rejected panel layout snapshot");
        })?;
        self.layouts.insert(key.clone(), layout);
        Ok(())
    }
}
