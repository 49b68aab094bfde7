use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What a tab shows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TabData {
    Logs,
    Shell {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    File {
        path: PathBuf,
    },
    Diff {
        path: PathBuf,
    },
    Artifact {
        path: PathBuf,
    },
    Workspace,
}

impl TabData {
    pub fn kind(&self) -> &'static str {
        match self {
            TabData::Logs => "logs",
            TabData::Shell { .. } => "shell",
            TabData::File { .. } => "file",
            TabData::Diff { .. } => "diff",
            TabData::Artifact { .. } => "artifact",
            TabData::Workspace => "workspace",
        }
    }

    /// Tab id derived from kind and target, so opening the same thing twice
    /// finds the existing tab
    pub fn tab_id(&self) -> String {
        match self {
            TabData::Logs | TabData::Workspace => self.kind().to_string(),
            TabData::Shell { session_id } => format!("shell:{}", session_id),
            TabData::File { path } | TabData::Diff { path } | TabData::Artifact { path } => {
                format!("{}:{}", self.kind(), path.display())
            }
        }
    }

    pub fn default_label(&self) -> String {
        match self {
            TabData::Logs => "Logs".to_string(),
            TabData::Workspace => "Workspace".to_string(),
            TabData::Shell { session_id } => format!("Shell {}", session_id),
            TabData::File { path } | TabData::Artifact { path } => file_label(path),
            TabData::Diff { path } => format!("{} (diff)", file_label(path)),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            TabData::File { path } | TabData::Diff { path } | TabData::Artifact { path } => {
                Some(path)
            }
            _ => None,
        }
    }

    pub fn is_diff_of(&self, path: &Path) -> bool {
        matches!(self, TabData::Diff { path: diff } if diff == path)
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    pub id: String,
    pub label: String,
    pub data: TabData,
    /// Preview tabs are replaced by the next preview instead of stacking up
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub preview: bool,
}

impl Tab {
    pub fn new(data: TabData) -> Self {
        Self {
            id: data.tab_id(),
            label: data.default_label(),
            data,
            preview: false,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn preview(mut self) -> Self {
        self.preview = true;
        self
    }
}
