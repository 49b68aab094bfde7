use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::git::TASKDOCK_DIR;
use crate::workspace::WorkspaceMode;

/// Global configuration (stored in ~/.config/taskdock/)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Focus session settings
    #[serde(default)]
    pub focus: FocusConfig,

    /// Workspace defaults for new tasks
    #[serde(default)]
    pub workspace: WorkspaceConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Focus configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FocusConfig {
    /// Delay before dependent caches are invalidated after a focus change,
    /// giving the filesystem time to settle
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

impl FocusConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

fn default_settle_delay_ms() -> u64 {
    500
}

/// Workspace configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Mode used when neither the caller nor a stored mapping decides
    #[serde(default)]
    pub default_mode: WorkspaceMode,

    /// Base branch to create worktrees from
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            default_mode: WorkspaceMode::default(),
            base_branch: default_base_branch(),
        }
    }
}

impl WorkspaceConfig {
    /// Base branch for `project`, preferring the project's own setting
    pub fn base_branch_for(&self, project: &ProjectConfig) -> String {
        project
            .base_branch
            .clone()
            .unwrap_or_else(|| self.base_branch.clone())
    }
}

fn default_base_branch() -> String {
    "main".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Write JSON lines instead of plain text
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Project-specific configuration (stored in .taskdock/config.toml)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Override base branch for this project
    pub base_branch: Option<String>,

    /// Shell commands run inside a workspace when it is started
    #[serde(default)]
    pub start_scripts: Vec<String>,
}

impl Config {
    /// Load global config from default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load config from `path`; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {:?}", path))?;
            toml::from_str(&content).context("Failed to parse global config")
        } else {
            Ok(Self::default())
        }
    }

    /// Save global config to default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Get the path to the global config file
    /// Always uses ~/.config/taskdock/ on all platforms
    pub fn config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME").context("Could not determine home directory")?;
        Ok(PathBuf::from(home)
            .join(".config")
            .join("taskdock")
            .join("config.toml"))
    }

    /// Get the path to the global data directory
    pub fn data_dir() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "", "taskdock")
            .context("Could not determine data directory")?;
        Ok(dirs.data_dir().to_path_buf())
    }

    /// Directory for rolling log files
    pub fn log_dir() -> Result<PathBuf> {
        Ok(Self::data_dir()?.join("logs"))
    }
}

impl ProjectConfig {
    fn config_path(project_path: &Path) -> PathBuf {
        project_path.join(TASKDOCK_DIR).join("config.toml")
    }

    /// Load project config from a project directory
    pub fn load(project_path: &Path) -> Result<Self> {
        let config_path = Self::config_path(project_path);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config from {:?}", config_path))?;
            toml::from_str(&content).context("Failed to parse project config")
        } else {
            Ok(Self::default())
        }
    }

    /// Save project config
    pub fn save(&self, project_path: &Path) -> Result<()> {
        let config_path = Self::config_path(project_path);

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;

        Ok(())
    }

    pub fn has_start_scripts(&self) -> bool {
        self.start_scripts.iter().any(|script| !script.trim().is_empty())
    }
}
