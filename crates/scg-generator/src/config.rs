//! Application configuration.
//!
//! Values come from, in increasing precedence: built-in defaults, an optional
//! `scg.json` (in the workspace, or given explicitly), environment variables
//! (`SCG_WORKSPACE`, `SCG_MAX_ATTEMPTS`), and command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use scg_build::{BuildTool, DeployCommand, ProjectFiles};
use serde::{Deserialize, Serialize};

/// Config file looked up inside the workspace.
pub const CONFIG_FILE_NAME: &str = "scg.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Anchor workspace root
    pub workspace_dir: PathBuf,
    /// Program directory name under `programs/`
    pub program_name: String,
    /// Extra copies of the generated `lib.rs`
    pub mirror_paths: Vec<PathBuf>,
    /// Build command line, e.g. `anchor build` or `cargo build-sbf`
    pub build_tool: String,
    pub build_timeout_secs: u64,
    pub max_attempts: u32,
    /// Contract store; relative paths are resolved against the workspace
    pub store_path: PathBuf,
    pub deploy_cluster: Option<String>,
    /// Deployment script run instead of `anchor deploy`
    pub deploy_script: Option<PathBuf>,
    pub deploy_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::from("./deploy"),
            program_name: "deploy".to_string(),
            mirror_paths: Vec::new(),
            build_tool: "anchor build".to_string(),
            build_timeout_secs: 300,
            max_attempts: 5,
            store_path: PathBuf::from("contracts.json"),
            deploy_cluster: None,
            deploy_script: None,
            deploy_timeout_secs: 600,
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment and an optional file.
    pub fn load(
        explicit_file: Option<&Path>,
        workspace_override: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        Self::load_with(explicit_file, workspace_override, |name| {
            std::env::var(name).ok().filter(|v| !v.trim().is_empty())
        })
    }

    /// [`load`](Self::load) with an injectable environment lookup.
    pub fn load_with<F>(
        explicit_file: Option<&Path>,
        workspace_override: Option<PathBuf>,
        env: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_workspace = env("SCG_WORKSPACE").map(PathBuf::from);
        let workspace_hint = workspace_override
            .clone()
            .or_else(|| env_workspace.clone())
            .unwrap_or_else(|| AppConfig::default().workspace_dir);

        let file = match explicit_file {
            Some(path) => Some(path.to_path_buf()),
            None => Some(workspace_hint.join(CONFIG_FILE_NAME)).filter(|p| p.is_file()),
        };

        let mut config = match file {
            Some(ref path) => Self::from_file(path)?,
            None => {
                let mut config = AppConfig::default();
                config.workspace_dir = workspace_hint;
                config
            }
        };

        if let Some(dir) = env_workspace {
            config.workspace_dir = dir;
        }
        if let Some(value) = env("SCG_MAX_ATTEMPTS") {
            config.max_attempts = value
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::InvalidValue {
                    key: "SCG_MAX_ATTEMPTS",
                    value,
                })?;
        }
        if let Some(dir) = workspace_override {
            config.workspace_dir = dir;
        }
        if config.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_attempts",
                value: config.max_attempts.to_string(),
            });
        }

        tracing::debug!(?file, workspace = %config.workspace_dir.display(), "configuration loaded");
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `<workspace>/programs/<program>/src/lib.rs`
    pub fn program_source_path(&self) -> PathBuf {
        self.project_files().source
    }

    /// `<workspace>/programs/<program>/Cargo.toml`
    pub fn program_cargo_toml(&self) -> PathBuf {
        self.project_files().program_manifest
    }

    /// `<workspace>/Cargo.toml`
    pub fn workspace_cargo_toml(&self) -> PathBuf {
        self.project_files().workspace_manifest
    }

    pub fn project_files(&self) -> ProjectFiles {
        ProjectFiles::anchor_layout(&self.workspace_dir, &self.program_name)
    }

    pub fn store_file(&self) -> PathBuf {
        if self.store_path.is_absolute() {
            self.store_path.clone()
        } else {
            self.workspace_dir.join(&self.store_path)
        }
    }

    pub fn build_tool(&self) -> Result<BuildTool, ConfigError> {
        BuildTool::parse(&self.build_tool).ok_or_else(|| ConfigError::InvalidValue {
            key: "build_tool",
            value: self.build_tool.clone(),
        })
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn deploy_command(&self) -> DeployCommand {
        match self.deploy_script {
            Some(ref script) if script.is_absolute() => DeployCommand::Script(script.clone()),
            Some(ref script) => DeployCommand::Script(self.workspace_dir.join(script)),
            None => DeployCommand::Anchor {
                cluster: self.deploy_cluster.clone(),
            },
        }
    }

    pub fn deploy_timeout(&self) -> Duration {
        Duration::from_secs(self.deploy_timeout_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}
