//! Configuration for the board hub.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/taskboard-hub/config.toml`)
//! 4. Compiled defaults
//!
//! Projects and their members are only configurable from the file:
//!
//! ```toml
//! [server]
//! bind_addr = "0.0.0.0:9100"
//!
//! [[project]]
//! id = "ops"
//! members = ["ana", "sam"]
//! tasks = ["Triage inbox"]
//! ```

use std::path::PathBuf;

use taskboard_proto::change::TaskDraft;
use taskboard_proto::task::{ActorId, ProjectId, TaskId, Timestamp};

use crate::hub::DEFAULT_MAX_FRAME_SIZE;
use crate::tables::BoardTables;

/// Errors that can occur when loading hub configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A `[[project]]` entry cannot be loaded.
    #[error("invalid project {project}: {reason}")]
    InvalidProject {
        /// The project id as written.
        project: String,
        /// What is wrong with it.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure for the hub.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct HubConfigFile {
    server: ServerFileConfig,
    project: Vec<ProjectSeed>,
}

/// `[server]` section of the hub config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    max_frame_size: Option<usize>,
}

/// One `[[project]]` entry: who may write, and what the board starts with.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct ProjectSeed {
    /// Project id.
    pub id: String,
    /// Actor ids allowed to write.
    pub members: Vec<String>,
    /// Names of tasks created in the first lane at startup.
    pub tasks: Vec<String>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the hub.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Task board hub")]
pub struct HubCliArgs {
    /// Address to bind the hub to.
    #[arg(short, long, env = "TASKBOARD_HUB_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/taskboard-hub/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum accepted frame size in bytes.
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TASKBOARD_HUB_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:9100`).
    pub bind_addr: String,
    /// Maximum accepted frame size in bytes.
    pub max_frame_size: usize,
    /// Log level filter string.
    pub log_level: String,
    /// Projects served from startup.
    pub projects: Vec<ProjectSeed>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9100".to_string(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            log_level: "info".to_string(),
            projects: Vec::new(),
        }
    }
}

impl HubConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and a missing
    /// file is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &HubCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, file))
    }

    /// Resolve a `HubConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &HubCliArgs, file: HubConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or(file.server.bind_addr)
                .unwrap_or(defaults.bind_addr),
            max_frame_size: cli
                .max_frame_size
                .or(file.server.max_frame_size)
                .unwrap_or(defaults.max_frame_size),
            log_level: cli.log_level.clone(),
            projects: file.project,
        }
    }

    /// Builds the startup tables from the configured projects.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidProject`] for an empty project id or a
    /// seed task name that fails validation.
    pub fn tables(&self) -> Result<BoardTables, ConfigError> {
        let mut tables = BoardTables::new();
        for seed in &self.projects {
            if seed.id.trim().is_empty() {
                return Err(ConfigError::InvalidProject {
                    project: seed.id.clone(),
                    reason: "empty project id".to_string(),
                });
            }
            let project_id = ProjectId::new(seed.id.as_str());
            for member in &seed.members {
                tables.add_member(&project_id, ActorId::new(member.as_str()));
            }
            for name in &seed.tasks {
                let draft = TaskDraft::new(name.as_str());
                draft.validate().map_err(|e| ConfigError::InvalidProject {
                    project: seed.id.clone(),
                    reason: format!("task {name:?}: {e}"),
                })?;
                tables.insert_task(draft.into_task(TaskId::generate(), project_id.clone(), Timestamp::now()));
            }
        }
        Ok(tables)
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file for the hub.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<HubConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(HubConfigFile::default());
        };
        config_dir.join("taskboard-hub").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HubConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
