//! Configuration for the `taskboard` client.
//!
//! Layered with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/taskboard/config.toml`)
//! 4. Compiled defaults
//!
//! A missing default config file is not an error. An explicit `--config`
//! path that doesn't exist is.

use std::path::PathBuf;
use std::time::Duration;

use taskboard_proto::task::{Actor, Priority, ProjectId};

use crate::board::BoardOptions;
use crate::coordinator::DEFAULT_MUTATION_TIMEOUT;
use crate::filter::FilterState;
use crate::remote::hub::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, HubClientOptions};
use crate::timeline::DEFAULT_SPAN_DAYS;
use crate::views::TableSort;

/// Errors that can occur when loading configuration.
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

    /// The hub URL is not a WebSocket URL.
    #[error("invalid hub url {url:?}: {reason}")]
    InvalidHubUrl {
        /// The rejected value.
        url: String,
        /// What is wrong with it.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    hub: HubFileConfig,
    board: BoardFileConfig,
}

/// `[hub]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct HubFileConfig {
    url: Option<String>,
    connect_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

/// `[board]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct BoardFileConfig {
    project_id: Option<String>,
    actor_id: Option<String>,
    actor_name: Option<String>,
    mutation_timeout_secs: Option<u64>,
    notice_buffer: Option<usize>,
    default_span_days: Option<u32>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Hub WebSocket URL. `None` means offline.
    pub hub_url: Option<url::Url>,
    /// Timeout for the hub connect and handshake.
    pub connect_timeout: Duration,
    /// Timeout for a single hub request.
    pub request_timeout: Duration,
    /// Board to open.
    pub project_id: ProjectId,
    /// Who is acting.
    pub actor: Actor,
    /// Bound on each optimistic write.
    pub mutation_timeout: Duration,
    /// Capacity of the board notice channel.
    pub notice_buffer: usize,
    /// Timeline length for tasks without a due date.
    pub default_span_days: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hub_url: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            project_id: ProjectId::new("demo"),
            actor: Actor::new("guest", "Guest"),
            mutation_timeout: DEFAULT_MUTATION_TIMEOUT,
            notice_buffer: 64,
            default_span_days: DEFAULT_SPAN_DAYS,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read or
    /// parsed, or if the resolved hub URL is invalid.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Resolve from CLI args and a parsed config file. CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let hub_url = if cli.offline {
            None
        } else {
            cli.hub_url
                .clone()
                .or_else(|| file.hub.url.clone())
                .map(|raw| parse_hub_url(&raw))
                .transpose()?
        };

        let actor_id = cli
            .actor
            .clone()
            .or_else(|| file.board.actor_id.clone());
        let actor = match actor_id {
            Some(id) => {
                let name = cli
                    .actor_name
                    .clone()
                    .or_else(|| file.board.actor_name.clone())
                    .unwrap_or_else(|| id.clone());
                Actor::new(id, name)
            }
            None => defaults.actor,
        };

        Ok(Self {
            hub_url,
            connect_timeout: file
                .hub
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            request_timeout: file
                .hub
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            project_id: cli
                .project
                .clone()
                .or_else(|| file.board.project_id.clone())
                .map_or(defaults.project_id, ProjectId::new),
            actor,
            mutation_timeout: file
                .board
                .mutation_timeout_secs
                .map_or(defaults.mutation_timeout, Duration::from_secs),
            notice_buffer: file
                .board
                .notice_buffer
                .unwrap_or(defaults.notice_buffer),
            default_span_days: file
                .board
                .default_span_days
                .unwrap_or(defaults.default_span_days),
        })
    }

    /// Board session options.
    #[must_use]
    pub fn board_options(&self) -> BoardOptions {
        BoardOptions {
            mutation_timeout: self.mutation_timeout,
            notice_buffer: self.notice_buffer,
            default_span_days: self.default_span_days,
        }
    }

    /// Hub client options.
    #[must_use]
    pub const fn hub_options(&self) -> HubClientOptions {
        HubClientOptions {
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
        }
    }
}

/// Which projection to print.
#[derive(clap::ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ViewKind {
    /// Kanban lanes.
    #[default]
    Lanes,
    /// Flat table.
    Table,
    /// Timeline bars.
    Timeline,
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Shared task board with live sync")]
pub struct CliArgs {
    /// WebSocket URL of the board hub.
    #[arg(long, env = "TASKBOARD_HUB_URL")]
    pub hub_url: Option<String>,

    /// Board (project) to open.
    #[arg(long, env = "TASKBOARD_PROJECT")]
    pub project: Option<String>,

    /// Your actor id.
    #[arg(long, env = "TASKBOARD_ACTOR")]
    pub actor: Option<String>,

    /// Your display name (defaults to the actor id).
    #[arg(long)]
    pub actor_name: Option<String>,

    /// Use an in-process demo board instead of a hub.
    #[arg(long)]
    pub offline: bool,

    /// Path to config file (default: `~/.config/taskboard/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Projection to print.
    #[arg(long, value_enum, default_value_t = ViewKind::Lanes)]
    pub view: ViewKind,

    /// Table sort order (name, priority, due, updated).
    #[arg(long)]
    pub sort: Option<TableSort>,

    /// Case-insensitive search over names, descriptions, assignees.
    #[arg(long)]
    pub search: Option<String>,

    /// Only tasks assigned to you.
    #[arg(long)]
    pub mine: bool,

    /// Only these priorities (repeatable).
    #[arg(long)]
    pub priority: Vec<Priority>,

    /// Print JSON instead of text.
    #[arg(long)]
    pub json: bool,

    /// Keep printing on every change until Ctrl-C.
    #[arg(long)]
    pub watch: bool,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TASKBOARD_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/taskboard.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl CliArgs {
    /// The filter described by the command line.
    #[must_use]
    pub fn filter(&self) -> FilterState {
        let mut filter = FilterState::new();
        if let Some(search) = &self.search {
            filter = filter.with_search(search.as_str());
        }
        for &priority in &self.priority {
            filter = filter.with_priority(priority);
        }
        if self.mine {
            filter = filter.mine_only();
        }
        filter
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn parse_hub_url(raw: &str) -> Result<url::Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidHubUrl {
        url: raw.to_string(),
        reason,
    };
    let url = url::Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(invalid(format!("scheme must be ws or wss, got {other}"))),
    }
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist. Otherwise the default
/// path is tried and a missing file is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("taskboard").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
