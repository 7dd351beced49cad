//! Server configuration: TOML file + CLI overrides.

use ptycast_core::{CastError, CastResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub terminal: TerminalSection,
    #[serde(default)]
    pub history: HistorySection,
    #[serde(default)]
    pub workspace: WorkspaceSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

/// `[terminal]` section: what to spawn and how big.
#[derive(Debug, Clone, Deserialize)]
pub struct TerminalSection {
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_rows")]
    pub rows: u16,
    #[serde(default = "default_output_queue")]
    pub output_queue: usize,
}

impl Default for TerminalSection {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: Vec::new(),
            cols: default_cols(),
            rows: default_rows(),
            output_queue: default_output_queue(),
        }
    }
}

/// `[history]` section: replay buffer ceilings.
#[derive(Debug, Clone, Deserialize)]
pub struct HistorySection {
    #[serde(default = "default_history_max_bytes")]
    pub max_bytes: usize,
    #[serde(default = "default_history_max_chunks")]
    pub max_chunks: usize,
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            max_bytes: default_history_max_bytes(),
            max_chunks: default_history_max_chunks(),
        }
    }
}

/// `[workspace]` section: allow-listed roots for caller-supplied cwds.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkspaceSection {
    #[serde(default)]
    pub roots: Vec<String>,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8787
}
fn default_command() -> String {
    "codex".to_string()
}
fn default_cols() -> u16 {
    80
}
fn default_rows() -> u16 {
    24
}
fn default_output_queue() -> usize {
    200
}
fn default_history_max_bytes() -> usize {
    500_000
}
fn default_history_max_chunks() -> usize {
    2000
}

/// Resolved configuration (paths expanded, CLI overrides applied). Fixed at
/// process start; nothing here is mutable at runtime.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub command: String,
    pub args: Vec<String>,
    pub cols: u16,
    pub rows: u16,
    pub output_queue: usize,
    pub history_max_bytes: usize,
    pub history_max_chunks: usize,
    pub workspace_roots: Vec<PathBuf>,
}

impl ServerConfig {
    /// Load config from a TOML file, then apply CLI overrides.
    pub fn load(
        config_path: Option<&Path>,
        cli_port: Option<u16>,
        cli_command: Option<&str>,
        cli_cols: Option<u16>,
        cli_rows: Option<u16>,
    ) -> CastResult<Self> {
        let file_config = if let Some(path) = config_path {
            let expanded = expand_tilde(path);
            if expanded.exists() {
                info!(path = %expanded.display(), "loading config file");
                let content = std::fs::read_to_string(&expanded)?;
                toml::from_str::<ConfigFile>(&content)
                    .map_err(|e| CastError::Config(format!("config parse error: {e}")))?
            } else {
                info!(path = %expanded.display(), "config file not found, using defaults");
                ConfigFile::default()
            }
        } else {
            ConfigFile::default()
        };

        Ok(Self {
            bind: file_config.server.bind,
            port: cli_port.unwrap_or(file_config.server.port),
            command: cli_command
                .map(|s| s.to_string())
                .unwrap_or(file_config.terminal.command),
            args: file_config.terminal.args,
            cols: cli_cols.unwrap_or(file_config.terminal.cols),
            rows: cli_rows.unwrap_or(file_config.terminal.rows),
            output_queue: file_config.terminal.output_queue,
            history_max_bytes: file_config.history.max_bytes,
            history_max_chunks: file_config.history.max_chunks,
            workspace_roots: file_config
                .workspace
                .roots
                .iter()
                .map(|s| expand_tilde_str(s))
                .collect(),
        })
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
