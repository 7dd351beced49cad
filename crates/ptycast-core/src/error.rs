use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the ptycast session and channel layers.
#[derive(Debug, Error)]
pub enum CastError {
    #[error("session already running")]
    SessionAlreadyRunning,

    #[error("spawn failed: {0}")]
    Spawn(String),

    #[error("path is not in the allowed workspaces: {}", .0.display())]
    PathNotAllowed(PathBuf),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for CastError {
    fn from(e: serde_json::Error) -> Self {
        CastError::InvalidMessage(e.to_string())
    }
}

pub type CastResult<T> = Result<T, CastError>;
