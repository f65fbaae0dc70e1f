//! Error types for relaymesh

use thiserror::Error;

/// Main error type for relaymesh operations
#[derive(Error, Debug)]
pub enum HubError {
    #[error("Watch path not found: {path}")]
    WatchPathNotFound { path: String },

    #[error("Watch path is not a directory: {path}")]
    WatchPathNotADirectory { path: String },

    #[error("Watcher error: {message}")]
    Watcher { message: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Client is closed")]
    ClientClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<notify::Error> for HubError {
    fn from(e: notify::Error) -> Self {
        HubError::Watcher {
            message: e.to_string(),
        }
    }
}

/// Result type alias for relaymesh operations
pub type Result<T> = std::result::Result<T, HubError>;
