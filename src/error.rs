//! Error types for the watch registry.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from registry and event source operations.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Cannot watch root {root}: {reason}")]
    AttachFailed { root: PathBuf, reason: String },

    #[error("Path {path} is outside the watched root {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        WatchError::InitFailed {
            reason: e.to_string(),
        }
    }
}
