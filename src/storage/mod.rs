//! Persistent storage
//!
//! Model downloads and user settings. Conversations are never written to disk.

pub mod huggingface;
pub mod settings;

use directories::ProjectDirs;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("could not determine a data directory for this platform")]
    NoDataDir,

    #[error("invalid model id: {0}")]
    InvalidModelId(String),

    #[error("invalid include pattern: {0}")]
    InvalidPattern(String),

    #[error("hub request failed: {0}")]
    Hub(String),

    #[error("no files to download: {0}")]
    NoFiles(String),

    #[error("unsafe path in repository listing: {0}")]
    UnsafePath(String),

    #[error("download of {file} incomplete: got {got} bytes, expected {expected}")]
    Incomplete { file: String, got: u64, expected: u64 },
}

/// Application data directory (settings, default model location)
pub fn get_data_dir() -> Result<PathBuf, StorageError> {
    ProjectDirs::from("com", "localchat", "localchat")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or(StorageError::NoDataDir)
}
