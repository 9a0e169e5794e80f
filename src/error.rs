//! Top-level error type
//!
//! Everything that can abort the binary funnels into [`AppError`].

use crate::chat::ChatError;
use crate::inference::InferenceError;
use crate::storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("logging initialization failed: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
