//! Interactive chat loop
//!
//! Reads prompts from a terminal, forwards them to an [`InferenceEngine`] and
//! prints the reply followed by the engine's performance counters.
//!
//! [`InferenceEngine`]: crate::inference::InferenceEngine

pub mod render;
pub mod session;

pub use render::{MetricValue, PerformanceReport};
pub use session::{is_exit_command, ChatSession, ChatState};

use crate::inference::InferenceError;
use thiserror::Error;

/// Errors that end a chat session
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("terminal io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Inference(#[from] InferenceError),
}
