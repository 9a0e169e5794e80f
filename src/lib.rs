//! localchat library
//!
//! Interactive terminal chat over a locally stored LLM, plus a fetcher that
//! mirrors model repositories from the HuggingFace Hub.

pub mod chat;
pub mod error;
pub mod inference;
pub mod logging;
pub mod storage;
pub mod system;
pub mod types;

pub use error::AppError;
