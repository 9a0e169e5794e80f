//! Shared type definitions
//!
//! This module contains all shared data types used across the application.

pub mod config;
pub mod message;
pub mod metrics;
pub mod model;

pub use config::{ChatConfig, ChatConfigBuilder, Device, HistoryMode};
pub use message::{Transcript, Turn};
pub use metrics::PerfMetrics;
pub use model::ModelInfo;
