//! Configuration types
//!
//! Device selection, history strategy and the per-session chat configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Default cap on generated tokens per request
pub const DEFAULT_MAX_NEW_TOKENS: u32 = 1024;

/// Where the model should run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// Let the engine pick the best available accelerator
    #[default]
    Auto,
    /// Neural processing unit
    Npu,
    /// Discrete or integrated GPU
    Gpu,
    /// Host CPU only
    Cpu,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Device::Auto => "AUTO",
            Device::Npu => "NPU",
            Device::Gpu => "GPU",
            Device::Cpu => "CPU",
        };
        f.write_str(name)
    }
}

/// How conversation context is carried between turns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HistoryMode {
    /// The loop re-sends the whole transcript on every turn
    #[default]
    Manual,
    /// The engine keeps the chat state between start/finish calls
    Engine,
}

/// Configuration of one chat session
#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    /// Path to the model file or directory
    pub model_path: PathBuf,
    /// Device selector handed to the engine
    pub device: Device,
    /// Maximum number of tokens generated per turn
    pub max_new_tokens: u32,
    /// History strategy
    pub history_mode: HistoryMode,
    /// Print tokens as they are produced
    pub streaming: bool,
    /// Display-only pause after each streamed token
    pub stream_delay_ms: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models"),
            device: Device::Auto,
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            history_mode: HistoryMode::Manual,
            streaming: false,
            stream_delay_ms: 0,
        }
    }
}

impl ChatConfig {
    pub fn builder(model_path: impl Into<PathBuf>) -> ChatConfigBuilder {
        ChatConfigBuilder {
            config: ChatConfig {
                model_path: model_path.into(),
                ..ChatConfig::default()
            },
        }
    }
}

/// Builder for [`ChatConfig`]
#[derive(Debug, Clone)]
pub struct ChatConfigBuilder {
    config: ChatConfig,
}

impl ChatConfigBuilder {
    pub fn device(mut self, device: Device) -> Self {
        self.config.device = device;
        self
    }

    pub fn max_new_tokens(mut self, max_new_tokens: u32) -> Self {
        self.config.max_new_tokens = max_new_tokens.max(1);
        self
    }

    pub fn history_mode(mut self, mode: HistoryMode) -> Self {
        self.config.history_mode = mode;
        self
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.config.streaming = streaming;
        self
    }

    pub fn stream_delay_ms(mut self, delay_ms: u64) -> Self {
        self.config.stream_delay_ms = delay_ms;
        self
    }

    pub fn build(self) -> ChatConfig {
        self.config
    }
}
