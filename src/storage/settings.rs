//! Settings storage
//!
//! Manages persistence of user preferences. Command-line flags override these
//! values for a single run.

use crate::inference::{GenerationConfig, LlamaEngineOptions};
use crate::storage::{get_data_dir, StorageError};
use crate::types::config::DEFAULT_MAX_NEW_TOKENS;
use crate::types::{ChatConfig, Device, HistoryMode};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Context sizes the backend is tuned for
const VALID_CONTEXT_SIZES: [u32; 7] = [2048, 4096, 8192, 16384, 32768, 65536, 131072];

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// Model file or directory used by `chat` when no path is given
    pub model_path: Option<PathBuf>,
    /// Device selector
    pub device: Device,
    /// Maximum number of tokens to generate per turn
    pub max_new_tokens: u32,
    /// History strategy
    pub history_mode: HistoryMode,
    /// Stream tokens as they are produced
    pub streaming: bool,
    /// Display delay between streamed tokens
    pub stream_delay_ms: u64,
    /// Context window size
    pub context_size: u32,
    /// Temperature parameter for text generation (0.0 - 2.0)
    pub temperature: f32,
    /// Top-p (nucleus sampling) parameter (0.0 - 1.0)
    pub top_p: f32,
    /// Top-k sampling parameter
    pub top_k: u32,
    /// Sampler seed
    pub seed: u32,
    /// Repository fetched when `fetch` is run without an id
    pub default_repo: String,
    /// Glob filters applied to the default repository
    pub default_include: Vec<String>,
    /// Directory where fetched models are stored
    pub models_directory: PathBuf,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            model_path: None,
            device: Device::Auto,
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            history_mode: HistoryMode::Manual,
            streaming: false,
            stream_delay_ms: 0,
            context_size: 4096,
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            seed: 1234,
            default_repo: "bartowski/Llama-3.2-3B-Instruct-GGUF".to_string(),
            default_include: vec!["*Q4_K_M.gguf".to_string()],
            models_directory: get_data_dir()
                .ok()
                .map(|d| d.join("models"))
                .unwrap_or_else(|| PathBuf::from("./models")),
        }
    }
}

impl ChatSettings {
    /// Validate settings values
    ///
    /// Ensures all parameters are within acceptable ranges.
    pub fn validate(&mut self) {
        self.temperature = self.temperature.clamp(0.0, 2.0);
        self.top_p = self.top_p.clamp(0.0, 1.0);

        if self.top_k == 0 {
            self.top_k = 40;
        }

        self.max_new_tokens = self.max_new_tokens.clamp(1, 65536);

        if !VALID_CONTEXT_SIZES.contains(&self.context_size) {
            self.context_size = *VALID_CONTEXT_SIZES
                .iter()
                .min_by_key(|&&size| (size as i64 - self.context_size as i64).abs())
                .unwrap_or(&4096);
        }

        if self.default_repo.trim().is_empty() {
            self.default_repo = ChatSettings::default().default_repo;
        }
    }

    /// Where `chat` looks for weights when no path was configured
    pub fn resolved_model_path(&self) -> PathBuf {
        self.model_path
            .clone()
            .unwrap_or_else(|| self.models_directory.join(repo_dir_name(&self.default_repo)))
    }

    pub fn chat_config(&self) -> ChatConfig {
        ChatConfig::builder(self.resolved_model_path())
            .device(self.device)
            .max_new_tokens(self.max_new_tokens)
            .history_mode(self.history_mode)
            .streaming(self.streaming)
            .stream_delay_ms(self.stream_delay_ms)
            .build()
    }

    pub fn generation_config(&self) -> GenerationConfig {
        GenerationConfig {
            max_new_tokens: self.max_new_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            seed: self.seed,
        }
    }

    pub fn engine_options(&self) -> LlamaEngineOptions {
        LlamaEngineOptions {
            device: self.device,
            context_size: self.context_size,
        }
    }
}

/// Local directory name for a repo id (`owner/Repo-GGUF` → `Repo-GGUF`)
pub fn repo_dir_name(repo_id: &str) -> String {
    let repo_id = repo_id.split('@').next().unwrap_or(repo_id);
    repo_id
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("model")
        .to_string()
}

/// Get the settings file path
pub fn get_settings_path() -> Result<PathBuf, StorageError> {
    Ok(get_data_dir()?.join("settings.json"))
}

/// Load settings from disk
///
/// Returns default settings if the file doesn't exist or is corrupted
pub fn load_settings() -> ChatSettings {
    let loaded = get_settings_path().and_then(|path| load_settings_from(&path));
    match loaded {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Failed to load settings, using defaults: {}", e);
            let mut settings = ChatSettings::default();
            settings.validate();
            settings
        }
    }
}

/// Load and validate settings from a specific file
pub fn load_settings_from(path: &Path) -> Result<ChatSettings, StorageError> {
    if !path.exists() {
        tracing::info!("Settings file not found, using defaults");
        let mut settings = ChatSettings::default();
        settings.validate();
        return Ok(settings);
    }

    let json = fs::read_to_string(path)?;
    let mut settings: ChatSettings = serde_json::from_str(&json)?;
    settings.validate();

    tracing::debug!("Loaded settings from {:?}", path);
    Ok(settings)
}

/// Save settings to disk
pub fn save_settings(settings: &ChatSettings) -> Result<(), StorageError> {
    save_settings_to(settings, &get_settings_path()?)
}

pub fn save_settings_to(settings: &ChatSettings, path: &Path) -> Result<(), StorageError> {
    // Ensure the parent directory exists
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)?;

    tracing::debug!("Saved settings to {:?}", path);
    Ok(())
}
