//! LLM inference engine
//!
//! The chat loop only talks to an engine through [`InferenceEngine`]. The
//! llama-cpp backend lives in [`engine`]; model resolution in [`model`] and
//! token delivery in [`streaming`].

pub mod engine;
pub mod model;
pub mod streaming;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{LlamaEngine, LlamaEngineOptions};
pub use streaming::{StreamControl, TerminalSink, TokenSink};

use crate::types::{Device, PerfMetrics};
use thiserror::Error;

/// Errors raised by an inference engine
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("failed to initialize backend: {0}")]
    Backend(String),

    #[error("model path error: {0}")]
    ModelPath(String),

    #[error("failed to load model: {0}")]
    ModelLoad(String),

    #[error("device {0} is not supported by this engine")]
    UnsupportedDevice(Device),

    #[error("failed to create context: {0}")]
    Context(String),

    #[error("tokenization failed: {0}")]
    Tokenize(String),

    #[error("prompt of {prompt} tokens does not fit a context of {context} tokens")]
    ContextOverflow { prompt: usize, context: usize },

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("chat template error: {0}")]
    Template(String),

    #[error("chat session error: {0}")]
    ChatSession(String),

    #[error("no prompt supplied")]
    EmptyBatch,
}

/// Per-request generation settings
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    /// Hard cap on generated tokens
    pub max_new_tokens: u32,
    /// Sampling temperature (0 = greedy)
    pub temperature: f32,
    /// Nucleus sampling threshold
    pub top_p: f32,
    /// Top-k sampling cutoff
    pub top_k: u32,
    /// RNG seed for the distribution sampler
    pub seed: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: crate::types::config::DEFAULT_MAX_NEW_TOKENS,
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            seed: 1234,
        }
    }
}

impl GenerationConfig {
    pub fn with_max_new_tokens(mut self, max_new_tokens: u32) -> Self {
        self.max_new_tokens = max_new_tokens;
        self
    }
}

/// What a generate call returns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOutput {
    /// One text per submitted prompt
    pub texts: Vec<String>,
    /// Aggregate metrics, when the engine reports them
    pub metrics: Option<PerfMetrics>,
}

impl GenerationOutput {
    /// First generated text, or an empty string
    pub fn first_text(&self) -> &str {
        self.texts.first().map(String::as_str).unwrap_or("")
    }
}

/// The capability the chat loop needs from an inference backend
///
/// Every call blocks the calling thread until it completes. Streaming calls
/// invoke the sink on the same thread, once per produced token, and only
/// return the aggregate metrics after the last token.
pub trait InferenceEngine {
    /// Generate a completion for each prompt
    fn generate(
        &mut self,
        prompts: &[String],
        config: &GenerationConfig,
    ) -> Result<GenerationOutput, InferenceError>;

    /// Generate while pushing each token to `sink`
    fn generate_stream(
        &mut self,
        prompts: &[String],
        config: &GenerationConfig,
        sink: &mut dyn TokenSink,
    ) -> Result<GenerationOutput, InferenceError>;

    /// Begin an engine-managed multi-turn conversation
    fn start_chat(&mut self) -> Result<(), InferenceError>;

    /// End the conversation started by [`InferenceEngine::start_chat`]
    fn finish_chat(&mut self) -> Result<(), InferenceError>;
}
