//! llama-cpp backed engine
//!
//! Loads a GGUF model once and serves blocking or streaming generations,
//! measuring its own latency and throughput counters.

use super::model::{gpu_layers_for, resolve_model_file};
use super::streaming::{StreamControl, TokenSink};
use super::{GenerationConfig, GenerationOutput, InferenceEngine, InferenceError};
use encoding_rs::{CoderResult, Decoder};
use crate::types::{Device, ModelInfo, PerfMetrics};
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaChatMessage, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use std::num::NonZeroU32;
use std::path::Path;
use std::time::{Duration, Instant};

/// Load-time options for [`LlamaEngine`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LlamaEngineOptions {
    pub device: Device,
    /// Context window in tokens (prompt + generated)
    pub context_size: u32,
}

impl Default for LlamaEngineOptions {
    fn default() -> Self {
        Self {
            device: Device::Auto,
            context_size: 4096,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ChatEntry {
    role: &'static str,
    content: String,
}

/// Message history of an engine-managed chat
///
/// A turn is opened with [`begin_turn`](Self::begin_turn) and then either
/// committed with the reply or rolled back, so a failed generation leaves no
/// trace in the history.
#[derive(Debug, Default)]
struct EngineChatHistory {
    messages: Option<Vec<ChatEntry>>,
}

impl EngineChatHistory {
    fn is_open(&self) -> bool {
        self.messages.is_some()
    }

    fn start(&mut self) -> Result<(), InferenceError> {
        if self.messages.is_some() {
            return Err(InferenceError::ChatSession(
                "a chat is already in progress".to_string(),
            ));
        }
        self.messages = Some(Vec::new());
        Ok(())
    }

    /// Close the chat, returning how many messages it held
    fn finish(&mut self) -> Result<usize, InferenceError> {
        self.messages
            .take()
            .map(|messages| messages.len())
            .ok_or_else(|| InferenceError::ChatSession("no chat in progress".to_string()))
    }

    /// Append the user message and return the history to render
    fn begin_turn(&mut self, user: &str) -> Result<&[ChatEntry], InferenceError> {
        let messages = self
            .messages
            .as_mut()
            .ok_or_else(|| InferenceError::ChatSession("no chat in progress".to_string()))?;
        messages.push(ChatEntry {
            role: "user",
            content: user.to_string(),
        });
        Ok(messages)
    }

    fn commit(&mut self, reply: &str) {
        if let Some(messages) = self.messages.as_mut() {
            messages.push(ChatEntry {
                role: "assistant",
                content: reply.to_string(),
            });
        }
    }

    /// Drop the user message of a turn that failed
    fn rollback(&mut self) {
        if let Some(messages) = self.messages.as_mut() {
            if messages.last().map(|m| m.role) == Some("user") {
                messages.pop();
            }
        }
    }
}

/// Counters for a single prompt
struct RunStats {
    input_tokens: u64,
    new_tokens: u64,
    ttft: Duration,
    total: Duration,
}

impl RunStats {
    fn tpot_ms(&self) -> f64 {
        if self.new_tokens > 1 {
            (self.total - self.ttft).as_secs_f64() * 1000.0 / (self.new_tokens - 1) as f64
        } else {
            0.0
        }
    }

    fn throughput(&self) -> f64 {
        let tpot = self.tpot_ms();
        if tpot > 0.0 {
            1000.0 / tpot
        } else if self.total.as_secs_f64() > 0.0 {
            self.new_tokens as f64 / self.total.as_secs_f64()
        } else {
            0.0
        }
    }
}

/// Inference engine on top of llama.cpp
pub struct LlamaEngine {
    // Declared before the backend so the model is freed first.
    model: LlamaModel,
    backend: LlamaBackend,
    info: ModelInfo,
    options: LlamaEngineOptions,
    load_time_ms: f64,
    chat: EngineChatHistory,
}

impl LlamaEngine {
    /// Load the model at `path` on the requested device
    ///
    /// Blocks until the weights are loaded. Any failure here is fatal to the
    /// caller; nothing is retried.
    pub fn load(path: &Path, options: LlamaEngineOptions) -> Result<Self, InferenceError> {
        let started = Instant::now();

        let gpu_layers = gpu_layers_for(options.device)?;
        let model_file = resolve_model_file(path)?;
        let info = ModelInfo::from_path(&model_file);

        tracing::info!(
            "Loading {} ({} bytes) on {} with {} GPU layers",
            info.name,
            info.size_bytes,
            options.device,
            gpu_layers
        );

        let backend = LlamaBackend::init().map_err(|e| InferenceError::Backend(e.to_string()))?;
        let params = LlamaModelParams::default().with_n_gpu_layers(gpu_layers);
        let model = LlamaModel::load_from_file(&backend, &model_file, &params)
            .map_err(|e| InferenceError::ModelLoad(format!("{}: {}", model_file.display(), e)))?;

        let load_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        tracing::info!("Model loaded in {:.0} ms", load_time_ms);

        Ok(Self {
            model,
            backend,
            info,
            options,
            load_time_ms,
            chat: EngineChatHistory::default(),
        })
    }

    pub fn model_info(&self) -> &ModelInfo {
        &self.info
    }

    pub fn load_time_ms(&self) -> f64 {
        self.load_time_ms
    }

    /// Run one prompt to completion, pushing decoded text into `sink`
    fn run_prompt(
        &self,
        prompt: &str,
        add_bos: AddBos,
        config: &GenerationConfig,
        sink: &mut dyn TokenSink,
    ) -> Result<(String, RunStats), InferenceError> {
        let started = Instant::now();

        let ctx_params = LlamaContextParams::default().with_n_ctx(NonZeroU32::new(self.options.context_size));
        let mut ctx = self
            .model
            .new_context(&self.backend, ctx_params)
            .map_err(|e| InferenceError::Context(e.to_string()))?;

        let tokens = self
            .model
            .str_to_token(prompt, add_bos)
            .map_err(|e| InferenceError::Tokenize(e.to_string()))?;
        if tokens.is_empty() {
            return Err(InferenceError::Tokenize("prompt produced no tokens".to_string()));
        }

        let n_ctx = ctx.n_ctx() as usize;
        if tokens.len() >= n_ctx {
            return Err(InferenceError::ContextOverflow {
                prompt: tokens.len(),
                context: n_ctx,
            });
        }
        let budget = (config.max_new_tokens as usize).min(n_ctx - tokens.len());

        let mut batch = LlamaBatch::new(tokens.len().max(512), 1);
        let last_index = tokens.len() as i32 - 1;
        for (i, token) in (0_i32..).zip(tokens.iter().copied()) {
            batch
                .add(token, i, &[0], i == last_index)
                .map_err(|e| InferenceError::Decode(e.to_string()))?;
        }
        ctx.decode(&mut batch)
            .map_err(|e| InferenceError::Decode(e.to_string()))?;

        let mut sampler = build_sampler(config);
        let mut decoder = encoding_rs::UTF_8.new_decoder();
        let mut n_cur = batch.n_tokens();
        let mut text = String::new();
        let mut new_tokens: u64 = 0;
        let mut ttft: Option<Duration> = None;
        let mut stopped = false;

        while (new_tokens as usize) < budget {
            let token = sampler.sample(&ctx, batch.n_tokens() - 1);
            if self.model.is_eog_token(token) {
                break;
            }

            new_tokens += 1;
            if ttft.is_none() {
                ttft = Some(started.elapsed());
            }

            let bytes = self
                .model
                .token_to_bytes(token, Special::Tokenize)
                .map_err(|e| InferenceError::Decode(e.to_string()))?;
            let piece = decode_piece(&mut decoder, &bytes, false);

            if !piece.is_empty() {
                text.push_str(&piece);
                if sink.on_token(&piece) == StreamControl::Stop {
                    tracing::debug!("Generation stopped by sink after {} tokens", new_tokens);
                    stopped = true;
                    break;
                }
            }

            if new_tokens as usize >= budget {
                break;
            }

            batch.clear();
            batch
                .add(token, n_cur, &[0], true)
                .map_err(|e| InferenceError::Decode(e.to_string()))?;
            n_cur += 1;
            ctx.decode(&mut batch)
                .map_err(|e| InferenceError::Decode(e.to_string()))?;
        }

        // A reply cut inside a multibyte character ends in U+FFFD
        let tail = decode_piece(&mut decoder, &[], true);
        if !tail.is_empty() {
            text.push_str(&tail);
            if !stopped {
                sink.on_token(&tail);
            }
        }

        let total = started.elapsed();
        Ok((
            text,
            RunStats {
                input_tokens: tokens.len() as u64,
                new_tokens,
                ttft: ttft.unwrap_or(total),
                total,
            },
        ))
    }

    fn run(
        &mut self,
        prompts: &[String],
        config: &GenerationConfig,
        sink: &mut dyn TokenSink,
    ) -> Result<GenerationOutput, InferenceError> {
        if prompts.is_empty() {
            return Err(InferenceError::EmptyBatch);
        }

        let mut texts = Vec::with_capacity(prompts.len());
        let mut stats = Vec::with_capacity(prompts.len());

        for prompt in prompts {
            let (text, run) = if self.chat.is_open() {
                let model = &self.model;
                let rendered = self
                    .chat
                    .begin_turn(prompt)
                    .and_then(|history| render_chat(model, history));
                match rendered.and_then(|rendered| self.run_prompt(&rendered, AddBos::Never, config, sink)) {
                    Ok((text, run)) => {
                        self.chat.commit(&text);
                        (text, run)
                    }
                    Err(e) => {
                        self.chat.rollback();
                        return Err(e);
                    }
                }
            } else {
                self.run_prompt(prompt, AddBos::Always, config, sink)?
            };
            texts.push(text);
            stats.push(run);
        }

        Ok(GenerationOutput {
            texts,
            metrics: Some(aggregate(&stats, self.load_time_ms)),
        })
    }
}

/// Decode the next chunk of token bytes, holding back incomplete characters
/// until `last` is set
fn decode_piece(decoder: &mut Decoder, bytes: &[u8], last: bool) -> String {
    let mut piece = String::with_capacity(decoder.max_utf8_buffer_length(bytes.len()).unwrap_or(32));
    let mut input = bytes;
    loop {
        let (result, read, _) = decoder.decode_to_string(input, &mut piece, last);
        input = &input[read..];
        match result {
            CoderResult::InputEmpty => return piece,
            CoderResult::OutputFull => {
                piece.reserve(decoder.max_utf8_buffer_length(input.len()).unwrap_or(32).max(4))
            }
        }
    }
}

/// Render a chat history with the model's own chat template
fn render_chat(model: &LlamaModel, history: &[ChatEntry]) -> Result<String, InferenceError> {
    let template = model
        .chat_template(None)
        .map_err(|e| InferenceError::Template(e.to_string()))?;
    let messages = history
        .iter()
        .map(|entry| LlamaChatMessage::new(entry.role.to_string(), entry.content.clone()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| InferenceError::Template(e.to_string()))?;
    model
        .apply_chat_template(&template, &messages, true)
        .map_err(|e| InferenceError::Template(e.to_string()))
}

fn build_sampler(config: &GenerationConfig) -> LlamaSampler {
    if config.temperature <= 0.0 {
        return LlamaSampler::greedy();
    }
    LlamaSampler::chain_simple([
        LlamaSampler::top_k(config.top_k.max(1) as i32),
        LlamaSampler::top_p(config.top_p, 1),
        LlamaSampler::temp(config.temperature),
        LlamaSampler::dist(config.seed),
    ])
}

/// Means over prompts for latencies, sums for token counts
fn aggregate(stats: &[RunStats], load_time_ms: f64) -> PerfMetrics {
    PerfMetrics {
        load_time_ms,
        ttft_ms: mean_of(stats, |s| s.ttft.as_secs_f64() * 1000.0),
        tpot_ms: mean_of(stats, RunStats::tpot_ms),
        throughput: mean_of(stats, RunStats::throughput),
        generate_duration_ms: mean_of(stats, |s| s.total.as_secs_f64() * 1000.0),
        input_tokens: stats.iter().map(|s| s.input_tokens).sum(),
        new_tokens: stats.iter().map(|s| s.new_tokens).sum(),
    }
}

fn mean_of(stats: &[RunStats], f: impl Fn(&RunStats) -> f64) -> f64 {
    if stats.is_empty() {
        return 0.0;
    }
    stats.iter().map(f).sum::<f64>() / stats.len() as f64
}

impl InferenceEngine for LlamaEngine {
    #[tracing::instrument(skip(self, prompts, config), fields(prompts = prompts.len()))]
    fn generate(
        &mut self,
        prompts: &[String],
        config: &GenerationConfig,
    ) -> Result<GenerationOutput, InferenceError> {
        let mut discard = |_: &str| StreamControl::Continue;
        self.run(prompts, config, &mut discard)
    }

    #[tracing::instrument(skip(self, prompts, config, sink), fields(prompts = prompts.len()))]
    fn generate_stream(
        &mut self,
        prompts: &[String],
        config: &GenerationConfig,
        sink: &mut dyn TokenSink,
    ) -> Result<GenerationOutput, InferenceError> {
        self.run(prompts, config, sink)
    }

    fn start_chat(&mut self) -> Result<(), InferenceError> {
        self.chat.start()?;
        tracing::debug!("Starting engine chat session");
        Ok(())
    }

    fn finish_chat(&mut self) -> Result<(), InferenceError> {
        let messages = self.chat.finish()?;
        tracing::debug!("Finished engine chat session after {} messages", messages);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(new_tokens: u64, ttft_ms: u64, total_ms: u64) -> RunStats {
        RunStats {
            input_tokens: 10,
            new_tokens,
            ttft: Duration::from_millis(ttft_ms),
            total: Duration::from_millis(total_ms),
        }
    }

    #[test]
    fn test_run_stats_rates() {
        // 100 ms to the first token, then 10 tokens at 20 ms each
        let run = stats(11, 100, 300);
        assert!((run.tpot_ms() - 20.0).abs() < 1e-9);
        assert!((run.throughput() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_token_has_no_tpot() {
        let run = stats(1, 100, 100);
        assert_eq!(run.tpot_ms(), 0.0);
        assert!((run.throughput() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_means_and_sums() {
        let metrics = aggregate(&[stats(11, 100, 300), stats(11, 300, 500)], 3400.0);
        assert_eq!(metrics.load_time_ms, 3400.0);
        assert!((metrics.ttft_ms - 200.0).abs() < 1e-9);
        assert!((metrics.generate_duration_ms - 400.0).abs() < 1e-9);
        assert_eq!(metrics.input_tokens, 20);
        assert_eq!(metrics.new_tokens, 22);
        assert_eq!(metrics.total_tokens(), 42);
    }

    #[test]
    fn test_split_character_is_joined() {
        let mut decoder = encoding_rs::UTF_8.new_decoder();
        assert_eq!(decode_piece(&mut decoder, "caf".as_bytes(), false), "caf");
        assert_eq!(decode_piece(&mut decoder, &[0xC3], false), "");
        assert_eq!(decode_piece(&mut decoder, &[0xA9], false), "é");
        assert_eq!(decode_piece(&mut decoder, &[], true), "");
    }

    #[test]
    fn test_truncated_character_is_flushed() {
        let mut decoder = encoding_rs::UTF_8.new_decoder();
        assert_eq!(decode_piece(&mut decoder, &[b'a', 0xE2, 0x82], false), "a");
        assert_eq!(decode_piece(&mut decoder, &[], true), "\u{FFFD}");
    }

    #[test]
    fn test_chat_cannot_start_twice() {
        let mut chat = EngineChatHistory::default();
        chat.start().unwrap();
        assert!(matches!(chat.start(), Err(InferenceError::ChatSession(_))));
        assert!(chat.is_open());
    }

    #[test]
    fn test_finish_without_chat_is_an_error() {
        let mut chat = EngineChatHistory::default();
        assert!(matches!(chat.finish(), Err(InferenceError::ChatSession(_))));
        assert!(matches!(chat.begin_turn("hi"), Err(InferenceError::ChatSession(_))));

        chat.start().unwrap();
        assert_eq!(chat.finish().unwrap(), 0);
        assert!(!chat.is_open());
        assert!(chat.finish().is_err());
    }

    #[test]
    fn test_failed_turn_leaves_no_trace() {
        let mut chat = EngineChatHistory::default();
        chat.start().unwrap();

        assert_eq!(chat.begin_turn("hello").unwrap().len(), 1);
        chat.commit("hi there");

        let history = chat.begin_turn("tell me more").unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].content, "tell me more");
        chat.rollback();

        let history = chat.begin_turn("again").unwrap().to_vec();
        assert_eq!(
            history,
            vec![
                ChatEntry { role: "user", content: "hello".to_string() },
                ChatEntry { role: "assistant", content: "hi there".to_string() },
                ChatEntry { role: "user", content: "again".to_string() },
            ]
        );
        chat.commit("sure");
        assert_eq!(chat.finish().unwrap(), 4);
    }

    #[test]
    fn test_default_options() {
        let options = LlamaEngineOptions::default();
        assert_eq!(options.device, Device::Auto);
        assert_eq!(options.context_size, 4096);
    }
}
