//! Chat session
//!
//! One session owns the engine for its whole lifetime and walks the states
//! `Loaded → AwaitingInput → Generating → Rendering → … → Terminated`.

use super::render::PerformanceReport;
use super::ChatError;
use crate::inference::{GenerationConfig, GenerationOutput, InferenceEngine, InferenceError, TerminalSink};
use crate::types::{ChatConfig, HistoryMode, Transcript, Turn};
use std::io::{BufRead, Write};

/// Where the loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatState {
    #[default]
    Uninitialized,
    Loaded,
    AwaitingInput,
    Generating,
    Rendering,
    Terminated,
}

/// `exit` or `quit`, any case, surrounding whitespace ignored
pub fn is_exit_command(line: &str) -> bool {
    let line = line.trim();
    line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit")
}

/// Keeps an engine-side chat open and closes it exactly once
///
/// `finish` is the normal path; dropping an unfinished guard (early return or
/// unwinding) still closes the engine chat.
struct EngineChat<'e, E: InferenceEngine> {
    engine: &'e mut E,
    open: bool,
}

impl<'e, E: InferenceEngine> EngineChat<'e, E> {
    fn start(engine: &'e mut E) -> Result<Self, InferenceError> {
        engine.start_chat()?;
        tracing::debug!("Engine chat started");
        Ok(Self { engine, open: true })
    }

    fn engine(&mut self) -> &mut E {
        &mut *self.engine
    }

    fn finish(mut self) -> Result<(), InferenceError> {
        self.open = false;
        tracing::debug!("Engine chat finished");
        self.engine.finish_chat()
    }
}

impl<E: InferenceEngine> Drop for EngineChat<'_, E> {
    fn drop(&mut self) {
        if self.open {
            self.open = false;
            if let Err(e) = self.engine.finish_chat() {
                tracing::warn!("Failed to close engine chat: {}", e);
            }
        }
    }
}

/// Borrowed loop state, split from the engine so the engine can sit behind
/// an [`EngineChat`] guard
struct TurnLoop<'s> {
    config: &'s ChatConfig,
    generation: &'s GenerationConfig,
    transcript: &'s mut Transcript,
    state: &'s mut ChatState,
}

impl TurnLoop<'_> {
    fn drive<E, R, W>(&mut self, engine: &mut E, input: &mut R, out: &mut W) -> Result<usize, ChatError>
    where
        E: InferenceEngine,
        R: BufRead,
        W: Write,
    {
        let mut turns = 0;
        loop {
            *self.state = ChatState::AwaitingInput;
            write!(out, "\nYou: ")?;
            out.flush()?;

            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                writeln!(out)?;
                tracing::debug!("End of input");
                break;
            }
            let user_input = line.trim_end_matches(['\n', '\r']);
            if is_exit_command(user_input) {
                break;
            }

            *self.state = ChatState::Generating;
            let prompt = match self.config.history_mode {
                HistoryMode::Manual => self.transcript.prompt_for(user_input),
                HistoryMode::Engine => user_input.to_string(),
            };
            tracing::debug!(turn = turns + 1, prompt_chars = prompt.len(), "Submitting prompt");

            let output = self.generate(engine, prompt, out)?;
            let bot_text = output.first_text().to_string();
            self.transcript.push(Turn::new(user_input, bot_text));
            turns += 1;

            if let Some(metrics) = &output.metrics {
                PerformanceReport::from(metrics).write_table(out)?;
            }
        }
        Ok(turns)
    }

    fn generate<E, W>(&mut self, engine: &mut E, prompt: String, out: &mut W) -> Result<GenerationOutput, ChatError>
    where
        E: InferenceEngine,
        W: Write,
    {
        let prompts = [prompt];

        if !self.config.streaming {
            let output = engine.generate(&prompts, self.generation)?;
            *self.state = ChatState::Rendering;
            writeln!(out, "Bot: {}", output.first_text())?;
            return Ok(output);
        }

        write!(out, "Bot: ")?;
        out.flush()?;
        let mut sink = TerminalSink::new(&mut *out).with_delay(self.config.stream_delay_ms);
        let result = engine.generate_stream(&prompts, self.generation, &mut sink);
        let (_, write_error) = sink.finish();
        let output = result?;
        if let Some(e) = write_error {
            return Err(e.into());
        }

        *self.state = ChatState::Rendering;
        writeln!(out)?;
        Ok(output)
    }
}

/// An interactive session over one loaded engine
pub struct ChatSession<E: InferenceEngine> {
    engine: E,
    config: ChatConfig,
    generation: GenerationConfig,
    transcript: Transcript,
    state: ChatState,
}

impl<E: InferenceEngine> ChatSession<E> {
    pub fn new(engine: E, config: ChatConfig) -> Self {
        let generation = GenerationConfig::default().with_max_new_tokens(config.max_new_tokens);
        Self {
            engine,
            config,
            generation,
            transcript: Transcript::new(),
            state: ChatState::Loaded,
        }
    }

    /// Sampling settings for every turn. The token cap always comes from the
    /// session config.
    pub fn with_generation_config(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation.with_max_new_tokens(self.config.max_new_tokens);
        self
    }

    pub fn generation_config(&self) -> &GenerationConfig {
        &self.generation
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn state(&self) -> ChatState {
        self.state
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Run the loop until `exit`/`quit` or end of input
    ///
    /// Returns the number of completed turns. In engine history mode the
    /// engine chat is opened before the first read and closed on every exit
    /// path, including errors.
    pub fn run<R: BufRead, W: Write>(&mut self, mut input: R, mut out: W) -> Result<usize, ChatError> {
        writeln!(out, "\n--- Chatbot Ready ---")?;
        writeln!(out, "Type 'exit' or 'quit' to end the session.")?;

        let history_mode = self.config.history_mode;
        let Self {
            engine,
            config,
            generation,
            transcript,
            state,
        } = self;
        let mut turn_loop = TurnLoop {
            config: &*config,
            generation: &*generation,
            transcript,
            state,
        };

        let turns = match history_mode {
            HistoryMode::Manual => turn_loop.drive(engine, &mut input, &mut out),
            HistoryMode::Engine => {
                let mut chat = EngineChat::start(engine)?;
                let result = turn_loop.drive(chat.engine(), &mut input, &mut out);
                let finished = chat.finish();
                match (result, finished) {
                    (Ok(turns), Ok(())) => Ok(turns),
                    (Ok(_), Err(e)) => Err(e.into()),
                    (Err(e), finished) => {
                        if let Err(close_err) = finished {
                            tracing::warn!("Failed to close engine chat: {}", close_err);
                        }
                        Err(e)
                    }
                }
            }
        };

        *turn_loop.state = ChatState::Terminated;
        let turns = turns?;
        writeln!(out, "\nChat session ended.")?;
        tracing::info!("Chat session ended after {} turns", turns);
        Ok(turns)
    }
}
