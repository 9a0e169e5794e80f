//! Scripted engine for exercising the chat loop without a model

use super::streaming::{StreamControl, TokenSink};
use super::{GenerationConfig, GenerationOutput, InferenceEngine, InferenceError};
use crate::types::PerfMetrics;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Generate { prompts: Vec<String>, max_new_tokens: u32 },
    GenerateStream { prompts: Vec<String>, max_new_tokens: u32 },
    StartChat,
    FinishChat,
}

/// Replies with canned texts and records every call it receives
pub(crate) struct ScriptedEngine {
    replies: VecDeque<String>,
    metrics: Option<PerfMetrics>,
    fail_on_generate: bool,
    pub(crate) calls: Vec<Call>,
}

impl ScriptedEngine {
    pub(crate) fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: replies.into_iter().map(Into::into).collect(),
            metrics: None,
            fail_on_generate: false,
            calls: Vec::new(),
        }
    }

    pub(crate) fn with_metrics(mut self, metrics: PerfMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub(crate) fn failing(mut self) -> Self {
        self.fail_on_generate = true;
        self
    }

    pub(crate) fn generate_calls(&self) -> Vec<&[String]> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Generate { prompts, .. } | Call::GenerateStream { prompts, .. } => {
                    Some(prompts.as_slice())
                }
                _ => None,
            })
            .collect()
    }

    fn next_output(&mut self) -> Result<GenerationOutput, InferenceError> {
        if self.fail_on_generate {
            return Err(InferenceError::Decode("scripted failure".to_string()));
        }
        let text = self.replies.pop_front().unwrap_or_default();
        Ok(GenerationOutput {
            texts: vec![text],
            metrics: self.metrics,
        })
    }
}

impl InferenceEngine for ScriptedEngine {
    fn generate(
        &mut self,
        prompts: &[String],
        config: &GenerationConfig,
    ) -> Result<GenerationOutput, InferenceError> {
        self.calls.push(Call::Generate {
            prompts: prompts.to_vec(),
            max_new_tokens: config.max_new_tokens,
        });
        self.next_output()
    }

    fn generate_stream(
        &mut self,
        prompts: &[String],
        config: &GenerationConfig,
        sink: &mut dyn TokenSink,
    ) -> Result<GenerationOutput, InferenceError> {
        self.calls.push(Call::GenerateStream {
            prompts: prompts.to_vec(),
            max_new_tokens: config.max_new_tokens,
        });
        let output = self.next_output()?;
        for word in output.first_text().split_inclusive(' ') {
            if sink.on_token(word) == StreamControl::Stop {
                break;
            }
        }
        Ok(output)
    }

    fn start_chat(&mut self) -> Result<(), InferenceError> {
        self.calls.push(Call::StartChat);
        Ok(())
    }

    fn finish_chat(&mut self) -> Result<(), InferenceError> {
        self.calls.push(Call::FinishChat);
        Ok(())
    }
}
