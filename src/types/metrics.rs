//! Performance metrics
//!
//! Raw counters reported by an inference engine after a generation call.
//! Durations are in milliseconds, exactly as the engine measures them.

use serde::{Deserialize, Serialize};

/// Per-call performance record produced by the engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerfMetrics {
    /// Time spent loading the model, in milliseconds
    pub load_time_ms: f64,
    /// Mean time to first token, in milliseconds
    pub ttft_ms: f64,
    /// Mean time per output token after the first, in milliseconds
    pub tpot_ms: f64,
    /// Mean generated tokens per second
    pub throughput: f64,
    /// Mean end-to-end generation time, in milliseconds
    pub generate_duration_ms: f64,
    /// Number of prompt tokens
    pub input_tokens: u64,
    /// Number of generated tokens
    pub new_tokens: u64,
}

impl PerfMetrics {
    pub fn load_time_ms(&self) -> f64 {
        self.load_time_ms
    }

    pub fn ttft_ms(&self) -> f64 {
        self.ttft_ms
    }

    pub fn tpot_ms(&self) -> f64 {
        self.tpot_ms
    }

    pub fn throughput(&self) -> f64 {
        self.throughput
    }

    pub fn generate_duration_ms(&self) -> f64 {
        self.generate_duration_ms
    }

    pub fn input_tokens(&self) -> u64 {
        self.input_tokens
    }

    pub fn new_tokens(&self) -> u64 {
        self.new_tokens
    }

    /// Prompt plus generated tokens
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.new_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_tokens() {
        let metrics = PerfMetrics {
            input_tokens: 12,
            new_tokens: 30,
            ..PerfMetrics::default()
        };
        assert_eq!(metrics.total_tokens(), 42);
    }
}
