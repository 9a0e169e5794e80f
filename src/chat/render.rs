//! Performance table rendering
//!
//! Flattens engine metrics into display units: seconds for load, first-token
//! and total latency, milliseconds per token, tokens per second and counts.

use crate::types::PerfMetrics;
use std::fmt;
use std::io::{self, Write};

/// A single value in the performance table
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    /// Rounded to two decimals for display
    Float(f64),
    Count(u64),
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Count(n) => write!(f, "{}", n),
            MetricValue::Float(x) => f.write_str(&format_decimal(round2(*x))),
        }
    }
}

/// Round to two decimals on the exact binary value, ties to even
///
/// `1.005` is stored just below the tie and becomes `1.0`; `0.125` is an exact
/// tie and becomes `0.12`.
fn round2(x: f64) -> f64 {
    if !x.is_finite() {
        return x;
    }
    // Only multiples of 1/8 with an odd numerator sit exactly on a tie.
    let eighths = x * 8.0;
    if eighths.fract() == 0.0 && eighths % 2.0 != 0.0 {
        return (x * 100.0).round_ties_even() / 100.0;
    }
    format!("{:.2}", x).parse().unwrap_or(x)
}

/// Shortest decimal form, keeping at least one fractional digit (`50.0`, `0.25`)
fn format_decimal(x: f64) -> String {
    let s = x.to_string();
    if !x.is_finite() || s.contains('.') {
        s
    } else {
        format!("{}.0", s)
    }
}

/// Ordered key/value view of a [`PerfMetrics`] record
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceReport {
    entries: Vec<(&'static str, MetricValue)>,
}

impl PerformanceReport {
    pub fn get(&self, key: &str) -> Option<MetricValue> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
    }

    /// Write the table with keys padded to the widest key
    pub fn write_table<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let key_width = self.entries.iter().map(|(k, _)| k.len()).max().unwrap_or(0);

        writeln!(out, "\n--- Performance ---")?;
        for (key, value) in &self.entries {
            writeln!(out, "  {:<width$} : {}", key, value, width = key_width)?;
        }
        writeln!(out, "-------------------")?;
        Ok(())
    }
}

impl From<&PerfMetrics> for PerformanceReport {
    fn from(m: &PerfMetrics) -> Self {
        Self {
            entries: vec![
                ("load_time (s)", MetricValue::Float(m.load_time_ms() / 1000.0)),
                ("ttft (s)", MetricValue::Float(m.ttft_ms() / 1000.0)),
                ("tpot (ms)", MetricValue::Float(m.tpot_ms())),
                ("throughput (tokens/s)", MetricValue::Float(m.throughput())),
                (
                    "generate_duration (s)",
                    MetricValue::Float(m.generate_duration_ms() / 1000.0),
                ),
                ("input_tokens", MetricValue::Count(m.input_tokens())),
                ("new_tokens", MetricValue::Count(m.new_tokens())),
                ("total_tokens", MetricValue::Count(m.total_tokens())),
            ],
        }
    }
}
