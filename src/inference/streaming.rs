//! Token streaming
//!
//! A [`TokenSink`] receives generated text piece by piece while the engine is
//! still running. Rendering lives here so the engine never touches the terminal.

use std::io::Write;
use std::time::Duration;

/// Whether generation should keep going after a token was delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamControl {
    Continue,
    Stop,
}

/// Receiver of streamed tokens
pub trait TokenSink {
    fn on_token(&mut self, token: &str) -> StreamControl;
}

impl<F> TokenSink for F
where
    F: FnMut(&str) -> StreamControl,
{
    fn on_token(&mut self, token: &str) -> StreamControl {
        self(token)
    }
}

/// Writes each token straight to a terminal-like writer
pub struct TerminalSink<W: Write> {
    out: W,
    delay: Option<Duration>,
    text: String,
    error: Option<std::io::Error>,
}

impl<W: Write> TerminalSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            delay: None,
            text: String::new(),
            error: None,
        }
    }

    /// Pause after each token. Display effect only.
    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay = (delay_ms > 0).then(|| Duration::from_millis(delay_ms));
        self
    }

    /// Hand back the collected text and the first write error, if any
    pub fn finish(self) -> (String, Option<std::io::Error>) {
        (self.text, self.error)
    }
}

impl<W: Write> TokenSink for TerminalSink<W> {
    fn on_token(&mut self, token: &str) -> StreamControl {
        self.text.push_str(token);

        let written = self
            .out
            .write_all(token.as_bytes())
            .and_then(|_| self.out.flush());
        if let Err(e) = written {
            tracing::warn!("Stopping stream, terminal write failed: {}", e);
            self.error = Some(e);
            return StreamControl::Stop;
        }

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        StreamControl::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_sink_writes_and_collects() {
        let mut buf = Vec::new();
        {
            let mut sink = TerminalSink::new(&mut buf);
            assert_eq!(sink.on_token("hi"), StreamControl::Continue);
            assert_eq!(sink.on_token(" there"), StreamControl::Continue);
            let (text, error) = sink.finish();
            assert_eq!(text, "hi there");
            assert!(error.is_none());
        }
        assert_eq!(String::from_utf8(buf).unwrap(), "hi there");
    }

    #[test]
    fn test_closure_is_a_sink() {
        let mut seen = Vec::new();
        let mut sink = |token: &str| {
            seen.push(token.to_string());
            if seen.len() == 2 {
                StreamControl::Stop
            } else {
                StreamControl::Continue
            }
        };
        assert_eq!(sink.on_token("a"), StreamControl::Continue);
        assert_eq!(sink.on_token("b"), StreamControl::Stop);
        assert_eq!(seen, vec!["a", "b"]);
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_failure_stops_stream() {
        let mut sink = TerminalSink::new(BrokenPipe);
        assert_eq!(sink.on_token("x"), StreamControl::Stop);
        let (_, error) = sink.finish();
        assert_eq!(error.map(|e| e.kind()), Some(std::io::ErrorKind::BrokenPipe));
    }
}
