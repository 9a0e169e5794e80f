//! Logging setup
//!
//! Logs go to stderr so they never interleave with the chat transcript on
//! stdout. `RUST_LOG` overrides the default level.

use crate::error::{AppError, Result};
use tracing_subscriber::EnvFilter;

pub fn init_tracing(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| AppError::Logging(e.to_string()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| AppError::Logging(e.to_string()))?;

    tracing::debug!("logging initialized (default level {})", default_level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_refused() {
        let _ = init_tracing("warn");
        assert!(matches!(init_tracing("warn"), Err(AppError::Logging(_))));
    }
}
