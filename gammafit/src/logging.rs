use anyhow::{Context, Result};
use flexi_logger::{Logger, LoggerHandle};

/// Starts logging to stderr at `base_level` unless `RUST_LOG` says otherwise.
///
/// The returned handle must be kept alive for as long as the program logs.
pub fn setup_logging(base_level: &str) -> Result<LoggerHandle> {
    Logger::try_with_env_or_str(base_level)
        .with_context(|| format!("invalid log specification '{}'", base_level))?
        .log_to_stderr()
        .start()
        .context("logger initialization failed")
}
