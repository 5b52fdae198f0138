//! Subscriber setup and run-level events shared by the binaries.

use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

const FALLBACK_LEVEL: &str = "info";

/// Parses `STOCKWIDE_LOG_LEVEL` directives, e.g. `info,stockwide=debug`.
/// An unparsable value yields the fallback filter and the parse error.
fn level_filter(level: &str) -> (EnvFilter, Option<String>) {
    match EnvFilter::try_new(level) {
        Ok(filter) => (filter, None),
        Err(err) => (EnvFilter::new(FALLBACK_LEVEL), Some(err.to_string())),
    }
}

/// Installs the global subscriber. A bad level never blocks a run; it is
/// reported once the subscriber is live.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let (env_filter, rejected) = level_filter(&config.level);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.include_target)
        .with_ansi(matches!(config.format, LogFormat::Pretty));

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }

    if let Some(reason) = rejected {
        warn!(
            component = "logging",
            event = "logging.level.fallback",
            requested = %config.level,
            fallback = FALLBACK_LEVEL,
            reason = %reason
        );
    }
    Ok(())
}

pub fn log_run_start(run: &str, config: &LoggingConfig) {
    info!(
        component = run,
        event = "run.start",
        log_level = %config.level,
        log_format = ?config.format,
        include_target = config.include_target
    );
}

pub fn log_run_finish(run: &str, elapsed: Duration) {
    info!(
        component = run,
        event = "run.finish",
        elapsed_ms = elapsed.as_millis() as u64
    );
}

pub fn log_run_failed(run: &str, err: &dyn std::error::Error) {
    error!(component = run, event = "run.failed", error = %err);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_module_directives_are_accepted() {
        let (_, rejected) = level_filter("info,stockwide=debug");
        assert!(rejected.is_none());
    }

    #[test]
    fn unknown_levels_fall_back_with_a_reason() {
        let (filter, rejected) = level_filter("stockwide=loud");
        assert!(rejected.is_some());
        assert_eq!(filter.to_string(), FALLBACK_LEVEL);
    }
}
