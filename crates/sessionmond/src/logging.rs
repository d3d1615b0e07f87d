//! Subscriber setup from the `[logging]` section.

use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::Context;
use tracing::Dispatch;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, fmt};

use sessionmon_core::LoggingConfig;

/// `RUST_LOG` wins over the configured level when set.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.as_str()))
}

/// Build the dispatcher: an optional console layer plus an optional
/// append-only file layer, both behind `filter`.
pub fn dispatch(config: &LoggingConfig, filter: EnvFilter) -> anyhow::Result<Dispatch> {
    let console = config
        .console
        .then(|| fmt::layer().with_target(true));

    let file = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file);
    Ok(Dispatch::new(subscriber))
}

/// Install the global subscriber.
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let dispatch = dispatch(config, env_filter(config))?;
    tracing::dispatcher::set_global_default(dispatch).context("logging already initialized")?;

    tracing::info!(
        level = %config.level,
        file = ?config.file,
        console = config.console,
        "logging initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sessionmon_core::LogLevel;

    #[test]
    fn file_layer_respects_level() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessionmond.log");
        let config = LoggingConfig {
            level: LogLevel::Warn,
            file: Some(path.clone()),
            console: false,
        };

        let dispatch = dispatch(&config, EnvFilter::new(config.level.as_str())).unwrap();
        tracing::dispatcher::with_default(&dispatch, || {
            tracing::info!("quiet");
            tracing::warn!(server = "edge-1", "loud");
        });

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("quiet"));
        assert!(content.contains("loud"));
        assert!(content.contains("server=\"edge-1\""));
        assert!(!content.contains('\u{1b}'), "file output must not carry ANSI codes");
    }

    #[test]
    fn unopenable_log_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            level: LogLevel::Info,
            file: Some(dir.path().join("missing").join("sessionmond.log")),
            console: false,
        };

        assert!(dispatch(&config, EnvFilter::new("info")).is_err());
    }
}
