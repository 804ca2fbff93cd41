//! Logging configuration and initialization

use crate::config::LoggingConfig;
use crate::error::{PipelineError, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "nano-batch.log";

/// Initialize the logging system.
///
/// `RUST_LOG` wins over the configured level. With `output_path` set, logs go
/// to a daily-rolling file and the returned guard must be kept alive for
/// the writer to flush.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| PipelineError::LoggingError {
            message: format!("Invalid log level '{}': {}", config.level, e),
        })?;

    let (result, guard) = match &config.output_path {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let result = tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false),
                )
                .try_init();
            (result, Some(guard))
        }
        None => {
            let result = tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_ansi(config.ansi),
                )
                .try_init();
            (result, None)
        }
    };

    match result {
        Ok(()) => Ok(guard),
        Err(e) => {
            // Already initialized elsewhere, e.g. by another test
            if e.to_string().contains("already") {
                Ok(None)
            } else {
                Err(PipelineError::LoggingError {
                    message: format!("Failed to initialize logging: {}", e),
                })
            }
        }
    }
}
