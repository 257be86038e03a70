use crate::error::ConfigError;
use crate::settings::LoggingSettings;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global tracing subscriber.
///
/// Console output is always enabled. When `settings.directory` is set, a
/// second, non-ANSI layer writes to a daily rolling file; the returned guard
/// must be kept alive for the lifetime of the process so buffered lines are
/// flushed on exit.
pub fn init_tracing(settings: &LoggingSettings) -> Result<Option<WorkerGuard>, ConfigError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.as_str()));

    let console = fmt::layer().with_target(true);

    match &settings.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, &settings.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = fmt::layer().with_ansi(false).with_writer(writer);

            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(file)
                .try_init()
                .map_err(|e| ConfigError::LoggingInit(e.to_string()))?;

            tracing::info!(directory = %directory.display(), "File logging enabled.");
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .try_init()
                .map_err(|e| ConfigError::LoggingInit(e.to_string()))?;
            Ok(None)
        }
    }
}
