use crate::error::{Result, SyncError};
use std::path::Path;
use tracing_appender::rolling;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Stdout at `log_level` plus an hourly rolling DEBUG file under `log_dir`.
/// `RUST_LOG` overrides both.
pub fn init_logging(log_level: &str, log_dir: &Path) -> Result<()> {
    let level: LevelFilter = log_level
        .parse()
        .map_err(|_| SyncError::Config(format!("unknown log level {log_level:?}")))?;

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .with_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        );

    let file_layer = fmt::layer()
        .with_writer(rolling::hourly(log_dir, "ptz-sync"))
        .with_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::DEBUG.into())
                .from_env_lossy(),
        );

    Registry::default()
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|err| SyncError::Config(format!("logging already initialized: {err}")))
}
