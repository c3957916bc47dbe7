use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::storage::{DataPath, DataPathType};

/// Console plus a daily rolling file under `logs/`. The returned guard
/// flushes the file writer when dropped, so keep it alive for the whole run.
pub fn setup_logging(path: &DataPath, debug: bool) -> Option<WorkerGuard> {
    let default_filter = if debug {
        "chorus=debug,nrelay=debug,chorus_cli=debug"
    } else {
        "chorus=info,nrelay=info,chorus_cli=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let log_path = path.path(DataPathType::Log);
    if let Err(err) = std::fs::create_dir_all(&log_path) {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
        tracing::warn!("logging to console only, {}: {err}", log_path.display());
        return None;
    }

    use tracing_appender::{
        non_blocking,
        rolling::{RollingFileAppender, Rotation},
    };
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let file_appender = RollingFileAppender::new(
        Rotation::DAILY,
        log_path,
        format!("chorus-{}.log", env!("CARGO_PKG_VERSION")),
    );
    let (non_blocking_writer, guard) = non_blocking(file_appender);

    let console_layer = fmt::layer().with_target(true).with_writer(std::io::stdout);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking_writer);

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Some(guard)
}
