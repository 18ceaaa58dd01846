use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "piano.log";

/// Keeps the non-blocking file writer flushing; dropped on shutdown.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Stdout logging always; a daily-rolling file sink when `file_dir` is set.
pub fn init(filter: &str, file_dir: Option<&Path>) -> LogGuard {
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(true);
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);

    match file_dir.and_then(file_writer) {
        Some((writer, guard)) => {
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            registry.with(file_layer).init();
            LogGuard {
                _file: Some(guard),
            }
        }
        None => {
            registry.init();
            LogGuard { _file: None }
        }
    }
}

fn file_writer(dir: &Path) -> Option<(NonBlocking, WorkerGuard)> {
    if let Err(err) = std::fs::create_dir_all(dir) {
        eprintln!("failed to create log directory {}: {err}", dir.display());
        return None;
    }
    let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
    Some(tracing_appender::non_blocking(appender))
}
