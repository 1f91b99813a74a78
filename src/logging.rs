use std::path::Path;

use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Target every recorder event is emitted under.
pub const RECORDER_TARGET: &str = "mp4stream";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoggingError {
    #[error("Failed to create log directory: {0}")]
    CreateDir(String),
    #[error("Failed to create log file: {0}")]
    Appender(String),
    #[error("A global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Guards that must be kept alive to ensure logs are flushed
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

/// Routes recorder events to `mp4stream.log` and everything else to `system.log`.
struct TargetWriter {
    recorder: NonBlocking,
    system: NonBlocking,
}

impl<'a> MakeWriter<'a> for TargetWriter {
    type Writer = NonBlocking;

    fn make_writer(&'a self) -> Self::Writer {
        self.system.clone()
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        let target = meta.target();
        if target == RECORDER_TARGET || target.starts_with("mp4stream_lib") {
            self.recorder.clone()
        } else {
            self.system.clone()
        }
    }
}

fn daily_appender(log_dir: &Path, file_name: &str) -> Result<RollingFileAppender, LoggingError> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(file_name)
        .build(log_dir)
        .map_err(|e| LoggingError::Appender(e.to_string()))
}

/// Initialize the global subscriber writing daily-rolling files under `log_dir`.
///
/// `RUST_LOG` overrides the default `info` filter.
pub fn init_logging(log_dir: &Path) -> Result<LoggingGuards, LoggingError> {
    crate::shared::paths::ensure_dir(log_dir).map_err(|e| LoggingError::CreateDir(e.to_string()))?;

    let (recorder, recorder_guard) =
        tracing_appender::non_blocking(daily_appender(log_dir, "mp4stream.log")?);
    let (system, system_guard) = tracing_appender::non_blocking(daily_appender(log_dir, "system.log")?);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry().with(env_filter).with(
        tracing_subscriber::fmt::layer()
            .with_writer(TargetWriter { recorder, system })
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(true),
    );

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|_| LoggingError::AlreadyInitialized)?;

    tracing::info!(target: "system", "Logging initialized at {:?}", log_dir);

    Ok(LoggingGuards {
        _guards: vec![recorder_guard, system_guard],
    })
}
