use crate::shared::paths::{ensure_dir, get_log_dir};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Targets that get their own log file. Everything else lands in `system.log`.
pub const LOG_TARGETS: [&str; 1] = ["camera"];

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Failed to create logs directory: {0}")]
    Directory(#[from] std::io::Error),
    #[error("Failed to set global tracing subscriber: {0}")]
    Subscriber(String),
}

/// Keeps the non-blocking writers flushing. Drop it at shutdown, not before.
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

struct TargetWriter {
    writers: HashMap<String, NonBlocking>,
    system_writer: NonBlocking,
}

impl TargetWriter {
    fn new(writers: HashMap<String, NonBlocking>, system_writer: NonBlocking) -> Self {
        Self {
            writers,
            system_writer,
        }
    }

    fn route(&self, target: &str) -> &NonBlocking {
        self.writers
            .iter()
            .find(|(name, _)| target_matches(target, name))
            .map(|(_, writer)| writer)
            .unwrap_or(&self.system_writer)
    }
}

impl<'a> MakeWriter<'a> for TargetWriter {
    type Writer = NonBlocking;

    fn make_writer(&'a self) -> Self::Writer {
        self.system_writer.clone()
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        self.route(meta.target()).clone()
    }
}

/// A target belongs to `name` if it is `name` itself or one of its `name::` children.
fn target_matches(target: &str, name: &str) -> bool {
    target == name
        || target
            .strip_prefix(name)
            .is_some_and(|rest| rest.starts_with("::"))
}

/// Install the global subscriber writing to `{storage_dir}/logs`.
pub fn init_logging() -> Result<LoggingGuards, LoggingError> {
    init_logging_in(&get_log_dir())
}

/// Install the global subscriber writing daily-rolled files into `log_dir`.
pub fn init_logging_in(log_dir: &Path) -> Result<LoggingGuards, LoggingError> {
    ensure_dir(log_dir)?;

    let mut guards = Vec::new();
    let mut target_writers = HashMap::new();

    for target in LOG_TARGETS {
        let file_appender =
            RollingFileAppender::new(Rotation::DAILY, log_dir, format!("{}.log", target));
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        target_writers.insert(target.to_string(), non_blocking);
        guards.push(guard);
    }

    let system_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "system.log");
    let (system_writer, system_guard) = tracing_appender::non_blocking(system_appender);
    guards.push(system_guard);

    let writer = TargetWriter::new(target_writers, system_writer);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry().with(env_filter).with(
        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false),
    );

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| LoggingError::Subscriber(e.to_string()))?;

    tracing::info!(target: "system", "Logging initialized at {:?}", log_dir);

    Ok(LoggingGuards { _guards: guards })
}
