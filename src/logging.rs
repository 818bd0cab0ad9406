//! Tracing subscriber setup.
//!
//! Logs go to an append-only file (default `conversion.log` in the watched
//! directory) or to stderr. `RUST_LOG` takes precedence over the configured
//! level.

use std::path::Path;
use std::str::FromStr;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::{NonBlockingBuilder, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

/// Build the filter from `RUST_LOG`, else from `level`.
pub fn env_filter(level: LevelFilter) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| level_filter(level))
}

/// Filter that admits `level` and everything more severe.
fn level_filter(level: LevelFilter) -> EnvFilter {
    EnvFilter::default().add_directive(level.into())
}

/// Map user-facing level names onto tracing levels.
fn normalize_level(level: &str) -> String {
    match level.trim().to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "critical" | "fatal" => "error".to_string(),
        "" => "info".to_string(),
        other => other.to_string(),
    }
}

/// Parse a configured level name. Accepts tracing names (`trace` .. `error`,
/// `off`) and the `warning`/`critical` spellings, case-insensitively.
pub fn parse_level(level: &str) -> Option<LevelFilter> {
    LevelFilter::from_str(&normalize_level(level)).ok()
}

/// Install the global subscriber.
///
/// With a file destination the returned guard must be held until exit so
/// buffered lines are flushed.
pub fn init(
    level: LevelFilter,
    destination: Option<&Path>,
) -> std::io::Result<Option<WorkerGuard>> {
    let filter = env_filter(level);

    let Some(path) = destination else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
        return Ok(None);
    };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| std::io::Error::other(format!("invalid log file path {}", path.display())))?;
    std::fs::create_dir_all(&dir)?;

    // Rotation::NEVER appends to exactly `<dir>/<file_name>`.
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(&dir)
        .map_err(std::io::Error::other)?;
    // Block rather than drop lines when a chatty converter fills the buffer.
    let (writer, guard) = NonBlockingBuilder::default().lossy(false).finish(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(writer)
        .init();
    Ok(Some(guard))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Run `f` under a subscriber filtered at `level` and return what it logged.
    pub fn capture<T>(level: LevelFilter, f: impl FnOnce() -> T) -> (T, String) {
        let buf = Buffer::default();
        let writer = buf.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(level_filter(level))
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let value = tracing::subscriber::with_default(subscriber, f);
        let bytes = buf.0.lock().unwrap().clone();
        (value, String::from_utf8(bytes).unwrap())
    }
}
