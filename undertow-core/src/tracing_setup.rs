//! Log output for the relay server.
//!
//! The console gets the level chosen on the command line. A per-run file in
//! the logs directory gets everything, including subprocess stderr lines and
//! per-packet reassembly diagnostics.

use std::fs::{File, create_dir_all};
use std::io;
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// File name of the full log, replaced on every run.
pub const LOG_FILE_NAME: &str = "undertow-last-run.log";

/// Dependencies that are noisy below `info` on the console.
const QUIET_TARGETS: [&str; 3] = ["hyper", "tower_http", "tungstenite"];

/// Errors installing the global subscriber
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("Failed to create log file {}: {source}", .path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Global subscriber already installed")]
    AlreadyInitialized,
}

/// Installs console and file logging.
///
/// `RUST_LOG` overrides the console filter when set. The file layer is
/// always TRACE and written without ANSI colors to
/// `<logs_dir>/undertow-last-run.log` (`logs/` when no directory is given).
///
/// # Errors
///
/// - `TracingError::LogFile` - Logs directory or file could not be created
/// - `TracingError::AlreadyInitialized` - Called twice in one process
pub fn init_tracing(console_level: Level, logs_dir: Option<&Path>) -> Result<(), TracingError> {
    let log_file_path = logs_dir.unwrap_or_else(|| Path::new("logs")).join(LOG_FILE_NAME);
    let log_file = open_log_file(&log_file_path).map_err(|source| TracingError::LogFile {
        path: log_file_path.clone(),
        source,
    })?;

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_directives(console_level)));
    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_filter(console_filter);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(log_file)
        .with_filter(EnvFilter::new("trace"));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|_| TracingError::AlreadyInitialized)?;

    tracing::info!(
        "Logging to console at {} and to {}",
        console_level,
        log_file_path.display()
    );
    Ok(())
}

fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(dir) = path.parent() {
        create_dir_all(dir)?;
    }
    File::create(path)
}

/// Console filter directives: the chosen level, capped at `info` for
/// HTTP and WebSocket plumbing.
fn console_directives(level: Level) -> String {
    let mut directives = level.to_string().to_lowercase();
    if level > Level::INFO {
        for target in QUIET_TARGETS {
            directives.push_str(&format!(",{target}=info"));
        }
    }
    directives
}

/// Console verbosity selectable with `--log-level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliLogLevel {
    Error,
    Warn,
    Info,
    /// Includes process lifecycle and seek transitions
    Debug,
    /// Includes every relayed packet and NAL unit
    Trace,
}

impl From<CliLogLevel> for Level {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::ValueEnum;

    use super::*;

    #[test]
    fn test_cli_level_names() {
        assert_eq!(CliLogLevel::from_str("warn", true), Ok(CliLogLevel::Warn));
        assert_eq!(CliLogLevel::from_str("TRACE", true), Ok(CliLogLevel::Trace));
        assert!(CliLogLevel::from_str("verbose", true).is_err());
        assert_eq!(Level::from(CliLogLevel::Debug), Level::DEBUG);
    }

    #[test]
    fn test_verbose_console_quiets_plumbing() {
        assert_eq!(console_directives(Level::WARN), "warn");
        assert_eq!(console_directives(Level::INFO), "info");
        assert_eq!(
            console_directives(Level::TRACE),
            "trace,hyper=info,tower_http=info,tungstenite=info"
        );
    }

    #[test]
    fn test_init_creates_log_file_in_nested_dir() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("nested").join("logs");

        // The global subscriber may already be installed by this binary
        let _ = init_tracing(Level::WARN, Some(&logs));
        assert!(logs.join(LOG_FILE_NAME).exists());
    }
}
