//! Tracing setup for WebSeed
//!
//! Console output follows the level picked on the command line. When a log
//! directory is given, a second layer records every event of the run to disk,
//! which is where session restarts and per-chunk progress end up.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// File name of the per-run trace log inside the log directory.
pub const RUN_LOG_FILE: &str = "webseed-last-run.log";

/// Installs the global subscriber.
///
/// `RUST_LOG` overrides `console_level` for the console layer. HTTP client
/// internals are capped at `warn` so connection pool chatter stays out of the
/// way. With `logs_dir`, the previous run's log file is replaced.
///
/// Returns the path of the trace log when one was opened.
///
/// # Errors
///
/// - `Box<dyn std::error::Error>` - If the log directory or file cannot be
///   created, or a global subscriber is already installed
pub fn init_tracing(
    console_level: Level,
    logs_dir: Option<&Path>,
) -> Result<Option<PathBuf>, Box<dyn std::error::Error>> {
    let console_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{console_level},hyper=warn,reqwest=warn"))
    });
    let console_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    let (file_layer, log_path) = match logs_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let path = dir.join(RUN_LOG_FILE);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_writer(File::create(&path)?)
                .with_filter(EnvFilter::new("trace"));
            (Some(layer), Some(path))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    match &log_path {
        Some(path) => tracing::debug!("Logging {} to console, trace to {}", console_level, path.display()),
        None => tracing::debug!("Logging {} to console", console_level),
    }

    Ok(log_path)
}

/// Console verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliLogLevel {
    Error,
    Warn,
    Info,
    /// Session starts, aborts and restarts
    Debug,
    /// Every streamed chunk
    Trace,
}

impl CliLogLevel {
    /// Converts to the matching `tracing::Level`.
    ///
    /// # Examples
    /// ```
    /// use webseed_core::tracing_setup::CliLogLevel;
    ///
    /// assert_eq!(CliLogLevel::Debug.as_tracing_level(), tracing::Level::DEBUG);
    /// ```
    pub fn as_tracing_level(self) -> Level {
        match self {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

impl std::fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = self.as_tracing_level().as_str().to_ascii_lowercase();
        f.write_str(&level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping() {
        assert_eq!(CliLogLevel::Error.as_tracing_level(), Level::ERROR);
        assert_eq!(CliLogLevel::Trace.as_tracing_level(), Level::TRACE);
        assert_eq!(CliLogLevel::Warn.to_string(), "warn");
        assert_eq!(CliLogLevel::Info.to_string(), "info");
    }

    #[test]
    fn test_init_tracing_creates_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");

        let path = init_tracing(Level::WARN, Some(&logs)).unwrap();

        assert_eq!(path, Some(logs.join(RUN_LOG_FILE)));
        assert!(logs.join(RUN_LOG_FILE).exists());
        // A second global subscriber is refused rather than panicking
        assert!(init_tracing(Level::WARN, None).is_err());
    }
}
