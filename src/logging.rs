//! Tracing setup for the silo binary.
//!
//! Events go to stdout and, when a log file is configured, to that file as
//! well. `RUST_LOG` takes precedence over the configured level.

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::{Result, SiloError};

/// Normalize a configured level name. Unknown names fall back to `info`.
fn level_name(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    }
}

/// Directive used when `RUST_LOG` is not set.
///
/// sqlx logs every statement at info, so it is held to warnings.
fn default_directive(level: &str) -> String {
    format!("{},sqlx=warn", level_name(level))
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(level)))
}

/// Open the log file for appending, creating parent directories.
fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// Install the global subscriber: colored console output plus a plain
/// copy in `config.file`.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let file = Arc::new(open_log_file(Path::new(&config.file))?);

    let console = fmt::layer().with_writer(std::io::stdout).with_target(true);
    let persisted = fmt::layer()
        .with_writer(file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true);

    tracing_subscriber::registry()
        .with(build_filter(&config.level))
        .with(console)
        .with(persisted)
        .try_init()
        .map_err(|e| SiloError::Config(format!("logging already initialized: {e}")))
}

/// Console-only subscriber, used when the log file cannot be opened.
pub fn init_console_only(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(build_filter(level))
        .with(fmt::layer().with_writer(std::io::stdout).with_target(true))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_level_name() {
        assert_eq!(level_name("TRACE"), "trace");
        assert_eq!(level_name(" debug "), "debug");
        assert_eq!(level_name("Warning"), "warn");
        assert_eq!(level_name("error"), "error");
        assert_eq!(level_name("verbose"), "info");
        assert_eq!(level_name(""), "info");
    }

    #[test]
    fn test_default_directive_quiets_sqlx() {
        assert_eq!(default_directive("debug"), "debug,sqlx=warn");
        assert_eq!(default_directive("nonsense"), "info,sqlx=warn");
    }

    #[test]
    fn test_open_log_file_appends() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("logs/nested/silo.log");

        let mut first = open_log_file(&path).unwrap();
        first.write_all(b"one\n").unwrap();
        drop(first);
        let mut second = open_log_file(&path).unwrap();
        second.write_all(b"two\n").unwrap();
        drop(second);

        assert_eq!(fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }
}
