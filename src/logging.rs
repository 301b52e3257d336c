//! Tracing setup: rotating file output plus a compact stdout layer.

use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize the tracing subscriber.
///
/// Writes a daily-rotated `crawler.log` under `log_dir` and a compact
/// stream to stdout. `RUST_LOG` controls filtering (default "info").
pub fn init_logging<P: AsRef<Path>>(log_dir: P) -> Result<(), Box<dyn std::error::Error>> {
    let log_path = log_dir.as_ref();
    std::fs::create_dir_all(log_path)?;

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let file_appender = tracing_appender::rolling::daily(log_path, "crawler.log");
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_target(true)
        .with_ansi(false)
        .compact()
        .with_filter(env_filter.add_directive("hyper=warn".parse()?));

    let stdout_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    let stdout_layer = fmt::layer()
        .with_target(false)
        .compact()
        .with_filter(stdout_filter);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .init();

    // The guard must outlive the program for buffered log lines to land.
    Box::leak(Box::new(file_guard));

    tracing::info!("logging initialized, files under {}", log_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    #[test]
    fn test_log_dir_creation() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("logs");
        // init_logging panics when a global subscriber is already set, so
        // only the directory handling is exercised here
        std::fs::create_dir_all(&log_path).unwrap();
        assert!(log_path.exists());
    }
}
