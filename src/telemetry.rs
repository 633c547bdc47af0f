//! Logging bootstrap for the embedding process.
//!
//! Sets up `tracing` with a PHI-sanitizing writer so store error bodies and
//! stray resource references never reach the log sink unredacted. Call once
//! at startup; the returned guard must be kept alive for the lifetime of
//! the process or buffered log lines are lost.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::adapters::sanitize::SanitizingMakeWriter;

/// Initialize logging.
///
/// Behavior:
/// - `FHIRPROBE_LOG_FILE` set: append to that file (directories are created
///   best-effort)
/// - otherwise: log to stdout
///
/// The filter honors `RUST_LOG` and defaults to `info`.
///
/// # Errors
/// Returns error if the log file cannot be opened.
pub fn init_logging() -> std::io::Result<tracing_appender::non_blocking::WorkerGuard> {
    let (writer, guard) = match std::env::var("FHIRPROBE_LOG_FILE") {
        Ok(log_file) => {
            if let Some(parent) = std::path::Path::new(&log_file).parent() {
                // Best-effort: don't fail startup just because the directory
                // is missing.
                let _ = std::fs::create_dir_all(parent);
            }

            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_file)?;
            tracing_appender::non_blocking(file)
        }
        Err(_) => tracing_appender::non_blocking(std::io::stdout()),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(SanitizingMakeWriter::new(writer)))
        .init();

    Ok(guard)
}
