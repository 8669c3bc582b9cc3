// =============================================================================
// Logging setup — tracing-subscriber with optional JSON and file output
// =============================================================================

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingSection;

/// Initialize the global tracing subscriber from config. `RUST_LOG` wins
/// over the configured level when set. Returns the file writer guard, which
/// the caller must keep alive for the process lifetime.
///
/// Safe to call more than once (later calls are no-ops), which keeps test
/// binaries happy.
pub fn setup_logging(cfg: &LoggingSection) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.level.to_lowercase()));

    if let Some(file) = &cfg.file {
        let path = std::path::Path::new(file);
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "bridge.log".to_string());
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("failed to create log directory {}: {e}", dir.display());
        }

        let rotate = cfg.rotate.as_ref().map(|r| r.enabled).unwrap_or(false);
        let appender = if rotate {
            tracing_appender::rolling::daily(dir, name)
        } else {
            tracing_appender::rolling::never(dir, name)
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);

        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false);
        let result = if cfg.json {
            builder.json().try_init()
        } else {
            builder.try_init()
        };
        if result.is_err() {
            // A subscriber is already installed; keep using it.
        }
        return Some(guard);
    }

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if cfg.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if result.is_err() {
        // Already initialized.
    }
    None
}
