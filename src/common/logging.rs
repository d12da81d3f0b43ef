//! Logging and tracing configuration
//!
//! The MCP server speaks JSON-RPC on stdout, so nothing here ever writes to
//! stdout. Logs go to stderr and, when the data directory is writable, to
//! `<data dir>/logs/windbg-mcp.log`.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use super::paths;

const LOG_FILE_NAME: &str = "windbg-mcp.log";

/// Keeps the background log writer alive; drop it to flush
pub struct LogGuard {
    _file: Option<WorkerGuard>,
    /// Where the file log is written, if file logging is active
    pub log_path: Option<PathBuf>,
}

fn default_filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("windbg_mcp=debug,info")
        } else {
            EnvFilter::new("windbg_mcp=info,warn")
        }
    })
}

/// Initialize tracing for one-shot CLI commands (stderr only)
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate, WARN for dependencies.
pub fn init_cli(debug: bool) {
    tracing_subscriber::registry()
        .with(default_filter(debug))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

fn server_stderr_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .compact()
}

/// Initialize tracing for the MCP server (file + stderr logging)
pub fn init_server(debug: bool) -> LogGuard {
    let filter = default_filter(debug);

    let log_dir = match paths::ensure_log_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("Warning: Could not create log directory: {}", e);
            None
        }
    };

    if let Some(dir) = log_dir {
        let appender = tracing_appender::rolling::never(&dir, LOG_FILE_NAME);
        let (writer, guard) = tracing_appender::non_blocking(appender);

        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(server_stderr_layer())
            .init();

        return LogGuard {
            _file: Some(guard),
            log_path: Some(dir.join(LOG_FILE_NAME)),
        };
    }

    // Fallback: stderr only
    tracing_subscriber::registry()
        .with(filter)
        .with(server_stderr_layer())
        .init();

    LogGuard {
        _file: None,
        log_path: None,
    }
}
