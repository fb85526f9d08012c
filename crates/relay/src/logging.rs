use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,hyper=warn,reqwest=warn";
const DEBUG_FILTER: &str = "debug,hyper=info";
const LOG_FILE: &str = "hookcord.log";

/// Keeps the non-blocking writer alive; dropping it flushes pending lines.
pub struct LoggingHandle {
    pub invocation_id: String,
    pub guard: WorkerGuard,
}

/// Send all diagnostics to `<log_dir>/hookcord.log`. Stdout and stderr belong
/// to the hook host, so nothing is written there.
pub fn init_logging(log_dir: &Path, debug: bool) -> anyhow::Result<LoggingHandle> {
    std::fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join(LOG_FILE);

    let fallback = if debug { DEBUG_FILTER } else { DEFAULT_FILTER };
    let filter = std::env::var("HOOKCORD_LOG_FILTER")
        .ok()
        .and_then(|value| EnvFilter::try_new(value).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(fallback));

    let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    let format = std::env::var("HOOKCORD_LOG_FORMAT").unwrap_or_else(|_| "json".into());

    let registry = tracing_subscriber::registry().with(filter);
    if format.eq_ignore_ascii_case("pretty") {
        registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .pretty()
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .json()
                    .flatten_event(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true)
                    .with_current_span(true),
            )
            .try_init()?;
    }

    let invocation_id = uuid::Uuid::new_v4().to_string();

    tracing::debug!(
        component = "logging",
        event = "logging.initialized",
        log_path = %log_path.display(),
        format = %format,
        invocation_id = %invocation_id,
        pid = std::process::id(),
    );

    Ok(LoggingHandle {
        invocation_id,
        guard,
    })
}
