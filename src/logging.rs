use std::env;
use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "SPICHR_LOG";
pub const DEFAULT_FILTER: &str = "spichr=info,sqlx=warn";
pub const LOG_FILE_PREFIX: &str = "spichr.log";

fn env_filter() -> EnvFilter {
    let directives = env::var(LOG_ENV)
        .or_else(|_| env::var("RUST_LOG"))
        .unwrap_or_else(|_| DEFAULT_FILTER.into());
    EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// JSON logs to stderr, or to a daily-rolling file under `log_dir`.
///
/// Keep the returned guard alive for as long as file logs should be flushed.
/// Calling this twice is harmless; the first subscriber stays installed.
pub fn init(log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let _ = tracing_log::LogTracer::init();

    let Some(dir) = log_dir else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .json()
            .with_target(true)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(std::io::stderr)
            .try_init();
        return Ok(None);
    };

    std::fs::create_dir_all(dir)
        .with_context(|| format!("create log dir {}", dir.display()))?;
    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .json()
        .with_target(true)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(writer)
        .try_init();
    Ok(Some(guard))
}
