//! Structured logging setup (§A.1): a fmt layer on stderr gated by
//! `-v`/`--verbose`, plus a JSON-lines daily-rolling file layer under
//! `<log_dir>/helix.log.<date>`, filtered through `EnvFilter` seeded from
//! `HELIX_LOG` (falling back to `info` or `debug` per `verbose`).

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const LOG_ENV_VAR: &str = "HELIX_LOG";

/// Initialize the global subscriber. The returned guard must be kept alive
/// for the process lifetime — dropping it flushes and stops the background
/// writer thread.
pub fn init(verbose: bool, log_dir: &std::path::Path) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "helix.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(format!("helix={default_level}")));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    let file_layer = fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    Ok(guard)
}
