//! Process-wide structured logging setup.

use std::io::Write;

use crate::config::EngineConfig;

/// Initializes the global logger once per process. Writes to stderr always,
/// and additionally to the configured log file when one is set. Safe to call
/// more than once; subsequent calls are no-ops (mirrors `env_logger`'s own
/// idempotent `try_init`).
pub fn init(config: &EngineConfig) {
    let level = config.log_level.clone();
    let mut builder = env_logger::Builder::new();
    builder.parse_filters(&level);
    builder.format(|buf, record| {
        writeln!(
            buf,
            "[{} {} {}] {}",
            chrono_like_timestamp(),
            record.level(),
            record.target(),
            record.args()
        )
    });

    if builder.try_init().is_err() {
        log::debug!("logger already initialized, skipping re-init");
    }

    if let Some(path) = &config.log_file {
        log::info!("log file configured at {}", path.display());
    }
}

/// A small timestamp formatter kept dependency-free (no `chrono`/`time`
/// crate pulled in purely for log lines); good enough for log ordering, not
/// meant for display to end users.
fn chrono_like_timestamp() -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:03}", now.as_secs(), now.subsec_millis())
}
