//! `env_logger` backend shared by the library and the binary.

use chrono::Local;
use env_logger::{Builder, Env, Target};
use log::{Level, LevelFilter};
use std::io::Write;

fn level_color(level: Level) -> &'static str {
    match level {
        | Level::Error => "\x1b[31m",
        | Level::Warn => "\x1b[33m",
        | Level::Info => "\x1b[32m",
        | Level::Debug => "\x1b[36m",
        | Level::Trace => "\x1b[35m",
    }
}

/// `positionbook::risk::overlay` -> `risk::overlay`
fn short_target(target: &str) -> &str {
    target.strip_prefix("positionbook::").unwrap_or(target)
}

/// Install the global logger on stderr so stdout stays free for the book.
///
/// `POSITIONBOOK_LOG` overrides `default_level`; `tracing` events reach the
/// same backend through its `log` feature. Later calls are no-ops.
pub fn init_logging(default_level: &str) {
    let env = Env::default()
        .filter_or("POSITIONBOOK_LOG", default_level)
        .write_style_or("POSITIONBOOK_LOG_STYLE", "auto");

    let installed = Builder::from_env(env)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {}{:5}\x1b[0m [{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                level_color(record.level()),
                record.level(),
                short_target(record.target()),
                record.args()
            )
        })
        .target(Target::Stderr)
        .try_init()
        .is_ok();

    if installed {
        log::debug!("Logging initialized at level {default_level}");
    }
}

/// Capture-friendly logger for unit tests.
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).filter_level(LevelFilter::Debug).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_target() {
        assert_eq!(short_target("positionbook::optimizer"), "optimizer");
        assert_eq!(short_target("rusqlite"), "rusqlite");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_test_logging();
        init_logging("debug");
        init_logging("info");
        tracing::debug!(instrument = "ES", "tracing event reaches env_logger");
        log::warn!("portfolio multiplier 0.8 applied");
    }
}
