//! Logging setup for Stratum.
//!
//! The engine logs through `tracing`; this module installs a subscriber
//! when one is asked for.
//!
//! # Environment Variables
//!
//! - `STRATUM_DEBUG=true|1|yes` - Enable debug logging
//! - `STRATUM_LOG_LEVEL=trace|debug|info|warn|error` - Set a specific level
//! - `STRATUM_LOG_FORMAT=json|pretty|compact` - Output format (default: json)
//!
//! # Usage
//!
//! ```rust,no_run
//! use stratum_migrate::logging;
//!
//! // Honour the environment (call once at startup)
//! logging::init();
//!
//! // Or force a level, e.g. from a `--verbose` flag
//! logging::init_with_level("debug");
//! ```
//!
//! Inside the engine, steps log at `info`, executed SQL at `debug`, and
//! durability caveats at `warn`:
//!
//! ```rust,ignore
//! info!(revision = %step.id(), direction = %step.direction, "{}", step);
//! debug!(revision = %self.revision, sql = %sql, "Executing");
//! warn!(error = %e, "Failed to release migration lock");
//! ```

use std::env;
use std::sync::Once;

static INIT: Once = Once::new();

const DEBUG_VAR: &str = "STRATUM_DEBUG";
const LEVEL_VAR: &str = "STRATUM_LOG_LEVEL";
const FORMAT_VAR: &str = "STRATUM_LOG_FORMAT";

/// Check if debug logging is enabled via `STRATUM_DEBUG`.
#[inline]
pub fn is_debug_enabled() -> bool {
    env::var(DEBUG_VAR)
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
}

/// Get the configured log level from `STRATUM_LOG_LEVEL`.
///
/// Defaults to "debug" if `STRATUM_DEBUG` is enabled, otherwise "warn".
pub fn get_log_level() -> &'static str {
    parse_level(env::var(LEVEL_VAR).ok().as_deref(), is_debug_enabled())
}

fn parse_level(raw: Option<&str>, debug: bool) -> &'static str {
    match raw.map(str::to_lowercase).as_deref() {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("info") => "info",
        Some("warn") => "warn",
        Some("error") => "error",
        _ if debug => "debug",
        _ => "warn",
    }
}

/// Get the configured log format from `STRATUM_LOG_FORMAT`.
///
/// Defaults to "json" for structured logging.
pub fn get_log_format() -> &'static str {
    parse_format(env::var(FORMAT_VAR).ok().as_deref())
}

fn parse_format(raw: Option<&str>) -> &'static str {
    match raw.map(str::to_lowercase).as_deref() {
        Some("pretty") => "pretty",
        Some("compact") => "compact",
        _ => "json",
    }
}

/// Initialize logging from the environment.
///
/// Does nothing unless `STRATUM_DEBUG` or `STRATUM_LOG_LEVEL` is set.
/// Subsequent calls are no-ops.
pub fn init() {
    if !is_debug_enabled() && env::var(LEVEL_VAR).is_err() {
        return;
    }
    install(get_log_level(), get_log_format());
}

/// Initialize logging at `level`, ignoring `STRATUM_LOG_LEVEL`.
pub fn init_with_level(level: &str) {
    install(parse_level(Some(level), false), get_log_format());
}

#[cfg_attr(not(feature = "tracing-subscriber"), allow(unused_variables))]
fn install(level: &'static str, format: &'static str) {
    INIT.call_once(|| {
        #[cfg(feature = "tracing-subscriber")]
        {
            use tracing_subscriber::{EnvFilter, fmt, prelude::*};

            let filter = EnvFilter::try_new(
                ["stratum", "stratum_migrate", "stratum_sqlite", "stratum_postgres", "stratum_mysql", "stratum_cli"]
                    .iter()
                    .map(|target| format!("{}={}", target, level))
                    .collect::<Vec<_>>()
                    .join(","),
            )
            .unwrap_or_else(|_| EnvFilter::new("warn"));

            match format {
                "json" => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer().json().with_writer(std::io::stderr))
                        .init();
                }
                "compact" => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer().compact().with_writer(std::io::stderr))
                        .init();
                }
                _ => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer().pretty().with_writer(std::io::stderr))
                        .init();
                }
            }

            tracing::info!(level = level, format = format, "Stratum logging initialized");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_defaults_to_warn() {
        assert_eq!(parse_level(None, false), "warn");
        assert_eq!(parse_level(Some("verbose"), false), "warn");
    }

    #[test]
    fn test_debug_flag_raises_default_level() {
        assert_eq!(parse_level(None, true), "debug");
        assert_eq!(parse_level(Some("ERROR"), true), "error");
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!(parse_format(None), "json");
        assert_eq!(parse_format(Some("Pretty")), "pretty");
        assert_eq!(parse_format(Some("compact")), "compact");
        assert_eq!(parse_format(Some("xml")), "json");
    }

    #[test]
    fn test_truthy_values() {
        assert!(is_truthy("YES"));
        assert!(is_truthy("1"));
        assert!(!is_truthy("off"));
    }
}
