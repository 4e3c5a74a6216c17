//! Tracing subscriber setup for programs driving ensembles.
//!
//! [`init_tracing`] installs a global subscriber with an `EnvFilter` and
//! plain or JSON line output. Only the first call in a process takes effect.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable selecting JSON output when set to `json`.
pub const LOG_FORMAT_ENV: &str = "ENSEMBLE_LOG_FORMAT";

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `level` when set. Returns whether this
/// call installed it.
pub fn init_tracing(json: bool, level: Level) -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let installed = if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .try_init()
    };
    // a subscriber set elsewhere wins
    installed.is_ok()
}

/// [`init_tracing`] with the format taken from `ENSEMBLE_LOG_FORMAT`.
pub fn init_tracing_from_env(level: Level) -> bool {
    init_tracing(json_requested(std::env::var(LOG_FORMAT_ENV).ok().as_deref()), level)
}

fn json_requested(format: Option<&str>) -> bool {
    format.is_some_and(|format| format.eq_ignore_ascii_case("json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_selection() {
        assert!(json_requested(Some("json")));
        assert!(json_requested(Some("JSON")));
        assert!(!json_requested(Some("pretty")));
        assert!(!json_requested(None));
    }
}
