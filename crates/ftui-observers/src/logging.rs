#![forbid(unsafe_code)]

//! Log-level vocabulary and optional subscriber installation.
//!
//! The crate itself only emits `tracing` events. Applications that do not
//! bring their own subscriber can enable the `logging` feature and call
//! [`init`] with one of the five console levels.
//!
//! | level     | tracing filter |
//! |-----------|----------------|
//! | `error`   | `ERROR`        |
//! | `warn`    | `WARN`         |
//! | `info`    | `INFO`         |
//! | `verbose` | `DEBUG`        |
//! | `debug`   | `TRACE`        |

use std::fmt;
use std::str::FromStr;

use tracing::level_filters::LevelFilter;

/// Console verbosity, ordered from quietest to loudest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
}

impl LogLevel {
    pub const ALL: [LogLevel; 5] = [
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Verbose,
        LogLevel::Debug,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Verbose => "verbose",
            Self::Debug => "debug",
        }
    }

    /// The `tracing` filter this level admits.
    #[must_use]
    pub const fn filter(self) -> LevelFilter {
        match self {
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Verbose => LevelFilter::DEBUG,
            Self::Debug => LevelFilter::TRACE,
        }
    }

    /// Whether a message logged at `message` is shown under this level.
    #[must_use]
    pub fn admits(self, message: LogLevel) -> bool {
        message <= self
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown level name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level '{0}' (expected error, warn, info, verbose or debug)")]
pub struct ParseLogLevelError(String);

impl FromStr for LogLevel {
    type Err = ParseLogLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Self::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| ParseLogLevelError(name.to_string()))
    }
}

/// Install a global formatted subscriber at `level`.
///
/// `RUST_LOG` takes precedence when set. Returns `false` if a global
/// subscriber was already installed.
#[cfg(feature = "logging")]
pub fn init(level: LogLevel) -> bool {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::builder()
        .with_default_directive(level.filter().into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
