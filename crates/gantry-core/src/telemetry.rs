//! Subscriber setup for the `gantry` binary.
//!
//! Diagnostics always go to stderr; stdout is reserved for results.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Dependencies that are chatty at debug level.
const QUIET_TARGETS: &[&str] = &["hyper", "reqwest", "rustls", "h2"];

/// Shape of each log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Compact human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            Self::Json
        } else {
            Self::Text
        }
    }
}

/// Directives used when `RUST_LOG` is unset: `level` for everything, with
/// HTTP internals capped at `warn`.
fn default_directives(level: Level) -> String {
    std::iter::once(level.as_str().to_ascii_lowercase())
        .chain(QUIET_TARGETS.iter().map(|target| format!("{target}=warn")))
        .collect::<Vec<_>>()
        .join(",")
}

fn build_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

/// Install the global subscriber; only the first call in a process wins.
pub fn init_tracing(format: LogFormat, level: Level) {
    let text = (format == LogFormat::Text).then(|| {
        fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
    });
    let json = (format == LogFormat::Json).then(|| {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
    });

    let installed = tracing_subscriber::registry()
        .with(build_filter(level))
        .with(text)
        .with(json)
        .try_init();
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
