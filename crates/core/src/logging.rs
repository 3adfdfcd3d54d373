//! Structured logging setup.
//!
//! The filter is read from `RUST_LOG` and falls back to `info`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format for the log layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl LogFormat {
    /// Parse `LIFELINE_LOG_FORMAT`; anything other than `json` is pretty
    pub fn from_env() -> Self {
        match std::env::var("LIFELINE_LOG_FORMAT") {
            Ok(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

const DEFAULT_FILTER: &str = "info";

/// Filter for the given directives; unset, blank or unparsable falls back to `info`
fn filter_from(directives: Option<&str>) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

fn env_filter() -> EnvFilter {
    filter_from(std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref())
}

/// Install the human-readable subscriber.
///
/// # Example
/// ```no_run
/// use lifeline_core::logging;
///
/// logging::init();
/// tracing::info!("Lifeline started");
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

/// Install the JSON subscriber for log aggregation.
///
/// # Example
/// ```no_run
/// use lifeline_core::logging;
///
/// logging::init_json();
/// tracing::info!(service = "lifeline-node", "Service started");
/// ```
pub fn init_json() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().json().with_target(true).with_thread_ids(true))
        .init();
}

/// Install the subscriber for the given format
pub fn init_with(format: LogFormat) {
    match format {
        LogFormat::Pretty => init(),
        LogFormat::Json => init_json(),
    }
}
