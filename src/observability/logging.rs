//! # Logging
//!
//! `tracing` subscriber setup. `RUST_LOG` overrides the default filter;
//! `LOG_FORMAT=json` switches to structured output.

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "volume_events_exporter=info";

/// Install the global subscriber
pub fn init_logging(format: &str) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());

    let result = if format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_current_span(true)
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };
    result.map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}
