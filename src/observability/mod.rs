//! Logging setup
//!
//! The library logs through `tracing` macros and never installs a subscriber
//! itself. Applications (and the binaries embedding the middleware) call
//! [`init`] once at startup to get stdout logging in the configured format.
//!
//! # Usage
//!
//! ```ignore
//! use user_agent_metrics::observability::{init, LogFormat, ObservabilityConfig};
//!
//! // From environment variables
//! init(&ObservabilityConfig::from_env())?;
//!
//! // Or programmatically
//! let config = ObservabilityConfig::builder()
//!     .log_format(LogFormat::Json)
//!     .log_filter("info,user_agent_metrics=debug")
//!     .build();
//! init(&config)?;
//! ```
//!
//! Dispatch logs skipped requests at `trace`, parse and key failures at
//! `debug`, and configuration fallbacks at `warn`; enable
//! `user_agent_metrics=debug` to see why a request produced fewer counters.

mod config;
mod providers;

pub use config::{LogFormat, ObservabilityConfig, ObservabilityConfigBuilder};

use thiserror::Error;
use tracing::info;

/// Install the global tracing subscriber.
///
/// Must be called at most once per process, before any logging occurs.
///
/// # Errors
///
/// Returns an error if the log filter does not parse or a global subscriber
/// is already installed.
pub fn init(config: &ObservabilityConfig) -> Result<(), ObservabilityError> {
    providers::init_tracing(config)?;

    info!(
        log_format = ?config.log_format,
        log_filter = %config.log_filter,
        "Logging initialized"
    );

    Ok(())
}

/// Logging initialization errors
#[derive(Debug, Error)]
pub enum ObservabilityError {
    /// Invalid filter directive
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Subscriber could not be installed
    #[error("failed to initialize tracing: {0}")]
    Subscriber(String),
}
