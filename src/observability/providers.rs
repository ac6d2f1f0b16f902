//! Subscriber installation

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::{LogFormat, ObservabilityConfig, ObservabilityError};

/// Install a stdout subscriber. `RUST_LOG` in the environment wins over the
/// configured filter.
pub(super) fn init_tracing(config: &ObservabilityConfig) -> Result<(), ObservabilityError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .map_err(|e| ObservabilityError::Filter(e.to_string()))?;

    let subscriber = tracing_subscriber::registry().with(filter);
    let location = config.log_location;

    let result = match config.log_format {
        LogFormat::Pretty => subscriber
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_file(location)
                    .with_line_number(location),
            )
            .try_init(),
        LogFormat::Json => subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_file(location)
                    .with_line_number(location),
            )
            .try_init(),
        LogFormat::Compact => subscriber
            .with(fmt::layer().compact().with_target(true))
            .try_init(),
    };

    result.map_err(|e| ObservabilityError::Subscriber(e.to_string()))
}
