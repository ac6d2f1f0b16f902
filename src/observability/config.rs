//! Logging configuration

use std::env;
use std::str::FromStr;

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format for development
    #[default]
    Pretty,
    /// JSON format for production/log aggregation
    Json,
    /// Compact single-line format
    Compact,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservabilityConfig {
    /// Log output format
    pub log_format: LogFormat,
    /// Log level filter (e.g., "info", "info,user_agent_metrics=debug")
    pub log_filter: String,
    /// Include source file and line in each event
    pub log_location: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            log_filter: "info".to_string(),
            log_location: true,
        }
    }
}

impl ObservabilityConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `LOG_FORMAT`: "pretty", "json", or "compact" (default: "pretty")
    /// - `RUST_LOG`: Log filter directive (default: "info")
    /// - `LOG_LOCATION`: Include file/line, "false" or "0" to disable (default: "true")
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let log_format = env::var("LOG_FORMAT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.log_format);

        let log_filter = env::var("RUST_LOG").unwrap_or(defaults.log_filter);

        let log_location = env::var("LOG_LOCATION")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(defaults.log_location);

        Self {
            log_format,
            log_filter,
            log_location,
        }
    }

    /// Create a new configuration builder
    pub fn builder() -> ObservabilityConfigBuilder {
        ObservabilityConfigBuilder::default()
    }
}

/// Builder for ObservabilityConfig
#[derive(Debug, Default)]
pub struct ObservabilityConfigBuilder {
    config: ObservabilityConfig,
}

impl ObservabilityConfigBuilder {
    /// Set the log format
    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.config.log_format = format;
        self
    }

    /// Set the log filter
    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.config.log_filter = filter.into();
        self
    }

    /// Include or omit source locations
    pub fn log_location(mut self, enable: bool) -> Self {
        self.config.log_location = enable;
        self
    }

    /// Build the configuration
    pub fn build(self) -> ObservabilityConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.log_filter, "info");
        assert!(config.log_location);
    }

    #[test]
    fn test_builder() {
        let config = ObservabilityConfig::builder()
            .log_format(LogFormat::Json)
            .log_filter("debug")
            .log_location(false)
            .build();

        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.log_filter, "debug");
        assert!(!config.log_location);
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!(" Compact ".parse::<LogFormat>(), Ok(LogFormat::Compact));
        assert_eq!("PRETTY".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
