//! User-agent metrics configuration
//!
//! Provides a builder-pattern configuration, environment loading and serde
//! support for embedding in an application config file.

use crate::cache::DEFAULT_CACHE_CAPACITY;
use crate::error::ConfigError;
use crate::expression::{KeyExpression, DEFAULT_KEYS};
use crate::key::DEFAULT_PREFIX;
use crate::parse::{parse_capacity, parse_duration};
use axum::http::HeaderName;
use serde::{de, Deserialize, Deserializer};
use std::time::Duration;

/// Header carrying the client identification by default.
pub const DEFAULT_HEADER: &str = "User-Agent";

/// Configuration for user-agent request metrics.
///
/// # Example
///
/// ```ignore
/// use user_agent_metrics::UserAgentMetricsConfig;
///
/// // Load from environment variables
/// let config = UserAgentMetricsConfig::from_env();
///
/// // Or build programmatically
/// let config = UserAgentMetricsConfig::builder()
///     .key("#this.name")
///     .key("#this.operatingSystem.name")
///     .cache_capacity(4096)
///     .parse_timeout(Duration::from_millis(50))
///     .build();
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UserAgentMetricsConfig {
    /// Key expressions, one counter per key and request.
    /// Empty = [`DEFAULT_KEYS`]
    pub keys: Vec<String>,

    /// Namespace of emitted counters
    pub prefix: String,

    /// Header holding the client identification string
    pub header_name: String,

    /// Maximum number of parsed user agents kept in memory
    pub cache_capacity: usize,

    /// Upper bound for a single parse; `None` = unbounded
    #[serde(deserialize_with = "deserialize_timeout")]
    pub parse_timeout: Option<Duration>,
}

impl Default for UserAgentMetricsConfig {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            prefix: DEFAULT_PREFIX.to_string(),
            header_name: DEFAULT_HEADER.to_string(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            parse_timeout: None,
        }
    }
}

impl UserAgentMetricsConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `USER_AGENT_METRIC_KEYS`: comma-separated key expressions (default: name, name.majorVersion)
    /// - `USER_AGENT_METRIC_PREFIX`: counter namespace (default: "user-agent")
    /// - `USER_AGENT_HEADER`: identification header (default: "User-Agent")
    /// - `USER_AGENT_CACHE_CAPACITY`: e.g., "1024", "10k" (default: 1024)
    /// - `USER_AGENT_PARSE_TIMEOUT`: e.g., "50ms", "1s" (default: unbounded)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let keys = std::env::var("USER_AGENT_METRIC_KEYS")
            .map(|s| {
                s.split(',')
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let prefix = std::env::var("USER_AGENT_METRIC_PREFIX")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.prefix);

        let header_name = std::env::var("USER_AGENT_HEADER")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.header_name);

        let cache_capacity = std::env::var("USER_AGENT_CACHE_CAPACITY")
            .ok()
            .and_then(|s| parse_capacity(&s))
            .unwrap_or(defaults.cache_capacity);

        let parse_timeout = std::env::var("USER_AGENT_PARSE_TIMEOUT")
            .ok()
            .and_then(|s| parse_duration(&s));

        Self {
            keys,
            prefix,
            header_name,
            cache_capacity,
            parse_timeout,
        }
    }

    /// Create a new builder for programmatic configuration.
    pub fn builder() -> UserAgentMetricsConfigBuilder {
        UserAgentMetricsConfigBuilder::default()
    }

    /// Configured keys, or [`DEFAULT_KEYS`] when none are set.
    pub fn effective_keys(&self) -> Vec<&str> {
        if self.keys.is_empty() {
            DEFAULT_KEYS.to_vec()
        } else {
            self.keys.iter().map(String::as_str).collect()
        }
    }

    /// Check every setting, including that all keys compile.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prefix.trim().is_empty() {
            return Err(ConfigError::EmptyPrefix);
        }
        if HeaderName::from_bytes(self.header_name.as_bytes()).is_err() {
            return Err(ConfigError::InvalidHeader {
                name: self.header_name.clone(),
            });
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        for (index, key) in self.effective_keys().into_iter().enumerate() {
            KeyExpression::parse(key)
                .map_err(|source| ConfigError::InvalidKey { index, source })?;
        }
        Ok(())
    }
}

fn deserialize_timeout<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|s| {
        parse_duration(&s)
            .ok_or_else(|| de::Error::custom(format!("invalid parse_timeout: {s:?}")))
    })
    .transpose()
}

/// Builder for UserAgentMetricsConfig
#[derive(Debug, Clone, Default)]
pub struct UserAgentMetricsConfigBuilder {
    config: UserAgentMetricsConfig,
}

impl UserAgentMetricsConfigBuilder {
    /// Append a key expression.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.config.keys.push(key.into());
        self
    }

    /// Replace all key expressions.
    pub fn keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Set the counter namespace.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.prefix = prefix.into();
        self
    }

    /// Read the identification string from another header.
    pub fn header_name(mut self, name: impl Into<String>) -> Self {
        self.config.header_name = name.into();
        self
    }

    /// Set the descriptor cache capacity.
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.config.cache_capacity = capacity;
        self
    }

    /// Bound each parse by `timeout`.
    pub fn parse_timeout(mut self, timeout: Duration) -> Self {
        self.config.parse_timeout = Some(timeout);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> UserAgentMetricsConfig {
        self.config
    }
}
