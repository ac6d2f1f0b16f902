//! Metric key normalization
//!
//! Turns resolved values into counter-name fragments and joins them under a
//! namespace prefix:
//!
//! ```
//! use user_agent_metrics::{normalize, MetricName};
//!
//! assert_eq!(normalize("Windows 7"), "windows-7");
//! assert_eq!(MetricName::new("user-agent", "Chrome").as_str(), "user-agent.chrome");
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// Namespace every emitted counter lives under unless configured otherwise.
pub const DEFAULT_PREFIX: &str = "user-agent";

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Normalize a value into a metric-name fragment.
///
/// Takes the value's textual form, lowercases it and replaces every run of
/// whitespace with a single `-`. Never fails.
pub fn normalize(value: impl fmt::Display) -> String {
    let lower = value.to_string().to_lowercase();
    WHITESPACE.replace_all(&lower, "-").into_owned()
}

/// Full counter name: `<prefix>.<fragment>`, both parts normalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricName(String);

impl MetricName {
    /// Normalize `prefix` and `fragment` and join them with `.`.
    pub fn new(prefix: impl fmt::Display, fragment: impl fmt::Display) -> Self {
        Self(format!("{}.{}", normalize(prefix), normalize(fragment)))
    }

    /// The dotted name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the dotted name.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MetricName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
