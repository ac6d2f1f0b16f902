//! Error types for descriptor parsing, key resolution and configuration
//!
//! None of these ever reach the client: dispatch logs them and carries on.
//! They exist so callers (and tests) can see exactly why a metric was not
//! emitted.

use std::time::Duration;
use thiserror::Error;

/// The client-identification string could not be turned into a descriptor.
///
/// Parse failures are never cached, so the same input is retried on every
/// request that carries it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Input was empty or only whitespace
    #[error("user agent string is empty")]
    Empty,

    /// No known product token was found
    #[error("unrecognized user agent: {input}")]
    Unrecognized { input: String },

    /// The parser did not finish within the configured timeout
    #[error("user agent parse timed out after {after:?}")]
    Timeout { after: Duration },

    /// The parser failed for another reason (panicked, worker lost, ...)
    #[error("user agent parser failed: {message}")]
    Parser { message: String },
}

impl ParseError {
    /// Create an unrecognized-input error
    pub fn unrecognized(input: impl Into<String>) -> Self {
        Self::Unrecognized {
            input: input.into(),
        }
    }

    /// Create a generic parser failure
    pub fn parser(message: impl Into<String>) -> Self {
        Self::Parser {
            message: message.into(),
        }
    }
}

/// A key expression could not be resolved to a value.
///
/// Scoped to the single failing expression; the other configured keys are
/// still evaluated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    /// Expression is not one of the supported reference forms
    #[error("unsupported key expression: {expression}")]
    UnsupportedGrammar { expression: String },

    /// Attribute path segment does not exist on the descriptor
    #[error("unknown attribute '{attribute}' in path '{path}'")]
    UnknownAttribute { path: String, attribute: String },

    /// Request method is not one of the supported accessors
    #[error("unknown request method '{method}'")]
    UnknownMethod { method: String },

    /// Request method called with the wrong number of arguments
    #[error("invalid call {call}: {message}")]
    InvalidCall { call: String, message: String },

    /// Request accessor returned nothing (header or parameter absent)
    #[error("request has no value for {call}")]
    MissingRequestValue { call: String },

    /// Named component is not registered
    #[error("no component named '{name}'")]
    UnknownComponent { name: String },

    /// Expression resolved, but to an empty string
    #[error("expression '{expression}' resolved to an empty value")]
    EmptyValue { expression: String },
}

impl ResolutionError {
    /// Create an unsupported-grammar error
    pub fn unsupported(expression: impl Into<String>) -> Self {
        Self::UnsupportedGrammar {
            expression: expression.into(),
        }
    }

    /// Create an invalid-call error
    pub fn invalid_call(call: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidCall {
            call: call.into(),
            message: message.into(),
        }
    }
}

/// Invalid [`UserAgentMetricsConfig`](crate::UserAgentMetricsConfig).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Metric prefix is empty or only whitespace
    #[error("metric prefix must not be empty")]
    EmptyPrefix,

    /// Header name is not a valid HTTP header name
    #[error("invalid header name: {name}")]
    InvalidHeader { name: String },

    /// Cache needs room for at least one descriptor
    #[error("cache capacity must be at least 1")]
    ZeroCapacity,

    /// A configured key expression does not compile
    #[error("invalid key expression at index {index}: {source}")]
    InvalidKey {
        index: usize,
        #[source]
        source: ResolutionError,
    },
}
