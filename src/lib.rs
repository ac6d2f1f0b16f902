//! # user-agent-metrics
//!
//! Per-client request counters for Axum applications and other request
//! pipelines.
//!
//! Every inbound request carrying a `User-Agent` header is classified and
//! counted under one or more configurable keys, e.g. `user-agent.chrome` and
//! `user-agent.chrome.41`. Requests always continue; metrics are best effort.
//!
//! ## Features
//!
//! - **Descriptor Cache**: bounded LRU of parsed client descriptors, one parse
//!   per distinct string even under concurrent first use
//! - **Key Expressions**: `#this.operatingSystem.name`,
//!   `@currentRequest.getHeader('X-Tenant')`, `@component`, and `+`
//!   concatenation with quoted literals
//! - **Pluggable Parser**: built-in product-token heuristics, or any
//!   `Fn(&str) -> Result<Descriptor, ParseError>`
//! - **Counter Sinks**: in-process [`CounterRegistry`] with a JSON snapshot
//!   endpoint, or your own [`CounterSink`]
//! - **Structured Logging**: `tracing` throughout, see [`observability`]
//!
//! ## Quick Start
//!
//! ```ignore
//! use axum::{Router, routing::get};
//! use user_agent_metrics::{
//!     CounterRegistry, UserAgentMetrics, UserAgentMetricsConfig, UserAgentMetricsRouter,
//! };
//! use user_agent_metrics::observability::{init, ObservabilityConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     init(&ObservabilityConfig::from_env())?;
//!
//!     let counters = Arc::new(CounterRegistry::new());
//!     let metrics = Arc::new(UserAgentMetrics::try_new(
//!         UserAgentMetricsConfig::from_env(),
//!         counters.clone(),
//!     )?);
//!
//!     let app = Router::new()
//!         .route("/", get(|| async { "Hello" }))
//!         .with_user_agent_metrics(metrics, counters);
//!
//!     // GET /metrics -> {"counter.user-agent.chrome": 1, ...}
//!     Ok(())
//! }
//! ```

mod cache;
mod components;
mod config;
mod descriptor;
mod dispatch;
mod error;
mod expression;
mod key;
mod layers;
pub mod observability;
mod parse;
mod parser;
mod request;
mod sink;

// Re-exports
pub use cache::{CacheStats, DescriptorCache, DEFAULT_CACHE_CAPACITY};
pub use components::{ComponentLookup, ComponentRegistry, ComponentRegistryBuilder, NoComponents};
pub use config::{UserAgentMetricsConfig, UserAgentMetricsConfigBuilder, DEFAULT_HEADER};
pub use descriptor::{
    AgentType, Attributes, Descriptor, DescriptorBuilder, OperatingSystem, Value, UNKNOWN_VERSION,
};
pub use dispatch::{
    DispatchOutcome, KeyOutcome, RequestFilter, SkipReason, UserAgentMetrics,
    UserAgentMetricsBuilder,
};
pub use error::{ConfigError, ParseError, ResolutionError};
pub use expression::{
    resolve, KeyExpression, RequestAccessor, ResolutionContext, Term, DEFAULT_KEYS,
};
pub use key::{normalize, MetricName, DEFAULT_PREFIX};
pub use layers::{
    counters_handler, user_agent_metrics_middleware, UserAgentMetricsRouter,
    DEFAULT_COUNTERS_PATH,
};
pub use observability::ObservabilityConfigBuilder;
pub use parse::{parse_capacity, parse_duration};
pub use parser::{ProductTokenParser, UserAgentParser};
pub use request::{HttpRequestView, InboundRequest};
pub use sink::{CounterRegistry, CounterSink};
