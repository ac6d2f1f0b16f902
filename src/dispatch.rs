//! Metric dispatch
//!
//! Per request: read the identification header, get its descriptor from the
//! cache, evaluate every configured key, and increment one counter per key
//! that resolves. Failures never reach the request:
//!
//! | Condition | Effect | Log level |
//! |-----------|--------|-----------|
//! | not HTTP / header missing | nothing emitted | `trace` |
//! | descriptor parse fails | nothing emitted for this request | `debug` |
//! | one key fails to resolve | only that key skipped | `debug` |
//!
//! The downstream continuation always runs exactly once.

use crate::cache::DescriptorCache;
use crate::components::{ComponentLookup, NoComponents};
use crate::config::UserAgentMetricsConfig;
use crate::error::{ConfigError, ParseError, ResolutionError};
use crate::expression::{KeyExpression, ResolutionContext};
use crate::key::{normalize, MetricName, DEFAULT_PREFIX};
use crate::parser::{ProductTokenParser, UserAgentParser};
use crate::request::InboundRequest;
use crate::sink::CounterSink;
use std::num::NonZeroUsize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Why a request produced no metrics at all (not an error).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Request is not HTTP-capable
    NotHttp,
    /// Identification header absent, empty or not valid text
    MissingHeader,
}

/// Result of evaluating one configured key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyOutcome {
    /// Key expression as configured
    pub key: String,
    /// Emitted counter name, or why the key was skipped
    pub result: Result<MetricName, ResolutionError>,
}

/// What dispatch did for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No identification available; nothing evaluated
    Skipped(SkipReason),
    /// Identification present but unparseable; nothing evaluated
    ParseFailed(ParseError),
    /// Keys evaluated, one outcome per configured key in order
    Evaluated(Vec<KeyOutcome>),
}

impl DispatchOutcome {
    /// Counter names that were incremented.
    pub fn emitted(&self) -> Vec<&MetricName> {
        match self {
            Self::Evaluated(outcomes) => outcomes
                .iter()
                .filter_map(|outcome| outcome.result.as_ref().ok())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Keys that failed to resolve, with the reason.
    pub fn failures(&self) -> Vec<(&str, &ResolutionError)> {
        match self {
            Self::Evaluated(outcomes) => outcomes
                .iter()
                .filter_map(|outcome| match &outcome.result {
                    Err(err) => Some((outcome.key.as_str(), err)),
                    Ok(_) => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// A configured key, compiled up front. Compile errors are kept and reported
/// for that key on every request.
#[derive(Debug)]
struct CompiledKey {
    source: String,
    expression: Result<KeyExpression, ResolutionError>,
}

impl CompiledKey {
    fn compile(source: &str) -> Self {
        Self {
            source: source.to_string(),
            expression: KeyExpression::parse(source),
        }
    }

    fn fragment(&self, context: &ResolutionContext<'_>) -> Result<String, ResolutionError> {
        let expression = self.expression.as_ref().map_err(Clone::clone)?;
        let value = expression.evaluate(context)?;
        if value.trim().is_empty() {
            return Err(ResolutionError::EmptyValue {
                expression: self.source.clone(),
            });
        }
        Ok(normalize(value))
    }
}

/// User-agent request metrics.
///
/// Shared across requests behind an `Arc`; every method takes `&self`.
///
/// # Example
///
/// ```ignore
/// use user_agent_metrics::{CounterRegistry, UserAgentMetrics, UserAgentMetricsConfig};
/// use std::sync::Arc;
///
/// let counters = Arc::new(CounterRegistry::new());
/// let metrics = UserAgentMetrics::builder(counters.clone())
///     .config(UserAgentMetricsConfig::from_env())
///     .build();
///
/// let response = metrics.handle(request, |request| service.call(request));
/// ```
pub struct UserAgentMetrics {
    header_name: String,
    prefix: String,
    keys: Vec<CompiledKey>,
    cache: DescriptorCache,
    sink: Arc<dyn CounterSink>,
    components: Arc<dyn ComponentLookup>,
}

impl UserAgentMetrics {
    /// Create from `config` with the built-in parser and no components.
    ///
    /// Invalid settings are logged and replaced; see
    /// [`UserAgentMetricsBuilder::build`].
    pub fn new(config: UserAgentMetricsConfig, sink: Arc<dyn CounterSink>) -> Self {
        Self::builder(sink).config(config).build()
    }

    /// Like [`new`](Self::new), but rejects invalid configuration.
    pub fn try_new(
        config: UserAgentMetricsConfig,
        sink: Arc<dyn CounterSink>,
    ) -> Result<Self, ConfigError> {
        Self::builder(sink).config(config).try_build()
    }

    /// Create a builder that reports to `sink`.
    pub fn builder(sink: Arc<dyn CounterSink>) -> UserAgentMetricsBuilder {
        UserAgentMetricsBuilder {
            sink,
            config: UserAgentMetricsConfig::default(),
            parser: None,
            components: None,
        }
    }

    /// Evaluate all keys for `request` and increment the resulting counters.
    pub fn record<R: InboundRequest + ?Sized>(&self, request: &R) -> DispatchOutcome {
        let Some(http) = request.as_http() else {
            trace!("Skipping user agent metrics for non-HTTP request");
            return DispatchOutcome::Skipped(SkipReason::NotHttp);
        };

        let user_agent = match http.header(&self.header_name) {
            Some(value) if !value.trim().is_empty() => value,
            _ => {
                trace!(header = %self.header_name, "No client identification header");
                return DispatchOutcome::Skipped(SkipReason::MissingHeader);
            }
        };

        let descriptor = match self.cache.get_or_parse(user_agent) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                debug!(error = %err, user_agent, "Could not parse user agent, no metrics emitted");
                return DispatchOutcome::ParseFailed(err);
            }
        };

        let context = ResolutionContext::new(&descriptor, http, self.components.as_ref());
        let outcomes = self
            .keys
            .iter()
            .map(|key| {
                let result = key
                    .fragment(&context)
                    .map(|fragment| MetricName::new(&self.prefix, fragment));
                match &result {
                    Ok(name) => self.sink.increment(name.as_str()),
                    Err(err) => debug!(key = %key.source, error = %err, "Skipping metric key"),
                }
                KeyOutcome {
                    key: key.source.clone(),
                    result,
                }
            })
            .collect();

        DispatchOutcome::Evaluated(outcomes)
    }

    /// Record metrics for `request`, then pass it to `next`.
    ///
    /// `next` runs exactly once, even if recording panics.
    pub fn handle<R, T, F>(&self, request: R, next: F) -> T
    where
        R: InboundRequest,
        F: FnOnce(R) -> T,
    {
        self.record_guarded(&request);
        next(request)
    }

    /// [`record`](Self::record) with panics contained and logged.
    pub(crate) fn record_guarded<R: InboundRequest + ?Sized>(&self, request: &R) {
        if catch_unwind(AssertUnwindSafe(|| self.record(request))).is_err() {
            warn!("User agent metrics recording panicked; request continues");
        }
    }

    /// Key expressions in evaluation order.
    pub fn keys(&self) -> Vec<&str> {
        self.keys.iter().map(|key| key.source.as_str()).collect()
    }

    /// Header the identification string is read from.
    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    /// Counter namespace.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Descriptor cache, for statistics and maintenance.
    pub fn cache(&self) -> &DescriptorCache {
        &self.cache
    }
}

impl std::fmt::Debug for UserAgentMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserAgentMetrics")
            .field("header_name", &self.header_name)
            .field("prefix", &self.prefix)
            .field("keys", &self.keys())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// Builder for [`UserAgentMetrics`].
pub struct UserAgentMetricsBuilder {
    sink: Arc<dyn CounterSink>,
    config: UserAgentMetricsConfig,
    parser: Option<Arc<dyn UserAgentParser>>,
    components: Option<Arc<dyn ComponentLookup>>,
}

impl UserAgentMetricsBuilder {
    /// Use `config` (default: [`UserAgentMetricsConfig::default`]).
    pub fn config(mut self, config: UserAgentMetricsConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a different parser (default: [`ProductTokenParser`]).
    pub fn parser(mut self, parser: Arc<dyn UserAgentParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Resolve `@name` keys against `components` (default: none registered).
    pub fn components(mut self, components: Arc<dyn ComponentLookup>) -> Self {
        self.components = Some(components);
        self
    }

    /// Build, rejecting invalid configuration.
    pub fn try_build(self) -> Result<UserAgentMetrics, ConfigError> {
        self.config.validate()?;
        Ok(self.build())
    }

    /// Build, logging invalid settings and falling back where possible.
    ///
    /// Keys that do not compile are kept and reported as failures on every
    /// request; the other keys keep working.
    pub fn build(self) -> UserAgentMetrics {
        let config = self.config;

        let prefix = if config.prefix.trim().is_empty() {
            warn!("Empty metric prefix, using {DEFAULT_PREFIX}");
            DEFAULT_PREFIX.to_string()
        } else {
            config.prefix.clone()
        };

        let capacity = NonZeroUsize::new(config.cache_capacity).unwrap_or_else(|| {
            warn!("Cache capacity 0 is not usable, using 1");
            NonZeroUsize::MIN
        });

        let keys: Vec<CompiledKey> = config
            .effective_keys()
            .into_iter()
            .map(CompiledKey::compile)
            .collect();
        for key in &keys {
            if let Err(err) = &key.expression {
                warn!(key = %key.source, error = %err, "Invalid metric key will never emit");
            }
        }

        let parser = self
            .parser
            .unwrap_or_else(|| Arc::new(ProductTokenParser::new()));
        let mut cache = DescriptorCache::new(parser, capacity);
        if let Some(timeout) = config.parse_timeout {
            cache = cache.with_parse_timeout(timeout);
        }

        UserAgentMetrics {
            header_name: config.header_name,
            prefix,
            keys,
            cache,
            sink: self.sink,
            components: self.components.unwrap_or_else(|| Arc::new(NoComponents)),
        }
    }
}

// ============================================================================
// Pipeline integration
// ============================================================================

/// A filter in a generic request pipeline.
///
/// `init` and `destroy` are lifecycle hooks; `filter` must call `next`
/// exactly once.
pub trait RequestFilter<R> {
    /// Called once before the first request.
    fn init(&self) {}

    /// Called once at shutdown.
    fn destroy(&self) {}

    /// Process `request` and hand it on.
    fn filter<T, F>(&self, request: R, next: F) -> T
    where
        F: FnOnce(R) -> T;
}

impl<R: InboundRequest> RequestFilter<R> for UserAgentMetrics {
    fn init(&self) {
        info!(
            keys = ?self.keys(),
            header = %self.header_name,
            prefix = %self.prefix,
            cache_capacity = self.cache.capacity(),
            "User agent metrics initialized"
        );
    }

    fn destroy(&self) {
        let stats = self.cache.stats();
        info!(
            hits = stats.hits,
            misses = stats.misses,
            parses = stats.parses,
            failures = stats.failures,
            "User agent metrics shut down"
        );
    }

    fn filter<T, F>(&self, request: R, next: F) -> T
    where
        F: FnOnce(R) -> T,
    {
        self.handle(request, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::ComponentRegistry;
    use crate::descriptor::Descriptor;
    use crate::request::HttpRequestView;
    use crate::sink::CounterRegistry;
    use axum::http::Request;
    use parking_lot::Mutex;

    const CHROME: &str = "Mozilla/5.0 (Windows NT 6.1) AppleWebKit/537.36 (KHTML, like Gecko)\
                          Chrome/41.0.2228.0 Safari/537.36";

    /// Sink that remembers every increment in order.
    #[derive(Default)]
    struct RecordingSink {
        names: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn names(&self) -> Vec<String> {
            self.names.lock().clone()
        }
    }

    impl CounterSink for RecordingSink {
        fn increment(&self, name: &str) {
            self.names.lock().push(name.to_string());
        }
    }

    /// A pipeline message that is not an HTTP request.
    struct PlainMessage;

    impl InboundRequest for PlainMessage {
        fn as_http(&self) -> Option<&dyn HttpRequestView> {
            None
        }
    }

    fn metrics(keys: &[&str], sink: Arc<RecordingSink>) -> UserAgentMetrics {
        let components = ComponentRegistry::builder()
            .component("myBean", "value")
            .build();
        UserAgentMetrics::builder(sink)
            .config(UserAgentMetricsConfig::builder().keys(keys.iter().copied()).build())
            .components(Arc::new(components))
            .build()
    }

    fn chrome_request() -> Request<()> {
        Request::builder()
            .uri("/")
            .header("User-Agent", CHROME)
            .header("MyHeader", "MyHeaderValue")
            .body(())
            .unwrap()
    }

    #[test]
    fn test_default_keys() {
        let sink = Arc::new(RecordingSink::default());
        let metrics = metrics(&[], sink.clone());

        metrics.record(&chrome_request());

        assert_eq!(sink.names(), vec!["user-agent.chrome", "user-agent.chrome.41"]);
    }

    #[test]
    fn test_configured_keys() {
        let sink = Arc::new(RecordingSink::default());
        let metrics = metrics(&["#this.name", "#this.operatingSystem.name"], sink.clone());

        metrics.record(&chrome_request());

        assert_eq!(sink.names(), vec!["user-agent.chrome", "user-agent.windows-7"]);
    }

    #[test]
    fn test_request_data_key() {
        let sink = Arc::new(RecordingSink::default());
        let metrics = metrics(&["@currentRequest.getHeader('MyHeader')"], sink.clone());

        metrics.record(&chrome_request());

        assert_eq!(sink.names(), vec!["user-agent.myheadervalue"]);
    }

    #[test]
    fn test_component_key() {
        let sink = Arc::new(RecordingSink::default());
        let metrics = metrics(&["@myBean"], sink.clone());

        metrics.record(&chrome_request());

        assert_eq!(sink.names(), vec!["user-agent.value"]);
    }

    #[test]
    fn test_non_http_request_is_skipped() {
        let sink = Arc::new(RecordingSink::default());
        let metrics = metrics(&[], sink.clone());

        let outcome = metrics.record(&PlainMessage);

        assert_eq!(outcome, DispatchOutcome::Skipped(SkipReason::NotHttp));
        assert!(sink.names().is_empty());
    }

    #[test]
    fn test_missing_or_blank_header_is_skipped() {
        let sink = Arc::new(RecordingSink::default());
        let metrics = metrics(&[], sink.clone());

        let bare = Request::builder().uri("/").body(()).unwrap();
        let blank = Request::builder()
            .uri("/")
            .header("User-Agent", "  ")
            .body(())
            .unwrap();

        assert_eq!(
            metrics.record(&bare),
            DispatchOutcome::Skipped(SkipReason::MissingHeader)
        );
        assert_eq!(
            metrics.record(&blank),
            DispatchOutcome::Skipped(SkipReason::MissingHeader)
        );
        assert!(sink.names().is_empty());
        assert!(metrics.cache().is_empty());
    }

    #[test]
    fn test_parse_failure_emits_nothing() {
        let sink = Arc::new(RecordingSink::default());
        let metrics = metrics(&[], sink.clone());
        let request = Request::builder()
            .uri("/")
            .header("User-Agent", "???")
            .body(())
            .unwrap();

        let outcome = metrics.record(&request);

        assert!(matches!(
            outcome,
            DispatchOutcome::ParseFailed(ParseError::Unrecognized { .. })
        ));
        assert!(outcome.emitted().is_empty());
        assert!(sink.names().is_empty());
    }

    #[test]
    fn test_failing_key_is_isolated() {
        let sink = Arc::new(RecordingSink::default());
        let metrics = metrics(
            &["#this.nope", "#this.name", "unsupported", "@missingBean", "#this.family"],
            sink.clone(),
        );

        let outcome = metrics.record(&chrome_request());

        assert_eq!(sink.names(), vec!["user-agent.chrome", "user-agent.chrome"]);
        let failed: Vec<&str> = outcome.failures().into_iter().map(|(key, _)| key).collect();
        assert_eq!(failed, vec!["#this.nope", "unsupported", "@missingBean"]);
        assert_eq!(outcome.emitted().len(), 2);
    }

    #[test]
    fn test_empty_fragment_is_skipped() {
        let sink = Arc::new(RecordingSink::default());
        let metrics = metrics(
            &["@currentRequest.getQueryString()", "''", "'  '"],
            sink.clone(),
        );
        let request = Request::builder()
            .uri("/?")
            .header("User-Agent", CHROME)
            .body(())
            .unwrap();

        let outcome = metrics.record(&request);

        assert!(sink.names().is_empty());
        let reasons: Vec<_> = outcome.failures().into_iter().map(|(_, err)| err.clone()).collect();
        assert_eq!(reasons.len(), 3);
        assert!(matches!(reasons[2], ResolutionError::EmptyValue { .. }));
        assert!(reasons
            .iter()
            .all(|err| matches!(err, ResolutionError::EmptyValue { .. } | ResolutionError::MissingRequestValue { .. })));
    }

    #[test]
    fn test_custom_prefix_and_header() {
        let sink = Arc::new(RecordingSink::default());
        let metrics = UserAgentMetrics::builder(sink.clone())
            .config(
                UserAgentMetricsConfig::builder()
                    .prefix("Client Apps")
                    .header_name("X-Client")
                    .key("#this.name")
                    .build(),
            )
            .build();
        let request = Request::builder()
            .uri("/")
            .header("X-Client", "curl/8.4.0")
            .body(())
            .unwrap();

        metrics.record(&request);

        assert_eq!(sink.names(), vec!["client-apps.curl"]);
    }

    #[test]
    fn test_custom_parser_and_cache_reuse() {
        let sink = Arc::new(RecordingSink::default());
        let parser = |ua: &str| -> Result<Descriptor, ParseError> {
            Ok(Descriptor::builder(ua.to_uppercase()).version("7.1").build())
        };
        let metrics = UserAgentMetrics::builder(sink.clone())
            .parser(Arc::new(parser))
            .build();
        let request = Request::builder()
            .uri("/")
            .header("User-Agent", "Custom Agent")
            .body(())
            .unwrap();

        metrics.record(&request);
        metrics.record(&request);

        assert_eq!(
            sink.names(),
            vec![
                "user-agent.custom-agent",
                "user-agent.custom-agent.7",
                "user-agent.custom-agent",
                "user-agent.custom-agent.7",
            ]
        );
        let stats = metrics.cache().stats();
        assert_eq!(stats.parses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn test_handle_always_calls_next_once() {
        let sink = Arc::new(RecordingSink::default());
        let metrics = metrics(&["#this.nope"], sink);

        let mut calls = 0;
        let out = metrics.handle(PlainMessage, |_| {
            calls += 1;
            "plain"
        });
        assert_eq!(out, "plain");

        let out = metrics.handle(chrome_request(), |req| {
            calls += 1;
            req.uri().path().to_string()
        });
        assert_eq!(out, "/");

        let unparseable = Request::builder()
            .header("User-Agent", "???")
            .body(())
            .unwrap();
        metrics.handle(unparseable, |_| calls += 1);

        assert_eq!(calls, 3);
    }

    #[test]
    fn test_panicking_parser_does_not_block_next() {
        let sink = Arc::new(RecordingSink::default());
        let parser = |_: &str| -> Result<Descriptor, ParseError> { panic!("parser bug") };
        let metrics = UserAgentMetrics::builder(sink.clone())
            .parser(Arc::new(parser))
            .build();

        let called = metrics.handle(chrome_request(), |_| true);

        assert!(called);
        assert!(sink.names().is_empty());
    }

    #[test]
    fn test_filter_lifecycle() {
        let sink = Arc::new(RecordingSink::default());
        let metrics = metrics(&[], sink.clone());

        RequestFilter::<Request<()>>::init(&metrics);
        let status = metrics.filter(chrome_request(), |_| 200);
        RequestFilter::<Request<()>>::destroy(&metrics);

        assert_eq!(status, 200);
        assert_eq!(sink.names().len(), 2);
    }

    #[test]
    fn test_try_build_rejects_invalid_config() {
        let sink: Arc<dyn CounterSink> = Arc::new(CounterRegistry::new());
        let result = UserAgentMetrics::try_new(
            UserAgentMetricsConfig::builder().key("bogus").build(),
            sink.clone(),
        );
        assert!(matches!(result, Err(ConfigError::InvalidKey { index: 0, .. })));
        assert!(UserAgentMetrics::try_new(UserAgentMetricsConfig::default(), sink.clone()).is_ok());

        let lenient = UserAgentMetrics::builder(sink)
            .config(UserAgentMetricsConfig::builder().cache_capacity(0).prefix(" ").build())
            .build();
        assert_eq!(lenient.cache().capacity(), 1);
        assert_eq!(lenient.prefix(), DEFAULT_PREFIX);
    }

    #[test]
    fn test_blank_prefix_falls_back_to_default() {
        let sink = Arc::new(RecordingSink::default());
        let blank = UserAgentMetricsConfig::builder().prefix(" \t").build();

        assert!(matches!(
            UserAgentMetrics::try_new(blank.clone(), sink.clone()),
            Err(ConfigError::EmptyPrefix)
        ));

        let metrics = UserAgentMetrics::new(blank, sink.clone());
        metrics.record(&chrome_request());

        assert_eq!(metrics.prefix(), DEFAULT_PREFIX);
        assert_eq!(sink.names(), vec!["user-agent.chrome", "user-agent.chrome.41"]);
    }
}
