//! Axum integration
//!
//! Middleware that records user-agent metrics for every request, a JSON
//! snapshot handler for [`CounterRegistry`], and the `UserAgentMetricsRouter`
//! extension trait wiring both into a router.

use crate::dispatch::UserAgentMetrics;
use crate::sink::CounterRegistry;
use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Path the counter snapshot is served at by default.
pub const DEFAULT_COUNTERS_PATH: &str = "/metrics";

/// Middleware that records user-agent metrics, then runs the rest of the stack.
///
/// Recording never changes the response: failures are logged and the request
/// continues.
///
/// # Example
///
/// ```ignore
/// use axum::{Router, middleware, routing::get};
/// use user_agent_metrics::{user_agent_metrics_middleware, CounterRegistry, UserAgentMetrics};
/// use std::sync::Arc;
///
/// let counters = Arc::new(CounterRegistry::new());
/// let metrics = Arc::new(UserAgentMetrics::builder(counters).build());
///
/// let app = Router::new()
///     .route("/", get(handler))
///     .layer(middleware::from_fn_with_state(metrics, user_agent_metrics_middleware));
/// ```
pub async fn user_agent_metrics_middleware(
    State(metrics): State<Arc<UserAgentMetrics>>,
    request: Request,
    next: Next,
) -> Response {
    metrics.record_guarded(&request);
    next.run(request).await
}

/// Handler returning every counter as a JSON object.
///
/// Names carry a `counter.` prefix:
///
/// ```json
/// { "counter.user-agent.chrome": 3, "counter.user-agent.chrome.41": 3 }
/// ```
pub async fn counters_handler(counters: Arc<CounterRegistry>) -> impl IntoResponse {
    let body: BTreeMap<String, u64> = counters
        .snapshot()
        .into_iter()
        .map(|(name, value)| (format!("counter.{name}"), value))
        .collect();
    Json(body)
}

/// Extension trait for adding user-agent metrics to an Axum Router.
///
/// # Example
///
/// ```ignore
/// use axum::{Router, routing::get};
/// use user_agent_metrics::{CounterRegistry, UserAgentMetrics, UserAgentMetricsRouter};
/// use std::sync::Arc;
///
/// let counters = Arc::new(CounterRegistry::new());
/// let metrics = Arc::new(UserAgentMetrics::builder(counters.clone()).build());
///
/// let app = Router::new()
///     .route("/", get(handler))
///     .with_user_agent_metrics(metrics, counters);
///
/// // Every request is now counted per client, and
/// // GET /metrics returns the counters as JSON.
/// ```
pub trait UserAgentMetricsRouter {
    /// Record metrics on all routes and serve `counters` at `/metrics`.
    fn with_user_agent_metrics(
        self,
        metrics: Arc<UserAgentMetrics>,
        counters: Arc<CounterRegistry>,
    ) -> Self;

    /// Same as `with_user_agent_metrics` with a custom snapshot path.
    fn with_user_agent_metrics_at(
        self,
        metrics: Arc<UserAgentMetrics>,
        counters: Arc<CounterRegistry>,
        counters_path: &str,
    ) -> Self;
}

impl<S> UserAgentMetricsRouter for Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_user_agent_metrics(
        self,
        metrics: Arc<UserAgentMetrics>,
        counters: Arc<CounterRegistry>,
    ) -> Self {
        self.with_user_agent_metrics_at(metrics, counters, DEFAULT_COUNTERS_PATH)
    }

    fn with_user_agent_metrics_at(
        self,
        metrics: Arc<UserAgentMetrics>,
        counters: Arc<CounterRegistry>,
        counters_path: &str,
    ) -> Self {
        self.route(
            counters_path,
            get(move || counters_handler(counters.clone())),
        )
        .layer(middleware::from_fn_with_state(
            metrics,
            user_agent_metrics_middleware,
        ))
    }
}
