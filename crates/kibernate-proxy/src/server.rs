//! Router construction and shared handler state.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use kibernate_lifecycle::{ActivityTracker, LifecycleController};
use kibernate_policy::ProxyConfig;
use tower_http::timeout::TimeoutLayer;

use crate::dispatch;
use crate::forward::Forwarder;

/// Listener-side request timeout; also the practical upper bound for a
/// connect-strategy wait.
pub const LISTENER_TIMEOUT: Duration = Duration::from_secs(60);

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct ProxyState {
    pub config: Arc<ProxyConfig>,
    pub lifecycle: Arc<LifecycleController>,
    pub activity: Arc<ActivityTracker>,
    pub forwarder: Forwarder,
    /// Present whenever the loading strategy is reachable under the
    /// configuration.
    pub loading_html: Option<Arc<String>>,
}

/// Build the proxy router: one fallback handler so every method and path
/// is dispatched.
pub fn build_router(state: ProxyState) -> Router {
    Router::new()
        .fallback(dispatch::dispatch)
        .layer(TimeoutLayer::new(LISTENER_TIMEOUT))
        .with_state(state)
}
