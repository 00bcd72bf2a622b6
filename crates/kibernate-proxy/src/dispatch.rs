//! Request dispatch.
//!
//! Ordering per request: uptime monitor short-circuit, activity stamp,
//! ready check, activate plus wait strategy. The dispatcher never
//! deactivates, and synthesized monitor replies never stamp activity.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use kibernate_lifecycle::DeploymentStatus;
use kibernate_policy::{ProxyConfig, WaitType};
use tracing::{debug, error, info};

use crate::server::ProxyState;

pub(crate) async fn dispatch(State(state): State<ProxyState>, req: Request<Body>) -> Response {
    let path = req.uri().path().to_string();
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    if state.config.is_uptime_monitor(&user_agent) {
        debug!(%path, %user_agent, "uptime monitor request");
        if state.lifecycle.status() == DeploymentStatus::Ready {
            return forward(&state, req).await;
        }
        return monitor_response(&state.config);
    }

    if state.config.qualifies_as_activity(&path, &user_agent) {
        debug!(%path, "qualifying activity");
        state.activity.touch();
    }

    if state.lifecycle.status() == DeploymentStatus::Ready {
        return forward(&state, req).await;
    }

    info!(%path, "deployment not ready, activating");
    if let Err(e) = state.lifecycle.activate().await {
        error!(error = %e, "activation failed");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    let strategy = state.config.wait_strategy(&path);
    debug!(%path, %strategy, "applying wait strategy");
    match strategy {
        WaitType::Connect => {
            state.lifecycle.wait_for_ready().await;
            forward(&state, req).await
        }
        WaitType::Loading => loading_response(state.loading_html.as_deref()),
        WaitType::None => unavailable_response(),
    }
}

async fn forward(state: &ProxyState, req: Request<Body>) -> Response {
    match state.forwarder.forward(req).await {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "forwarding failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Synthetic reply for the uptime monitor while the deployment is down.
fn monitor_response(config: &ProxyConfig) -> Response {
    let status =
        StatusCode::from_u16(config.uptime_monitor_response_code).unwrap_or(StatusCode::OK);
    (
        status,
        [(header::CONTENT_TYPE, "text/plain")],
        config.uptime_monitor_response_message.clone(),
    )
        .into_response()
}

/// The loading page, with caching disabled so the client keeps polling.
fn loading_response(html: Option<&String>) -> Response {
    let Some(html) = html else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "loading template not configured",
        )
            .into_response();
    };
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/html"),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        html.clone(),
    )
        .into_response()
}

fn unavailable_response() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        "503 - Service Unavailable",
    )
        .into_response()
}
