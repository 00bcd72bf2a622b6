//! Streaming reverse-forwarder.
//!
//! Rewrites the request URL onto the target base, passes headers through
//! minus the hop-by-hop set, and streams both bodies without buffering.
//! The Host header is set to the target by the client.

use axum::body::Body;
use axum::http::header::HeaderName;
use axum::http::{header, Request, Response, StatusCode};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("building response: {0}")]
    Response(#[from] axum::http::Error),

    #[error("http client: {0}")]
    Client(String),
}

/// Forwards requests to one fixed backend base URL.
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    base_url: String,
}

impl Forwarder {
    /// `base_url` is scheme, host, port, and path prefix, without a
    /// trailing slash.
    pub fn new(base_url: String) -> Result<Self, ProxyError> {
        // No client timeout: the listener's own timeout is the bound.
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ProxyError::Client(e.to_string()))?;
        Ok(Self { client, base_url })
    }

    pub async fn forward(&self, req: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let (parts, body) = req.into_parts();
        let query = parts
            .uri
            .query()
            .map(|q| format!("?{q}"))
            .unwrap_or_default();
        let url = format!("{}{}{}", self.base_url, parts.uri.path(), query);
        debug!(method = %parts.method, %url, "forwarding request");

        let mut headers = reqwest::header::HeaderMap::new();
        for (name, value) in parts.headers.iter() {
            if skip_request_header(name) {
                continue;
            }
            headers.insert(name.clone(), value.clone());
        }

        let mut upstream_req = self
            .client
            .request(parts.method.clone(), &url)
            .headers(headers);
        if parts.headers.contains_key(header::CONTENT_LENGTH)
            || parts.headers.contains_key(header::TRANSFER_ENCODING)
        {
            upstream_req = upstream_req.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let upstream = upstream_req.send().await?;

        let status =
            StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
        let mut response = Response::builder().status(status);
        for (name, value) in upstream.headers().iter() {
            if skip_response_header(name) {
                continue;
            }
            response = response.header(name, value);
        }
        Ok(response.body(Body::from_stream(upstream.bytes_stream()))?)
    }
}

/// Hop-by-hop headers, plus Host (rewritten to the target) and
/// Content-Length (recomputed from the streamed body).
fn skip_request_header(name: &HeaderName) -> bool {
    is_hop_by_hop(name) || name == header::HOST || name == header::CONTENT_LENGTH
}

fn skip_response_header(name: &HeaderName) -> bool {
    is_hop_by_hop(name)
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_by_hop_headers_are_skipped_both_ways() {
        for raw in ["connection", "transfer-encoding", "upgrade", "te"] {
            let name = HeaderName::from_static(raw);
            assert!(skip_request_header(&name), "{raw}");
            assert!(skip_response_header(&name), "{raw}");
        }
    }

    #[test]
    fn host_and_length_are_rewritten_on_the_request_only() {
        assert!(skip_request_header(&header::HOST));
        assert!(skip_request_header(&header::CONTENT_LENGTH));
        assert!(!skip_response_header(&header::CONTENT_LENGTH));
    }

    #[test]
    fn end_to_end_headers_pass_through() {
        for raw in ["content-type", "authorization", "x-request-id", "cookie"] {
            let name = HeaderName::from_static(raw);
            assert!(!skip_request_header(&name), "{raw}");
            assert!(!skip_response_header(&name), "{raw}");
        }
    }
}
