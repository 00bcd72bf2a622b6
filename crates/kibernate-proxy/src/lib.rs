//! kibernate-proxy: the HTTP entry point.
//!
//! A single fallback handler receives every request, classifies it
//! against the configuration, stamps activity, and either forwards to
//! the backend, activates the deployment and applies the request's wait
//! strategy, or answers the uptime monitor synthetically.

mod dispatch;
pub mod forward;
pub mod server;

pub use forward::{Forwarder, ProxyError};
pub use server::{build_router, ProxyState};
