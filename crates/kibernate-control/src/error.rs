//! Error types for control plane operations.

use thiserror::Error;

/// Result type alias for control plane operations.
pub type ControlPlaneResult<T> = Result<T, ControlPlaneError>;

/// Semantic errors surfaced by a [`ControlPlane`](crate::ControlPlane)
/// implementation.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    /// The target workload (or a named configuration object) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The credentials were rejected by the control plane.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The control plane could not be reached or answered with a server
    /// error. Transient; the caller may reconnect.
    #[error("control plane unavailable: {0}")]
    Unavailable(String),

    /// Anything the adapter cannot classify.
    #[error("unexpected control plane response: {0}")]
    Unexpected(String),
}
