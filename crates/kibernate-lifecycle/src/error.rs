//! Error types for lifecycle operations.

use kibernate_control::ControlPlaneError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A replica snapshot that fits none of the four states.
    #[error("unexpected deployment status: desired={desired} total={total} ready={ready}")]
    UnexpectedStatus { desired: u32, ready: u32, total: u32 },

    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),

    #[error("http client: {0}")]
    Http(String),
}
