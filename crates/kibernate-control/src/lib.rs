//! kibernate-control: the workload control plane port.
//!
//! Defines the interface kibernate uses to observe and manipulate the
//! replica count of the single proxied workload, plus the adapters that
//! implement it:
//!
//! - [`KubeControlPlane`]: talks to the Kubernetes API server over REST
//!   using in-cluster credentials.
//! - [`MockControlPlane`]: in-memory implementation with scripted replica
//!   counts and a scale-call log, for tests.
//!
//! All authority lives in the control plane; kibernate itself keeps no
//! persistent state.

pub mod error;
pub mod kube;
pub mod mock;
pub mod types;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

pub use error::{ControlPlaneError, ControlPlaneResult};
pub use kube::KubeControlPlane;
pub use mock::MockControlPlane;
pub use types::ReplicaCounts;

/// Stream of replica-count snapshots for the target workload.
///
/// The stream ends (or yields an error) when the underlying watch
/// disconnects; the consumer is expected to re-establish it.
pub type ReplicaStream = Pin<Box<dyn Stream<Item = ControlPlaneResult<ReplicaCounts>> + Send>>;

/// Outbound port for the orchestration platform.
///
/// Four operations only: read replicas, set the desired replica count,
/// watch for replica changes, and fetch the loading page template.
/// Implementations surface their errors as [`ControlPlaneError`] without
/// retrying; retry policy belongs to the caller.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Current desired/ready/total replica counts of the target workload.
    async fn replicas(&self) -> ControlPlaneResult<ReplicaCounts>;

    /// Set the desired replica count of the target workload.
    async fn scale(&self, replicas: u32) -> ControlPlaneResult<()>;

    /// Open a watch on the target workload.
    ///
    /// Yields a snapshot at least for every modification of the workload.
    async fn watch(&self) -> ControlPlaneResult<ReplicaStream>;

    /// Fetch the UTF-8 HTML loading page template.
    async fn loading_template(&self) -> ControlPlaneResult<String>;
}
