//! kibernate-lifecycle: owns the deployment's activation state.
//!
//! The [`LifecycleController`] derives a [`DeploymentStatus`] from control
//! plane snapshots, publishes it through a watch cell that request
//! handlers can wait on, and exposes the activate/deactivate operations.
//! The [`IdlenessSupervisor`] periodically deactivates an idle deployment
//! and force-activates it inside protected windows when autostart is on.

pub mod activity;
pub mod controller;
pub mod error;
pub mod idle;
pub mod status;

pub use activity::ActivityTracker;
pub use controller::{LifecycleController, LifecycleOptions};
pub use error::LifecycleError;
pub use idle::{IdlenessSupervisor, AUTOSTART_TICK, DEACTIVATION_TICK};
pub use status::{derive_status, DeploymentStatus, StatusSnapshot};
