//! Deployment status derivation and the shared status cell.

use std::time::Instant;

use kibernate_control::ReplicaCounts;
use tokio::sync::watch;

use crate::error::LifecycleError;

/// Activation state of the proxied deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentStatus {
    /// No replicas exist and none are requested.
    Deactivated,
    /// Replicas are requested but none serve traffic yet.
    Activating,
    /// At least one replica serves traffic.
    Ready,
    /// Replicas still exist but none are requested.
    Deactivating,
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DeploymentStatus::Deactivated => "deactivated",
            DeploymentStatus::Activating => "activating",
            DeploymentStatus::Ready => "ready",
            DeploymentStatus::Deactivating => "deactivating",
        })
    }
}

/// Map a replica snapshot onto a status, first match wins.
pub fn derive_status(counts: ReplicaCounts) -> Result<DeploymentStatus, LifecycleError> {
    let ReplicaCounts {
        desired,
        ready,
        total,
    } = counts;
    if ready > 0 && desired > 0 {
        Ok(DeploymentStatus::Ready)
    } else if total > 0 && desired == 0 {
        Ok(DeploymentStatus::Deactivating)
    } else if total == 0 && desired == 0 {
        Ok(DeploymentStatus::Deactivated)
    } else if ready == 0 && desired > 0 {
        Ok(DeploymentStatus::Activating)
    } else {
        Err(LifecycleError::UnexpectedStatus {
            desired,
            ready,
            total,
        })
    }
}

/// Status together with the instant of the transition that produced it.
#[derive(Debug, Clone, Copy)]
pub struct StatusSnapshot {
    pub status: DeploymentStatus,
    pub changed_at: Instant,
}

/// Shared status cell backed by a watch channel.
///
/// Readers get a consistent `(status, changed_at)` pair in one borrow and
/// can await transitions without polling. Writes are visible to readers
/// before `set` returns.
pub(crate) struct StatusCell {
    tx: watch::Sender<StatusSnapshot>,
}

impl StatusCell {
    pub(crate) fn new(initial: DeploymentStatus) -> Self {
        let (tx, _) = watch::channel(StatusSnapshot {
            status: initial,
            changed_at: Instant::now(),
        });
        Self { tx }
    }

    /// Update the status if it differs, stamping the transition.
    /// Returns the previous status when a transition happened.
    pub(crate) fn set(&self, status: DeploymentStatus) -> Option<DeploymentStatus> {
        let mut previous = None;
        self.tx.send_if_modified(|snap| {
            if snap.status == status {
                false
            } else {
                previous = Some(snap.status);
                snap.status = status;
                snap.changed_at = Instant::now();
                true
            }
        });
        previous
    }

    pub(crate) fn snapshot(&self) -> StatusSnapshot {
        *self.tx.borrow()
    }

    pub(crate) fn status(&self) -> DeploymentStatus {
        self.tx.borrow().status
    }

    /// Resolve once the status is `Ready`, immediately if it already is.
    pub(crate) async fn wait_for_ready(&self) {
        let mut rx = self.tx.subscribe();
        // Cannot fail: the sender lives as long as `self`.
        let _ = rx
            .wait_for(|snap| snap.status == DeploymentStatus::Ready)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn counts(desired: u32, ready: u32, total: u32) -> ReplicaCounts {
        ReplicaCounts {
            desired,
            ready,
            total,
        }
    }

    #[test]
    fn derivation_table() {
        assert_eq!(
            derive_status(counts(1, 1, 1)).unwrap(),
            DeploymentStatus::Ready
        );
        // Ready wins even while older replicas are draining.
        assert_eq!(
            derive_status(counts(1, 1, 2)).unwrap(),
            DeploymentStatus::Ready
        );
        assert_eq!(
            derive_status(counts(0, 0, 1)).unwrap(),
            DeploymentStatus::Deactivating
        );
        assert_eq!(
            derive_status(counts(0, 0, 0)).unwrap(),
            DeploymentStatus::Deactivated
        );
        assert_eq!(
            derive_status(counts(1, 0, 0)).unwrap(),
            DeploymentStatus::Activating
        );
        assert_eq!(
            derive_status(counts(1, 0, 1)).unwrap(),
            DeploymentStatus::Activating
        );
    }

    #[test]
    fn derivation_ready_zero_with_desired_zero_is_deactivating_or_deactivated() {
        // A ready count with no desired replicas still maps by the
        // desired/total rows, never to Ready.
        assert_eq!(
            derive_status(counts(0, 1, 1)).unwrap(),
            DeploymentStatus::Deactivating
        );
    }

    #[test]
    fn set_stamps_only_transitions() {
        let cell = StatusCell::new(DeploymentStatus::Deactivated);
        let before = cell.snapshot().changed_at;

        assert_eq!(cell.set(DeploymentStatus::Deactivated), None);
        assert_eq!(cell.snapshot().changed_at, before);

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(
            cell.set(DeploymentStatus::Activating),
            Some(DeploymentStatus::Deactivated)
        );
        let snap = cell.snapshot();
        assert_eq!(snap.status, DeploymentStatus::Activating);
        assert!(snap.changed_at > before);
    }

    #[tokio::test]
    async fn wait_for_ready_resolves_immediately_when_ready() {
        let cell = StatusCell::new(DeploymentStatus::Ready);
        cell.wait_for_ready().await;
    }

    #[tokio::test]
    async fn wait_for_ready_observes_transition() {
        let cell = std::sync::Arc::new(StatusCell::new(DeploymentStatus::Activating));
        let waiter = {
            let cell = cell.clone();
            tokio::spawn(async move { cell.wait_for_ready().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        cell.set(DeploymentStatus::Ready);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should resolve")
            .unwrap();
    }
}
