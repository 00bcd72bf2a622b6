//! Idleness supervisor.
//!
//! Two periodic tasks: the deactivation tick scales the deployment down
//! after the idle timeout, and the autostart tick scales it up while a
//! protected window is open. Both are level-triggered and lean on the
//! idempotence of the controller operations.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kibernate_policy::WeeklySchedule;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::activity::ActivityTracker;
use crate::controller::LifecycleController;
use crate::status::DeploymentStatus;

/// Cadence of the deactivation check.
pub const DEACTIVATION_TICK: Duration = Duration::from_secs(10);

/// Cadence of the autostart check.
pub const AUTOSTART_TICK: Duration = Duration::from_secs(30);

pub struct IdlenessSupervisor {
    lifecycle: Arc<LifecycleController>,
    activity: Arc<ActivityTracker>,
    schedule: WeeklySchedule,
    idle_timeout: Duration,
}

impl IdlenessSupervisor {
    pub fn new(
        lifecycle: Arc<LifecycleController>,
        activity: Arc<ActivityTracker>,
        schedule: WeeklySchedule,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            lifecycle,
            activity,
            schedule,
            idle_timeout,
        }
    }

    /// Periodically deactivate the deployment once it has been ready and
    /// without qualifying activity for longer than the idle timeout.
    pub async fn run_deactivation(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = interval.as_secs(),
            idle_timeout_secs = self.idle_timeout.as_secs(),
            "idleness supervisor started"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => self.deactivation_tick().await,
                _ = shutdown.changed() => break,
            }
        }
        info!("idleness supervisor stopped");
    }

    async fn deactivation_tick(&self) {
        if self.schedule.protected_at(Utc::now()) {
            return;
        }
        let snapshot = self.lifecycle.status_snapshot();
        if snapshot.status != DeploymentStatus::Ready {
            return;
        }
        // Both the last request and the transition to ready must be older
        // than the timeout, so a deployment that just came up with no
        // traffic yet is not cut down immediately.
        let idle_for = self.activity.elapsed();
        if idle_for <= self.idle_timeout || snapshot.changed_at.elapsed() <= self.idle_timeout {
            return;
        }
        info!(
            idle_secs = idle_for.as_secs(),
            "deployment idle, deactivating"
        );
        if let Err(e) = self.lifecycle.deactivate().await {
            warn!(error = %e, "deactivation failed");
        }
    }

    /// Periodically activate a fully deactivated deployment while inside
    /// a protected window. Level-triggered; repeated ticks inside the
    /// window are no-ops through `activate`.
    pub async fn run_autostart(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        if !self.schedule.autostart {
            return;
        }
        info!(interval_secs = interval.as_secs(), "autostart loop started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => self.autostart_tick().await,
                _ = shutdown.changed() => break,
            }
        }
        info!("autostart loop stopped");
    }

    async fn autostart_tick(&self) {
        // Only a fully deactivated deployment is started; one still
        // deactivating is left to finish.
        if self.lifecycle.status() != DeploymentStatus::Deactivated {
            return;
        }
        if !self.schedule.protected_at(Utc::now()) {
            return;
        }
        info!("protected window open, autostarting deployment");
        if let Err(e) = self.lifecycle.activate().await {
            warn!(error = %e, "autostart activation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use kibernate_control::{ControlPlane, MockControlPlane, ReplicaCounts};
    use kibernate_policy::TimeWindow;

    use super::*;
    use crate::controller::LifecycleOptions;

    fn all_day() -> Option<TimeWindow> {
        Some(TimeWindow::parse("test", "00:00-23:59").unwrap())
    }

    fn always_protected(autostart: bool) -> WeeklySchedule {
        WeeklySchedule {
            mo_fr: all_day(),
            sat: all_day(),
            sun: all_day(),
            autostart,
        }
    }

    async fn controller(mock: &Arc<MockControlPlane>) -> Arc<LifecycleController> {
        LifecycleController::new(
            mock.clone() as Arc<dyn ControlPlane>,
            LifecycleOptions {
                deployment: "my-app".to_string(),
                target_base_url: "http://127.0.0.1:1".to_string(),
                readiness_probe_path: String::new(),
                readiness_timeout_secs: 30,
            },
        )
        .await
        .unwrap()
    }

    fn supervisor(
        lifecycle: Arc<LifecycleController>,
        schedule: WeeklySchedule,
        idle_timeout: Duration,
    ) -> Arc<IdlenessSupervisor> {
        Arc::new(IdlenessSupervisor::new(
            lifecycle,
            Arc::new(ActivityTracker::new()),
            schedule,
            idle_timeout,
        ))
    }

    #[tokio::test]
    async fn idle_deployment_is_deactivated_exactly_once() {
        let mock = Arc::new(MockControlPlane::new(ReplicaCounts::new(1, 1, 1)));
        let lifecycle = controller(&mock).await;
        let supervisor = supervisor(
            lifecycle.clone(),
            WeeklySchedule::default(),
            Duration::from_millis(50),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = {
            let supervisor = supervisor.clone();
            tokio::spawn(async move {
                supervisor
                    .run_deactivation(Duration::from_millis(20), shutdown_rx)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(250)).await;
        shutdown_tx.send(true).unwrap();
        let _ = task.await;

        // One scale to zero; later ticks saw a non-ready status.
        assert_eq!(mock.scale_calls(), vec![0]);
        assert_eq!(lifecycle.status(), DeploymentStatus::Deactivating);
    }

    #[tokio::test]
    async fn recent_activity_defers_deactivation() {
        let mock = Arc::new(MockControlPlane::new(ReplicaCounts::new(1, 1, 1)));
        let lifecycle = controller(&mock).await;
        let activity = Arc::new(ActivityTracker::new());
        let supervisor = Arc::new(IdlenessSupervisor::new(
            lifecycle,
            activity.clone(),
            WeeklySchedule::default(),
            Duration::from_millis(200),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = {
            let supervisor = supervisor.clone();
            tokio::spawn(async move {
                supervisor
                    .run_deactivation(Duration::from_millis(20), shutdown_rx)
                    .await
            })
        };

        // Keep touching activity past the point where the status age
        // alone would allow deactivation.
        for _ in 0..8 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            activity.touch();
        }
        assert!(mock.scale_calls().is_empty());

        // Stop touching; the idle timeout now runs out.
        tokio::time::sleep(Duration::from_millis(400)).await;
        shutdown_tx.send(true).unwrap();
        let _ = task.await;
        assert_eq!(mock.scale_calls(), vec![0]);
    }

    #[tokio::test]
    async fn protected_window_suppresses_deactivation() {
        let mock = Arc::new(MockControlPlane::new(ReplicaCounts::new(1, 1, 1)));
        let lifecycle = controller(&mock).await;
        let supervisor = supervisor(
            lifecycle.clone(),
            always_protected(false),
            Duration::from_millis(10),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = {
            let supervisor = supervisor.clone();
            tokio::spawn(async move {
                supervisor
                    .run_deactivation(Duration::from_millis(20), shutdown_rx)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown_tx.send(true).unwrap();
        let _ = task.await;

        assert!(mock.scale_calls().is_empty());
        assert_eq!(lifecycle.status(), DeploymentStatus::Ready);
    }

    #[tokio::test]
    async fn autostart_activates_once_inside_window() {
        let mock = Arc::new(MockControlPlane::new(ReplicaCounts::new(0, 0, 0)));
        let lifecycle = controller(&mock).await;
        let supervisor = supervisor(
            lifecycle.clone(),
            always_protected(true),
            Duration::from_secs(600),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = {
            let supervisor = supervisor.clone();
            tokio::spawn(async move {
                supervisor
                    .run_autostart(Duration::from_millis(20), shutdown_rx)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown_tx.send(true).unwrap();
        let _ = task.await;

        // Level-triggered but idempotent: one scale call, later ticks
        // observed the activating status.
        assert_eq!(mock.scale_calls(), vec![1]);
        assert_eq!(lifecycle.status(), DeploymentStatus::Activating);
    }

    #[tokio::test]
    async fn autostart_ignores_deactivating_deployment() {
        let mock = Arc::new(MockControlPlane::new(ReplicaCounts::new(0, 0, 1)));
        let lifecycle = controller(&mock).await;
        assert_eq!(lifecycle.status(), DeploymentStatus::Deactivating);
        let supervisor = supervisor(
            lifecycle,
            always_protected(true),
            Duration::from_secs(600),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = {
            let supervisor = supervisor.clone();
            tokio::spawn(async move {
                supervisor
                    .run_autostart(Duration::from_millis(20), shutdown_rx)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(150)).await;
        shutdown_tx.send(true).unwrap();
        let _ = task.await;
        assert!(mock.scale_calls().is_empty());
    }

    #[tokio::test]
    async fn autostart_disabled_returns_immediately() {
        let mock = Arc::new(MockControlPlane::new(ReplicaCounts::new(0, 0, 0)));
        let lifecycle = controller(&mock).await;
        let supervisor = supervisor(
            lifecycle,
            always_protected(false),
            Duration::from_secs(600),
        );

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        // Completes without the shutdown signal ever firing.
        tokio::time::timeout(
            Duration::from_millis(100),
            supervisor.run_autostart(Duration::from_millis(20), shutdown_rx),
        )
        .await
        .expect("disabled autostart should return immediately");
    }
}
