//! Lifecycle controller.
//!
//! Owns the authoritative deployment status. Snapshots arrive from the
//! control plane (one synchronous read at startup, then the watch stream
//! consumed by the reconciler) and are folded through the derivation
//! table; activate/deactivate mutate the desired replica count and
//! publish the corresponding transitional status.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use kibernate_control::{ControlPlane, ReplicaCounts};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::LifecycleError;
use crate::status::{derive_status, DeploymentStatus, StatusCell, StatusSnapshot};

/// Backoff between watch reconnect attempts.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Readiness probe attempt cadence and per-attempt ceiling.
const PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Controller construction parameters.
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Deployment name, for log context.
    pub deployment: String,
    /// Base URL of the backend, for the readiness probe.
    pub target_base_url: String,
    /// In-band readiness URL; empty disables the gate.
    pub readiness_probe_path: String,
    /// Gate ceiling in seconds; 0 means unbounded.
    pub readiness_timeout_secs: u16,
}

struct ReadinessGate {
    url: String,
    /// Zero means no ceiling.
    ceiling: Duration,
}

/// Observes and manipulates the deployment's replica count.
pub struct LifecycleController {
    control: Arc<dyn ControlPlane>,
    status: StatusCell,
    gate: Option<ReadinessGate>,
    /// Serializes scale operations so concurrent activations collapse
    /// into a single control plane write.
    scale_lock: tokio::sync::Mutex<()>,
    /// Bumped per snapshot; a pending readiness gate only publishes if
    /// no newer snapshot arrived while it probed.
    generation: AtomicU64,
    http: reqwest::Client,
    deployment: String,
}

impl LifecycleController {
    /// Build a controller from one synchronous control plane snapshot.
    pub async fn new(
        control: Arc<dyn ControlPlane>,
        options: LifecycleOptions,
    ) -> Result<Arc<Self>, LifecycleError> {
        let counts = control.replicas().await?;
        let derived = derive_status(counts)?;

        let gate = (!options.readiness_probe_path.is_empty()).then(|| ReadinessGate {
            url: format!(
                "{}{}",
                options.target_base_url, options.readiness_probe_path
            ),
            ceiling: Duration::from_secs(u64::from(options.readiness_timeout_secs)),
        });

        // When the gate applies to the very first snapshot, start out as
        // activating and let the probe publish ready.
        let gated_start = derived == DeploymentStatus::Ready && gate.is_some();
        let initial = if gated_start {
            DeploymentStatus::Activating
        } else {
            derived
        };

        let http = reqwest::Client::builder()
            .timeout(PROBE_INTERVAL)
            .build()
            .map_err(|e| LifecycleError::Http(e.to_string()))?;

        let controller = Arc::new(Self {
            control,
            status: StatusCell::new(initial),
            gate,
            scale_lock: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            http,
            deployment: options.deployment,
        });
        info!(deployment = %controller.deployment, status = %initial, "initial deployment status");

        if gated_start {
            controller.spawn_readiness_gate(0);
        }
        Ok(controller)
    }

    pub fn status(&self) -> DeploymentStatus {
        self.status.status()
    }

    /// Consistent `(status, changed_at)` pair.
    pub fn status_snapshot(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    /// Resolve once the deployment is ready.
    pub async fn wait_for_ready(&self) {
        self.status.wait_for_ready().await;
    }

    /// Request scale-up. Returns once the scale write is submitted, not
    /// once the deployment is ready. A no-op when the deployment is
    /// already ready or activating.
    pub async fn activate(&self) -> Result<(), LifecycleError> {
        if matches!(
            self.status.status(),
            DeploymentStatus::Ready | DeploymentStatus::Activating
        ) {
            return Ok(());
        }
        let _guard = self.scale_lock.lock().await;
        // A concurrent caller may have won the race for the lock.
        if matches!(
            self.status.status(),
            DeploymentStatus::Ready | DeploymentStatus::Activating
        ) {
            return Ok(());
        }
        let counts = self.control.replicas().await?;
        if counts.desired < 1 {
            self.control.scale(1).await?;
            self.publish(DeploymentStatus::Activating);
        }
        Ok(())
    }

    /// Request scale-down. A no-op when the deployment is already
    /// deactivated or deactivating.
    pub async fn deactivate(&self) -> Result<(), LifecycleError> {
        if matches!(
            self.status.status(),
            DeploymentStatus::Deactivated | DeploymentStatus::Deactivating
        ) {
            return Ok(());
        }
        let _guard = self.scale_lock.lock().await;
        if matches!(
            self.status.status(),
            DeploymentStatus::Deactivated | DeploymentStatus::Deactivating
        ) {
            return Ok(());
        }
        let counts = self.control.replicas().await?;
        if counts.desired > 0 {
            self.control.scale(0).await?;
            self.publish(DeploymentStatus::Deactivating);
        }
        Ok(())
    }

    /// Consume the control plane watch until shutdown, reconnecting with
    /// a bounded backoff. Long-lived.
    pub async fn run_reconciler(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(deployment = %self.deployment, "reconciler started");
        loop {
            match self.watch_once(&mut shutdown).await {
                WatchOutcome::Shutdown => break,
                WatchOutcome::Disconnected(reason) => {
                    warn!(
                        deployment = %self.deployment,
                        %reason,
                        backoff_secs = RECONNECT_BACKOFF.as_secs(),
                        "control plane watch interrupted, reconnecting"
                    );
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!(deployment = %self.deployment, "reconciler stopped");
    }

    async fn watch_once(self: &Arc<Self>, shutdown: &mut watch::Receiver<bool>) -> WatchOutcome {
        // Fresh snapshot first: events may have been missed while the
        // watch was down.
        match self.control.replicas().await {
            Ok(counts) => self.apply_snapshot(counts),
            Err(e) => return WatchOutcome::Disconnected(e.to_string()),
        }
        let mut stream = match self.control.watch().await {
            Ok(stream) => stream,
            Err(e) => return WatchOutcome::Disconnected(e.to_string()),
        };
        loop {
            tokio::select! {
                item = stream.next() => match item {
                    Some(Ok(counts)) => self.apply_snapshot(counts),
                    Some(Err(e)) => return WatchOutcome::Disconnected(e.to_string()),
                    None => return WatchOutcome::Disconnected("watch stream ended".to_string()),
                },
                _ = shutdown.changed() => return WatchOutcome::Shutdown,
            }
        }
    }

    /// Fold one replica snapshot into the published status.
    fn apply_snapshot(self: &Arc<Self>, counts: ReplicaCounts) {
        let derived = match derive_status(counts) {
            Ok(status) => status,
            Err(e) => {
                warn!(deployment = %self.deployment, error = %e, "ignoring snapshot");
                return;
            }
        };
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if derived == DeploymentStatus::Ready
            && self.gate.is_some()
            && self.status.status() != DeploymentStatus::Ready
        {
            self.spawn_readiness_gate(generation);
        } else {
            self.publish(derived);
        }
    }

    fn publish(&self, status: DeploymentStatus) {
        if let Some(previous) = self.status.set(status) {
            info!(
                deployment = %self.deployment,
                from = %previous,
                to = %status,
                "deployment status changed"
            );
        }
    }

    fn spawn_readiness_gate(self: &Arc<Self>, generation: u64) {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_readiness_gate(generation).await });
    }

    /// Probe the application readiness URL once per second until it
    /// answers 200 or the ceiling elapses, then publish ready. Runs off
    /// the reconciler so snapshots are never blocked; a newer snapshot
    /// supersedes the pending gate via the generation counter.
    async fn run_readiness_gate(&self, generation: u64) {
        let Some(gate) = &self.gate else { return };
        let started = Instant::now();
        debug!(url = %gate.url, "readiness gate started");
        loop {
            if self.generation.load(Ordering::SeqCst) != generation {
                debug!(url = %gate.url, "readiness gate superseded");
                return;
            }
            match self.http.get(&gate.url).send().await {
                Ok(resp) if resp.status() == reqwest::StatusCode::OK => break,
                Ok(resp) => {
                    debug!(url = %gate.url, status = %resp.status(), "readiness probe not ready")
                }
                Err(e) => debug!(url = %gate.url, error = %e, "readiness probe failed"),
            }
            if !gate.ceiling.is_zero() && started.elapsed() >= gate.ceiling {
                warn!(
                    deployment = %self.deployment,
                    timeout_secs = gate.ceiling.as_secs(),
                    "readiness probe never answered 200, publishing ready anyway"
                );
                break;
            }
            tokio::time::sleep(PROBE_INTERVAL).await;
        }
        if self.generation.load(Ordering::SeqCst) == generation {
            self.publish(DeploymentStatus::Ready);
        }
    }
}

enum WatchOutcome {
    Shutdown,
    Disconnected(String),
}
