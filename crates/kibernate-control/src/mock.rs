//! In-memory control plane for tests.

use std::sync::Mutex;

use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::error::{ControlPlaneError, ControlPlaneResult};
use crate::types::ReplicaCounts;
use crate::{ControlPlane, ReplicaStream};

/// Scripted control plane: replica counts are set by the test, every
/// `scale` call is logged, and watch subscribers see each change as an
/// event. A `scale` call updates the desired count and emits a snapshot,
/// the way a real control plane generates a modification event.
pub struct MockControlPlane {
    inner: Mutex<Inner>,
    events: broadcast::Sender<ReplicaCounts>,
}

struct Inner {
    counts: ReplicaCounts,
    scale_calls: Vec<u32>,
    fail_scale: bool,
    template: Option<String>,
}

impl MockControlPlane {
    pub fn new(counts: ReplicaCounts) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Mutex::new(Inner {
                counts,
                scale_calls: Vec::new(),
                fail_scale: false,
                template: None,
            }),
            events,
        }
    }

    /// Overwrite the replica counts and notify watchers.
    pub fn set_replicas(&self, desired: u32, ready: u32, total: u32) {
        let counts = ReplicaCounts::new(desired, ready, total);
        self.inner.lock().unwrap().counts = counts;
        let _ = self.events.send(counts);
    }

    /// Every replica count passed to `scale`, in call order.
    pub fn scale_calls(&self) -> Vec<u32> {
        self.inner.lock().unwrap().scale_calls.clone()
    }

    /// Make subsequent `scale` calls fail with `Unavailable`.
    pub fn fail_scales(&self, fail: bool) {
        self.inner.lock().unwrap().fail_scale = fail;
    }

    pub fn set_template(&self, html: &str) {
        self.inner.lock().unwrap().template = Some(html.to_string());
    }

    pub fn counts(&self) -> ReplicaCounts {
        self.inner.lock().unwrap().counts
    }
}

#[async_trait::async_trait]
impl ControlPlane for MockControlPlane {
    async fn replicas(&self) -> ControlPlaneResult<ReplicaCounts> {
        Ok(self.inner.lock().unwrap().counts)
    }

    async fn scale(&self, replicas: u32) -> ControlPlaneResult<()> {
        let counts = {
            let mut inner = self.inner.lock().unwrap();
            inner.scale_calls.push(replicas);
            if inner.fail_scale {
                return Err(ControlPlaneError::Unavailable(
                    "injected scale failure".to_string(),
                ));
            }
            inner.counts.desired = replicas;
            inner.counts
        };
        let _ = self.events.send(counts);
        Ok(())
    }

    async fn watch(&self) -> ControlPlaneResult<ReplicaStream> {
        let stream = BroadcastStream::new(self.events.subscribe())
            .filter_map(|item| async move { item.ok().map(Ok::<_, ControlPlaneError>) });
        Ok(Box::pin(stream))
    }

    async fn loading_template(&self) -> ControlPlaneResult<String> {
        self.inner
            .lock()
            .unwrap()
            .template
            .clone()
            .ok_or_else(|| ControlPlaneError::NotFound("no loading template".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn scale_updates_desired_and_logs_call() {
        let mock = MockControlPlane::new(ReplicaCounts::new(0, 0, 0));
        mock.scale(1).await.unwrap();
        assert_eq!(mock.scale_calls(), vec![1]);
        assert_eq!(mock.replicas().await.unwrap().desired, 1);
    }

    #[tokio::test]
    async fn watch_sees_replica_changes() {
        let mock = MockControlPlane::new(ReplicaCounts::default());
        let mut stream = mock.watch().await.unwrap();
        mock.set_replicas(1, 1, 1);
        let counts = stream.next().await.unwrap().unwrap();
        assert_eq!(counts, ReplicaCounts::new(1, 1, 1));
    }

    #[tokio::test]
    async fn injected_scale_failure() {
        let mock = MockControlPlane::new(ReplicaCounts::default());
        mock.fail_scales(true);
        let err = mock.scale(1).await.unwrap_err();
        assert!(matches!(err, ControlPlaneError::Unavailable(_)));
        // The attempt is still logged.
        assert_eq!(mock.scale_calls(), vec![1]);
    }

    #[tokio::test]
    async fn loading_template_missing_is_not_found() {
        let mock = MockControlPlane::new(ReplicaCounts::default());
        assert!(matches!(
            mock.loading_template().await,
            Err(ControlPlaneError::NotFound(_))
        ));
        mock.set_template("<html></html>");
        assert_eq!(mock.loading_template().await.unwrap(), "<html></html>");
    }
}
