//! Kubernetes control plane adapter.
//!
//! Talks to the API server over plain REST with in-cluster credentials
//! (serviceaccount token + cluster CA). Only the four port operations are
//! implemented: the deployment is read for replica counts, scaled through
//! the `scale` subresource, watched with a field-selector watch request,
//! and the loading page is read from a well-known config map.

use std::collections::HashMap;

use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::error::{ControlPlaneError, ControlPlaneResult};
use crate::types::ReplicaCounts;
use crate::{ControlPlane, ReplicaStream};

const SERVICEACCOUNT_TOKEN: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const SERVICEACCOUNT_CA: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Config map holding the loading page, and the key within it.
const LOADING_CONFIG_MAP: &str = "kibernate-loading-html";
const LOADING_CONFIG_KEY: &str = "loading.html";

/// Control plane adapter for a Kubernetes deployment.
pub struct KubeControlPlane {
    client: reqwest::Client,
    base_url: String,
    token: String,
    namespace: String,
    deployment: String,
}

impl KubeControlPlane {
    /// Build an adapter from the in-cluster environment.
    ///
    /// Reads the API server address from `KUBERNETES_SERVICE_HOST` /
    /// `KUBERNETES_SERVICE_PORT_HTTPS` and the serviceaccount token and CA
    /// bundle from their standard mount paths.
    pub fn from_cluster_env(namespace: &str, deployment: &str) -> ControlPlaneResult<Self> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST").map_err(|_| {
            ControlPlaneError::Unavailable(
                "KUBERNETES_SERVICE_HOST is not set; not running in a cluster".to_string(),
            )
        })?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT_HTTPS")
            .or_else(|_| std::env::var("KUBERNETES_SERVICE_PORT"))
            .unwrap_or_else(|_| "443".to_string());

        let token = std::fs::read_to_string(SERVICEACCOUNT_TOKEN)
            .map_err(|e| {
                ControlPlaneError::Unauthorized(format!("reading serviceaccount token: {e}"))
            })?
            .trim()
            .to_string();

        let ca_pem = std::fs::read(SERVICEACCOUNT_CA)
            .map_err(|e| ControlPlaneError::Unavailable(format!("reading cluster CA: {e}")))?;
        let ca = reqwest::Certificate::from_pem(&ca_pem)
            .map_err(|e| ControlPlaneError::Unavailable(format!("parsing cluster CA: {e}")))?;

        // No client-wide timeout: the watch request is long-lived.
        let client = reqwest::Client::builder()
            .add_root_certificate(ca)
            .build()
            .map_err(|e| ControlPlaneError::Unexpected(e.to_string()))?;

        Ok(Self {
            client,
            base_url: format!("https://{host}:{port}"),
            token,
            namespace: namespace.to_string(),
            deployment: deployment.to_string(),
        })
    }

    fn deployment_url(&self) -> String {
        format!(
            "{}/apis/apps/v1/namespaces/{}/deployments/{}",
            self.base_url, self.namespace, self.deployment
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> ControlPlaneResult<T> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ControlPlaneError::Unavailable(e.to_string()))?;
        let resp = check_status(resp).await?;
        resp.json::<T>()
            .await
            .map_err(|e| ControlPlaneError::Unexpected(format!("decoding response: {e}")))
    }
}

#[async_trait::async_trait]
impl ControlPlane for KubeControlPlane {
    async fn replicas(&self) -> ControlPlaneResult<ReplicaCounts> {
        let deployment: Deployment = self.get_json(&self.deployment_url()).await?;
        Ok(deployment.counts())
    }

    async fn scale(&self, replicas: u32) -> ControlPlaneResult<()> {
        // Read-modify-write of the scale subresource, preserving the
        // metadata (resourceVersion) the server handed out.
        let url = format!("{}/scale", self.deployment_url());
        let mut scale: Scale = self.get_json(&url).await?;
        scale.spec.replicas = replicas;

        let resp = self
            .client
            .put(&url)
            .bearer_auth(&self.token)
            .json(&scale)
            .send()
            .await
            .map_err(|e| ControlPlaneError::Unavailable(e.to_string()))?;
        check_status(resp).await?;
        debug!(replicas, deployment = %self.deployment, "scale submitted");
        Ok(())
    }

    async fn watch(&self) -> ControlPlaneResult<ReplicaStream> {
        let url = format!(
            "{}/apis/apps/v1/namespaces/{}/deployments",
            self.base_url, self.namespace
        );
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[
                ("fieldSelector", format!("metadata.name={}", self.deployment)),
                ("watch", "true".to_string()),
            ])
            .send()
            .await
            .map_err(|e| ControlPlaneError::Unavailable(e.to_string()))?;
        let resp = check_status(resp).await?;

        // Watch responses are newline-delimited JSON events. Reframe the
        // byte stream into lines and decode each into a snapshot.
        let (tx, rx) = mpsc::channel::<ControlPlaneResult<ReplicaCounts>>(16);
        let deployment = self.deployment.clone();
        tokio::spawn(async move {
            let mut body = resp.bytes_stream();
            let mut lines = LineBuffer::default();
            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(Err(ControlPlaneError::Unavailable(e.to_string()))).await;
                        return;
                    }
                };
                for line in lines.push(&chunk) {
                    match decode_watch_line(&line) {
                        Ok(Some(counts)) => {
                            if tx.send(Ok(counts)).await.is_err() {
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(%deployment, error = %e, "discarding undecodable watch event");
                        }
                    }
                }
            }
            // Stream end: the server closed the watch. The receiver sees
            // the channel close and reconnects.
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn loading_template(&self) -> ControlPlaneResult<String> {
        let url = format!(
            "{}/api/v1/namespaces/{}/configmaps/{}",
            self.base_url, self.namespace, LOADING_CONFIG_MAP
        );
        let config_map: ConfigMap = self.get_json(&url).await?;
        config_map.data.get(LOADING_CONFIG_KEY).cloned().ok_or_else(|| {
            ControlPlaneError::NotFound(format!(
                "key {LOADING_CONFIG_KEY} not present in config map {LOADING_CONFIG_MAP}"
            ))
        })
    }
}

/// Map a non-success HTTP response onto the semantic error kinds.
async fn check_status(resp: reqwest::Response) -> ControlPlaneResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(classify_status(status.as_u16(), &body))
}

fn classify_status(status: u16, body: &str) -> ControlPlaneError {
    let detail = format!("HTTP {status}: {}", body.chars().take(200).collect::<String>());
    match status {
        404 => ControlPlaneError::NotFound(detail),
        401 | 403 => ControlPlaneError::Unauthorized(detail),
        500..=599 => ControlPlaneError::Unavailable(detail),
        _ => ControlPlaneError::Unexpected(detail),
    }
}

/// Decode one watch line into a replica snapshot.
///
/// `ADDED` and `MODIFIED` both carry a full deployment object and yield a
/// snapshot. `DELETED` and bookmark-style events yield nothing; the next
/// read or reconnect surfaces the disappearance.
fn decode_watch_line(line: &[u8]) -> ControlPlaneResult<Option<ReplicaCounts>> {
    let event: WatchEvent = serde_json::from_slice(line)
        .map_err(|e| ControlPlaneError::Unexpected(format!("decoding watch event: {e}")))?;
    match event.kind.as_str() {
        "ADDED" | "MODIFIED" => Ok(event.object.map(|o| o.counts())),
        "DELETED" => {
            warn!("target deployment deleted while watching");
            Ok(None)
        }
        _ => Ok(None),
    }
}

/// Accumulates watch body chunks and splits off complete lines.
#[derive(Default)]
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }
}

// ── Wire objects ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WatchEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    object: Option<Deployment>,
}

#[derive(Debug, Default, Deserialize)]
struct Deployment {
    #[serde(default)]
    spec: DeploymentSpec,
    #[serde(default)]
    status: DeploymentStatus,
}

impl Deployment {
    fn counts(&self) -> ReplicaCounts {
        ReplicaCounts {
            desired: self.spec.replicas,
            ready: self.status.ready_replicas,
            total: self.status.replicas,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct DeploymentSpec {
    #[serde(default)]
    replicas: u32,
}

#[derive(Debug, Default, Deserialize)]
struct DeploymentStatus {
    #[serde(default)]
    replicas: u32,
    #[serde(default, rename = "readyReplicas")]
    ready_replicas: u32,
}

/// The `scale` subresource. Everything besides `spec.replicas` is carried
/// through untouched so the PUT keeps the server's resourceVersion.
#[derive(Debug, Serialize, Deserialize)]
struct Scale {
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    spec: ScaleSpec,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ScaleSpec {
    #[serde(default)]
    replicas: u32,
}

#[derive(Debug, Deserialize)]
struct ConfigMap {
    #[serde(default)]
    data: HashMap<String, String>,
}
