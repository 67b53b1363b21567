//! Ensemble kubehub: cluster client, Pod watch wiring and workload status reads.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use ensemble_core::{ModelServing, PodDelta, Progress};
use ensemble_readiness::StatusSource;
use futures::TryStreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::Api,
    runtime::watcher::{self, Event},
    Client,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Client from the ambient kubeconfig or in-cluster environment.
pub async fn client() -> Result<Client> { Client::try_default().await.context("building kube client") }

fn pods_api(client: Client, namespace: Option<&str>) -> Api<Pod> {
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

fn strip_managed_fields(mut pod: Pod) -> Pod {
    pod.metadata.managed_fields = None;
    pod
}

/// List+watch Pods and forward every observation as a [`PodDelta`].
///
/// `selector` uses the API server's label query syntax. Returns when the
/// stream ends or the receiving side is gone.
pub async fn start_pod_watcher(client: Client, namespace: Option<&str>, selector: Option<&str>, delta_tx: mpsc::Sender<PodDelta>) -> Result<()> {
    let api = pods_api(client, namespace);
    let mut cfg = watcher::Config::default();
    if let Some(sel) = selector {
        cfg = cfg.labels(sel);
    }
    let stream = watcher::watcher(api, cfg);
    futures::pin_mut!(stream);
    info!(ns = ?namespace, selector = ?selector, "pod watcher started");
    while let Some(ev) = stream.try_next().await.context("pod watch stream")? {
        let deltas: Vec<PodDelta> = match ev {
            Event::Applied(p) => vec![PodDelta::applied(strip_managed_fields(p))],
            Event::Deleted(p) => vec![PodDelta::deleted(strip_managed_fields(p))],
            Event::Restarted(list) => {
                debug!(count = list.len(), "watch restart");
                list.into_iter()
                    .map(|p| PodDelta::applied(strip_managed_fields(p)))
                    .chain(std::iter::once(PodDelta::synced()))
                    .collect()
            }
        };
        for d in deltas {
            if delta_tx.send(d).await.is_err() {
                debug!("delta receiver dropped; stopping pod watcher");
                return Ok(());
            }
        }
    }
    warn!("pod watcher stream ended");
    Ok(())
}

/// Rollout progress of a workload: `status.availableReplicas` against `spec.replicas` (default 1).
pub fn progress_of(ms: &ModelServing) -> Progress {
    let available = ms.status.as_ref().map(|s| s.available_replicas).unwrap_or(0);
    Progress::new(available, ms.spec.expected_replicas())
}

/// Reads a `ModelServing`'s progress from the API server on every poll.
pub struct ModelServingStatusSource {
    api: Api<ModelServing>,
    name: String,
}

impl ModelServingStatusSource {
    pub fn new(client: Client, namespace: &str, name: impl Into<String>) -> Self {
        Self { api: Api::namespaced(client, namespace), name: name.into() }
    }
}

#[async_trait::async_trait]
impl StatusSource for ModelServingStatusSource {
    async fn progress(&self) -> anyhow::Result<Progress> {
        let ms = self.api.get(&self.name).await.with_context(|| format!("getting ModelServing {}", self.name))?;
        let p = progress_of(&ms);
        debug!(workload = %self.name, progress = %p, "status read");
        Ok(p)
    }
}
