//! Ensemble in-process façade.
//!
//! Wires the pieces in controller order: resolve roles, generate Pods, run
//! the plugin pipeline, hand each surviving Pod to a [`PodCreator`], and
//! later dispatch ready hooks as Pods come up. Frontends (the CLI, a
//! reconciler) depend on this crate rather than on the individual parts.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};

use ensemble_core::{DeltaKind, Error, HookRequest, ModelServing, PluginSpec, PodDelta, Result};
use ensemble_plugins::{EventSink, HookLifecycle, PluginManager, PluginRegistry, ReadyReport};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, PostParams};
use kube::Client;
use metrics::counter;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What the creation collaborator did with a Pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Commits fully shaped Pods to the cluster.
#[async_trait::async_trait]
pub trait PodCreator: Send + Sync {
    async fn create(&self, pod: &Pod) -> anyhow::Result<CreateOutcome>;
}

/// Creates Pods through the API server; a 409 means an earlier pass already did.
pub struct KubePodCreator {
    client: Client,
}

impl KubePodCreator {
    pub fn new(client: Client) -> Self { Self { client } }
}

#[async_trait::async_trait]
impl PodCreator for KubePodCreator {
    async fn create(&self, pod: &Pod) -> anyhow::Result<CreateOutcome> {
        let ns = pod.metadata.namespace.as_deref().unwrap_or("default");
        let api: Api<Pod> = Api::namespaced(self.client.clone(), ns);
        match api.create(&PostParams::default(), pod).await {
            Ok(_) => Ok(CreateOutcome::Created),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }
}

/// Failure of one Pod during a sync pass.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("shaping {pod}: {source}")]
    Shape {
        pod: String,
        #[source]
        source: Error,
    },
    #[error("creating {pod}: {message}")]
    Create { pod: String, message: String },
}

impl SyncError {
    pub fn pod(&self) -> &str {
        match self {
            SyncError::Shape { pod, .. } | SyncError::Create { pod, .. } => pod,
        }
    }
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub created: Vec<String>,
    pub existing: Vec<String>,
    pub failed: Vec<SyncError>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool { self.failed.is_empty() }

    /// The first failure, if any.
    pub fn into_result(mut self) -> std::result::Result<Self, SyncError> {
        if self.failed.is_empty() {
            Ok(self)
        } else {
            Err(self.failed.remove(0))
        }
    }
}

/// Pipeline plus ready-hook dispatch over one shared registry.
pub struct PodShaper {
    manager: PluginManager,
    lifecycle: HookLifecycle,
}

impl PodShaper {
    pub fn new(registry: Arc<PluginRegistry>, sink: Arc<dyn EventSink>) -> Self {
        Self { manager: PluginManager::new(registry.clone(), sink.clone()), lifecycle: HookLifecycle::new(registry, sink) }
    }

    pub fn manager(&self) -> &PluginManager { &self.manager }
    pub fn lifecycle(&self) -> &HookLifecycle { &self.lifecycle }

    /// Base Pods for every role instance, before any plugin ran.
    pub fn plan(&self, ms: &ModelServing) -> Result<Vec<HookRequest>> { ensemble_podgen::generate_workload(ms) }

    pub async fn shape_pod(&self, plugins: &[PluginSpec], req: HookRequest) -> Result<Pod> {
        self.manager.run_on_create(plugins, req).await.map(HookRequest::into_pod)
    }

    /// Shape every Pod of the workload. Each entry is that Pod's own outcome;
    /// one failure does not stop the others.
    pub async fn shape_all(&self, ms: &ModelServing) -> Result<Vec<(String, Result<Pod>)>> {
        let mut out = Vec::new();
        for req in self.plan(ms)? {
            let name = req.pod_name().to_string();
            out.push((name, self.shape_pod(&ms.spec.plugins, req).await));
        }
        Ok(out)
    }

    /// Generate, shape and create every Pod of the workload.
    ///
    /// A Pod whose pipeline fails is never handed to `creator`. Errors that
    /// stop the whole pass (invalid roles, missing name) are returned as `Err`.
    pub async fn sync<C: PodCreator + ?Sized>(&self, ms: &ModelServing, creator: &C) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        for (pod, shaped) in self.shape_all(ms).await? {
            let shaped = match shaped {
                Ok(p) => p,
                Err(source) => {
                    warn!(pod = %pod, error = %source, "pipeline failed; pod not created");
                    report.failed.push(SyncError::Shape { pod, source });
                    continue;
                }
            };
            match creator.create(&shaped).await {
                Ok(CreateOutcome::Created) => {
                    counter!("pods_created", 1u64);
                    debug!(pod = %pod, "pod created");
                    report.created.push(pod);
                }
                Ok(CreateOutcome::AlreadyExists) => report.existing.push(pod),
                Err(e) => {
                    warn!(pod = %pod, error = %format!("{:#}", e), "pod create failed");
                    report.failed.push(SyncError::Create { pod, message: format!("{:#}", e) });
                }
            }
        }
        info!(
            created = report.created.len(),
            existing = report.existing.len(),
            failed = report.failed.len(),
            "sync pass finished"
        );
        Ok(report)
    }

    /// Feed one watch observation into the ready-hook lifecycle.
    pub async fn on_pod_delta(&self, plugins: &[PluginSpec], delta: &PodDelta) -> Option<ReadyReport> {
        match delta.kind {
            DeltaKind::Applied => self.lifecycle.observe(plugins, &delta.pod).await,
            DeltaKind::Deleted => {
                self.lifecycle.forget(&delta.pod);
                None
            }
            DeltaKind::Synced => None,
        }
    }

    /// Dispatch ready hooks from a delta stream until it closes or `cancel` fires.
    /// Returns the number of Pods whose hooks ran.
    pub async fn dispatch_ready(&self, plugins: &[PluginSpec], mut rx: mpsc::Receiver<PodDelta>, cancel: CancellationToken) -> usize {
        let mut fired = 0;
        loop {
            let delta = tokio::select! {
                _ = cancel.cancelled() => break,
                d = rx.recv() => match d {
                    Some(d) => d,
                    None => break,
                },
            };
            if let Some(report) = self.on_pod_delta(plugins, &delta).await {
                fired += 1;
                if !report.is_clean() {
                    warn!(pod = %report.pod, failures = report.failures.len(), "ready hooks reported failures");
                }
            }
        }
        fired
    }
}

// ----------------- Mock implementation -----------------

/// In-memory creator for tests: records Pods, treats repeats as existing.
#[derive(Default)]
pub struct MockCreator {
    created: Mutex<Vec<Pod>>,
    /// Pod names whose creation fails.
    pub reject: Vec<String>,
}

impl MockCreator {
    pub fn new() -> Self { Self::default() }

    pub fn rejecting(names: &[&str]) -> Self { Self { reject: names.iter().map(|s| s.to_string()).collect(), ..Self::default() } }

    pub fn created(&self) -> Vec<Pod> { self.created.lock().map(|v| v.clone()).unwrap_or_default() }
}

#[async_trait::async_trait]
impl PodCreator for MockCreator {
    async fn create(&self, pod: &Pod) -> anyhow::Result<CreateOutcome> {
        let name = pod.metadata.name.clone().unwrap_or_default();
        if self.reject.contains(&name) {
            anyhow::bail!("admission denied for {}", name);
        }
        let mut created = self.created.lock().map_err(|_| anyhow::anyhow!("mock creator poisoned"))?;
        if created.iter().any(|p| p.metadata.name.as_deref() == Some(name.as_str())) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        created.push(pod.clone());
        Ok(CreateOutcome::Created)
    }
}
