//! Post-readiness hooks.
//!
//! Unlike the creation pipeline this phase never aborts: a failing plugin is
//! recorded and the next one still runs. The Pod is already serving, so
//! nothing here rolls it back.

use std::sync::{Arc, Mutex};

use ensemble_core::{pod_key, Error, HookRequest, PluginSpec};
use futures::future::join_all;
use k8s_openapi::api::core::v1::Pod;
use metrics::counter;
use rustc_hash::FxHashSet;
use tracing::{debug, warn};

use crate::events::{EventSink, HookEvent, HookPhase, PodRef};
use crate::registry::PluginRegistry;

/// What happened during one ready-hook run for one Pod.
#[derive(Debug, Default)]
pub struct ReadyReport {
    pub pod: String,
    /// Plugins whose `on_ready` was called, in order.
    pub invoked: Vec<String>,
    /// One `PostReadiness` (or construction) error per failing plugin.
    pub failures: Vec<Error>,
}

impl ReadyReport {
    pub fn is_clean(&self) -> bool { self.failures.is_empty() }
}

/// `Ready` condition is `True`.
pub fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|cs| cs.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
        .unwrap_or(false)
}

pub struct HookLifecycle {
    registry: Arc<PluginRegistry>,
    sink: Arc<dyn EventSink>,
    /// Pods whose ready hooks already fired for the current ready period.
    notified: Mutex<FxHashSet<String>>,
}

impl HookLifecycle {
    pub fn new(registry: Arc<PluginRegistry>, sink: Arc<dyn EventSink>) -> Self {
        Self { registry, sink, notified: Mutex::new(FxHashSet::default()) }
    }

    /// Call `on_ready` on every in-scope plugin, in list order, continuing past failures.
    pub async fn run_on_ready(&self, plugins: &[PluginSpec], req: &HookRequest) -> ReadyReport {
        let pod = PodRef::of(req);
        let mut report = ReadyReport { pod: pod.to_string(), ..Default::default() };

        for spec in plugins {
            if !spec.applies_to(req.ctx().role_name(), req.ctx().target()) {
                continue;
            }
            let plugin = match self.registry.construct(spec) {
                Ok(p) => p,
                Err(e) => {
                    self.record_failure(spec, &pod, e, &mut report);
                    continue;
                }
            };
            report.invoked.push(spec.name.clone());
            if let Err(e) = plugin.on_ready(req).await {
                let err = Error::PostReadiness { plugin: spec.name.clone(), pod: pod.to_string(), message: format!("{:#}", e) };
                self.record_failure(spec, &pod, err, &mut report);
            }
        }

        if report.is_clean() {
            self.sink.record(HookEvent::succeeded(HookPhase::Ready, None, pod));
        }
        report
    }

    fn record_failure(&self, spec: &PluginSpec, pod: &PodRef, err: Error, report: &mut ReadyReport) {
        counter!("plugin_ready_err", 1u64, "plugin" => spec.name.clone());
        warn!(plugin = %spec.name, pod = %pod, error = %err, "ready hook failed; continuing");
        self.sink.record(HookEvent::failed(HookPhase::Ready, spec.name.as_str(), pod.clone(), &err));
        report.failures.push(err);
    }

    /// Run ready hooks for several Pods concurrently; each Pod stays sequential.
    pub async fn notify_ready_many(&self, plugins: &[PluginSpec], reqs: &[HookRequest]) -> Vec<ReadyReport> {
        join_all(reqs.iter().map(|r| self.run_on_ready(plugins, r))).await
    }

    /// Feed an observed Pod state. Hooks fire once per not-ready → ready
    /// transition; Pods without identity labels are ignored.
    pub async fn observe(&self, plugins: &[PluginSpec], pod: &Pod) -> Option<ReadyReport> {
        let key = pod_key(pod)?;
        if !is_pod_ready(pod) {
            self.lock().remove(&key);
            return None;
        }
        if !self.lock().insert(key.clone()) {
            return None;
        }
        match HookRequest::from_pod(pod.clone()) {
            Ok(req) => Some(self.run_on_ready(plugins, &req).await),
            Err(e) => {
                debug!(pod = %key, error = %e, "ready pod has no role identity; skipping hooks");
                None
            }
        }
    }

    /// Drop transition state for a deleted Pod.
    pub fn forget(&self, pod: &Pod) {
        if let Some(key) = pod_key(pod) {
            self.lock().remove(&key);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FxHashSet<String>> {
        self.notified.lock().unwrap_or_else(|e| e.into_inner())
    }
}
