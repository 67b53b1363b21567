//! Fail-fast creation pipeline.
//!
//! Per Pod and per pass: walk the configured plugins in list order, skip the
//! ones whose scope excludes this Pod, construct the rest through the
//! registry and let each mutate the Pod the previous ones produced. The first
//! error ends the pass; the half-mutated Pod is dropped with it.

use std::sync::Arc;
use std::time::Instant;

use ensemble_core::{Error, HookRequest, PluginSpec, Result};
use metrics::{counter, histogram};
use tracing::{debug, trace};

use identity::IdentitySnapshot;

use crate::events::{EventSink, HookEvent, HookPhase, PodRef};
use crate::registry::PluginRegistry;

pub struct PluginManager {
    registry: Arc<PluginRegistry>,
    sink: Arc<dyn EventSink>,
}

impl PluginManager {
    pub fn new(registry: Arc<PluginRegistry>, sink: Arc<dyn EventSink>) -> Self { Self { registry, sink } }

    pub fn registry(&self) -> &Arc<PluginRegistry> { &self.registry }

    /// Run every in-scope `on_create` hook in order.
    ///
    /// `Ok` carries the fully mutated request; on `Err` the Pod has been
    /// discarded and must not be committed.
    pub async fn run_on_create(&self, plugins: &[PluginSpec], mut req: HookRequest) -> Result<HookRequest> {
        let started = Instant::now();
        let pod = PodRef::of(&req);
        let identity = IdentitySnapshot::capture(&req);

        for spec in plugins {
            if !spec.applies_to(req.ctx().role_name(), req.ctx().target()) {
                trace!(plugin = %spec.name, pod = %pod, "out of scope; skipped");
                continue;
            }
            let outcome = match self.registry.construct(spec) {
                Ok(plugin) => {
                    debug!(plugin = %spec.name, pod = %pod, "on_create");
                    match plugin.on_create(&mut req).await {
                        Ok(()) => identity.verify(&req).map_err(|message| Error::PluginExecution {
                            plugin: spec.name.clone(),
                            pod: pod.to_string(),
                            message,
                        }),
                        Err(e) => Err(Error::PluginExecution {
                            plugin: spec.name.clone(),
                            pod: pod.to_string(),
                            message: format!("{:#}", e),
                        }),
                    }
                }
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                counter!("plugin_pass_err", 1u64, "plugin" => spec.name.clone());
                self.sink.record(HookEvent::failed(HookPhase::Create, spec.name.as_str(), pod, &e));
                return Err(e);
            }
        }

        counter!("plugin_pass_ok", 1u64);
        histogram!("plugin_pass_ms", started.elapsed().as_secs_f64() * 1000.0);
        self.sink.record(HookEvent::succeeded(HookPhase::Create, None, pod));
        Ok(req)
    }
}

mod identity {
    //! Pod name, identity labels and role-key annotation as they were before any plugin ran.

    use ensemble_core::labels::{IDENTITY_LABELS, ROLE_KEY_ANNOTATION};
    use ensemble_core::HookRequest;

    pub(super) struct IdentitySnapshot {
        name: Option<String>,
        labels: Vec<(&'static str, Option<String>)>,
        role_key: Option<String>,
    }

    fn role_key_of(req: &HookRequest) -> Option<&String> {
        req.pod.metadata.annotations.as_ref().and_then(|a| a.get(ROLE_KEY_ANNOTATION))
    }

    impl IdentitySnapshot {
        pub(super) fn capture(req: &HookRequest) -> Self {
            let current = req.pod.metadata.labels.as_ref();
            let labels = IDENTITY_LABELS
                .iter()
                .map(|k| (*k, current.and_then(|l| l.get(*k)).cloned()))
                .collect();
            Self { name: req.pod.metadata.name.clone(), labels, role_key: role_key_of(req).cloned() }
        }

        /// Err(message) when a plugin renamed the Pod or touched its role identity.
        pub(super) fn verify(&self, req: &HookRequest) -> Result<(), String> {
            if req.pod.metadata.name != self.name {
                return Err(format!("plugin renamed pod from {:?} to {:?}", self.name, req.pod.metadata.name));
            }
            let current = req.pod.metadata.labels.as_ref();
            for (key, want) in &self.labels {
                let got = current.and_then(|l| l.get(*key));
                if got != want.as_ref() {
                    return Err(format!("plugin changed identity label {} ({:?} -> {:?})", key, want, got));
                }
            }
            let got = role_key_of(req);
            if got != self.role_key.as_ref() {
                return Err(format!("plugin changed {} ({:?} -> {:?})", ROLE_KEY_ANNOTATION, self.role_key, got));
            }
            Ok(())
        }
    }
}
