//! Hook requests: one mutable Pod plus the immutable context a plugin sees.

use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::labels;
use crate::role_key::RoleKey;

/// Classification of a Pod inside its role instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodTarget {
    Entry,
    Worker,
}

impl PodTarget {
    pub fn as_label_value(self) -> &'static str {
        match self {
            PodTarget::Entry => labels::ENTRY_VALUE,
            PodTarget::Worker => labels::WORKER_VALUE,
        }
    }

    pub fn from_label_value(v: &str) -> Option<Self> {
        match v {
            labels::ENTRY_VALUE => Some(PodTarget::Entry),
            labels::WORKER_VALUE => Some(PodTarget::Worker),
            _ => None,
        }
    }
}

impl std::fmt::Display for PodTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PodTarget::Entry => f.write_str("Entry"),
            PodTarget::Worker => f.write_str("Worker"),
        }
    }
}

/// Read-only facts about the Pod being shaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookContext {
    workload: String,
    namespace: String,
    group: u32,
    role: RoleKey,
    target: PodTarget,
    worker_index: Option<u32>,
}

impl HookContext {
    pub fn new(
        workload: impl Into<String>,
        namespace: impl Into<String>,
        group: u32,
        role: RoleKey,
        target: PodTarget,
        worker_index: Option<u32>,
    ) -> Self {
        Self { workload: workload.into(), namespace: namespace.into(), group, role, target, worker_index }
    }

    pub fn workload(&self) -> &str { &self.workload }
    pub fn namespace(&self) -> &str { &self.namespace }
    pub fn group(&self) -> u32 { self.group }
    pub fn role(&self) -> &RoleKey { &self.role }
    pub fn role_name(&self) -> &str { self.role.role() }
    pub fn target(&self) -> PodTarget { self.target }
    pub fn worker_index(&self) -> Option<u32> { self.worker_index }

    /// Identity labels this context implies, in `labels::IDENTITY_LABELS` order.
    pub fn identity_labels(&self) -> SmallVec<[(&'static str, String); 6]> {
        let mut out = SmallVec::new();
        out.push((labels::WORKLOAD_NAME_LABEL, self.workload.clone()));
        out.push((labels::GROUP_NAME_LABEL, labels::group_name(&self.workload, self.group)));
        out.push((labels::ROLE_LABEL, self.role.role().to_string()));
        out.push((labels::ROLE_ID_LABEL, self.role.sub_id().to_string()));
        out.push((labels::ENTRY_LABEL, self.target.as_label_value().to_string()));
        if let Some(w) = self.worker_index {
            out.push((labels::WORKER_INDEX_LABEL, w.to_string()));
        }
        out
    }
}

/// Exactly one of these flows through a pipeline pass per Pod.
#[derive(Debug, Clone)]
pub struct HookRequest {
    pub pod: Pod,
    ctx: HookContext,
}

impl HookRequest {
    pub fn new(pod: Pod, ctx: HookContext) -> Self { Self { pod, ctx } }

    pub fn ctx(&self) -> &HookContext { &self.ctx }

    pub fn pod_name(&self) -> &str { self.pod.metadata.name.as_deref().unwrap_or("") }

    pub fn into_pod(self) -> Pod { self.pod }

    /// Rebuild a request for an already-created Pod from its identity labels.
    pub fn from_pod(pod: Pod) -> Result<Self> {
        let meta = &pod.metadata;
        let pod_name = meta.name.clone().unwrap_or_default();
        let missing = |what: &str| Error::InvalidRole {
            role: pod_name.clone(),
            reason: format!("pod is missing label {}", what),
        };
        let role = labels::role_key(meta).ok_or_else(|| missing(labels::ROLE_LABEL))??;
        let target = labels::pod_target(meta).ok_or_else(|| missing(labels::ENTRY_LABEL))?;
        let workload = meta
            .labels
            .as_ref()
            .and_then(|l| l.get(labels::WORKLOAD_NAME_LABEL))
            .cloned()
            .ok_or_else(|| missing(labels::WORKLOAD_NAME_LABEL))?;
        let group_label = meta
            .labels
            .as_ref()
            .and_then(|l| l.get(labels::GROUP_NAME_LABEL))
            .ok_or_else(|| missing(labels::GROUP_NAME_LABEL))?;
        let group = group_label
            .strip_prefix(workload.as_str())
            .and_then(|rest| rest.strip_prefix('-'))
            .and_then(|idx| idx.parse::<u32>().ok())
            .ok_or_else(|| Error::InvalidRole {
                role: pod_name.clone(),
                reason: format!("malformed {} label {:?}", labels::GROUP_NAME_LABEL, group_label),
            })?;
        let worker_index = meta
            .labels
            .as_ref()
            .and_then(|l| l.get(labels::WORKER_INDEX_LABEL))
            .and_then(|w| w.parse::<u32>().ok());
        let namespace = meta.namespace.clone().unwrap_or_default();
        let ctx = HookContext::new(workload, namespace, group, role, target, worker_index);
        Ok(Self { pod, ctx })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn labelled_pod(pairs: &[(&str, &str)]) -> Pod {
        let labels: BTreeMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Pod {
            metadata: ObjectMeta {
                name: Some("llama-0-worker-1-2".into()),
                namespace: Some("default".into()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn from_pod_recovers_context() {
        let pod = labelled_pod(&[
            (labels::WORKLOAD_NAME_LABEL, "llama"),
            (labels::GROUP_NAME_LABEL, "llama-0"),
            (labels::ROLE_LABEL, "worker"),
            (labels::ROLE_ID_LABEL, "1"),
            (labels::ENTRY_LABEL, "false"),
            (labels::WORKER_INDEX_LABEL, "2"),
        ]);
        let req = HookRequest::from_pod(pod).expect("context");
        let ctx = req.ctx();
        assert_eq!(ctx.workload(), "llama");
        assert_eq!(ctx.namespace(), "default");
        assert_eq!(ctx.group(), 0);
        assert_eq!(ctx.role().to_string(), "worker/1");
        assert_eq!(ctx.target(), PodTarget::Worker);
        assert_eq!(ctx.worker_index(), Some(2));
        assert_eq!(req.pod_name(), "llama-0-worker-1-2");
    }

    #[test]
    fn from_pod_rejects_missing_or_malformed_group() {
        let base = [
            (labels::WORKLOAD_NAME_LABEL, "llama"),
            (labels::ROLE_LABEL, "worker"),
            (labels::ROLE_ID_LABEL, "1"),
            (labels::ENTRY_LABEL, "true"),
        ];
        assert!(matches!(HookRequest::from_pod(labelled_pod(&base)), Err(Error::InvalidRole { .. })));
        for bad in ["llama-x", "other-3", "llama"] {
            let mut pairs = base.to_vec();
            pairs.push((labels::GROUP_NAME_LABEL, bad));
            assert!(matches!(HookRequest::from_pod(labelled_pod(&pairs)), Err(Error::InvalidRole { .. })), "{bad}");
        }
        let mut pairs = base.to_vec();
        pairs.push((labels::GROUP_NAME_LABEL, "llama-3"));
        assert_eq!(HookRequest::from_pod(labelled_pod(&pairs)).expect("context").ctx().group(), 3);
    }

    #[test]
    fn from_pod_without_role_labels_fails() {
        let pod = labelled_pod(&[(labels::WORKLOAD_NAME_LABEL, "llama")]);
        assert!(HookRequest::from_pod(pod).is_err());
    }

    #[test]
    fn identity_labels_skip_worker_index_for_entry() {
        let ctx = HookContext::new(
            "llama",
            "default",
            1,
            RoleKey::new("entry", "0").expect("valid"),
            PodTarget::Entry,
            None,
        );
        let ids = ctx.identity_labels();
        assert_eq!(ids.len(), 5);
        assert!(ids.contains(&(labels::GROUP_NAME_LABEL, "llama-1".to_string())));
        assert!(ids.contains(&(labels::ENTRY_LABEL, "true".to_string())));
    }
}
