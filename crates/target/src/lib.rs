//! Ensemble target resolution.
//!
//! Autoscaling and metrics callers name a workload (optionally one of its
//! roles); this crate turns that reference into a label selector and picks
//! the matching Pods out of a cache.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use ensemble_core::labels::{ENTRY_LABEL, ENTRY_VALUE, GROUP_NAME_LABEL, ROLE_LABEL, WORKER_VALUE, WORKLOAD_NAME_LABEL};
use ensemble_core::{Error, Result};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod lister;
pub mod selector;

pub use lister::PodLister;
pub use selector::{selector_matches, selector_to_string};

pub const MODEL_SERVING_KIND: &str = "ModelServing";
pub const SERVING_GROUP_KIND: &str = "ServingGroup";

/// Reference to the Pods of a workload, a serving group, or one role inside either.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRef {
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl TargetRef {
    pub fn model_serving(name: impl Into<String>) -> Self {
        Self { kind: MODEL_SERVING_KIND.to_string(), name: name.into(), role: None }
    }

    pub fn serving_group(name: impl Into<String>) -> Self {
        Self { kind: SERVING_GROUP_KIND.to_string(), name: name.into(), role: None }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

/// Selector for every Pod the reference covers.
///
/// Always requires the entry-designation label, so Pods that were not stamped
/// by the generator never match.
pub fn resolve_target_selector(target: &TargetRef) -> Result<LabelSelector> {
    let key = match target.kind.as_str() {
        MODEL_SERVING_KIND => WORKLOAD_NAME_LABEL,
        SERVING_GROUP_KIND => GROUP_NAME_LABEL,
        _ => return Err(Error::TargetResolution { kind: target.kind.clone(), name: target.name.clone() }),
    };
    let mut labels = BTreeMap::from([(key.to_string(), target.name.clone())]);
    if let Some(role) = &target.role {
        labels.insert(ROLE_LABEL.to_string(), role.clone());
    }
    Ok(LabelSelector { match_labels: Some(labels), match_expressions: Some(vec![selector::exists(ENTRY_LABEL)]) })
}

fn designation(pod: &Pod) -> Option<&str> {
    pod.metadata.labels.as_ref().and_then(|l| l.get(ENTRY_LABEL)).map(|s| s.as_str())
}

/// Pods in `namespace` covered by `target` whose designation is a valid entry or worker value.
pub fn filter_pods_by_target<L: PodLister + ?Sized>(lister: &L, namespace: &str, target: &TargetRef) -> Result<Vec<Arc<Pod>>> {
    let sel = resolve_target_selector(target)?;
    let pods: Vec<Arc<Pod>> = lister
        .list(namespace, &sel)
        .into_iter()
        .filter(|p| matches!(designation(p), Some(ENTRY_VALUE) | Some(WORKER_VALUE)))
        .collect();
    debug!(namespace, kind = %target.kind, name = %target.name, pods = pods.len(), "target pods resolved");
    Ok(pods)
}

/// Entry Pods only: the ones that expose serving metrics.
pub fn metric_pods<L: PodLister + ?Sized>(lister: &L, namespace: &str, target: &TargetRef) -> Result<Vec<Arc<Pod>>> {
    let mut pods = filter_pods_by_target(lister, namespace, target)?;
    pods.retain(|p| designation(p) == Some(ENTRY_VALUE));
    Ok(pods)
}
