//! Ensemble core types: workload CRD, role identity, hook requests and errors.

#![forbid(unsafe_code)]

use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};

pub mod crd;
pub mod error;
pub mod hook;
pub mod labels;
pub mod role_key;

pub use crd::{
    ModelServing, ModelServingSpec, ModelServingStatus, PluginScope, PluginSpec, PluginType,
    RoleSpec, TargetScope,
};
pub use error::{Error, Progress, Result};
pub use hook::{HookContext, HookRequest, PodTarget};
pub use role_key::{format_role_key, parse_role_key, RoleKey};

pub mod prelude {
    pub use super::{
        DeltaKind, Error, HookContext, HookRequest, ModelServing, PluginSpec, PodDelta, PodTarget,
        Result, RoleKey,
    };
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeltaKind {
    Applied,
    Deleted,
    /// End of a full (re)list; carries no Pod.
    Synced,
}

/// A single watch observation for a Pod, fed into the snapshot cache.
#[derive(Debug, Clone)]
pub struct PodDelta {
    pub kind: DeltaKind,
    pub pod: Pod,
}

impl PodDelta {
    pub fn applied(pod: Pod) -> Self { Self { kind: DeltaKind::Applied, pod } }
    pub fn deleted(pod: Pod) -> Self { Self { kind: DeltaKind::Deleted, pod } }
    pub fn synced() -> Self { Self { kind: DeltaKind::Synced, pod: Pod::default() } }

    /// `namespace/name` key, or None when the Pod has no name yet.
    pub fn key(&self) -> Option<String> { pod_key(&self.pod) }
}

/// Cache key for a Pod: `namespace/name` (namespace may be empty).
pub fn pod_key(pod: &Pod) -> Option<String> {
    let name = pod.metadata.name.as_deref()?;
    let ns = pod.metadata.namespace.as_deref().unwrap_or("");
    Some(format!("{}/{}", ns, name))
}
