//! Well-known label and annotation keys stamped on every generated Pod.
//!
//! Metrics, scaling and readiness callers select Pods through these keys, so
//! the generator and the target resolver must agree on them.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::{error::Result, hook::PodTarget, role_key::RoleKey};

/// Name of the owning `ModelServing`.
pub const WORKLOAD_NAME_LABEL: &str = "ensemble.dev/workload";

/// Serving group, `<workload>-<index>`.
pub const GROUP_NAME_LABEL: &str = "ensemble.dev/group";

/// Role name half of the role identity.
pub const ROLE_LABEL: &str = "ensemble.dev/role";

/// Role sub-identifier half of the role identity.
pub const ROLE_ID_LABEL: &str = "ensemble.dev/role-id";

/// Role designation: `"true"` on entry Pods, `"false"` on workers.
pub const ENTRY_LABEL: &str = "ensemble.dev/entry";

/// 1-based worker ordinal inside a role instance (workers only).
pub const WORKER_INDEX_LABEL: &str = "ensemble.dev/worker-index";

/// Composite `<role>/<subID>` for consumers that need a single string.
pub const ROLE_KEY_ANNOTATION: &str = "ensemble.dev/role-key";

pub const ENTRY_VALUE: &str = "true";
pub const WORKER_VALUE: &str = "false";

/// Label keys that plugins must leave untouched.
pub const IDENTITY_LABELS: [&str; 6] = [
    WORKLOAD_NAME_LABEL,
    GROUP_NAME_LABEL,
    ROLE_LABEL,
    ROLE_ID_LABEL,
    ENTRY_LABEL,
    WORKER_INDEX_LABEL,
];

pub fn group_name(workload: &str, group: u32) -> String { format!("{}-{}", workload, group) }

fn label<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.labels.as_ref().and_then(|l| l.get(key)).map(|s| s.as_str())
}

/// Role name of a labelled resource.
pub fn role_name(meta: &ObjectMeta) -> Option<&str> { label(meta, ROLE_LABEL) }

/// Role sub-identifier of a labelled resource.
pub fn role_id(meta: &ObjectMeta) -> Option<&str> { label(meta, ROLE_ID_LABEL) }

/// Rebuild the role identity from the two discrete labels.
/// `None` when either label is missing.
pub fn role_key(meta: &ObjectMeta) -> Option<Result<RoleKey>> {
    let role = role_name(meta)?;
    let sub = role_id(meta)?;
    Some(RoleKey::new(role, sub))
}

/// Entry/worker classification from the designation label.
pub fn pod_target(meta: &ObjectMeta) -> Option<PodTarget> {
    label(meta, ENTRY_LABEL).and_then(PodTarget::from_label_value)
}

/// Write both role-identity labels plus the composite annotation.
pub fn stamp_role_key(meta: &mut ObjectMeta, key: &RoleKey) {
    let labels = meta.labels.get_or_insert_with(BTreeMap::new);
    labels.insert(ROLE_LABEL.to_string(), key.role().to_string());
    labels.insert(ROLE_ID_LABEL.to_string(), key.sub_id().to_string());
    meta.annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(ROLE_KEY_ANNOTATION.to_string(), key.to_string());
}
