//! Ensemble podgen: expands `ModelServing` roles into role instances and
//! builds one base Pod per entry/worker slot.
//!
//! Templates are copied verbatim; the only additions are identity labels,
//! the role-key annotation and the owner reference. Cross-cutting
//! customization belongs to the plugin pipeline.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use ensemble_core::labels;
use ensemble_core::{Error, HookContext, HookRequest, ModelServing, ModelServingSpec, PodTarget, Result, RoleKey, RoleSpec};
use k8s_openapi::api::core::v1::{Pod, PodTemplateSpec};
use kube::{Resource, ResourceExt};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static DNS_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("static regex"));

const MAX_ROLE_NAME: usize = 63;

/// One concrete instance of a role inside a serving group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleInstance {
    pub group: u32,
    /// Index into `spec.roles`.
    pub role_index: usize,
    pub key: RoleKey,
}

fn validate_role(role: &RoleSpec, seen: &mut Vec<String>) -> Result<()> {
    let name = role.name.as_str();
    if name.is_empty() {
        return Err(Error::invalid_role(name, "role name is empty"));
    }
    if name.len() > MAX_ROLE_NAME || !DNS_LABEL.is_match(name) {
        return Err(Error::invalid_role(name, "role name must be a DNS-1123 label"));
    }
    if seen.iter().any(|s| s == name) {
        return Err(Error::invalid_role(name, "duplicate role name"));
    }
    if role.replicas() < 0 {
        return Err(Error::invalid_role(name, "replicas must not be negative"));
    }
    if role.worker_replicas() < 0 {
        return Err(Error::invalid_role(name, "workerReplicas must not be negative"));
    }
    if role.worker_replicas() > 0 && role.worker_template.is_none() {
        return Err(Error::invalid_role(name, "workerReplicas set without a workerTemplate"));
    }
    seen.push(name.to_string());
    Ok(())
}

/// Expand the role list into ordered role instances.
///
/// Order is group, then role list order, then ordinal. Sub-identifiers are
/// the ordinal within the role, so the same spec always yields the same keys.
pub fn resolve_roles(spec: &ModelServingSpec) -> Result<Vec<RoleInstance>> {
    let groups = spec.expected_replicas();
    if groups < 0 {
        return Err(Error::invalid_role("", "spec.replicas must not be negative"));
    }
    let mut seen = Vec::with_capacity(spec.roles.len());
    for role in &spec.roles {
        validate_role(role, &mut seen)?;
    }

    let per_group: usize = spec.roles.iter().map(|r| r.replicas() as usize).sum();
    let mut out = Vec::with_capacity(per_group * groups as usize);
    for group in 0..groups as u32 {
        for (role_index, role) in spec.roles.iter().enumerate() {
            for ordinal in 0..role.replicas() {
                let key = RoleKey::new(role.name.as_str(), ordinal.to_string())?;
                out.push(RoleInstance { group, role_index, key });
            }
        }
    }
    debug!(groups, instances = out.len(), "resolved role instances");
    Ok(out)
}

fn pod_from_template(tpl: &PodTemplateSpec, name: String, namespace: &str) -> Pod {
    let mut metadata = tpl.metadata.clone().unwrap_or_default();
    metadata.name = Some(name);
    metadata.generate_name = None;
    metadata.namespace = Some(namespace.to_string());
    Pod { metadata, spec: tpl.spec.clone(), status: None }
}

fn stamp_identity(pod: &mut Pod, ctx: &HookContext) {
    let lbls = pod.metadata.labels.get_or_insert_with(BTreeMap::new);
    for (k, v) in ctx.identity_labels() {
        lbls.insert(k.to_string(), v);
    }
    labels::stamp_role_key(&mut pod.metadata, ctx.role());
}

/// Entry Pod name for a role instance; workers append `-<index>`.
pub fn entry_pod_name(workload: &str, inst: &RoleInstance) -> String {
    format!("{}-{}-{}-{}", workload, inst.group, inst.key.role(), inst.key.sub_id())
}

/// Build the base Pods (entry first, then workers 1..=n) for one role instance.
pub fn generate_pods(ms: &ModelServing, role: &RoleSpec, inst: &RoleInstance) -> Result<Vec<HookRequest>> {
    let workload = ms.name_any();
    let namespace = ms.namespace().unwrap_or_else(|| "default".to_string());
    let owner = ms.controller_owner_ref(&());
    let entry_name = entry_pod_name(&workload, inst);

    let mut slots: Vec<(String, &PodTemplateSpec, PodTarget, Option<u32>)> = Vec::new();
    slots.push((entry_name.clone(), &role.entry_template, PodTarget::Entry, None));
    if let Some(tpl) = role.worker_template.as_ref() {
        for w in 1..=role.worker_replicas().max(0) as u32 {
            slots.push((format!("{}-{}", entry_name, w), tpl, PodTarget::Worker, Some(w)));
        }
    }

    let out = slots
        .into_iter()
        .map(|(name, tpl, target, worker_index)| {
            let ctx = HookContext::new(
                workload.as_str(),
                namespace.as_str(),
                inst.group,
                inst.key.clone(),
                target,
                worker_index,
            );
            let mut pod = pod_from_template(tpl, name, &namespace);
            stamp_identity(&mut pod, &ctx);
            if let Some(o) = owner.clone() {
                pod.metadata.owner_references = Some(vec![o]);
            }
            HookRequest::new(pod, ctx)
        })
        .collect();
    Ok(out)
}

/// Resolve every role instance of the workload and generate all its base Pods.
pub fn generate_workload(ms: &ModelServing) -> Result<Vec<HookRequest>> {
    if ms.metadata.name.as_deref().map_or(true, str::is_empty) {
        return Err(Error::invalid_role("", "workload has no metadata.name"));
    }
    let mut out = Vec::new();
    for inst in resolve_roles(&ms.spec)? {
        let role = &ms.spec.roles[inst.role_index];
        out.extend(generate_pods(ms, role, &inst)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(name: &str, replicas: i32) -> RoleSpec {
        RoleSpec { name: name.into(), replicas: Some(replicas), ..Default::default() }
    }

    #[test]
    fn sub_ids_are_stable_ordinals() {
        let spec = ModelServingSpec { replicas: Some(1), roles: vec![role("prefill", 2), role("decode", 1)], plugins: vec![] };
        let first = resolve_roles(&spec).expect("ok");
        let second = resolve_roles(&spec).expect("ok");
        assert_eq!(first, second);
        let keys: Vec<String> = first.iter().map(|i| i.key.to_string()).collect();
        assert_eq!(keys, vec!["prefill/0", "prefill/1", "decode/0"]);
    }

    #[test]
    fn groups_repeat_roles_in_order() {
        let spec = ModelServingSpec { replicas: Some(2), roles: vec![role("a", 1), role("b", 1)], plugins: vec![] };
        let got: Vec<(u32, String)> = resolve_roles(&spec).expect("ok").into_iter().map(|i| (i.group, i.key.to_string())).collect();
        assert_eq!(got, vec![(0, "a/0".into()), (0, "b/0".into()), (1, "a/0".into()), (1, "b/0".into())]);
    }

    #[test]
    fn empty_role_name_is_a_config_error() {
        let spec = ModelServingSpec { replicas: None, roles: vec![role("", 1)], plugins: vec![] };
        let err = resolve_roles(&spec).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn invalid_and_duplicate_names_are_rejected() {
        for bad in ["Upper", "has/slash", "-lead", "trail-"] {
            let spec = ModelServingSpec { replicas: None, roles: vec![role(bad, 1)], plugins: vec![] };
            assert!(resolve_roles(&spec).is_err(), "{bad} should be rejected");
        }
        let spec = ModelServingSpec { replicas: None, roles: vec![role("a", 1), role("a", 1)], plugins: vec![] };
        assert!(matches!(resolve_roles(&spec), Err(Error::InvalidRole { .. })));
    }

    #[test]
    fn workers_require_template() {
        let mut r = role("worker", 1);
        r.worker_replicas = Some(2);
        let spec = ModelServingSpec { replicas: None, roles: vec![r], plugins: vec![] };
        assert!(resolve_roles(&spec).is_err());
    }

    #[test]
    fn zero_replicas_yield_nothing() {
        let spec = ModelServingSpec { replicas: Some(0), roles: vec![role("a", 3)], plugins: vec![] };
        assert!(resolve_roles(&spec).expect("ok").is_empty());
    }
}
