//! `ModelServing` custom resource: roles, plugin entries and rollout status.

use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use crate::hook::PodTarget;

/// Desired state of a multi-role serving workload.
///
/// `replicas` counts serving groups; every group carries one instance set of
/// each role in `roles`.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "ensemble.dev",
    version = "v1alpha1",
    kind = "ModelServing",
    namespaced,
    status = "ModelServingStatus",
    shortname = "ms",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ModelServingSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default)]
    pub roles: Vec<RoleSpec>,
    /// Ordered; the pipeline never reorders or deduplicates entries.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<PluginSpec>,
}

impl ModelServingSpec {
    /// Expected serving-group count (defaults to 1).
    pub fn expected_replicas(&self) -> i32 { self.replicas.unwrap_or(1) }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelServingStatus {
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub available_replicas: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// One named role. Each role instance owns a single entry Pod plus
/// `worker_replicas` worker Pods.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    pub entry_template: PodTemplateSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_template: Option<PodTemplateSpec>,
}

impl RoleSpec {
    pub fn replicas(&self) -> i32 { self.replicas.unwrap_or(1) }
    pub fn worker_replicas(&self) -> i32 { self.worker_replicas.unwrap_or(0) }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PluginType {
    #[default]
    BuiltIn,
    /// Reserved extension point; rejected at construction time.
    Webhook,
}

impl std::fmt::Display for PluginType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginType::BuiltIn => f.write_str("BuiltIn"),
            PluginType::Webhook => f.write_str("Webhook"),
        }
    }
}

/// Plugin configuration entry as written in the workload spec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: PluginType,
    /// Opaque; decoded by the plugin's factory.
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<PluginScope>,
}

impl PluginSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_scope(mut self, scope: PluginScope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Pure scope predicate; an entry without scope applies everywhere.
    pub fn applies_to(&self, role: &str, target: PodTarget) -> bool {
        self.scope.as_ref().map_or(true, |s| s.admits(role, target))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginScope {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetScope>,
}

impl PluginScope {
    pub fn admits(&self, role: &str, target: PodTarget) -> bool {
        if !self.roles.is_empty() && !self.roles.iter().any(|r| r == role) {
            return false;
        }
        match self.target {
            None | Some(TargetScope::All) => true,
            Some(TargetScope::Entry) => target == PodTarget::Entry,
            Some(TargetScope::Worker) => target == PodTarget::Worker,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetScope {
    Entry,
    Worker,
    All,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(roles: &[&str], target: Option<TargetScope>) -> PluginScope {
        PluginScope { roles: roles.iter().map(|s| s.to_string()).collect(), target }
    }

    #[test]
    fn empty_scope_admits_everything() {
        let s = PluginScope::default();
        assert!(s.admits("prefill", PodTarget::Entry));
        assert!(s.admits("decode", PodTarget::Worker));
    }

    #[test]
    fn target_scope_excludes_other_classification() {
        for role in ["prefill", "decode", "worker"] {
            let workers = scope(&[], Some(TargetScope::Worker));
            assert!(workers.admits(role, PodTarget::Worker));
            assert!(!workers.admits(role, PodTarget::Entry));
            let entries = scope(&[], Some(TargetScope::Entry));
            assert!(entries.admits(role, PodTarget::Entry));
            assert!(!entries.admits(role, PodTarget::Worker));
        }
    }

    #[test]
    fn role_list_filters_by_name() {
        let s = scope(&["worker"], Some(TargetScope::All));
        assert!(s.admits("worker", PodTarget::Entry));
        assert!(!s.admits("entry", PodTarget::Entry));
    }

    #[test]
    fn plugin_entry_parses_from_yaml() {
        let yaml = r#"
name: demo-pod-tweaks
type: BuiltIn
scope:
  roles: [worker]
  target: Worker
config:
  runtimeClassName: nvidia
"#;
        let p: PluginSpec = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(p.name, "demo-pod-tweaks");
        assert_eq!(p.kind, PluginType::BuiltIn);
        assert_eq!(p.scope.as_ref().and_then(|s| s.target), Some(TargetScope::Worker));
        assert_eq!(p.config["runtimeClassName"], "nvidia");
        assert!(p.applies_to("worker", PodTarget::Worker));
        assert!(!p.applies_to("worker", PodTarget::Entry));
    }

    #[test]
    fn plugin_type_defaults_to_builtin() {
        let p: PluginSpec = serde_json::from_value(serde_json::json!({"name": "x"})).expect("parse");
        assert_eq!(p.kind, PluginType::BuiltIn);
        assert!(p.config.is_null());
    }
}
