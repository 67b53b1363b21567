//! `pod-tweaks`: declarative runtime class, metadata, node selector and env changes.
//!
//! ```yaml
//! - name: pod-tweaks
//!   type: BuiltIn
//!   scope: { roles: [worker], target: Worker }
//!   config:
//!     runtimeClassName: nvidia
//!     annotations: { example.com/custom: value }
//!     env:
//!       - CUSTOM_VAR: custom-value
//!       - name: OTHER
//!         value: x
//! ```
//!
//! Every change is a merge, so re-running on a fresh base Pod gives the same result.

use std::collections::BTreeMap;

use ensemble_core::labels::{IDENTITY_LABELS, ROLE_KEY_ANNOTATION};
use ensemble_core::{Error, HookRequest, PluginSpec, Result};
use k8s_openapi::api::core::v1::EnvVar;
use serde::Deserialize;
use tracing::debug;

use crate::Plugin;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct NamedEnv {
    name: String,
    value: String,
}

/// `{NAME: value}` shorthand. The `name`/`value` keys belong to the long form,
/// so a half-written long form fails instead of turning into a variable.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "BTreeMap<String, String>")]
struct EnvMap(BTreeMap<String, String>);

impl TryFrom<BTreeMap<String, String>> for EnvMap {
    type Error = String;

    fn try_from(m: BTreeMap<String, String>) -> std::result::Result<Self, Self::Error> {
        match m.keys().find(|k| k.as_str() == "name" || k.as_str() == "value") {
            Some(k) => Err(format!("env entry key {:?} needs both name and value", k)),
            None => Ok(Self(m)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum EnvEntry {
    Named(NamedEnv),
    Map(EnvMap),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PodTweaksConfig {
    #[serde(default)]
    pub runtime_class_name: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default)]
    env: Vec<EnvEntry>,
}

impl PodTweaksConfig {
    /// Env entries flattened to `(name, value)` in declaration order.
    pub fn env_pairs(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for e in &self.env {
            match e {
                EnvEntry::Named(n) => out.push((n.name.clone(), n.value.clone())),
                EnvEntry::Map(m) => out.extend(m.0.iter().map(|(k, v)| (k.clone(), v.clone()))),
            }
        }
        out
    }
}

pub struct PodTweaks {
    name: String,
    cfg: PodTweaksConfig,
    env: Vec<(String, String)>,
}

impl PodTweaks {
    pub fn from_config(spec: &PluginSpec, cfg: PodTweaksConfig) -> Result<Self> {
        if let Some(k) = cfg.labels.keys().find(|k| IDENTITY_LABELS.contains(&k.as_str())) {
            let msg = format!("labels may not override identity label {}", k);
            return Err(Error::ConfigDecode { plugin: spec.name.clone(), source: serde::de::Error::custom(msg) });
        }
        if cfg.annotations.contains_key(ROLE_KEY_ANNOTATION) {
            let msg = format!("annotations may not override {}", ROLE_KEY_ANNOTATION);
            return Err(Error::ConfigDecode { plugin: spec.name.clone(), source: serde::de::Error::custom(msg) });
        }
        let env = cfg.env_pairs();
        Ok(Self { name: spec.name.clone(), cfg, env })
    }
}

fn merge(dst: &mut Option<BTreeMap<String, String>>, src: &BTreeMap<String, String>) {
    if src.is_empty() {
        return;
    }
    let m = dst.get_or_insert_with(BTreeMap::new);
    for (k, v) in src {
        m.insert(k.clone(), v.clone());
    }
}

fn upsert_env(env: &mut Vec<EnvVar>, name: &str, value: &str) {
    match env.iter_mut().find(|e| e.name == name) {
        Some(existing) => {
            existing.value = Some(value.to_string());
            existing.value_from = None;
        }
        None => env.push(EnvVar { name: name.to_string(), value: Some(value.to_string()), value_from: None }),
    }
}

#[async_trait::async_trait]
impl Plugin for PodTweaks {
    fn name(&self) -> &str { &self.name }

    async fn on_create(&self, req: &mut HookRequest) -> anyhow::Result<()> {
        let meta = &mut req.pod.metadata;
        merge(&mut meta.labels, &self.cfg.labels);
        merge(&mut meta.annotations, &self.cfg.annotations);

        if let Some(spec) = req.pod.spec.as_mut() {
            if let Some(rc) = &self.cfg.runtime_class_name {
                spec.runtime_class_name = Some(rc.clone());
            }
            merge(&mut spec.node_selector, &self.cfg.node_selector);
            for c in spec.containers.iter_mut() {
                let env = c.env.get_or_insert_with(Vec::new);
                for (k, v) in &self.env {
                    upsert_env(env, k, v);
                }
            }
        }
        debug!(plugin = %self.name, pod = %req.pod_name(), "pod tweaks applied");
        Ok(())
    }
}
