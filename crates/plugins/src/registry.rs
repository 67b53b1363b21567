//! Name → factory mapping used to construct plugin instances.

use std::sync::Arc;

use ensemble_core::{Error, PluginSpec, PluginType, Result};
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::Plugin;

pub type PluginFactory = Arc<dyn Fn(&PluginSpec) -> Result<Arc<dyn Plugin>> + Send + Sync>;

/// Populated once before reconciliation starts; read-only afterwards.
#[derive(Default)]
pub struct PluginRegistry {
    factories: FxHashMap<String, PluginFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self { Self::default() }

    /// Registry preloaded with the built-in plugins.
    pub fn with_builtins() -> Result<Self> {
        let mut reg = Self::new();
        crate::builtin::register_builtins(&mut reg)?;
        Ok(reg)
    }

    /// Register a factory. A name can only be registered once.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn(&PluginSpec) -> Result<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::DuplicatePlugin { plugin: name });
        }
        debug!(plugin = %name, "plugin factory registered");
        self.factories.insert(name, Arc::new(factory));
        Ok(())
    }

    /// Register a factory whose config decodes into `C` before `build` runs.
    pub fn register_typed<C, P, F>(&mut self, name: impl Into<String>, build: F) -> Result<()>
    where
        C: DeserializeOwned,
        P: Plugin + 'static,
        F: Fn(&PluginSpec, C) -> Result<P> + Send + Sync + 'static,
    {
        self.register(name, move |spec: &PluginSpec| {
            let cfg = decode_config::<C>(spec)?;
            let plugin: Arc<dyn Plugin> = Arc::new(build(spec, cfg)?);
            Ok(plugin)
        })
    }

    pub fn contains(&self, name: &str) -> bool { self.factories.contains_key(name) }

    pub fn len(&self) -> usize { self.factories.len() }
    pub fn is_empty(&self) -> bool { self.factories.is_empty() }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut v: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        v.sort_unstable();
        v
    }

    /// Build the plugin instance for a configuration entry.
    pub fn construct(&self, spec: &PluginSpec) -> Result<Arc<dyn Plugin>> {
        if spec.kind == PluginType::Webhook {
            return Err(Error::UnsupportedPluginType { plugin: spec.name.clone(), kind: spec.kind.to_string() });
        }
        let factory = self
            .factories
            .get(&spec.name)
            .ok_or_else(|| Error::UnknownPlugin { plugin: spec.name.clone() })?;
        factory(spec)
    }
}

/// Decode `spec.config` into the plugin's config shape.
/// A missing (null) config decodes as an empty object.
pub fn decode_config<C: DeserializeOwned>(spec: &PluginSpec) -> Result<C> {
    let raw = if spec.config.is_null() { serde_json::json!({}) } else { spec.config.clone() };
    serde_json::from_value(raw).map_err(|source| Error::ConfigDecode { plugin: spec.name.clone(), source })
}
