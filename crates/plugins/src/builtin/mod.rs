//! Built-in plugins shipped with the controller.

use ensemble_core::Result;

use crate::registry::PluginRegistry;

pub mod pod_tweaks;

pub use pod_tweaks::{PodTweaks, PodTweaksConfig};

pub const POD_TWEAKS: &str = "pod-tweaks";

/// Alias of [`POD_TWEAKS`] used by the demo serving manifests.
pub const DEMO_POD_TWEAKS: &str = "demo-pod-tweaks";

/// Register every built-in under its well-known names.
pub fn register_builtins(reg: &mut PluginRegistry) -> Result<()> {
    for name in [POD_TWEAKS, DEMO_POD_TWEAKS] {
        reg.register_typed(name, PodTweaks::from_config)?;
    }
    Ok(())
}
