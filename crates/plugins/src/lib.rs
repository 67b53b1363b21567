//! Ensemble plugins: the ordered, scope-filtered Pod mutation pipeline.
//!
//! - [`PluginRegistry`] maps plugin names to factories. Build it once at
//!   startup, then share it read-only behind an `Arc`.
//! - [`PluginManager`] runs `on_create` hooks in list order and fails fast.
//! - [`HookLifecycle`] runs `on_ready` hooks best-effort once a Pod is ready.

#![forbid(unsafe_code)]

use ensemble_core::HookRequest;

pub mod builtin;
pub mod events;
pub mod lifecycle;
pub mod manager;
pub mod registry;

pub use events::{EventSink, HookEvent, HookOutcome, HookPhase, MemorySink, PodRef, TracingSink};
pub use lifecycle::{is_pod_ready, HookLifecycle, ReadyReport};
pub use manager::PluginManager;
pub use registry::{decode_config, PluginFactory, PluginRegistry};

/// A configurable Pod mutator.
///
/// Implementations are constructed per pass from a [`ensemble_core::PluginSpec`]
/// by a registered factory. `on_create` must be idempotent when re-run on a
/// fresh base Pod (merge, don't blindly append) and must leave the Pod name
/// and identity labels alone.
#[async_trait::async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Mutate the Pod before it is created.
    async fn on_create(&self, req: &mut HookRequest) -> anyhow::Result<()>;

    /// Notification after the Pod became ready. Errors are only recorded.
    async fn on_ready(&self, req: &HookRequest) -> anyhow::Result<()> {
        let _ = req;
        Ok(())
    }
}
