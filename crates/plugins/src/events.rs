//! Outcome tuples emitted by the pipeline and the ready-hook phase.
//!
//! The event/condition subsystem that turns these into Kubernetes Events is
//! external; sinks only need to accept `(outcome, plugin, pod, error)`.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use ensemble_core::{HookContext, HookRequest, RoleKey};
use metrics::counter;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HookPhase {
    Create,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HookOutcome {
    Succeeded,
    Failed,
}

/// Identity of the Pod an event concerns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PodRef {
    pub namespace: String,
    pub name: String,
    pub role: RoleKey,
}

impl PodRef {
    pub fn of(req: &HookRequest) -> Self { Self::from_ctx(req.ctx(), req.pod_name()) }

    pub fn from_ctx(ctx: &HookContext, name: &str) -> Self {
        Self { namespace: ctx.namespace().to_string(), name: name.to_string(), role: ctx.role().clone() }
    }
}

impl std::fmt::Display for PodRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HookEvent {
    pub phase: HookPhase,
    pub outcome: HookOutcome,
    /// Plugin that failed (or None for a whole-pass success).
    pub plugin: Option<String>,
    pub pod: PodRef,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

impl HookEvent {
    pub fn succeeded(phase: HookPhase, plugin: Option<String>, pod: PodRef) -> Self {
        Self { phase, outcome: HookOutcome::Succeeded, plugin, pod, error: None, at: Utc::now() }
    }

    pub fn failed(phase: HookPhase, plugin: impl Into<String>, pod: PodRef, error: impl ToString) -> Self {
        Self {
            phase,
            outcome: HookOutcome::Failed,
            plugin: Some(plugin.into()),
            pod,
            error: Some(error.to_string()),
            at: Utc::now(),
        }
    }
}

pub trait EventSink: Send + Sync {
    fn record(&self, event: HookEvent);
}

/// Default sink: structured logs plus counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, ev: HookEvent) {
        let phase = match ev.phase { HookPhase::Create => "create", HookPhase::Ready => "ready" };
        match ev.outcome {
            HookOutcome::Succeeded => {
                counter!("hook_events_total", 1u64, "phase" => phase, "outcome" => "succeeded");
                info!(phase, pod = %ev.pod, role = %ev.pod.role, plugin = ?ev.plugin, "hook phase succeeded");
            }
            HookOutcome::Failed => {
                counter!("hook_events_total", 1u64, "phase" => phase, "outcome" => "failed");
                warn!(phase, pod = %ev.pod, role = %ev.pod.role, plugin = ?ev.plugin, error = ?ev.error, "hook phase failed");
            }
        }
    }
}

/// Collects events in memory; used by tests and dry-run rendering.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<HookEvent>>,
}

impl MemorySink {
    pub fn new() -> Self { Self::default() }

    pub fn events(&self) -> Vec<HookEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn failures(&self) -> Vec<HookEvent> {
        self.events().into_iter().filter(|e| e.outcome == HookOutcome::Failed).collect()
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: HookEvent) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }
}
