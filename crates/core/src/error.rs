//! Error types shared by every Ensemble crate.
//!
//! Variants carry the plugin, Pod or role they concern so a failed reconcile
//! pass can be traced without re-running it.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Last observed rollout progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub available: i32,
    pub expected: i32,
}

impl Progress {
    pub fn new(available: i32, expected: i32) -> Self { Self { available, expected } }
    pub fn is_complete(&self) -> bool { self.available >= self.expected }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} replicas available", self.available, self.expected)
    }
}

fn last_progress(p: &Option<Progress>) -> String {
    match p {
        Some(p) => p.to_string(),
        None => "no status observed".to_string(),
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// Plugin config does not match the shape its factory expects.
    #[error("plugin {plugin}: config decode failed: {source}")]
    ConfigDecode {
        plugin: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("plugin {plugin}: no factory registered under this name")]
    UnknownPlugin { plugin: String },

    /// Registering the same name twice is refused at setup.
    #[error("plugin {plugin}: a factory is already registered under this name")]
    DuplicatePlugin { plugin: String },

    #[error("plugin {plugin}: plugin type {kind} is not supported")]
    UnsupportedPluginType { plugin: String, kind: String },

    /// `on_create` failed; the pass is aborted and the Pod is not committed.
    #[error("plugin {plugin} failed to mutate pod {pod}: {message}")]
    PluginExecution { plugin: String, pod: String, message: String },

    /// `on_ready` failed; recorded only, never aborts.
    #[error("plugin {plugin} ready hook failed for pod {pod}: {message}")]
    PostReadiness { plugin: String, pod: String, message: String },

    #[error("invalid role key {input:?}: {reason}")]
    RoleParse { input: String, reason: String },

    #[error("cannot resolve target {kind}/{name}: unrecognized kind")]
    TargetResolution { kind: String, name: String },

    #[error("invalid role {role:?}: {reason}")]
    InvalidRole { role: String, reason: String },

    #[error("readiness deadline exceeded after {elapsed:?} (deadline {deadline:?}; {})", last_progress(.last))]
    ReadinessTimeout {
        elapsed: Duration,
        /// Deadline in effect, relative to the start of the wait.
        deadline: Duration,
        last: Option<Progress>,
    },

    /// A status read failed while the wait was set to stop on read errors.
    #[error("readiness status read failed after {elapsed:?}: {message}")]
    StatusRead { elapsed: Duration, message: String },

    #[error("readiness wait cancelled after {elapsed:?} ({})", last_progress(.last))]
    Cancelled { elapsed: Duration, last: Option<Progress> },
}

impl Error {
    pub fn role_parse(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RoleParse { input: input.into(), reason: reason.into() }
    }

    pub fn invalid_role(role: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRole { role: role.into(), reason: reason.into() }
    }

    /// Errors that only a change to the workload spec (or process setup) can fix.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Error::ConfigDecode { .. }
                | Error::UnknownPlugin { .. }
                | Error::DuplicatePlugin { .. }
                | Error::UnsupportedPluginType { .. }
                | Error::InvalidRole { .. }
        )
    }

    /// Worth requeueing: plugin runtime failures, readiness timeouts and failed status reads.
    /// Config errors repeat until the spec changes; cancellation is deliberate.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::PluginExecution { .. } | Error::ReadinessTimeout { .. } | Error::StatusRead { .. })
    }

    /// Plugin name for plugin-scoped errors.
    pub fn plugin(&self) -> Option<&str> {
        match self {
            Error::ConfigDecode { plugin, .. }
            | Error::UnknownPlugin { plugin }
            | Error::DuplicatePlugin { plugin }
            | Error::UnsupportedPluginType { plugin, .. }
            | Error::PluginExecution { plugin, .. }
            | Error::PostReadiness { plugin, .. } => Some(plugin),
            _ => None,
        }
    }
}
