//! Ensemble readiness tracker.
//!
//! Polls a workload's status until enough replicas are available. The
//! deadline starts short and is extended while availability keeps rising,
//! up to a hard ceiling, so slow-but-progressing rollouts are not cut off
//! while stalled ones still fail in bounded time.

#![forbid(unsafe_code)]

use std::time::Duration;

use ensemble_core::{Error, Progress, Result};
use metrics::counter;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod deadline;

pub use deadline::Deadline;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessConfig {
    pub poll_interval: Duration,
    pub initial_timeout: Duration,
    pub extension: Duration,
    pub max_timeout: Duration,
    /// End the wait on the first failed status read instead of retrying it.
    pub fail_on_read_error: bool,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            initial_timeout: Duration::from_secs(5 * 60),
            extension: Duration::from_secs(2 * 60),
            max_timeout: Duration::from_secs(15 * 60),
            fail_on_read_error: false,
        }
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key).ok().and_then(|s| s.parse::<u64>().ok()).map(Duration::from_secs)
}

impl ReadinessConfig {
    /// Defaults overridden by `ENSEMBLE_READY_{POLL,TIMEOUT,EXTEND,MAX}_SECS`
    /// and `ENSEMBLE_READY_FAIL_ON_READ_ERROR` (`1` or `true`).
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            poll_interval: env_secs("ENSEMBLE_READY_POLL_SECS").unwrap_or(d.poll_interval),
            initial_timeout: env_secs("ENSEMBLE_READY_TIMEOUT_SECS").unwrap_or(d.initial_timeout),
            extension: env_secs("ENSEMBLE_READY_EXTEND_SECS").unwrap_or(d.extension),
            max_timeout: env_secs("ENSEMBLE_READY_MAX_SECS").unwrap_or(d.max_timeout),
            fail_on_read_error: std::env::var("ENSEMBLE_READY_FAIL_ON_READ_ERROR")
                .map(|v| matches!(v.trim(), "1" | "true"))
                .unwrap_or(d.fail_on_read_error),
        }
    }
}

/// Where availability readings come from.
#[async_trait::async_trait]
pub trait StatusSource: Send + Sync {
    async fn progress(&self) -> anyhow::Result<Progress>;
}

pub struct ReadinessTracker {
    cfg: ReadinessConfig,
}

impl ReadinessTracker {
    pub fn new(cfg: ReadinessConfig) -> Self { Self { cfg } }

    pub fn config(&self) -> &ReadinessConfig { &self.cfg }

    /// Block until `available >= expected`, the deadline passes, or `cancel` fires.
    ///
    /// By default a failed status read is logged and retried on the next tick
    /// and never extends the deadline. With
    /// [`ReadinessConfig::fail_on_read_error`] set, the first failed read ends
    /// the wait with [`Error::StatusRead`].
    pub async fn wait<S: StatusSource + ?Sized>(&self, source: &S, cancel: CancellationToken) -> Result<Progress> {
        let start = Instant::now();
        let mut deadline = Deadline::new(start, &self.cfg);
        let mut last: Option<Progress> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled { elapsed: start.elapsed(), last });
            }
            let now = Instant::now();
            if deadline.expired(now) {
                warn!(elapsed_s = start.elapsed().as_secs(), last = ?last, "readiness deadline passed");
                return Err(Error::ReadinessTimeout { elapsed: now - start, deadline: deadline.budget(), last });
            }

            let reading = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled { elapsed: start.elapsed(), last }),
                r = source.progress() => r,
            };
            match reading {
                Ok(p) => {
                    last = Some(p);
                    if p.is_complete() {
                        info!(progress = %p, elapsed_s = start.elapsed().as_secs(), "workload ready");
                        return Ok(p);
                    }
                    if deadline.observe(now, p.available) {
                        counter!("readiness_extensions", 1u64);
                        debug!(progress = %p, budget_s = deadline.budget().as_secs(), "progress made; deadline extended");
                    }
                }
                Err(e) if self.cfg.fail_on_read_error => {
                    warn!(error = %format!("{:#}", e), "status read failed; giving up");
                    return Err(Error::StatusRead { elapsed: start.elapsed(), message: format!("{:#}", e) });
                }
                Err(e) => warn!(error = %format!("{:#}", e), "status read failed; retrying"),
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled { elapsed: start.elapsed(), last }),
                _ = sleep(self.cfg.poll_interval) => {}
            }
        }
    }
}

impl Default for ReadinessTracker {
    fn default() -> Self { Self::new(ReadinessConfig::default()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_timings() {
        let c = ReadinessConfig::default();
        assert_eq!(c.poll_interval, Duration::from_secs(5));
        assert_eq!(c.initial_timeout, Duration::from_secs(300));
        assert_eq!(c.extension, Duration::from_secs(120));
        assert_eq!(c.max_timeout, Duration::from_secs(900));
        assert!(!c.fail_on_read_error);
    }
}
