//! Ensemble store: coalescing Pod ingest and lock-free snapshot reads.
//!
//! Watch deltas are coalesced per Pod, applied in small batches, and
//! published as an immutable [`PodSnapshot`] behind an `ArcSwap`. Readers
//! never block the ingest loop and always see a consistent (if slightly
//! stale) view.

#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use ensemble_core::{DeltaKind, PodDelta};
use ensemble_target::PodLister;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use metrics::{counter, histogram};
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

pub const DEFAULT_CAP: usize = 4096;

/// Ingest queue capacity from `ENSEMBLE_STORE_CAP`.
pub fn cap_from_env() -> usize {
    std::env::var("ENSEMBLE_STORE_CAP").ok().and_then(|s| s.parse().ok()).filter(|c| *c > 0).unwrap_or(DEFAULT_CAP)
}

/// Coalescing queue keyed by `namespace/name`, FIFO by first arrival, bounded.
pub struct Coalescer {
    map: FxHashMap<String, PodDelta>,
    order: VecDeque<String>,
    cap: usize,
    dropped: u64,
    synced: bool,
}

impl Coalescer {
    pub fn with_capacity(cap: usize) -> Self {
        Self { map: FxHashMap::default(), order: VecDeque::new(), cap: cap.max(1), dropped: 0, synced: false }
    }

    pub fn len(&self) -> usize { self.map.len() }
    pub fn is_empty(&self) -> bool { self.map.is_empty() }
    pub fn dropped(&self) -> u64 { self.dropped }

    /// Later deltas for the same Pod replace earlier ones in place. When full,
    /// the oldest pending key is evicted. A sync marker is held as a flag.
    pub fn push(&mut self, d: PodDelta) {
        if d.kind == DeltaKind::Synced {
            self.synced = true;
            return;
        }
        let Some(key) = d.key() else {
            warn!("delta for unnamed pod ignored");
            return;
        };
        if !self.map.contains_key(&key) {
            if self.order.len() >= self.cap {
                if let Some(old) = self.order.pop_front() {
                    self.map.remove(&old);
                    self.dropped += 1;
                    counter!("store_coalescer_dropped", 1u64);
                }
            }
            self.order.push_back(key.clone());
        }
        self.map.insert(key, d);
    }

    /// True once per received sync marker.
    pub fn take_synced(&mut self) -> bool { std::mem::take(&mut self.synced) }

    pub fn drain_ready(&mut self) -> Vec<PodDelta> {
        let mut out = Vec::with_capacity(self.order.len());
        while let Some(key) = self.order.pop_front() {
            if let Some(d) = self.map.remove(&key) {
                out.push(d);
            }
        }
        out
    }
}

/// Immutable view of every Pod the store has seen.
#[derive(Debug, Default, Clone)]
pub struct PodSnapshot {
    pub epoch: u64,
    pods: FxHashMap<String, Arc<Pod>>,
}

impl PodSnapshot {
    pub fn len(&self) -> usize { self.pods.len() }
    pub fn is_empty(&self) -> bool { self.pods.is_empty() }
    pub fn get(&self, key: &str) -> Option<&Arc<Pod>> { self.pods.get(key) }
    pub fn pods(&self) -> impl Iterator<Item = &Arc<Pod>> { self.pods.values() }
}

impl PodLister for PodSnapshot {
    fn list(&self, namespace: &str, selector: &LabelSelector) -> Vec<Arc<Pod>> {
        let all: Vec<Arc<Pod>> = self.pods.values().cloned().collect();
        all.as_slice().list(namespace, selector)
    }
}

/// Applies delta batches and freezes them into snapshots.
#[derive(Default)]
pub struct PodWorld {
    epoch: u64,
    pods: FxHashMap<String, Arc<Pod>>,
}

impl PodWorld {
    pub fn new() -> Self { Self::default() }

    pub fn apply(&mut self, batch: Vec<PodDelta>) {
        let started = Instant::now();
        for d in batch {
            let Some(key) = d.key() else { continue };
            match d.kind {
                DeltaKind::Applied => {
                    self.pods.insert(key, Arc::new(d.pod));
                }
                DeltaKind::Deleted => {
                    self.pods.remove(&key);
                }
                DeltaKind::Synced => {}
            }
        }
        self.epoch = self.epoch.saturating_add(1);
        histogram!("store_apply_ms", started.elapsed().as_secs_f64() * 1000.0);
    }

    pub fn freeze(&self) -> Arc<PodSnapshot> { Arc::new(PodSnapshot { epoch: self.epoch, pods: self.pods.clone() }) }
}

/// Read side of the store; cheap to clone.
#[derive(Clone)]
pub struct StoreHandle {
    snap: Arc<ArcSwap<PodSnapshot>>,
    epoch_rx: watch::Receiver<u64>,
}

impl StoreHandle {
    pub fn current(&self) -> Arc<PodSnapshot> { self.snap.load_full() }
    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> { self.epoch_rx.clone() }

    /// Wait until a snapshot at or past `epoch` is published. False if the ingest loop stopped first.
    pub async fn wait_for_epoch(&self, epoch: u64) -> bool {
        let mut rx = self.epoch_rx.clone();
        let ok = rx.wait_for(|e| *e >= epoch).await.is_ok();
        ok
    }
}

impl PodLister for StoreHandle {
    fn list(&self, namespace: &str, selector: &LabelSelector) -> Vec<Arc<Pod>> { self.current().list(namespace, selector) }
}

/// Publishes a new epoch for a non-empty batch, or for an empty one after a
/// sync marker so readers waiting on a first list see an empty namespace.
fn publish(coalescer: &mut Coalescer, builder: &mut PodWorld, snap: &ArcSwap<PodSnapshot>, epoch_tx: &watch::Sender<u64>) {
    let synced = coalescer.take_synced();
    let batch = coalescer.drain_ready();
    if batch.is_empty() && !synced {
        return;
    }
    debug!(deltas = batch.len(), "applying batch");
    builder.apply(batch);
    let next = builder.freeze();
    let epoch = next.epoch;
    snap.store(next);
    let _ = epoch_tx.send(epoch);
}

/// Spawn the ingest loop. Deltas sent on the returned channel show up in
/// the handle's snapshot within one tick.
pub fn spawn_ingest(cap: usize) -> (mpsc::Sender<PodDelta>, StoreHandle) {
    let (tx, mut rx) = mpsc::channel::<PodDelta>(cap.max(1));
    let snap = Arc::new(ArcSwap::from_pointee(PodSnapshot::default()));
    let (epoch_tx, epoch_rx) = watch::channel(0u64);
    let writer = Arc::clone(&snap);

    tokio::spawn(async move {
        let mut coalescer = Coalescer::with_capacity(cap);
        let mut builder = PodWorld::new();
        let mut ticker = tokio::time::interval(Duration::from_millis(8));
        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(d) => coalescer.push(d),
                    None => {
                        debug!("delta channel closed; draining and exiting ingest loop");
                        publish(&mut coalescer, &mut builder, &writer, &epoch_tx);
                        break;
                    }
                },
                _ = ticker.tick() => publish(&mut coalescer, &mut builder, &writer, &epoch_tx),
            }
        }
        info!(dropped = coalescer.dropped(), "ingest loop stopped");
    });

    (tx, StoreHandle { snap, epoch_rx })
}
