//! Read-only Pod enumeration over whatever cache the caller holds.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::runtime::reflector::Store;

use crate::selector::selector_matches;

/// Lists Pods in one namespace matching a selector.
///
/// Reads are snapshots of an eventually-consistent cache: a Pod created a
/// moment ago may be missing, and nothing found is an empty result.
pub trait PodLister {
    fn list(&self, namespace: &str, selector: &LabelSelector) -> Vec<Arc<Pod>>;
}

fn in_scope(pod: &Pod, namespace: &str, selector: &LabelSelector) -> bool {
    pod.metadata.namespace.as_deref() == Some(namespace) && selector_matches(selector, pod.metadata.labels.as_ref())
}

impl PodLister for Store<Pod> {
    fn list(&self, namespace: &str, selector: &LabelSelector) -> Vec<Arc<Pod>> {
        self.state().into_iter().filter(|p| in_scope(p, namespace, selector)).collect()
    }
}

impl PodLister for [Pod] {
    fn list(&self, namespace: &str, selector: &LabelSelector) -> Vec<Arc<Pod>> {
        self.iter().filter(|p| in_scope(p, namespace, selector)).cloned().map(Arc::new).collect()
    }
}

impl PodLister for Vec<Pod> {
    fn list(&self, namespace: &str, selector: &LabelSelector) -> Vec<Arc<Pod>> { self.as_slice().list(namespace, selector) }
}

impl PodLister for [Arc<Pod>] {
    fn list(&self, namespace: &str, selector: &LabelSelector) -> Vec<Arc<Pod>> {
        self.iter().filter(|p| in_scope(p, namespace, selector)).cloned().collect()
    }
}

impl<L: PodLister + ?Sized> PodLister for Arc<L> {
    fn list(&self, namespace: &str, selector: &LabelSelector) -> Vec<Arc<Pod>> { (**self).list(namespace, selector) }
}

impl<L: PodLister + ?Sized> PodLister for &L {
    fn list(&self, namespace: &str, selector: &LabelSelector) -> Vec<Arc<Pod>> { (**self).list(namespace, selector) }
}
