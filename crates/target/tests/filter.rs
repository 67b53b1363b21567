use std::collections::BTreeMap;
use std::sync::Arc;

use ensemble_core::labels::{ENTRY_LABEL, GROUP_NAME_LABEL, ROLE_LABEL, WORKLOAD_NAME_LABEL};
use ensemble_target::{filter_pods_by_target, metric_pods, TargetRef};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

fn pod(name: &str, ns: &str, labels: &[(&str, &str)]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(ns.into()),
            labels: Some(labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<BTreeMap<_, _>>()),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn names(pods: &[Arc<Pod>]) -> Vec<&str> {
    let mut v: Vec<&str> = pods.iter().filter_map(|p| p.metadata.name.as_deref()).collect();
    v.sort_unstable();
    v
}

#[test]
fn metric_pods_respect_namespace() {
    let pods = vec![
        pod("pod1", "default", &[(WORKLOAD_NAME_LABEL, "model1"), (ENTRY_LABEL, "true")]),
        pod("pod2", "other-namespace", &[(WORKLOAD_NAME_LABEL, "model1"), (ENTRY_LABEL, "true")]),
    ];
    let target = TargetRef::model_serving("model1");

    assert_eq!(names(&metric_pods(&pods, "default", &target).unwrap()), vec!["pod1"]);
    assert_eq!(names(&metric_pods(&pods, "other-namespace", &target).unwrap()), vec!["pod2"]);
    assert!(metric_pods(&pods, "non-existent", &target).unwrap().is_empty());
}

#[test]
fn designation_must_be_entry_or_worker() {
    let pods = vec![
        pod("entry", "ns", &[(WORKLOAD_NAME_LABEL, "m"), (ENTRY_LABEL, "true")]),
        pod("worker", "ns", &[(WORKLOAD_NAME_LABEL, "m"), (ENTRY_LABEL, "false")]),
        pod("bogus", "ns", &[(WORKLOAD_NAME_LABEL, "m"), (ENTRY_LABEL, "maybe")]),
        pod("unlabelled", "ns", &[(WORKLOAD_NAME_LABEL, "m")]),
        pod("foreign", "ns", &[(WORKLOAD_NAME_LABEL, "other"), (ENTRY_LABEL, "true")]),
    ];
    let target = TargetRef::model_serving("m");
    assert_eq!(names(&filter_pods_by_target(&pods, "ns", &target).unwrap()), vec!["entry", "worker"]);
    assert_eq!(names(&metric_pods(&pods, "ns", &target).unwrap()), vec!["entry"]);
}

#[test]
fn serving_group_and_role_narrowing() {
    let pods = vec![
        pod("m-0-prefill-0", "ns", &[(GROUP_NAME_LABEL, "m-0"), (ROLE_LABEL, "prefill"), (ENTRY_LABEL, "true")]),
        pod("m-0-decode-0", "ns", &[(GROUP_NAME_LABEL, "m-0"), (ROLE_LABEL, "decode"), (ENTRY_LABEL, "true")]),
        pod("m-1-prefill-0", "ns", &[(GROUP_NAME_LABEL, "m-1"), (ROLE_LABEL, "prefill"), (ENTRY_LABEL, "true")]),
    ];
    let group = TargetRef::serving_group("m-0");
    assert_eq!(names(&filter_pods_by_target(&pods, "ns", &group).unwrap()), vec!["m-0-decode-0", "m-0-prefill-0"]);
    let role = group.with_role("prefill");
    assert_eq!(names(&filter_pods_by_target(&pods, "ns", &role).unwrap()), vec!["m-0-prefill-0"]);
}

#[test]
fn unknown_kind_propagates() {
    let pods: Vec<Pod> = Vec::new();
    let t = TargetRef { kind: "StatefulSet".into(), name: "x".into(), role: None };
    assert!(filter_pods_by_target(&pods, "ns", &t).is_err());
}
