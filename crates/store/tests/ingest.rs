#![forbid(unsafe_code)]

use ensemble_core::PodDelta;
use ensemble_store::spawn_ingest;
use ensemble_target::PodLister;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

fn pod(name: &str, ns: &str, rv: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(ns.into()),
            resource_version: Some(rv.into()),
            ..Default::default()
        },
        ..Default::default()
    }
}

async fn run_sequence(seq: &[PodDelta]) -> Vec<(String, String, String)> {
    let (tx, store) = spawn_ingest(128);
    for d in seq.iter().cloned() {
        let _ = tx.send(d).await;
    }
    drop(tx);
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    let snap = store.current();
    let mut canon: Vec<(String, String, String)> = snap
        .pods()
        .map(|p| {
            let m = &p.metadata;
            (
                m.namespace.clone().unwrap_or_default(),
                m.name.clone().unwrap_or_default(),
                m.resource_version.clone().unwrap_or_default(),
            )
        })
        .collect();
    canon.sort_unstable();
    canon
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deterministic_across_runs() {
    let seq = vec![
        PodDelta::applied(pod("a", "ns1", "1")),
        PodDelta::applied(pod("b", "ns2", "1")),
        PodDelta::applied(pod("a", "ns1", "2")),
        PodDelta::applied(pod("c", "ns1", "1")),
        PodDelta::deleted(pod("b", "ns2", "1")),
        PodDelta::applied(pod("a", "ns1", "3")),
    ];
    let first = run_sequence(&seq).await;
    for _ in 0..5 {
        assert_eq!(run_sequence(&seq).await, first);
    }
    assert_eq!(
        first,
        vec![
            ("ns1".to_string(), "a".to_string(), "3".to_string()),
            ("ns1".to_string(), "c".to_string(), "1".to_string()),
        ]
    );
}

#[tokio::test]
async fn empty_relist_still_publishes_an_epoch() {
    let (tx, store) = spawn_ingest(16);
    tx.send(PodDelta::synced()).await.expect("send");
    let reached = tokio::time::timeout(std::time::Duration::from_secs(2), store.wait_for_epoch(1)).await;
    assert_eq!(reached.ok(), Some(true));
    assert!(store.current().is_empty());
    assert!(store.list("ns1", &LabelSelector::default()).is_empty());
}

#[tokio::test]
async fn wait_for_epoch_reports_a_stopped_loop() {
    let (tx, store) = spawn_ingest(16);
    drop(tx);
    assert!(!store.wait_for_epoch(1).await);
}

#[tokio::test]
async fn handle_lists_by_namespace() {
    let (tx, store) = spawn_ingest(16);
    tx.send(PodDelta::applied(pod("x", "ns1", "1"))).await.expect("send");
    tx.send(PodDelta::applied(pod("y", "ns2", "1"))).await.expect("send");
    assert!(store.wait_for_epoch(1).await);

    let everything = LabelSelector::default();
    let listed = store.list("ns1", &everything);
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].metadata.name.as_deref(), Some("x"));
    assert!(store.list("ns3", &everything).is_empty());
}
