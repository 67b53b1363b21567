use std::sync::{Arc, Mutex};

use ensemble_core::{Error, HookRequest, ModelServing, PluginSpec};
use ensemble_plugins::{HookLifecycle, HookOutcome, HookPhase, MemorySink, Plugin, PluginRegistry};
use k8s_openapi::api::core::v1::{Pod, PodCondition, PodStatus};

type Calls = Arc<Mutex<Vec<String>>>;

struct Notified {
    name: String,
    calls: Calls,
    fail: bool,
}

#[async_trait::async_trait]
impl Plugin for Notified {
    fn name(&self) -> &str { &self.name }

    async fn on_create(&self, _req: &mut HookRequest) -> anyhow::Result<()> { Ok(()) }

    async fn on_ready(&self, req: &HookRequest) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(format!("{}:{}", self.name, req.pod_name()));
        if self.fail {
            anyhow::bail!("{} cannot reach sidecar", self.name);
        }
        Ok(())
    }
}

fn registry(calls: &Calls, failing: &[&str]) -> Arc<PluginRegistry> {
    let mut reg = PluginRegistry::new();
    for n in ["alpha", "beta", "gamma"] {
        let calls = calls.clone();
        let fail = failing.contains(&n);
        reg.register(n, move |spec: &PluginSpec| {
            Ok(Arc::new(Notified { name: spec.name.clone(), calls: calls.clone(), fail }) as Arc<dyn Plugin>)
        })
        .expect("register");
    }
    Arc::new(reg)
}

fn plugins() -> Vec<PluginSpec> { ["alpha", "beta", "gamma"].into_iter().map(PluginSpec::new).collect() }

fn entry_request() -> HookRequest {
    let ms: ModelServing = serde_yaml::from_str(
        r#"
apiVersion: ensemble.dev/v1alpha1
kind: ModelServing
metadata: { name: qwen, namespace: default }
spec:
  roles:
    - name: prefill
      entryTemplate:
        spec:
          containers: [{ name: main, image: img }]
"#,
    )
    .expect("manifest");
    ensemble_podgen::generate_workload(&ms).expect("generate").remove(0)
}

fn with_ready(mut pod: Pod, ready: bool) -> Pod {
    pod.status = Some(PodStatus {
        conditions: Some(vec![PodCondition {
            type_: "Ready".into(),
            status: if ready { "True" } else { "False" }.into(),
            ..Default::default()
        }]),
        ..Default::default()
    });
    pod
}

#[tokio::test]
async fn ready_phase_continues_past_failures() {
    let calls: Calls = Arc::default();
    let sink = Arc::new(MemorySink::new());
    let lc = HookLifecycle::new(registry(&calls, &["beta"]), sink.clone());
    let req = entry_request();

    let report = lc.run_on_ready(&plugins(), &req).await;
    assert_eq!(report.invoked, vec!["alpha", "beta", "gamma"]);
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(&report.failures[0], Error::PostReadiness { plugin, .. } if plugin == "beta"));
    assert_eq!(calls.lock().unwrap().len(), 3);

    let failures = sink.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].phase, HookPhase::Ready);
    assert_eq!(failures[0].outcome, HookOutcome::Failed);
}

#[tokio::test]
async fn unknown_plugin_is_recorded_not_fatal() {
    let calls: Calls = Arc::default();
    let lc = HookLifecycle::new(registry(&calls, &[]), Arc::new(MemorySink::new()));
    let list = vec![PluginSpec::new("ghost"), PluginSpec::new("alpha")];
    let report = lc.run_on_ready(&list, &entry_request()).await;
    assert_eq!(report.invoked, vec!["alpha"]);
    assert!(matches!(report.failures.as_slice(), [Error::UnknownPlugin { .. }]));
}

#[tokio::test]
async fn observe_fires_once_per_transition() {
    let calls: Calls = Arc::default();
    let lc = HookLifecycle::new(registry(&calls, &[]), Arc::new(MemorySink::new()));
    let list = plugins();
    let pod = entry_request().into_pod();

    assert!(lc.observe(&list, &with_ready(pod.clone(), false)).await.is_none());
    assert!(lc.observe(&list, &with_ready(pod.clone(), true)).await.is_some());
    assert!(lc.observe(&list, &with_ready(pod.clone(), true)).await.is_none());
    assert_eq!(calls.lock().unwrap().len(), 3);

    // ready -> not ready -> ready again notifies again
    assert!(lc.observe(&list, &with_ready(pod.clone(), false)).await.is_none());
    assert!(lc.observe(&list, &with_ready(pod.clone(), true)).await.is_some());
    assert_eq!(calls.lock().unwrap().len(), 6);

    lc.forget(&pod);
    assert!(lc.observe(&list, &with_ready(pod, true)).await.is_some());
}

#[tokio::test]
async fn notify_many_reports_per_pod() {
    let calls: Calls = Arc::default();
    let lc = HookLifecycle::new(registry(&calls, &["gamma"]), Arc::new(MemorySink::new()));
    let a = entry_request();
    let mut b = a.clone();
    b.pod.metadata.name = Some("qwen-0-prefill-0-copy".into());

    let reports = lc.notify_ready_many(&plugins(), &[a, b]).await;
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.failures.len() == 1 && r.invoked.len() == 3));
}
