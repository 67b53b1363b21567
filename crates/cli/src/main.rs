use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use ensemble_api::{KubePodCreator, PodShaper};
use ensemble_core::{format_role_key, parse_role_key, ModelServing};
use ensemble_plugins::{PluginRegistry, TracingSink};
use ensemble_readiness::{ReadinessConfig, ReadinessTracker};
use ensemble_target::{filter_pods_by_target, metric_pods, resolve_target_selector, selector_to_string, TargetRef};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "ensemblectl", version, about = "Ensemble multi-role serving CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubernetes namespace (default: the manifest's, else "default")
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Kind {
    ModelServing,
    ServingGroup,
}

impl Kind {
    fn target(self, name: &str) -> TargetRef {
        match self {
            Kind::ModelServing => TargetRef::model_serving(name),
            Kind::ServingGroup => TargetRef::serving_group(name),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the shaped Pods of a ModelServing manifest without touching the cluster
    Render {
        /// Path to a ModelServing YAML manifest
        file: String,
    },
    /// Create the shaped Pods of a ModelServing manifest
    Sync {
        /// Path to a ModelServing YAML manifest
        file: String,
        /// Keep running and fire ready hooks as Pods become ready (Ctrl-C to stop)
        #[arg(long = "follow", action = ArgAction::SetTrue)]
        follow: bool,
    },
    /// List Pods covered by a target reference
    Pods {
        /// Workload or serving group name
        name: String,
        #[arg(long = "kind", value_enum, default_value_t = Kind::ModelServing)]
        kind: Kind,
        /// Narrow to one role
        #[arg(long = "role")]
        role: Option<String>,
        /// Entry Pods only
        #[arg(long = "metrics", action = ArgAction::SetTrue)]
        metrics: bool,
    },
    /// Block until a ModelServing reports all replicas available
    Wait {
        /// ModelServing name
        name: String,
    },
    /// Build or split composite role keys
    RoleKey {
        #[command(subcommand)]
        op: RoleKeyOp,
    },
}

#[derive(Subcommand, Debug)]
enum RoleKeyOp {
    /// role + sub-id -> "role/sub"
    Format { role: String, sub_id: String },
    /// "role/sub" -> role, sub-id
    Parse { key: String },
}

fn init_tracing() {
    let env = std::env::var("ENSEMBLE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("ENSEMBLE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid ENSEMBLE_METRICS_ADDR; expected host:port");
        }
    }
}

fn load_manifest(path: &str, ns_override: Option<&str>) -> Result<ModelServing> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
    let mut ms: ModelServing = serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path))?;
    if let Some(ns) = ns_override {
        ms.metadata.namespace = Some(ns.to_string());
    } else if ms.metadata.namespace.is_none() {
        ms.metadata.namespace = Some("default".to_string());
    }
    Ok(ms)
}

fn shaper() -> Result<PodShaper> {
    let registry = PluginRegistry::with_builtins().context("registering built-in plugins")?;
    info!(plugins = ?registry.names(), "plugin registry ready");
    Ok(PodShaper::new(Arc::new(registry), Arc::new(TracingSink)))
}

/// Cancelled on the first Ctrl-C.
fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received; cancelling");
            trigger.cancel();
        }
    });
    token
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Render { file } => {
            let ms = load_manifest(&file, cli.namespace.as_deref())?;
            info!(file = %file, "render invoked");
            let mut failed = 0usize;
            let mut pods = Vec::new();
            for (name, shaped) in shaper()?.shape_all(&ms).await? {
                match shaped {
                    Ok(p) => pods.push(p),
                    Err(e) => {
                        failed += 1;
                        eprintln!("{}: {}", name, e);
                    }
                }
            }
            match cli.output {
                Output::Human => {
                    for p in &pods {
                        println!("---");
                        print!("{}", serde_yaml::to_string(p)?);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&pods)?),
            }
            if failed > 0 {
                bail!("{} pod(s) failed to shape", failed);
            }
        }
        Commands::Sync { file, follow } => {
            let ms = load_manifest(&file, cli.namespace.as_deref())?;
            let ns = ms.metadata.namespace.clone().unwrap_or_default();
            let workload = ms.metadata.name.clone().context("manifest has no metadata.name")?;
            info!(workload = %workload, ns = %ns, "sync invoked");
            let client = ensemble_kubehub::client().await?;
            let shaper = shaper()?;
            let report = shaper.sync(&ms, &KubePodCreator::new(client.clone())).await?;
            match cli.output {
                Output::Human => {
                    for p in &report.created {
                        println!("+ {}", p);
                    }
                    for p in &report.existing {
                        println!("= {}", p);
                    }
                    for f in &report.failed {
                        println!("! {}", f);
                    }
                }
                Output::Json => {
                    let failed: Vec<String> = report.failed.iter().map(|f| f.to_string()).collect();
                    let out = serde_json::json!({ "created": report.created, "existing": report.existing, "failed": failed });
                    println!("{}", serde_json::to_string_pretty(&out)?);
                }
            }

            if follow {
                let selector = selector_to_string(&resolve_target_selector(&TargetRef::model_serving(&workload))?);
                let (tx, rx) = mpsc::channel(ensemble_store::cap_from_env());
                let watcher_handle = tokio::spawn({
                    let client = client.clone();
                    let ns = ns.clone();
                    async move {
                        if let Err(e) = ensemble_kubehub::start_pod_watcher(client, Some(&ns), Some(&selector), tx).await {
                            error!(error = ?e, "pod watcher failed");
                        }
                    }
                });
                let fired = shaper.dispatch_ready(&ms.spec.plugins, rx, ctrl_c_token()).await;
                watcher_handle.abort();
                info!(fired, "ready dispatch stopped");
            }
            report.into_result()?;
        }
        Commands::Pods { name, kind, role, metrics } => {
            let ns = cli.namespace.clone().unwrap_or_else(|| "default".to_string());
            let mut target = kind.target(&name);
            target.role = role;
            let selector = selector_to_string(&resolve_target_selector(&target)?);
            info!(target = ?target, ns = %ns, "pods invoked");

            let client = ensemble_kubehub::client().await?;
            let (ingest_tx, store) = ensemble_store::spawn_ingest(ensemble_store::cap_from_env());
            let watcher_handle = tokio::spawn({
                let ns = ns.clone();
                let tx = ingest_tx.clone();
                async move {
                    if let Err(e) = ensemble_kubehub::start_pod_watcher(client, Some(&ns), Some(&selector), tx).await {
                        error!(error = ?e, "pod watcher failed");
                    }
                }
            });

            let wait_secs = std::env::var("ENSEMBLE_WAIT_SECS").ok().and_then(|s| s.parse::<u64>().ok()).unwrap_or(8);
            match tokio::time::timeout(Duration::from_secs(wait_secs), store.wait_for_epoch(1)).await {
                Ok(true) => {}
                Ok(false) => warn!("ingest stopped before the first pod list arrived"),
                Err(_) => warn!(wait_secs, "pod list not synced before timeout"),
            }
            let pods = if metrics {
                metric_pods(&store, &ns, &target)?
            } else {
                filter_pods_by_target(&store, &ns, &target)?
            };

            match cli.output {
                Output::Human => {
                    println!("{:<40} {:<12} {:<8} {}", "NAME", "ROLE", "ENTRY", "READY");
                    for p in &pods {
                        let role = ensemble_core::labels::role_key(&p.metadata)
                            .and_then(|r| r.ok())
                            .map(|k| k.to_string())
                            .unwrap_or_else(|| "-".to_string());
                        let entry = ensemble_core::labels::pod_target(&p.metadata)
                            .map(|t| t.as_label_value())
                            .unwrap_or("-");
                        let ready = ensemble_plugins::is_pod_ready(p);
                        println!("{:<40} {:<12} {:<8} {}", p.metadata.name.as_deref().unwrap_or(""), role, entry, ready);
                    }
                }
                Output::Json => {
                    let items: Vec<_> = pods.iter().map(|p| p.as_ref()).collect();
                    println!("{}", serde_json::to_string_pretty(&items)?);
                }
            }
            drop(ingest_tx);
            watcher_handle.abort();
        }
        Commands::Wait { name } => {
            let ns = cli.namespace.clone().unwrap_or_else(|| "default".to_string());
            let cfg = ReadinessConfig::from_env();
            info!(workload = %name, ns = %ns, cfg = ?cfg, "wait invoked");
            let source = ensemble_kubehub::ModelServingStatusSource::new(ensemble_kubehub::client().await?, &ns, name.as_str());
            let progress = ReadinessTracker::new(cfg).wait(&source, ctrl_c_token()).await?;
            match cli.output {
                Output::Human => println!("{} ready: {}", name, progress),
                Output::Json => println!(
                    "{}",
                    serde_json::json!({ "name": name, "available": progress.available, "expected": progress.expected })
                ),
            }
        }
        Commands::RoleKey { op } => match op {
            RoleKeyOp::Format { role, sub_id } => println!("{}", format_role_key(&role, &sub_id)?),
            RoleKeyOp::Parse { key } => {
                let (role, sub_id) = parse_role_key(&key)?;
                match cli.output {
                    Output::Human => println!("role={} sub-id={}", role, sub_id),
                    Output::Json => println!("{}", serde_json::json!({ "role": role, "subId": sub_id })),
                }
            }
        },
    }
    Ok(())
}
