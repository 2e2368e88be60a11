//! node-termination-handler: drains a node before it goes away
//!
//! - `node-termination-handler drain` - Evict every pod on the node
//! - `node-termination-handler plan` - Show what a drain would evict

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use kube::Client;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use node_termination_handler::eviction::{
    metrics, EvictionPlan, KubePodApi, Tier, WorkloadInstance,
};
use node_termination_handler::{EvictionConfig, EvictionCoordinator, EvictionReport, ExclusionSet};

#[derive(Parser)]
#[command(name = "node-termination-handler")]
#[command(about = "Evicts the pods of a Kubernetes node that is about to terminate", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Name of the node to drain
    #[arg(long, env = "NODE_NAME", global = true)]
    node: Option<String>,

    /// YAML file with eviction settings
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Pods to keep, as comma separated name:namespace entries
    #[arg(long, env = "EXCLUDE_PODS", global = true, default_value = "")]
    exclude_pods: String,

    /// Namespace whose pods are evicted last
    #[arg(long, global = true)]
    system_namespace: Option<String>,

    /// Grace period in seconds for pods in the system namespace
    #[arg(long, global = true)]
    system_pod_grace_period: Option<u64>,

    /// Give up on the eviction pass after this many seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Output format (table, json, yaml)
    #[arg(short, long, global = true, default_value = "table")]
    output: String,

    /// Print Prometheus metrics after the command finishes
    #[arg(long, global = true)]
    print_metrics: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Evict every pod on the node except the excluded ones
    Drain,
    /// List the pods a drain would evict, without deleting anything
    Plan,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let print_metrics = cli.print_metrics;

    let result = run(cli).await;

    if print_metrics {
        match metrics::encode_metrics() {
            Ok(text) => print!("{}", text),
            Err(e) => error!("{}", e),
        }
    }

    if let Err(e) = result {
        match e.downcast_ref::<node_termination_handler::Error>() {
            Some(err) => eprintln!("Error: {}", err.status_message()),
            None => eprintln!("Error: {:#}", e),
        }
        process::exit(1);
    }
}

fn build_config(cli: &Cli) -> anyhow::Result<EvictionConfig> {
    let mut config = match &cli.config {
        Some(path) => EvictionConfig::load(path)?,
        None => EvictionConfig::default(),
    };

    if let Some(namespace) = &cli.system_namespace {
        config.system_namespace = namespace.clone();
    }
    if let Some(seconds) = cli.system_pod_grace_period {
        config.system_grace_period_seconds = seconds;
    }
    if let Some(seconds) = cli.timeout {
        config.timeout_seconds = Some(seconds);
    }

    config
        .validate()
        .map_err(node_termination_handler::Error::ConfigError)?;
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let node = cli
        .node
        .clone()
        .context("node name is required, pass --node or set NODE_NAME")?;
    let config = build_config(&cli)?;
    let exclusions: ExclusionSet = cli.exclude_pods.parse()?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    info!(
        "Draining node {} (system namespace {}, system grace period {:?}, {} exclusion(s))",
        node,
        config.system_namespace,
        config.system_grace_period(),
        exclusions.len()
    );

    let coordinator = EvictionCoordinator::with_config(
        node,
        Arc::new(KubePodApi::new(client)),
        config,
    );

    match cli.command {
        Commands::Drain => {
            let report = coordinator.evict_workloads(&exclusions).await?;
            info!("{}", report.summary());
            print_output(&report, &cli.output, || format_report_table(&report))
        }
        Commands::Plan => {
            let plan = coordinator.plan(&exclusions).await?;
            info!("{}", plan.summary());
            print_output(&plan, &cli.output, || format_plan_table(&plan))
        }
    }
}

fn print_output<T: Serialize>(
    value: &T,
    output: &str,
    table: impl FnOnce() -> String,
) -> anyhow::Result<()> {
    match output {
        "json" => println!("{}", format_json(value)?),
        "yaml" => println!("{}", format_yaml(value)?),
        _ => print!("{}", table()),
    }
    Ok(())
}

fn format_json<T: Serialize>(value: &T) -> anyhow::Result<String> {
    serde_json::to_string_pretty(value).context("JSON serialization error")
}

fn format_yaml<T: Serialize>(value: &T) -> anyhow::Result<String> {
    serde_yaml::to_string(value).context("YAML serialization error")
}

fn table_rows(rows: &[(&WorkloadInstance, &str, &str)]) -> String {
    let mut out = format!(
        "{:<40} {:<20} {:<10} {:<10}\n",
        "NAME", "NAMESPACE", "TIER", "STATUS"
    );
    out.push_str(&"-".repeat(83));
    out.push('\n');
    for (instance, tier, status) in rows {
        out.push_str(&format!(
            "{:<40} {:<20} {:<10} {:<10}\n",
            instance.name, instance.namespace, tier, status
        ));
    }
    out
}

fn format_report_table(report: &EvictionReport) -> String {
    let rows: Vec<_> = report
        .regular
        .iter()
        .map(|i| (i, Tier::Regular.as_str(), "Evicted"))
        .chain(
            report
                .system
                .iter()
                .map(|i| (i, Tier::System.as_str(), "Evicted")),
        )
        .chain(report.excluded.iter().map(|i| (i, "-", "Kept")))
        .collect();
    table_rows(&rows)
}

fn format_plan_table(plan: &EvictionPlan) -> String {
    let rows: Vec<_> = plan
        .regular
        .iter()
        .map(|i| (i, Tier::Regular.as_str(), "Pending"))
        .chain(
            plan.system
                .iter()
                .map(|i| (i, Tier::System.as_str(), "Pending")),
        )
        .chain(plan.excluded.iter().map(|i| (i, "-", "Excluded")))
        .collect();
    table_rows(&rows)
}
