use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ocp_cost_attribution::config::{Config, LogFormat};
use ocp_cost_attribution::model::{
    CostCategoryRule, NamespaceLabelRow, NodeCapacityIntervalRow, NodeLabelRow, NodeRoleRow, PodUsageRow,
    StorageUsageRow,
};
use ocp_cost_attribution::pipeline::{OcpInputs, RunContext};

/// Ingesting the raw OCP/CUR tables themselves (CSV, Parquet, or a database
/// cursor) is left to the caller that embeds this engine — this binary wires
/// the pipeline to an empty input set so `--config` and logging setup can be
/// exercised end to end.
#[derive(Debug, Parser)]
#[command(name = "ocp-cost-attribution", about = "OCP-on-AWS cost usage aggregation and attribution engine")]
struct Cli {
    /// Path to a TOML config file. Falls back to built-in defaults if omitted.
    #[arg(long, env = "OCP_COST_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, default_value_t = 1)]
    report_period_id: i64,

    #[arg(long, default_value = "cluster-1")]
    cluster_id: String,

    #[arg(long, default_value = "prod")]
    cluster_alias: String,

    #[arg(long, default_value = "aws")]
    provider: String,
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match config.logging.format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Console => subscriber.init(),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    }
    .apply_env_overrides();

    init_logging(&config);

    let pod_rows: Vec<PodUsageRow> = Vec::new();
    let storage_rows: Vec<StorageUsageRow> = Vec::new();
    let node_capacity_intervals: Vec<NodeCapacityIntervalRow> = Vec::new();
    let node_roles: Vec<NodeRoleRow> = Vec::new();
    let node_labels: Vec<NodeLabelRow> = Vec::new();
    let namespace_labels: Vec<NamespaceLabelRow> = Vec::new();
    let cost_category_rules: Vec<CostCategoryRule> = Vec::new();
    let enabled_keys = ocp_cost_attribution::labels::EnabledKeys::from_keys(vec![]);

    let inputs = OcpInputs {
        pod_rows: &pod_rows,
        storage_rows: &storage_rows,
        node_capacity_intervals: &node_capacity_intervals,
        node_roles: &node_roles,
        node_labels: &node_labels,
        namespace_labels: &namespace_labels,
        cost_category_rules: &cost_category_rules,
        enabled_keys: &enabled_keys,
    };
    let ctx = RunContext {
        report_period_id: cli.report_period_id,
        cluster_id: &cli.cluster_id,
        cluster_alias: &cli.cluster_alias,
        provider: &cli.provider,
    };

    let summary = ocp_cost_attribution::pipeline::run_ocp_summary(&inputs, &ctx, &config.performance)?;
    tracing::info!(rows = summary.len(), "pipeline run complete");
    Ok(())
}
