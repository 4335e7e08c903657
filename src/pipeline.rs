use tracing::{debug, info, warn};

use crate::capacity_calculator;
use crate::config::{AwsConfig, CostConfig, PerformanceConfig};
use crate::cost_attributor;
use crate::disk_capacity_solver;
use crate::error::EngineResult;
use crate::executor::{self, ExecutorConfig, SummarySink};
use crate::labels::EnabledKeys;
use crate::model::{
    AttributedRow, CloudBillingRow, CostCategoryRule, NamespaceLabelRow, NodeCapacityIntervalRow, NodeLabelRow,
    NodeRoleRow, PodUsageRow, StorageUsageRow, SummaryRow,
};
use crate::network_cost_handler;
use crate::pod_aggregator::{self, PodAggregationContext};
use crate::resource_matcher;
use crate::storage_aggregator::{self, StorageAggregationContext};
use crate::tag_matcher;
use crate::unallocated_calculator;

/// Every OCP-side raw table the pipeline reads. Borrowed for the duration of
/// a single run; nothing here is mutated.
pub struct OcpInputs<'a> {
    pub pod_rows: &'a [PodUsageRow],
    pub storage_rows: &'a [StorageUsageRow],
    pub node_capacity_intervals: &'a [NodeCapacityIntervalRow],
    pub node_roles: &'a [NodeRoleRow],
    pub node_labels: &'a [NodeLabelRow],
    pub namespace_labels: &'a [NamespaceLabelRow],
    pub cost_category_rules: &'a [CostCategoryRule],
    pub enabled_keys: &'a EnabledKeys,
}

pub struct AwsInputs<'a> {
    pub cloud_rows: &'a [CloudBillingRow],
}

#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    pub report_period_id: i64,
    pub cluster_id: &'a str,
    pub cluster_alias: &'a str,
    pub provider: &'a str,
}

fn validate_summary_rows(rows: &[SummaryRow]) {
    let mut bad_json = 0usize;
    let mut inverted_interval = 0usize;
    for row in rows {
        if serde_json::from_str::<serde_json::Value>(&row.all_labels_json).is_err() {
            bad_json += 1;
        }
        if row.usage_end < row.usage_start {
            inverted_interval += 1;
        }
    }
    if bad_json > 0 {
        warn!(bad_json, total = rows.len(), "summary rows carry unparseable label JSON");
    }
    if inverted_interval > 0 {
        warn!(inverted_interval, total = rows.len(), "summary rows have usage_end before usage_start");
    }
}

/// Runs pod aggregation, storage aggregation, and the unallocated-capacity
/// pass, and returns the combined summary table for one reporting period.
/// Pod aggregation alone honors `performance.use_streaming` — it is the only
/// component whose grouping is associative across row-range chunks (see
/// `pod_aggregator::regroup_partials`). Storage aggregation requires the
/// full pod-to-PVC join up front and always runs as a single pass.
pub fn run_ocp_summary(
    inputs: &OcpInputs,
    ctx: &RunContext,
    perf: &PerformanceConfig,
) -> EngineResult<Vec<SummaryRow>> {
    let node_capacities = capacity_calculator::calculate_node_capacities(inputs.node_capacity_intervals)?;
    info!(nodes = node_capacities.len(), "node capacity computed");

    let pod_ctx = PodAggregationContext {
        enabled_keys: inputs.enabled_keys,
        node_labels: inputs.node_labels,
        namespace_labels: inputs.namespace_labels,
        node_capacities: &node_capacities,
        cost_category_rules: inputs.cost_category_rules,
    };

    let pod_summary_rows = if perf.use_streaming {
        let exec_cfg = ExecutorConfig { parallel: perf.parallel_chunks, max_workers: perf.max_workers };
        let chunk_size = perf.chunk_size.max(1);
        let partials = executor::run_streaming(
            inputs.pod_rows.chunks(chunk_size),
            &pod_ctx,
            &exec_cfg,
            &|| false,
            |chunk: &[PodUsageRow], actx: &PodAggregationContext, _index: usize| {
                Ok(pod_aggregator::aggregate_chunk(chunk, actx)?)
            },
            |outputs| outputs.into_iter().flatten().collect(),
        )?;
        pod_aggregator::finalize_stream(
            partials,
            &node_capacities,
            inputs.cost_category_rules,
            ctx.report_period_id,
            ctx.cluster_id,
            ctx.cluster_alias,
        )
    } else {
        pod_aggregator::aggregate(inputs.pod_rows, &pod_ctx, ctx.report_period_id, ctx.cluster_id, ctx.cluster_alias)?
    };
    debug!(rows = pod_summary_rows.len(), "pod aggregation complete");

    let storage_ctx = StorageAggregationContext {
        enabled_keys: inputs.enabled_keys,
        node_labels: inputs.node_labels,
        namespace_labels: inputs.namespace_labels,
        cost_category_rules: inputs.cost_category_rules,
    };
    let storage_summary_rows = storage_aggregator::aggregate(
        inputs.storage_rows,
        inputs.pod_rows,
        &storage_ctx,
        ctx.report_period_id,
        ctx.cluster_id,
        ctx.cluster_alias,
    )?;
    debug!(rows = storage_summary_rows.len(), "storage aggregation complete");

    let unallocated_rows = unallocated_calculator::calculate_unallocated(
        &pod_summary_rows,
        inputs.node_roles,
        ctx.report_period_id,
        ctx.cluster_id,
        ctx.cluster_alias,
    );
    debug!(rows = unallocated_rows.len(), "unallocated capacity computed");

    let mut output = Vec::with_capacity(pod_summary_rows.len() + storage_summary_rows.len() + unallocated_rows.len());
    output.extend(pod_summary_rows);
    output.extend(storage_summary_rows);
    output.extend(unallocated_rows);
    validate_summary_rows(&output);
    info!(rows = output.len(), "OCP summary complete");
    Ok(output)
}

/// Streams pod aggregation straight into `sink` one chunk at a time, without
/// a cross-chunk regroup. Safe only when the caller's chunk boundaries
/// already align with the grouping key (e.g. one chunk per reporting day) —
/// otherwise the same (namespace, node, day) group can be split across two
/// committed rows. Storage and unallocated rows are not part of this path;
/// `run_ocp_summary` remains the entry point when exact grouping matters
/// more than memory bound.
pub fn run_ocp_summary_incremental<S: SummarySink<SummaryRow>>(
    inputs: &OcpInputs,
    ctx: &RunContext,
    perf: &PerformanceConfig,
    sink: &mut S,
) -> EngineResult<()> {
    let node_capacities = capacity_calculator::calculate_node_capacities(inputs.node_capacity_intervals)?;
    let pod_ctx = PodAggregationContext {
        enabled_keys: inputs.enabled_keys,
        node_labels: inputs.node_labels,
        namespace_labels: inputs.namespace_labels,
        node_capacities: &node_capacities,
        cost_category_rules: inputs.cost_category_rules,
    };
    let chunk_size = perf.chunk_size.max(1);
    executor::run_streaming_incremental(
        inputs.pod_rows.chunks(chunk_size),
        &pod_ctx,
        &|| false,
        |chunk: &[PodUsageRow], actx: &PodAggregationContext, _index: usize| {
            let partials = pod_aggregator::aggregate_chunk(chunk, actx)?;
            Ok(pod_aggregator::finalize_stream(
                partials,
                &node_capacities,
                inputs.cost_category_rules,
                ctx.report_period_id,
                ctx.cluster_id,
                ctx.cluster_alias,
            ))
        },
        sink,
    )
}

fn resolve_markup(cost: &CostConfig, aws: &AwsConfig) -> f64 {
    if aws.markup > 0.0 { aws.markup } else { cost.markup }
}

/// Runs the full OCP-on-AWS attribution: resource-id matching, tag matching,
/// disk-capacity recovery, compute/storage/network cost distribution. Always
/// runs as a single in-memory pass regardless of `performance.parallel_chunks`
/// — attribution normalizes each cloud billing row's cost across every pod
/// that shares it, which requires the whole row set up front; chunking it
/// would silently change which pods a row's cost gets split across.
pub fn run_ocp_aws_attribution(
    ocp_inputs: &OcpInputs,
    aws_inputs: &AwsInputs,
    storage_summary_rows: &[SummaryRow],
    ctx: &RunContext,
    cost_cfg: &CostConfig,
    aws_cfg: &AwsConfig,
) -> EngineResult<Vec<AttributedRow>> {
    let ocp_resource_ids = resource_matcher::extract_ocp_resource_ids(ocp_inputs.pod_rows, ocp_inputs.storage_rows);
    let (resource_matches, match_stats) =
        resource_matcher::match_all(aws_inputs.cloud_rows, &ocp_resource_ids, cost_cfg.low_match_rate_threshold);
    info!(
        matched = match_stats.matched,
        total = match_stats.total,
        match_rate = match_stats.match_rate(),
        "resource-id matching complete"
    );

    let ocp_tag_values =
        tag_matcher::extract_ocp_tag_values(ctx.cluster_id, ctx.cluster_alias, ocp_inputs.pod_rows);
    let tag_matches = tag_matcher::match_by_tags(
        aws_inputs.cloud_rows,
        &resource_matches,
        &ocp_tag_values,
        Some(ocp_inputs.enabled_keys),
    );

    let mut network_refs = Vec::new();
    let mut compute_rows = Vec::new();
    let mut compute_resource_matches = Vec::new();
    let mut compute_tag_matches = Vec::new();
    let mut ebs_rows = Vec::new();
    let mut ebs_resource_matches = Vec::new();
    let mut ebs_tag_matches = Vec::new();
    let mut uncategorized = 0usize;

    for ((row, rm), tm) in aws_inputs.cloud_rows.iter().zip(resource_matches.iter()).zip(tag_matches.iter()) {
        if row.data_transfer_direction.is_some() {
            network_refs.push(row);
        } else if row.product_code == "AmazonEC2" && row.usage_type.contains("EBS:") {
            ebs_rows.push(row.clone());
            ebs_resource_matches.push(rm.clone());
            ebs_tag_matches.push(tm.clone());
        } else if row.product_code == "AmazonEC2" {
            compute_rows.push(row.clone());
            compute_resource_matches.push(rm.clone());
            compute_tag_matches.push(tm.clone());
        } else {
            uncategorized += 1;
        }
    }
    if uncategorized > 0 {
        debug!(uncategorized, "cloud rows outside EC2 compute/EBS/network categories were not attributed");
    }

    let matched_volumes = disk_capacity_solver::extract_matched_volumes(ocp_inputs.storage_rows);
    let disk_capacities = disk_capacity_solver::calculate_disk_capacities(&ebs_rows, &matched_volumes)?;
    let out_of_range = disk_capacity_solver::validate_capacities(&disk_capacities, 1, 100_000);
    if out_of_range > 0 {
        warn!(out_of_range, "some recovered disk capacities fell outside the plausible EBS range");
    }

    let markup = resolve_markup(cost_cfg, aws_cfg);
    let mut effective_cost_cfg = cost_cfg.clone();
    effective_cost_cfg.markup = markup;

    let (compute_attributed, compute_stats) = cost_attributor::attribute_compute_costs(
        ocp_inputs.pod_rows,
        &compute_rows,
        &compute_resource_matches,
        &compute_tag_matches,
        &effective_cost_cfg,
        ctx.provider,
        ctx.report_period_id,
        ctx.cluster_id,
        ctx.cluster_alias,
    )?;
    info!(
        resource_id_joined = compute_stats.resource_id_joined,
        tag_joined = compute_stats.tag_joined,
        rows = compute_attributed.len(),
        "compute cost attribution complete"
    );

    let storage_attributed = cost_attributor::attribute_storage_costs(
        storage_summary_rows,
        &ebs_rows,
        &disk_capacities,
        &ebs_resource_matches,
        &ebs_tag_matches,
        &effective_cost_cfg,
        ctx.report_period_id,
        ctx.cluster_id,
        ctx.cluster_alias,
    )?;
    debug!(rows = storage_attributed.len(), "storage cost attribution complete");

    let network_attributed = network_cost_handler::attribute_network_costs(
        &network_refs,
        ocp_inputs.pod_rows,
        markup,
        ctx.report_period_id,
        ctx.cluster_id,
        ctx.cluster_alias,
    )?;
    debug!(rows = network_attributed.len(), "network cost attribution complete");

    let mut output = Vec::with_capacity(compute_attributed.len() + storage_attributed.len() + network_attributed.len());
    output.extend(compute_attributed);
    output.extend(storage_attributed);
    output.extend(network_attributed);
    validate_summary_rows(&output.iter().map(|r| r.summary.clone()).collect::<Vec<_>>());
    info!(rows = output.len(), "OCP-on-AWS attribution complete");
    Ok(output)
}
