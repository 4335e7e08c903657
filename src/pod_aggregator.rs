use std::collections::HashMap;

use chrono::NaiveDate;
use tracing::debug;

use crate::capacity_calculator::NodeDailyCapacity;
use crate::error::SchemaError;
use crate::labels::{
    byte_seconds_to_gigabyte_hours, effective_usage, filter_enabled, labels_to_json, merge_labels, parse_labels,
    seconds_to_hours, EnabledKeys, LabelMap,
};
use crate::model::{
    match_cost_category, stable_row_id, CostCategoryRule, DataSource, NamespaceLabelRow, Namespace, NodeLabelRow,
    PodUsageRow, SummaryRow,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GroupKey {
    usage_start: NaiveDate,
    namespace: String,
    node: String,
    merged_labels_json: String,
}

#[derive(Debug, Clone, Default)]
struct Accumulator {
    resource_id: Option<String>,
    usage_cpu_seconds: f64,
    request_cpu_seconds: f64,
    limit_cpu_seconds: f64,
    effective_cpu_seconds: f64,
    usage_mem_byte_seconds: f64,
    request_mem_byte_seconds: f64,
    limit_mem_byte_seconds: f64,
    effective_mem_byte_seconds: f64,
    node_capacity_cpu_core_seconds_max: f64,
    node_capacity_mem_byte_seconds_max: f64,
}

/// A pod-aggregation output row before the node-capacity join and final
/// formatting; already unit-converted so chunk outputs can be re-grouped by
/// summing (for the hour/GB-hour columns) and maxing (for the capacity
/// columns) across chunk boundaries without re-deriving units.
#[derive(Debug, Clone)]
pub struct PartialPodRow {
    key: GroupKey,
    resource_id: String,
    usage_cpu_core_hours: f64,
    request_cpu_core_hours: f64,
    limit_cpu_core_hours: f64,
    effective_cpu_core_hours: f64,
    usage_memory_gigabyte_hours: f64,
    request_memory_gigabyte_hours: f64,
    limit_memory_gigabyte_hours: f64,
    effective_memory_gigabyte_hours: f64,
    node_capacity_cpu_cores: f64,
    node_capacity_memory_gigabytes: f64,
}

pub struct PodAggregationContext<'a> {
    pub enabled_keys: &'a EnabledKeys,
    pub node_labels: &'a [NodeLabelRow],
    pub namespace_labels: &'a [NamespaceLabelRow],
    pub node_capacities: &'a [NodeDailyCapacity],
    pub cost_category_rules: &'a [CostCategoryRule],
}

fn build_node_label_index(rows: &[NodeLabelRow], enabled: &EnabledKeys) -> HashMap<(NaiveDate, String), LabelMap> {
    let mut index = HashMap::new();
    for row in rows {
        let labels = filter_enabled(&parse_labels(&row.labels_raw), enabled);
        index.insert((row.date, row.node.clone()), labels);
    }
    index
}

fn build_namespace_label_index(
    rows: &[NamespaceLabelRow],
    enabled: &EnabledKeys,
) -> HashMap<(NaiveDate, String), LabelMap> {
    let mut index = HashMap::new();
    for row in rows {
        let labels = filter_enabled(&parse_labels(&row.labels_raw), enabled);
        index.insert((row.date, row.namespace.clone()), labels);
    }
    index
}

/// Per-chunk preparation and group-by. Used both by the in-memory `aggregate`
/// entry point (one call over the whole input) and by the streaming entry
/// point (one call per chunk, followed by `regroup_partials`).
fn prepare_and_group(
    rows: &[PodUsageRow],
    enabled_keys: &EnabledKeys,
    node_label_index: &HashMap<(NaiveDate, String), LabelMap>,
    namespace_label_index: &HashMap<(NaiveDate, String), LabelMap>,
) -> Result<Vec<PartialPodRow>, SchemaError> {
    let mut groups: HashMap<GroupKey, Accumulator> = HashMap::new();

    for row in rows {
        if row.node.is_empty() {
            continue;
        }
        let usage_start = row.interval_start.normalize()?.date();

        let pod_labels = filter_enabled(&parse_labels(&row.pod_labels_raw), enabled_keys);
        let empty = LabelMap::new();
        let node_labels = node_label_index.get(&(usage_start, row.node.clone())).unwrap_or(&empty);
        let namespace_labels = namespace_label_index.get(&(usage_start, row.namespace.clone())).unwrap_or(&empty);
        let merged_labels = merge_labels(&[node_labels, namespace_labels, &pod_labels]);
        let merged_labels_json = labels_to_json(&merged_labels);

        let key = GroupKey {
            usage_start,
            namespace: row.namespace.clone(),
            node: row.node.clone(),
            merged_labels_json,
        };

        let effective_cpu = effective_usage(
            row.effective_usage_cpu_core_seconds,
            row.usage_cpu_core_seconds,
            row.request_cpu_core_seconds,
        )
        .unwrap_or(0.0);
        let effective_mem = effective_usage(
            row.effective_usage_memory_byte_seconds,
            row.usage_memory_byte_seconds,
            row.request_memory_byte_seconds,
        )
        .unwrap_or(0.0);

        let accumulator = groups.entry(key).or_default();
        if accumulator.resource_id.is_none() {
            accumulator.resource_id = Some(row.resource_id.clone());
        }
        accumulator.usage_cpu_seconds += row.usage_cpu_core_seconds.unwrap_or(0.0);
        accumulator.request_cpu_seconds += row.request_cpu_core_seconds.unwrap_or(0.0);
        accumulator.limit_cpu_seconds += row.limit_cpu_core_seconds.unwrap_or(0.0);
        accumulator.effective_cpu_seconds += effective_cpu;
        accumulator.usage_mem_byte_seconds += row.usage_memory_byte_seconds.unwrap_or(0.0);
        accumulator.request_mem_byte_seconds += row.request_memory_byte_seconds.unwrap_or(0.0);
        accumulator.limit_mem_byte_seconds += row.limit_memory_byte_seconds.unwrap_or(0.0);
        accumulator.effective_mem_byte_seconds += effective_mem;
        accumulator.node_capacity_cpu_core_seconds_max =
            accumulator.node_capacity_cpu_core_seconds_max.max(row.node_capacity_cpu_core_seconds.unwrap_or(0.0));
        accumulator.node_capacity_mem_byte_seconds_max =
            accumulator.node_capacity_mem_byte_seconds_max.max(row.node_capacity_memory_byte_seconds.unwrap_or(0.0));
    }

    Ok(groups
        .into_iter()
        .map(|(key, acc)| PartialPodRow {
            key,
            resource_id: acc.resource_id.unwrap_or_default(),
            usage_cpu_core_hours: seconds_to_hours(acc.usage_cpu_seconds),
            request_cpu_core_hours: seconds_to_hours(acc.request_cpu_seconds),
            limit_cpu_core_hours: seconds_to_hours(acc.limit_cpu_seconds),
            effective_cpu_core_hours: seconds_to_hours(acc.effective_cpu_seconds),
            usage_memory_gigabyte_hours: byte_seconds_to_gigabyte_hours(acc.usage_mem_byte_seconds),
            request_memory_gigabyte_hours: byte_seconds_to_gigabyte_hours(acc.request_mem_byte_seconds),
            limit_memory_gigabyte_hours: byte_seconds_to_gigabyte_hours(acc.limit_mem_byte_seconds),
            effective_memory_gigabyte_hours: byte_seconds_to_gigabyte_hours(acc.effective_mem_byte_seconds),
            node_capacity_cpu_cores: seconds_to_hours(acc.node_capacity_cpu_core_seconds_max),
            node_capacity_memory_gigabytes: byte_seconds_to_gigabyte_hours(acc.node_capacity_mem_byte_seconds_max),
        })
        .collect())
}

/// Merges partial rows produced by independent chunks: SUM on the
/// hour/GB-hour metrics (already unit-converted, so summing is correct),
/// MAX on the capacity columns.
pub fn regroup_partials(partials: Vec<PartialPodRow>) -> Vec<PartialPodRow> {
    let mut merged: HashMap<GroupKey, PartialPodRow> = HashMap::new();
    for partial in partials {
        merged
            .entry(partial.key.clone())
            .and_modify(|existing| {
                existing.usage_cpu_core_hours += partial.usage_cpu_core_hours;
                existing.request_cpu_core_hours += partial.request_cpu_core_hours;
                existing.limit_cpu_core_hours += partial.limit_cpu_core_hours;
                existing.effective_cpu_core_hours += partial.effective_cpu_core_hours;
                existing.usage_memory_gigabyte_hours += partial.usage_memory_gigabyte_hours;
                existing.request_memory_gigabyte_hours += partial.request_memory_gigabyte_hours;
                existing.limit_memory_gigabyte_hours += partial.limit_memory_gigabyte_hours;
                existing.effective_memory_gigabyte_hours += partial.effective_memory_gigabyte_hours;
                existing.node_capacity_cpu_cores = existing.node_capacity_cpu_cores.max(partial.node_capacity_cpu_cores);
                existing.node_capacity_memory_gigabytes =
                    existing.node_capacity_memory_gigabytes.max(partial.node_capacity_memory_gigabytes);
            })
            .or_insert(partial);
    }
    merged.into_values().collect()
}

fn finalize(
    partials: Vec<PartialPodRow>,
    node_capacities: &[NodeDailyCapacity],
    cost_category_rules: &[CostCategoryRule],
    report_period_id: i64,
    cluster_id: &str,
    cluster_alias: &str,
) -> Vec<SummaryRow> {
    let capacity_index: HashMap<(NaiveDate, &str), &NodeDailyCapacity> =
        node_capacities.iter().map(|c| ((c.date, c.node.as_str()), c)).collect();

    partials
        .into_iter()
        .map(|partial| {
            let node_key = partial.key.node.clone();
            let cluster_capacity = capacity_index.get(&(partial.key.usage_start, node_key.as_str()));
            let cost_category_id = match_cost_category(&partial.key.namespace, cost_category_rules);
            let id = stable_row_id(&[
                "pod",
                &report_period_id.to_string(),
                &partial.key.usage_start.to_string(),
                &partial.key.namespace,
                &partial.key.node,
                &partial.key.merged_labels_json,
            ]);
            SummaryRow {
                id,
                report_period_id,
                cluster_id: cluster_id.to_string(),
                cluster_alias: cluster_alias.to_string(),
                usage_start: partial.key.usage_start,
                usage_end: partial.key.usage_start,
                namespace: Namespace::from_raw(&partial.key.namespace),
                node: partial.key.node,
                resource_id: partial.resource_id,
                data_source: DataSource::Pod,
                cost_category_id,
                pod_usage_cpu_core_hours: Some(partial.usage_cpu_core_hours),
                pod_request_cpu_core_hours: Some(partial.request_cpu_core_hours),
                pod_limit_cpu_core_hours: Some(partial.limit_cpu_core_hours),
                pod_effective_usage_cpu_core_hours: Some(partial.effective_cpu_core_hours),
                pod_usage_memory_gigabyte_hours: Some(partial.usage_memory_gigabyte_hours),
                pod_request_memory_gigabyte_hours: Some(partial.request_memory_gigabyte_hours),
                pod_limit_memory_gigabyte_hours: Some(partial.limit_memory_gigabyte_hours),
                pod_effective_usage_memory_gigabyte_hours: Some(partial.effective_memory_gigabyte_hours),
                node_capacity_cpu_cores: Some(partial.node_capacity_cpu_cores),
                node_capacity_cpu_core_hours: cluster_capacity.map(|c| c.node_capacity_cpu_core_hours),
                node_capacity_memory_gigabytes: Some(partial.node_capacity_memory_gigabytes),
                node_capacity_memory_gigabyte_hours: cluster_capacity.map(|c| c.node_capacity_memory_gigabyte_hours),
                cluster_capacity_cpu_core_hours: cluster_capacity.map(|c| c.cluster_capacity_cpu_core_hours),
                cluster_capacity_memory_gigabyte_hours: cluster_capacity
                    .map(|c| c.cluster_capacity_memory_gigabyte_hours),
                persistentvolumeclaim: None,
                persistentvolume: None,
                storage_class: None,
                csi_volume_handle: None,
                persistentvolumeclaim_capacity_gigabyte: None,
                persistentvolumeclaim_capacity_gigabyte_months: None,
                volume_request_storage_gigabyte_months: None,
                persistentvolumeclaim_usage_gigabyte_months: None,
                pod_labels_json: partial.key.merged_labels_json.clone(),
                volume_labels_json: "{}".to_string(),
                all_labels_json: partial.key.merged_labels_json,
            }
        })
        .collect()
}

/// In-memory aggregation: the whole input is treated as a single chunk.
pub fn aggregate(
    rows: &[PodUsageRow],
    ctx: &PodAggregationContext,
    report_period_id: i64,
    cluster_id: &str,
    cluster_alias: &str,
) -> Result<Vec<SummaryRow>, SchemaError> {
    let node_index = build_node_label_index(ctx.node_labels, ctx.enabled_keys);
    let namespace_index = build_namespace_label_index(ctx.namespace_labels, ctx.enabled_keys);
    let partials = prepare_and_group(rows, ctx.enabled_keys, &node_index, &namespace_index)?;
    debug!(groups = partials.len(), "pod aggregation produced groups");
    Ok(finalize(partials, ctx.node_capacities, ctx.cost_category_rules, report_period_id, cluster_id, cluster_alias))
}

/// Streaming aggregation: processes one chunk, leaving the final regroup
/// and formatting to the caller once every chunk has produced partials (see
/// `regroup_partials` + the private `finalize`, exposed here as
/// `finalize_stream`).
pub fn aggregate_chunk(
    rows: &[PodUsageRow],
    ctx: &PodAggregationContext,
) -> Result<Vec<PartialPodRow>, SchemaError> {
    let node_index = build_node_label_index(ctx.node_labels, ctx.enabled_keys);
    let namespace_index = build_namespace_label_index(ctx.namespace_labels, ctx.enabled_keys);
    prepare_and_group(rows, ctx.enabled_keys, &node_index, &namespace_index)
}

pub fn finalize_stream(
    partials: Vec<PartialPodRow>,
    node_capacities: &[NodeDailyCapacity],
    cost_category_rules: &[CostCategoryRule],
    report_period_id: i64,
    cluster_id: &str,
    cluster_alias: &str,
) -> Vec<SummaryRow> {
    let regrouped = regroup_partials(partials);
    finalize(regrouped, node_capacities, cost_category_rules, report_period_id, cluster_id, cluster_alias)
}
