use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use tracing::info;

use crate::config::{CostConfig, DistributionMethod};
use crate::labels::LabelMap;
use crate::model::{
    stable_row_id, AttributedRow, CloudBillingRow, CostFlavors, DataSource, Namespace, PodUsageRow, SummaryRow,
    SyntheticNamespace,
};
use crate::resource_matcher::ResourceMatch;
use crate::tag_matcher::{TagMatch, TagMatchKind};

fn floor_to_hour(dt: NaiveDateTime) -> NaiveDateTime {
    dt.with_minute(0).and_then(|d| d.with_second(0)).and_then(|d| d.with_nanosecond(0)).unwrap_or(dt)
}

fn safe_ratio(usage: f64, capacity: f64) -> f64 {
    if capacity <= 0.0 { 0.0 } else { (usage / capacity).clamp(0.0, 1.0) }
}

/// `cpu` (the default), `memory`, or `weighted` (per-provider weighted blend).
/// Unlike the legacy reference pipeline, an unrecognized method is a
/// configuration error caught at construction (`Config::validate`), not a
/// silent runtime fallback — see the distribution-method decision in
/// DESIGN.md.
fn attribution_ratio(cpu_ratio: f64, memory_ratio: f64, cost: &CostConfig, provider: &str) -> f64 {
    match cost.distribution.method {
        DistributionMethod::Cpu => cpu_ratio,
        DistributionMethod::Memory => memory_ratio,
        DistributionMethod::Weighted => {
            let weights = cost.distribution.weights.get(provider).copied().unwrap_or_default();
            weights.cpu_weight * cpu_ratio + weights.memory_weight * memory_ratio
        }
    }
}

struct JoinedCompute<'a> {
    pod: &'a PodUsageRow,
    cloud_index: usize,
}

#[derive(Debug, Default)]
pub struct ComputeJoinStats {
    pub resource_id_joined: usize,
    pub tag_joined: usize,
    /// Tag-matched rows discarded because a resource-id match already
    /// claimed the same (namespace, pod, hour, cloud resource id) key. See
    /// the open question in SPEC_FULL.md §9 about whether this can shadow
    /// legitimate tag-matched attribution.
    pub discarded_duplicate_tag_matches: usize,
}

/// Joins OCP pod rows to matched cloud rows by (resource id, hour) and, for
/// cloud rows that only matched by an `openshift_node` tag, by (node, hour).
/// Synthetic OCP namespaces never participate (there is no workload to
/// attribute cost to). The two join results are deduplicated on
/// (namespace, pod, hour, cloud resource index), preferring the
/// resource-id-sourced entry.
fn join_compute_rows<'a>(
    pod_rows: &'a [PodUsageRow],
    cloud_rows: &[CloudBillingRow],
    resource_matches: &[Option<ResourceMatch>],
    tag_matches: &[Option<TagMatch>],
) -> Result<(Vec<JoinedCompute<'a>>, ComputeJoinStats), crate::error::SchemaError> {
    let mut pods_by_resource_hour: HashMap<(String, NaiveDateTime), Vec<&PodUsageRow>> = HashMap::new();
    let mut pods_by_node_hour: HashMap<(String, NaiveDateTime), Vec<&PodUsageRow>> = HashMap::new();
    for pod in pod_rows {
        if Namespace::from_raw(&pod.namespace).is_synthetic() {
            continue;
        }
        let hour = floor_to_hour(pod.interval_start.normalize()?);
        if !pod.resource_id.is_empty() {
            pods_by_resource_hour.entry((pod.resource_id.clone(), hour)).or_default().push(pod);
        }
        if !pod.node.is_empty() {
            pods_by_node_hour.entry((pod.node.clone(), hour)).or_default().push(pod);
        }
    }

    // key = (namespace, pod, hour, cloud row index)
    let mut by_key: HashMap<(String, String, NaiveDateTime, usize), JoinedCompute> = HashMap::new();
    let mut stats = ComputeJoinStats::default();

    for (i, cloud) in cloud_rows.iter().enumerate() {
        let hour = floor_to_hour(cloud.usage_start.normalize()?);
        if let Some(rm) = &resource_matches[i] {
            if let Some(pods) = pods_by_resource_hour.get(&(rm.matched_resource_id.clone(), hour)) {
                for pod in pods {
                    let key = (pod.namespace.clone(), pod.pod.clone(), hour, i);
                    by_key.insert(key, JoinedCompute { pod, cloud_index: i });
                    stats.resource_id_joined += 1;
                }
            }
        }
    }
    for (i, cloud) in cloud_rows.iter().enumerate() {
        let hour = floor_to_hour(cloud.usage_start.normalize()?);
        if let Some(tm) = &tag_matches[i] {
            if tm.kind != TagMatchKind::Node {
                continue;
            }
            if let Some(pods) = pods_by_node_hour.get(&(tm.matched_value.clone(), hour)) {
                for pod in pods {
                    let key = (pod.namespace.clone(), pod.pod.clone(), hour, i);
                    if by_key.contains_key(&key) {
                        stats.discarded_duplicate_tag_matches += 1;
                        continue;
                    }
                    by_key.insert(key, JoinedCompute { pod, cloud_index: i });
                    stats.tag_joined += 1;
                }
            }
        }
    }

    Ok((by_key.into_values().collect(), stats))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct OutputKey {
    date: NaiveDate,
    namespace: String,
    node: String,
    resource_id: String,
}

/// Computes per-pod attribution ratios (normalized within each cloud billing
/// row so the split sums to exactly that row's cost), distributes the four
/// cost flavors with markup, and aggregates the result to the daily
/// (namespace, node) grain the summary schema uses. Label columns are left
/// empty here — the pipeline (§4.12) merges this cost data back onto the
/// fully-labeled Pod summary rows produced by the pod aggregator.
pub fn attribute_compute_costs(
    pod_rows: &[PodUsageRow],
    cloud_rows: &[CloudBillingRow],
    resource_matches: &[Option<ResourceMatch>],
    tag_matches: &[Option<TagMatch>],
    cost: &CostConfig,
    provider: &str,
    report_period_id: i64,
    cluster_id: &str,
    cluster_alias: &str,
) -> Result<(Vec<AttributedRow>, ComputeJoinStats), crate::error::SchemaError> {
    let (joined, stats) = join_compute_rows(pod_rows, cloud_rows, resource_matches, tag_matches)?;

    // Ratio per joined row, grouped (for normalization) by the cloud row it
    // draws cost from.
    let mut by_cloud_index: HashMap<usize, Vec<usize>> = HashMap::new();
    for (idx, j) in joined.iter().enumerate() {
        by_cloud_index.entry(j.cloud_index).or_default().push(idx);
    }

    let mut raw_ratios = vec![0.0f64; joined.len()];
    for (idx, jc) in joined.iter().enumerate() {
        let cpu_hours_used = crate::labels::seconds_to_hours(jc.pod.usage_cpu_core_seconds.unwrap_or(0.0));
        let mem_gb_used = crate::labels::byte_seconds_to_gigabyte_hours(jc.pod.usage_memory_byte_seconds.unwrap_or(0.0));
        let node_cpu_cores = crate::labels::seconds_to_hours(jc.pod.node_capacity_cpu_core_seconds.unwrap_or(0.0));
        let node_mem_gb =
            crate::labels::byte_seconds_to_gigabyte_hours(jc.pod.node_capacity_memory_byte_seconds.unwrap_or(0.0));
        let cpu_ratio = safe_ratio(cpu_hours_used, node_cpu_cores);
        let memory_ratio = safe_ratio(mem_gb_used, node_mem_gb);
        raw_ratios[idx] = attribution_ratio(cpu_ratio, memory_ratio, cost, provider);
    }

    let mut normalized_ratios = vec![0.0f64; joined.len()];
    for indices in by_cloud_index.values() {
        let sum: f64 = indices.iter().map(|&i| raw_ratios[i]).sum();
        let denom = if sum > 0.0 { sum } else { 1.0 };
        for &i in indices {
            normalized_ratios[i] = raw_ratios[i] / denom;
        }
    }

    let mut totals: HashMap<OutputKey, (CostFlavors, CostFlavors)> = HashMap::new();
    for (idx, jc) in joined.iter().enumerate() {
        let cloud = &cloud_rows[jc.cloud_index];
        let pod_costs = cloud.costs.scale(normalized_ratios[idx]);
        let markup_costs = pod_costs.markup(cost.markup);
        let date = jc.pod.interval_start.normalize()?.date();
        let key = OutputKey {
            date,
            namespace: jc.pod.namespace.clone(),
            node: jc.pod.node.clone(),
            resource_id: jc.pod.resource_id.clone(),
        };
        let entry = totals.entry(key).or_insert((CostFlavors::default(), CostFlavors::default()));
        entry.0 = entry.0.add(&pod_costs);
        entry.1 = entry.1.add(&markup_costs);
    }

    info!(
        resource_id_joined = stats.resource_id_joined,
        tag_joined = stats.tag_joined,
        discarded_duplicate_tag_matches = stats.discarded_duplicate_tag_matches,
        output_rows = totals.len(),
        "compute cost attribution complete"
    );

    let empty_labels = LabelMap::new();
    let output = totals
        .into_iter()
        .map(|(key, (costs, markup_costs))| {
            let id =
                stable_row_id(&["attributed-compute", &report_period_id.to_string(), &key.date.to_string(), &key.namespace, &key.node]);
            AttributedRow {
                summary: SummaryRow {
                    id,
                    report_period_id,
                    cluster_id: cluster_id.to_string(),
                    cluster_alias: cluster_alias.to_string(),
                    usage_start: key.date,
                    usage_end: key.date,
                    namespace: Namespace::from_raw(&key.namespace),
                    node: key.node,
                    resource_id: key.resource_id,
                    data_source: DataSource::Pod,
                    cost_category_id: None,
                    pod_usage_cpu_core_hours: None,
                    pod_request_cpu_core_hours: None,
                    pod_limit_cpu_core_hours: None,
                    pod_effective_usage_cpu_core_hours: None,
                    pod_usage_memory_gigabyte_hours: None,
                    pod_request_memory_gigabyte_hours: None,
                    pod_limit_memory_gigabyte_hours: None,
                    pod_effective_usage_memory_gigabyte_hours: None,
                    node_capacity_cpu_cores: None,
                    node_capacity_cpu_core_hours: None,
                    node_capacity_memory_gigabytes: None,
                    node_capacity_memory_gigabyte_hours: None,
                    cluster_capacity_cpu_core_hours: None,
                    cluster_capacity_memory_gigabyte_hours: None,
                    persistentvolumeclaim: None,
                    persistentvolume: None,
                    storage_class: None,
                    csi_volume_handle: None,
                    persistentvolumeclaim_capacity_gigabyte: None,
                    persistentvolumeclaim_capacity_gigabyte_months: None,
                    volume_request_storage_gigabyte_months: None,
                    persistentvolumeclaim_usage_gigabyte_months: None,
                    pod_labels_json: crate::labels::labels_to_json(&empty_labels),
                    volume_labels_json: crate::labels::labels_to_json(&empty_labels),
                    all_labels_json: crate::labels::labels_to_json(&empty_labels),
                },
                account_id: String::new(),
                region: String::new(),
                availability_zone: String::new(),
                instance_type: String::new(),
                data_transfer_direction: None,
                currency: "USD".to_string(),
                costs,
                markup_costs,
                tags_json: "{}".to_string(),
                aws_cost_category_json: "{}".to_string(),
            }
        })
        .collect();
    Ok((output, stats))
}

/// Storage-cost attribution: CSI-proportional, tag-matched-full, and
/// untagged/residual. `ebs_rows` should already be filtered to EBS cost
/// rows (`lineitem_productcode == "AmazonEC2"` and a `usage_type` containing
/// `"EBS:"`); `storage_rows` are the Storage-family summary rows produced by
/// the storage aggregator.
pub fn attribute_storage_costs(
    storage_rows: &[SummaryRow],
    ebs_rows: &[CloudBillingRow],
    disk_capacities: &[crate::disk_capacity_solver::DiskCapacity],
    resource_matches: &[Option<ResourceMatch>],
    tag_matches: &[Option<TagMatch>],
    cost: &CostConfig,
    report_period_id: i64,
    cluster_id: &str,
    cluster_alias: &str,
) -> Result<Vec<AttributedRow>, crate::error::SchemaError> {
    // Sum EBS cost by (resource_id, date) -- independent of the disk
    // solver's MAX-based aggregation, which exists only to recover capacity.
    let mut ebs_cost_by_disk: HashMap<(String, NaiveDate), CostFlavors> = HashMap::new();
    for row in ebs_rows {
        let date = row.usage_start.normalize()?.date();
        let entry = ebs_cost_by_disk.entry((row.resource_id.clone(), date)).or_default();
        *entry = entry.add(&row.costs);
    }

    let capacity_by_disk: HashMap<(String, NaiveDate), i64> =
        disk_capacities.iter().map(|c| ((c.resource_id.clone(), c.usage_date), c.capacity_gigabytes)).collect();

    let mut storage_by_date: HashMap<NaiveDate, Vec<&SummaryRow>> = HashMap::new();
    for row in storage_rows {
        storage_by_date.entry(row.usage_start).or_default().push(row);
    }

    let empty_labels = LabelMap::new();
    let mut output = Vec::new();
    let mut sum_pvc_capacity_by_disk: HashMap<(String, NaiveDate), f64> = HashMap::new();
    let mut clusters_by_disk: HashMap<(String, NaiveDate), std::collections::HashSet<String>> = HashMap::new();

    for ((resource_id, date), disk_costs) in &ebs_cost_by_disk {
        let Some(&capacity_gb) = capacity_by_disk.get(&(resource_id.clone(), *date)) else {
            continue;
        };
        if capacity_gb <= 0 {
            continue;
        }
        for storage_row in storage_by_date.get(date).into_iter().flatten().copied() {
            let on_this_disk = storage_row
                .csi_volume_handle
                .as_deref()
                .map(|h| resource_id.ends_with(h))
                .unwrap_or(false)
                || storage_row.persistentvolume.as_deref().map(|pv| resource_id.ends_with(pv)).unwrap_or(false);
            if !on_this_disk {
                continue;
            }
            let pvc_capacity_gb = storage_row.persistentvolumeclaim_capacity_gigabyte.unwrap_or(0.0);
            let ratio = pvc_capacity_gb / capacity_gb as f64;
            let costs = disk_costs.scale(ratio);
            let markup_costs = costs.markup(cost.markup);

            *sum_pvc_capacity_by_disk.entry((resource_id.clone(), *date)).or_insert(0.0) += pvc_capacity_gb;
            clusters_by_disk.entry((resource_id.clone(), *date)).or_default().insert(cluster_id.to_string());

            let id = stable_row_id(&[
                "attributed-storage-csi",
                &report_period_id.to_string(),
                &date.to_string(),
                resource_id,
                &storage_row.namespace.as_str().to_string(),
            ]);
            output.push(AttributedRow {
                summary: SummaryRow { id, ..storage_row.clone() },
                account_id: String::new(),
                region: String::new(),
                availability_zone: String::new(),
                instance_type: String::new(),
                data_transfer_direction: None,
                currency: "USD".to_string(),
                costs,
                markup_costs,
                tags_json: "{}".to_string(),
                aws_cost_category_json: "{}".to_string(),
            });
        }
    }

    // Tag-matched-full path: EBS rows tag-matched to a namespace, not
    // CSI-matched at all (no entry in capacity_by_disk).
    let mut namespace_tag_totals: HashMap<(String, NaiveDate), CostFlavors> = HashMap::new();
    let mut cluster_only_totals: HashMap<NaiveDate, CostFlavors> = HashMap::new();
    for (i, row) in ebs_rows.iter().enumerate() {
        let date = row.usage_start.normalize()?.date();
        if capacity_by_disk.contains_key(&(row.resource_id.clone(), date)) {
            continue; // CSI-matched, already handled above.
        }
        if resource_matches[i].is_some() {
            continue;
        }
        match &tag_matches[i] {
            Some(tm) if tm.kind == TagMatchKind::Namespace => {
                let entry = namespace_tag_totals.entry((tm.matched_value.clone(), date)).or_default();
                *entry = entry.add(&row.costs);
            }
            Some(tm) if tm.kind == TagMatchKind::Cluster => {
                let entry = cluster_only_totals.entry(date).or_default();
                *entry = entry.add(&row.costs);
            }
            _ => {}
        }
    }
    for ((namespace, date), costs) in namespace_tag_totals {
        let markup_costs = costs.markup(cost.markup);
        let id = stable_row_id(&["attributed-storage-tag", &report_period_id.to_string(), &date.to_string(), &namespace]);
        output.push(tag_matched_storage_row(
            id,
            report_period_id,
            cluster_id,
            cluster_alias,
            date,
            Namespace::from_raw(&namespace),
            costs,
            markup_costs,
            &empty_labels,
        ));
    }
    for (date, costs) in cluster_only_totals {
        let markup_costs = costs.markup(cost.markup);
        let id = stable_row_id(&["attributed-storage-cluster-only", &report_period_id.to_string(), &date.to_string()]);
        output.push(tag_matched_storage_row(
            id,
            report_period_id,
            cluster_id,
            cluster_alias,
            date,
            Namespace::Synthetic(SyntheticNamespace::StorageUnattributed),
            costs,
            markup_costs,
            &empty_labels,
        ));
    }

    // Residual: for every CSI-attributed disk, whatever capacity wasn't
    // claimed by a PVC is booked to "Storage unattributed", split equally
    // across the clusters observed sharing that disk.
    for ((resource_id, date), disk_costs) in &ebs_cost_by_disk {
        let Some(&capacity_gb) = capacity_by_disk.get(&(resource_id.clone(), *date)) else {
            continue;
        };
        if capacity_gb <= 0 {
            continue;
        }
        let claimed = sum_pvc_capacity_by_disk.get(&(resource_id.clone(), *date)).copied().unwrap_or(0.0);
        let unattributed_ratio = (1.0 - claimed / capacity_gb as f64).max(0.0);
        if unattributed_ratio <= 0.001 {
            continue;
        }
        let num_clusters =
            clusters_by_disk.get(&(resource_id.clone(), *date)).map(|s| s.len()).unwrap_or(1).max(1) as f64;
        let per_cluster_costs = disk_costs.scale(unattributed_ratio / num_clusters);
        let markup_costs = per_cluster_costs.markup(cost.markup);
        let id = stable_row_id(&["attributed-storage-residual", &report_period_id.to_string(), &date.to_string(), resource_id]);
        output.push(tag_matched_storage_row(
            id,
            report_period_id,
            cluster_id,
            cluster_alias,
            *date,
            Namespace::Synthetic(SyntheticNamespace::StorageUnattributed),
            per_cluster_costs,
            markup_costs,
            &empty_labels,
        ));
    }

    Ok(output)
}

#[allow(clippy::too_many_arguments)]
fn tag_matched_storage_row(
    id: uuid::Uuid,
    report_period_id: i64,
    cluster_id: &str,
    cluster_alias: &str,
    date: NaiveDate,
    namespace: Namespace,
    costs: CostFlavors,
    markup_costs: CostFlavors,
    empty_labels: &LabelMap,
) -> AttributedRow {
    AttributedRow {
        summary: SummaryRow {
            id,
            report_period_id,
            cluster_id: cluster_id.to_string(),
            cluster_alias: cluster_alias.to_string(),
            usage_start: date,
            usage_end: date,
            namespace,
            node: String::new(),
            resource_id: String::new(),
            data_source: DataSource::Storage,
            cost_category_id: None,
            pod_usage_cpu_core_hours: None,
            pod_request_cpu_core_hours: None,
            pod_limit_cpu_core_hours: None,
            pod_effective_usage_cpu_core_hours: None,
            pod_usage_memory_gigabyte_hours: None,
            pod_request_memory_gigabyte_hours: None,
            pod_limit_memory_gigabyte_hours: None,
            pod_effective_usage_memory_gigabyte_hours: None,
            node_capacity_cpu_cores: None,
            node_capacity_cpu_core_hours: None,
            node_capacity_memory_gigabytes: None,
            node_capacity_memory_gigabyte_hours: None,
            cluster_capacity_cpu_core_hours: None,
            cluster_capacity_memory_gigabyte_hours: None,
            persistentvolumeclaim: None,
            persistentvolume: None,
            storage_class: None,
            csi_volume_handle: None,
            persistentvolumeclaim_capacity_gigabyte: None,
            persistentvolumeclaim_capacity_gigabyte_months: None,
            volume_request_storage_gigabyte_months: None,
            persistentvolumeclaim_usage_gigabyte_months: None,
            pod_labels_json: crate::labels::labels_to_json(empty_labels),
            volume_labels_json: crate::labels::labels_to_json(empty_labels),
            all_labels_json: crate::labels::labels_to_json(empty_labels),
        },
        account_id: String::new(),
        region: String::new(),
        availability_zone: String::new(),
        instance_type: String::new(),
        data_transfer_direction: None,
        currency: "USD".to_string(),
        costs,
        markup_costs,
        tags_json: "{}".to_string(),
        aws_cost_category_json: "{}".to_string(),
    }
}
