use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};
use tracing::info;

use crate::labels::{filter_enabled, labels_to_json, merge_labels, parse_labels, EnabledKeys, LabelMap};
use crate::model::{
    match_cost_category, stable_row_id, CostCategoryRule, DataSource, NamespaceLabelRow, Namespace, NodeLabelRow,
    PodUsageRow, StorageUsageRow, SummaryRow,
};
use crate::time_util::days_in_month;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GroupKey {
    usage_start: NaiveDate,
    namespace: String,
    persistentvolumeclaim: String,
    persistentvolume: String,
    storage_class: String,
    node: String,
    resource_id: String,
}

#[derive(Debug, Clone, Default)]
struct Accumulator {
    volume_labels: LabelMap,
    capacity_bytes_max: f64,
    csi_volume_handle: Option<String>,
    request_byte_seconds_sum: f64,
    usage_byte_seconds_sum: f64,
    capacity_byte_seconds_max: f64,
}

pub struct StorageAggregationContext<'a> {
    pub enabled_keys: &'a EnabledKeys,
    pub node_labels: &'a [NodeLabelRow],
    pub namespace_labels: &'a [NamespaceLabelRow],
    pub cost_category_rules: &'a [CostCategoryRule],
}

/// Left-joins storage rows to pod rows on (date, namespace, pod) to recover
/// node and resource id. Multiple pod rows for the same key are expected to
/// agree on node/resource-id in practice (a pod runs on one node); if they
/// don't, the last one observed wins.
fn build_pod_join_index(pod_rows: &[PodUsageRow]) -> Result<HashMap<(NaiveDate, String, String), (String, String)>, crate::error::SchemaError> {
    let mut index = HashMap::new();
    for row in pod_rows {
        let date = row.interval_start.normalize()?.date();
        index.insert((date, row.namespace.clone(), row.pod.clone()), (row.node.clone(), row.resource_id.clone()));
    }
    Ok(index)
}

pub fn aggregate(
    rows: &[StorageUsageRow],
    pod_rows: &[PodUsageRow],
    ctx: &StorageAggregationContext,
    report_period_id: i64,
    cluster_id: &str,
    cluster_alias: &str,
) -> Result<Vec<SummaryRow>, crate::error::SchemaError> {
    let pod_index = build_pod_join_index(pod_rows)?;
    let node_label_index = build_label_index(ctx.node_labels, ctx.enabled_keys, |r| (r.date, r.node.clone()));
    let namespace_label_index =
        build_label_index(ctx.namespace_labels, ctx.enabled_keys, |r| (r.date, r.namespace.clone()));

    // Pass 1: join to pod rows and record, per (date, PV), the set of
    // distinct nodes observed — needed to divide shared-volume usage/request.
    struct Prepared {
        date: NaiveDate,
        namespace: String,
        pvc: String,
        pv: String,
        storage_class: String,
        node: String,
        resource_id: String,
        volume_labels: LabelMap,
        capacity_bytes: f64,
        capacity_byte_seconds: f64,
        request_byte_seconds: f64,
        usage_byte_seconds: f64,
        csi_volume_handle: Option<String>,
    }

    let mut prepared = Vec::with_capacity(rows.len());
    let mut matched = 0usize;
    for row in rows {
        let date = row.interval_start.normalize()?.date();
        let (node, resource_id) = pod_index
            .get(&(date, row.namespace.clone(), row.pod.clone()))
            .cloned()
            .unwrap_or_default();
        if !node.is_empty() {
            matched += 1;
        }

        let pv_labels = parse_labels(&row.pv_labels_raw);
        let pvc_labels = parse_labels(&row.pvc_labels_raw);
        let volume_labels = filter_enabled(&merge_labels(&[&pv_labels, &pvc_labels]), ctx.enabled_keys);

        prepared.push(Prepared {
            date,
            namespace: row.namespace.clone(),
            pvc: row.persistentvolumeclaim.clone(),
            pv: row.persistentvolume.clone(),
            storage_class: row.storage_class.clone(),
            node,
            resource_id,
            volume_labels,
            capacity_bytes: row.persistentvolumeclaim_capacity_bytes.unwrap_or(0.0),
            capacity_byte_seconds: row.persistentvolumeclaim_capacity_byte_seconds.unwrap_or(0.0),
            request_byte_seconds: row.volume_request_storage_byte_seconds.unwrap_or(0.0),
            usage_byte_seconds: row.persistentvolumeclaim_usage_byte_seconds.unwrap_or(0.0),
            csi_volume_handle: row.csi_volume_handle.clone(),
        });
    }
    if !rows.is_empty() {
        info!(matched, total = rows.len(), "storage rows matched to a pod (node/resource-id recovered)");
    }

    let mut node_counts: HashMap<(NaiveDate, String), std::collections::HashSet<String>> = HashMap::new();
    for p in &prepared {
        if !p.node.is_empty() {
            node_counts.entry((p.date, p.pv.clone())).or_default().insert(p.node.clone());
        }
    }

    // Pass 2: group with shared-volume division applied to request/usage
    // byte-seconds only (capacity byte-seconds are not divided).
    let mut groups: HashMap<GroupKey, Accumulator> = HashMap::new();
    for p in prepared {
        let node_count = node_counts.get(&(p.date, p.pv.clone())).map(|s| s.len()).unwrap_or(1).max(1) as f64;
        let key = GroupKey {
            usage_start: p.date,
            namespace: p.namespace,
            persistentvolumeclaim: p.pvc,
            persistentvolume: p.pv,
            storage_class: p.storage_class,
            node: p.node,
            resource_id: p.resource_id,
        };
        let accumulator = groups.entry(key).or_insert_with(|| Accumulator {
            volume_labels: p.volume_labels.clone(),
            ..Default::default()
        });
        accumulator.capacity_bytes_max = accumulator.capacity_bytes_max.max(p.capacity_bytes);
        accumulator.capacity_byte_seconds_max = accumulator.capacity_byte_seconds_max.max(p.capacity_byte_seconds);
        accumulator.request_byte_seconds_sum += p.request_byte_seconds / node_count;
        accumulator.usage_byte_seconds_sum += p.usage_byte_seconds / node_count;
        if accumulator.csi_volume_handle.is_none() {
            accumulator.csi_volume_handle = p.csi_volume_handle;
        }
    }

    let mut output = Vec::with_capacity(groups.len());
    for (key, acc) in groups {
        let days = days_in_month(key.usage_start.year(), key.usage_start.month());

        let empty = LabelMap::new();
        let node_labels = node_label_index.get(&(key.usage_start, key.node.clone())).unwrap_or(&empty);
        let namespace_labels = namespace_label_index.get(&(key.usage_start, key.namespace.clone())).unwrap_or(&empty);
        let pod_labels_field = merge_labels(&[node_labels, namespace_labels, &acc.volume_labels]);
        let all_labels = merge_labels(&[&pod_labels_field, &acc.volume_labels]);

        let cost_category_id = match_cost_category(&key.namespace, ctx.cost_category_rules);
        let id = stable_row_id(&[
            "storage",
            &report_period_id.to_string(),
            &key.usage_start.to_string(),
            &key.namespace,
            &key.persistentvolumeclaim,
            &key.persistentvolume,
        ]);

        output.push(SummaryRow {
            id,
            report_period_id,
            cluster_id: cluster_id.to_string(),
            cluster_alias: cluster_alias.to_string(),
            usage_start: key.usage_start,
            usage_end: key.usage_start,
            namespace: Namespace::from_raw(&key.namespace),
            node: key.node,
            resource_id: key.resource_id,
            data_source: DataSource::Storage,
            cost_category_id,
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
            persistentvolumeclaim: Some(key.persistentvolumeclaim),
            persistentvolume: Some(key.persistentvolume),
            storage_class: Some(key.storage_class),
            csi_volume_handle: acc.csi_volume_handle,
            persistentvolumeclaim_capacity_gigabyte: Some(acc.capacity_bytes_max * 2f64.powi(-30)),
            persistentvolumeclaim_capacity_gigabyte_months: Some(crate::labels::byte_seconds_to_gigabyte_months(
                acc.capacity_byte_seconds_max,
                days,
            )),
            volume_request_storage_gigabyte_months: Some(crate::labels::byte_seconds_to_gigabyte_months(
                acc.request_byte_seconds_sum,
                days,
            )),
            persistentvolumeclaim_usage_gigabyte_months: Some(crate::labels::byte_seconds_to_gigabyte_months(
                acc.usage_byte_seconds_sum,
                days,
            )),
            pod_labels_json: labels_to_json(&pod_labels_field),
            volume_labels_json: labels_to_json(&acc.volume_labels),
            all_labels_json: labels_to_json(&all_labels),
        });
    }
    Ok(output)
}

fn build_label_index<T, K>(rows: &[T], enabled: &EnabledKeys, key_fn: impl Fn(&T) -> K) -> HashMap<K, LabelMap>
where
    K: std::hash::Hash + Eq,
    T: HasLabelsRaw,
{
    rows.iter()
        .map(|row| (key_fn(row), filter_enabled(&parse_labels(raw_labels(row)), enabled)))
        .collect()
}

// Small shim so `build_label_index` can be generic over `NodeLabelRow` and
// `NamespaceLabelRow`, which don't share a trait in this crate.
trait HasLabelsRaw {
    fn labels_raw(&self) -> &str;
}
impl HasLabelsRaw for NodeLabelRow {
    fn labels_raw(&self) -> &str {
        &self.labels_raw
    }
}
impl HasLabelsRaw for NamespaceLabelRow {
    fn labels_raw(&self) -> &str {
        &self.labels_raw
    }
}
fn raw_labels<T: HasLabelsRaw>(row: &T) -> &str {
    row.labels_raw()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_util::RawTimestamp;

    fn pod_row(pod: &str, node: &str, resource_id: &str) -> PodUsageRow {
        PodUsageRow {
            interval_start: RawTimestamp::Text("2024-01-01 00:00:00".to_string()),
            namespace: "team-a".to_string(),
            node: node.to_string(),
            pod: pod.to_string(),
            resource_id: resource_id.to_string(),
            pod_labels_raw: "{}".to_string(),
            usage_cpu_core_seconds: None,
            request_cpu_core_seconds: None,
            limit_cpu_core_seconds: None,
            effective_usage_cpu_core_seconds: None,
            usage_memory_byte_seconds: None,
            request_memory_byte_seconds: None,
            limit_memory_byte_seconds: None,
            effective_usage_memory_byte_seconds: None,
            node_capacity_cpu_core_seconds: None,
            node_capacity_memory_byte_seconds: None,
        }
    }

    fn storage_row(pod: &str, pv: &str, byte_seconds: f64) -> StorageUsageRow {
        StorageUsageRow {
            interval_start: RawTimestamp::Text("2024-01-01 00:00:00".to_string()),
            namespace: "team-a".to_string(),
            pod: pod.to_string(),
            persistentvolumeclaim: format!("{pod}-pvc"),
            persistentvolume: pv.to_string(),
            storage_class: "gp3".to_string(),
            csi_volume_handle: None,
            pv_labels_raw: "{}".to_string(),
            pvc_labels_raw: "{}".to_string(),
            persistentvolumeclaim_capacity_bytes: Some(10.0 * 2f64.powi(30)),
            persistentvolumeclaim_capacity_byte_seconds: Some(0.0),
            volume_request_storage_byte_seconds: Some(byte_seconds),
            persistentvolumeclaim_usage_byte_seconds: Some(0.0),
        }
    }

    #[test]
    fn shared_pv_splits_evenly_across_three_nodes_scenario_s2() {
        let pods = vec![
            pod_row("pod-a", "node-a", "i-a"),
            pod_row("pod-b", "node-b", "i-b"),
            pod_row("pod-c", "node-c", "i-c"),
        ];
        let storage = vec![
            storage_row("pod-a", "shared-pv", 3000.0),
            storage_row("pod-b", "shared-pv", 3000.0),
            storage_row("pod-c", "shared-pv", 3000.0),
        ];
        let enabled = EnabledKeys::from_keys(vec![]);
        let ctx = StorageAggregationContext {
            enabled_keys: &enabled,
            node_labels: &[],
            namespace_labels: &[],
            cost_category_rules: &[],
        };
        let output = aggregate(&storage, &pods, &ctx, 1, "cluster-1", "prod").unwrap();
        assert_eq!(output.len(), 3);
        let days = days_in_month(2024, 1) as f64;
        let expected_gb_months = (1000.0) / (86_400.0 * days * 2f64.powi(30));
        for row in &output {
            assert!(
                (row.volume_request_storage_gigabyte_months.unwrap() - expected_gb_months).abs() < 1e-12
            );
        }
    }

    #[test]
    fn unmatched_storage_row_emits_empty_node() {
        let storage = vec![storage_row("ghost-pod", "pv-1", 100.0)];
        let enabled = EnabledKeys::from_keys(vec![]);
        let ctx = StorageAggregationContext {
            enabled_keys: &enabled,
            node_labels: &[],
            namespace_labels: &[],
            cost_category_rules: &[],
        };
        let output = aggregate(&storage, &[], &ctx, 1, "cluster-1", "prod").unwrap();
        assert_eq!(output.len(), 1);
        assert_eq!(output[0].node, "");
        assert_eq!(output[0].resource_id, "");
    }

    #[test]
    fn pvc_label_wins_over_pv_label() {
        let mut storage = storage_row("pod-a", "pv-1", 100.0);
        storage.pv_labels_raw = r#"{"team":"pv-team"}"#.to_string();
        storage.pvc_labels_raw = r#"{"team":"pvc-team"}"#.to_string();
        let pods = vec![pod_row("pod-a", "node-a", "i-a")];
        let enabled = EnabledKeys::from_keys(vec!["team".to_string()]);
        let ctx = StorageAggregationContext {
            enabled_keys: &enabled,
            node_labels: &[],
            namespace_labels: &[],
            cost_category_rules: &[],
        };
        let output = aggregate(&[storage], &pods, &ctx, 1, "cluster-1", "prod").unwrap();
        assert!(output[0].volume_labels_json.contains("pvc-team"));
    }
}
