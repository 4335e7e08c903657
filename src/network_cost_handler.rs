use std::collections::{HashMap, HashSet};

use chrono::{NaiveDate, NaiveDateTime};
use tracing::warn;

use crate::labels::LabelMap;
use crate::model::{
    stable_row_id, CloudBillingRow, CostFlavors, DataSource, DataTransferDirection, Namespace, PodUsageRow, SummaryRow,
    SyntheticNamespace,
};

/// Splits cloud rows into (network, non-network) by whether a data-transfer
/// direction is present.
pub fn filter_network_costs(rows: &[CloudBillingRow]) -> (Vec<&CloudBillingRow>, Vec<&CloudBillingRow>) {
    rows.iter().partition(|row| row.data_transfer_direction.is_some())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GroupKey {
    node: String,
    direction: DataTransferDirection,
}

#[derive(Debug, Clone, Default)]
struct Accumulator {
    costs: CostFlavors,
    usage_start_min: Option<NaiveDateTime>,
    usage_end_max: Option<NaiveDateTime>,
}

/// Attributes network-transfer cloud rows to OCP nodes via suffix match on
/// resource id, grouping the result under the synthetic `Network
/// unattributed` namespace. The OCP resource-id set is indexed once up
/// front so the per-row suffix-match loop is O(1) average instead of
/// O(nodes) per row; the matching outcome is unchanged from a naive
/// per-row nested loop.
pub fn attribute_network_costs(
    network_rows: &[&CloudBillingRow],
    pod_rows: &[PodUsageRow],
    markup_fraction: f64,
    report_period_id: i64,
    cluster_id: &str,
    cluster_alias: &str,
) -> Result<Vec<crate::model::AttributedRow>, crate::error::SchemaError> {
    let node_resource_ids: HashSet<&str> =
        pod_rows.iter().map(|r| r.resource_id.as_str()).filter(|s| !s.is_empty()).collect();
    let resource_to_node: HashMap<&str, &str> = pod_rows
        .iter()
        .filter(|r| !r.resource_id.is_empty())
        .map(|r| (r.resource_id.as_str(), r.node.as_str()))
        .collect();

    let mut groups: HashMap<GroupKey, Accumulator> = HashMap::new();
    let mut unmatched = 0usize;

    for row in network_rows {
        let direction = row.data_transfer_direction.expect("filtered to rows with a direction");
        let node = match node_resource_ids
            .iter()
            .find(|ocp_id| row.resource_id.ends_with(*ocp_id))
            .and_then(|ocp_id| resource_to_node.get(ocp_id))
        {
            Some(node) => *node,
            None => {
                unmatched += 1;
                continue;
            }
        };

        let ts = row.usage_start.normalize()?;
        let key = GroupKey { node: node.to_string(), direction };
        let accumulator = groups.entry(key).or_default();
        accumulator.costs = accumulator.costs.add(&row.costs);
        accumulator.usage_start_min = Some(accumulator.usage_start_min.map_or(ts, |m| m.min(ts)));
        accumulator.usage_end_max = Some(accumulator.usage_end_max.map_or(ts, |m| m.max(ts)));
    }

    if unmatched > 0 {
        warn!(unmatched, "network cost rows could not be matched to an OCP node and were dropped");
    }

    let empty_labels = LabelMap::new();
    let mut output = Vec::with_capacity(groups.len());
    for (key, acc) in groups {
        let usage_start = acc.usage_start_min.map(|ts| ts.date()).unwrap_or_else(|| NaiveDate::from_ymd_opt(1970, 1, 1).unwrap());
        let usage_end = acc.usage_end_max.map(|ts| ts.date()).unwrap_or(usage_start);
        let markup_costs = acc.costs.markup(markup_fraction);
        let id = stable_row_id(&[
            "network",
            &report_period_id.to_string(),
            &usage_start.to_string(),
            &key.node,
            key.direction.as_str(),
        ]);
        let summary = SummaryRow {
            id,
            report_period_id,
            cluster_id: cluster_id.to_string(),
            cluster_alias: cluster_alias.to_string(),
            usage_start,
            usage_end,
            namespace: Namespace::Synthetic(SyntheticNamespace::NetworkUnattributed),
            node: key.node,
            resource_id: String::new(),
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
        };
        output.push(crate::model::AttributedRow {
            summary,
            account_id: String::new(),
            region: String::new(),
            availability_zone: String::new(),
            instance_type: String::new(),
            data_transfer_direction: Some(key.direction),
            currency: "USD".to_string(),
            costs: acc.costs,
            markup_costs,
            tags_json: "{}".to_string(),
            aws_cost_category_json: "{}".to_string(),
        });
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CostFlavors;
    use crate::time_util::RawTimestamp;

    fn cloud_row(resource_id: &str, direction: DataTransferDirection, cost: f64) -> CloudBillingRow {
        CloudBillingRow {
            resource_id: resource_id.to_string(),
            usage_start: RawTimestamp::Text("2024-01-01 05:00:00".to_string()),
            product_code: "AWSDataTransfer".to_string(),
            usage_type: "DataTransfer-Out-Bytes".to_string(),
            costs: CostFlavors { unblended_cost: cost, ..Default::default() },
            unblended_rate: 0.0,
            usage_amount: 1.0,
            tags_raw: "{}".to_string(),
            data_transfer_direction: Some(direction),
        }
    }

    fn pod_row(node: &str, resource_id: &str) -> PodUsageRow {
        PodUsageRow {
            interval_start: RawTimestamp::Text("2024-01-01 00:00:00".to_string()),
            namespace: "team-a".to_string(),
            node: node.to_string(),
            pod: "pod-1".to_string(),
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

    #[test]
    fn splits_network_from_non_network() {
        let rows = vec![
            cloud_row("i-1", DataTransferDirection::Out, 1.0),
            CloudBillingRow { data_transfer_direction: None, ..cloud_row("i-2", DataTransferDirection::In, 0.0) },
        ];
        let (network, non_network) = filter_network_costs(&rows);
        assert_eq!(network.len(), 1);
        assert_eq!(non_network.len(), 1);
    }

    #[test]
    fn attributes_to_node_by_suffix_match() {
        let rows = vec![cloud_row("arn:aws:ec2:i-0123456789abcdef0", DataTransferDirection::Out, 2.0)];
        let refs: Vec<&CloudBillingRow> = rows.iter().collect();
        let pods = vec![pod_row("worker-0", "i-0123456789abcdef0")];
        let output = attribute_network_costs(&refs, &pods, 0.10, 1, "cluster-1", "prod").unwrap();
        assert_eq!(output.len(), 1);
        assert_eq!(output[0].summary.namespace.as_str(), "Network unattributed");
        assert_eq!(output[0].summary.node, "worker-0");
        assert!((output[0].costs.unblended_cost - 2.0).abs() < 1e-9);
        assert!((output[0].markup_costs.unblended_cost - 0.2).abs() < 1e-9);
    }

    #[test]
    fn unmatched_rows_are_dropped() {
        let rows = vec![cloud_row("unrelated", DataTransferDirection::Out, 2.0)];
        let refs: Vec<&CloudBillingRow> = rows.iter().collect();
        let output = attribute_network_costs(&refs, &[], 0.10, 1, "cluster-1", "prod").unwrap();
        assert!(output.is_empty());
    }
}
