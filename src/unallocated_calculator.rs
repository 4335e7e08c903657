use std::collections::HashMap;

use chrono::NaiveDate;
use tracing::warn;

use crate::labels::{labels_to_json, LabelMap};
use crate::model::{stable_row_id, DataSource, Namespace, NodeRole, NodeRoleRow, SummaryRow, SyntheticNamespace};

/// Node roles collapse to the alphabetically greatest when more than one is
/// reported for the same (node, resource-id) — matches SQL `max()` on the
/// role string.
fn aggregate_node_roles(rows: &[NodeRoleRow]) -> HashMap<(String, String), NodeRole> {
    let mut roles: HashMap<(String, String), NodeRole> = HashMap::new();
    for row in rows {
        let key = (row.node.clone(), row.resource_id.clone());
        roles
            .entry(key)
            .and_modify(|existing| *existing = (*existing).max(row.role))
            .or_insert(row.role);
    }
    roles
}

#[derive(Debug, Clone, Default)]
struct NodeTotals {
    resource_id: String,
    usage_cpu_core_hours: f64,
    request_cpu_core_hours: f64,
    effective_cpu_core_hours: f64,
    usage_memory_gigabyte_hours: f64,
    request_memory_gigabyte_hours: f64,
    effective_memory_gigabyte_hours: f64,
    node_capacity_cpu_core_hours: f64,
    node_capacity_memory_gigabyte_hours: f64,
}

/// Computes `unallocated = node_capacity - sum(pod usage)` per node per day,
/// and books the result to `Platform unallocated` for master/infra nodes or
/// `Worker unallocated` otherwise.
pub fn calculate_unallocated(
    summary_rows: &[SummaryRow],
    node_roles: &[NodeRoleRow],
    report_period_id: i64,
    cluster_id: &str,
    cluster_alias: &str,
) -> Vec<SummaryRow> {
    let roles = aggregate_node_roles(node_roles);

    let mut totals: HashMap<(NaiveDate, String), NodeTotals> = HashMap::new();
    for row in summary_rows {
        if row.namespace.is_synthetic() || row.data_source != DataSource::Pod || row.node.is_empty() {
            continue;
        }
        let key = (row.usage_start, row.node.clone());
        let entry = totals.entry(key).or_default();
        if entry.resource_id.is_empty() {
            entry.resource_id = row.resource_id.clone();
        }
        entry.usage_cpu_core_hours += row.pod_usage_cpu_core_hours.unwrap_or(0.0);
        entry.request_cpu_core_hours += row.pod_request_cpu_core_hours.unwrap_or(0.0);
        entry.effective_cpu_core_hours += row.pod_effective_usage_cpu_core_hours.unwrap_or(0.0);
        entry.usage_memory_gigabyte_hours += row.pod_usage_memory_gigabyte_hours.unwrap_or(0.0);
        entry.request_memory_gigabyte_hours += row.pod_request_memory_gigabyte_hours.unwrap_or(0.0);
        entry.effective_memory_gigabyte_hours += row.pod_effective_usage_memory_gigabyte_hours.unwrap_or(0.0);
        entry.node_capacity_cpu_core_hours =
            entry.node_capacity_cpu_core_hours.max(row.node_capacity_cpu_core_hours.unwrap_or(0.0));
        entry.node_capacity_memory_gigabyte_hours =
            entry.node_capacity_memory_gigabyte_hours.max(row.node_capacity_memory_gigabyte_hours.unwrap_or(0.0));
    }

    let empty_labels = LabelMap::new();
    let mut output = Vec::new();
    for ((date, node), node_total) in totals {
        let Some(&role) = roles.get(&(node.clone(), node_total.resource_id.clone())) else {
            continue;
        };

        let unallocated_cpu = node_total.node_capacity_cpu_core_hours - node_total.usage_cpu_core_hours;
        let unallocated_cpu_request = node_total.node_capacity_cpu_core_hours - node_total.request_cpu_core_hours;
        let unallocated_cpu_effective = node_total.node_capacity_cpu_core_hours - node_total.effective_cpu_core_hours;
        let unallocated_mem = node_total.node_capacity_memory_gigabyte_hours - node_total.usage_memory_gigabyte_hours;
        let unallocated_mem_request =
            node_total.node_capacity_memory_gigabyte_hours - node_total.request_memory_gigabyte_hours;
        let unallocated_mem_effective =
            node_total.node_capacity_memory_gigabyte_hours - node_total.effective_memory_gigabyte_hours;

        if unallocated_cpu < 0.0 || unallocated_mem < 0.0 {
            warn!(node = %node, date = %date, unallocated_cpu, unallocated_mem, "negative unallocated capacity (over-provisioned node)");
        }

        let synthetic = match role {
            NodeRole::Master | NodeRole::Infra => SyntheticNamespace::PlatformUnallocated,
            NodeRole::Worker => SyntheticNamespace::WorkerUnallocated,
        };

        let id = stable_row_id(&["unallocated", &report_period_id.to_string(), &date.to_string(), &node]);
        output.push(SummaryRow {
            id,
            report_period_id,
            cluster_id: cluster_id.to_string(),
            cluster_alias: cluster_alias.to_string(),
            usage_start: date,
            usage_end: date,
            namespace: Namespace::Synthetic(synthetic),
            node: node.clone(),
            resource_id: node_total.resource_id,
            data_source: DataSource::Pod,
            cost_category_id: None,
            pod_usage_cpu_core_hours: Some(unallocated_cpu),
            pod_request_cpu_core_hours: Some(unallocated_cpu_request),
            pod_limit_cpu_core_hours: None,
            pod_effective_usage_cpu_core_hours: Some(unallocated_cpu_effective),
            pod_usage_memory_gigabyte_hours: Some(unallocated_mem),
            pod_request_memory_gigabyte_hours: Some(unallocated_mem_request),
            pod_limit_memory_gigabyte_hours: None,
            pod_effective_usage_memory_gigabyte_hours: Some(unallocated_mem_effective),
            node_capacity_cpu_cores: None,
            node_capacity_cpu_core_hours: Some(node_total.node_capacity_cpu_core_hours),
            node_capacity_memory_gigabytes: None,
            node_capacity_memory_gigabyte_hours: Some(node_total.node_capacity_memory_gigabyte_hours),
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
            pod_labels_json: labels_to_json(&empty_labels),
            volume_labels_json: labels_to_json(&empty_labels),
            all_labels_json: labels_to_json(&empty_labels),
        });
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DataSource;

    fn base_row(node: &str, resource_id: &str, namespace: &str, usage_cpu: f64, cap_cpu: f64) -> SummaryRow {
        SummaryRow {
            id: uuid::Uuid::nil(),
            report_period_id: 1,
            cluster_id: "cluster-1".to_string(),
            cluster_alias: "prod".to_string(),
            usage_start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            usage_end: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            namespace: Namespace::from_raw(namespace),
            node: node.to_string(),
            resource_id: resource_id.to_string(),
            data_source: DataSource::Pod,
            cost_category_id: None,
            pod_usage_cpu_core_hours: Some(usage_cpu),
            pod_request_cpu_core_hours: Some(usage_cpu),
            pod_limit_cpu_core_hours: None,
            pod_effective_usage_cpu_core_hours: Some(usage_cpu),
            pod_usage_memory_gigabyte_hours: Some(0.0),
            pod_request_memory_gigabyte_hours: Some(0.0),
            pod_limit_memory_gigabyte_hours: None,
            pod_effective_usage_memory_gigabyte_hours: Some(0.0),
            node_capacity_cpu_cores: None,
            node_capacity_cpu_core_hours: Some(cap_cpu),
            node_capacity_memory_gigabytes: None,
            node_capacity_memory_gigabyte_hours: Some(0.0),
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
            pod_labels_json: "{}".to_string(),
            volume_labels_json: "{}".to_string(),
            all_labels_json: "{}".to_string(),
        }
    }

    #[test]
    fn master_node_books_to_platform_unallocated_scenario_s6() {
        let rows = vec![base_row("master-0", "i-master", "team-a", 2.0, 24.0), base_row("master-0", "i-master", "team-b", 1.0, 24.0)];
        let roles = vec![NodeRoleRow { node: "master-0".to_string(), resource_id: "i-master".to_string(), role: NodeRole::Master }];
        let output = calculate_unallocated(&rows, &roles, 1, "cluster-1", "prod");
        assert_eq!(output.len(), 1);
        assert_eq!(output[0].namespace.as_str(), "Platform unallocated");
        assert!((output[0].pod_usage_cpu_core_hours.unwrap() - 21.0).abs() < 1e-9);
    }

    #[test]
    fn worker_node_books_to_worker_unallocated() {
        let rows = vec![base_row("worker-1", "i-worker", "team-a", 5.0, 16.0)];
        let roles = vec![NodeRoleRow { node: "worker-1".to_string(), resource_id: "i-worker".to_string(), role: NodeRole::Worker }];
        let output = calculate_unallocated(&rows, &roles, 1, "cluster-1", "prod");
        assert_eq!(output[0].namespace.as_str(), "Worker unallocated");
        assert!((output[0].pod_usage_cpu_core_hours.unwrap() - 11.0).abs() < 1e-9);
    }

    #[test]
    fn node_without_known_role_is_dropped() {
        let rows = vec![base_row("ghost-node", "i-ghost", "team-a", 1.0, 10.0)];
        let output = calculate_unallocated(&rows, &[], 1, "cluster-1", "prod");
        assert!(output.is_empty());
    }

    #[test]
    fn synthetic_namespace_rows_are_excluded_from_totals() {
        let mut synthetic_row = base_row("worker-1", "i-worker", "ignored", 100.0, 16.0);
        synthetic_row.namespace = Namespace::Synthetic(SyntheticNamespace::PlatformUnallocated);
        let real_row = base_row("worker-1", "i-worker", "team-a", 2.0, 16.0);
        let roles = vec![NodeRoleRow { node: "worker-1".to_string(), resource_id: "i-worker".to_string(), role: NodeRole::Worker }];
        let output = calculate_unallocated(&[synthetic_row, real_row], &roles, 1, "cluster-1", "prod");
        assert_eq!(output.len(), 1);
        assert!((output[0].pod_usage_cpu_core_hours.unwrap() - 14.0).abs() < 1e-9);
    }

    #[test]
    fn multiple_roles_for_same_node_collapse_to_greatest() {
        let roles = vec![
            NodeRoleRow { node: "n".to_string(), resource_id: "i".to_string(), role: NodeRole::Infra },
            NodeRoleRow { node: "n".to_string(), resource_id: "i".to_string(), role: NodeRole::Worker },
        ];
        let aggregated = aggregate_node_roles(&roles);
        assert_eq!(aggregated[&("n".to_string(), "i".to_string())], NodeRole::Worker);
    }
}
