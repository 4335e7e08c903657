use ocp_cost_attribution::config::{AwsConfig, CostConfig, PerformanceConfig};
use ocp_cost_attribution::labels::EnabledKeys;
use ocp_cost_attribution::model::{
    CloudBillingRow, CostFlavors, DataTransferDirection, NodeCapacityIntervalRow, NodeRole, NodeRoleRow, PodUsageRow,
    StorageUsageRow,
};
use ocp_cost_attribution::pipeline::{run_ocp_aws_attribution, run_ocp_summary, AwsInputs, OcpInputs, RunContext};
use ocp_cost_attribution::time_util::RawTimestamp;

fn pod_row(hour: u32, namespace: &str, node: &str, resource_id: &str, pod: &str) -> PodUsageRow {
    PodUsageRow {
        interval_start: RawTimestamp::Text(format!("2024-02-01 {hour:02}:00:00")),
        namespace: namespace.to_string(),
        node: node.to_string(),
        pod: pod.to_string(),
        resource_id: resource_id.to_string(),
        pod_labels_raw: "{}".to_string(),
        usage_cpu_core_seconds: Some(1800.0),
        request_cpu_core_seconds: Some(1800.0),
        limit_cpu_core_seconds: Some(3600.0),
        effective_usage_cpu_core_seconds: None,
        usage_memory_byte_seconds: Some(3600.0 * 2f64.powi(30)),
        request_memory_byte_seconds: Some(3600.0 * 2f64.powi(30)),
        limit_memory_byte_seconds: Some(3600.0 * 2f64.powi(30)),
        effective_usage_memory_byte_seconds: None,
        node_capacity_cpu_core_seconds: Some(4.0 * 3600.0),
        node_capacity_memory_byte_seconds: Some(16.0 * 3600.0 * 2f64.powi(30)),
    }
}

fn capacity_row(hour: u32, node: &str) -> NodeCapacityIntervalRow {
    NodeCapacityIntervalRow {
        interval_start: RawTimestamp::Text(format!("2024-02-01 {hour:02}:00:00")),
        node: node.to_string(),
        cpu_core_seconds: 4.0 * 3600.0,
        memory_byte_seconds: 16.0 * 3600.0 * 2f64.powi(30),
    }
}

fn storage_row(hour: u32, namespace: &str, pod: &str, pv: &str) -> StorageUsageRow {
    StorageUsageRow {
        interval_start: RawTimestamp::Text(format!("2024-02-01 {hour:02}:00:00")),
        namespace: namespace.to_string(),
        pod: pod.to_string(),
        persistentvolumeclaim: "claim-1".to_string(),
        persistentvolume: pv.to_string(),
        storage_class: "gp2".to_string(),
        csi_volume_handle: Some(format!("vol-{pv}")),
        pv_labels_raw: "{}".to_string(),
        pvc_labels_raw: "{}".to_string(),
        persistentvolumeclaim_capacity_bytes: Some(50.0 * 2f64.powi(30)),
        persistentvolumeclaim_capacity_byte_seconds: Some(50.0 * 2f64.powi(30) * 3600.0),
        volume_request_storage_byte_seconds: Some(50.0 * 2f64.powi(30) * 3600.0),
        persistentvolumeclaim_usage_byte_seconds: Some(20.0 * 2f64.powi(30) * 3600.0),
    }
}

/// Two namespaces share a worker node for a full day; the summary table
/// should carry both namespaces' Pod rows plus a Worker-unallocated row that
/// accounts for the remainder of node capacity.
#[test]
fn two_namespace_day_produces_pod_and_unallocated_rows() {
    let mut pods = Vec::new();
    for h in 0..24 {
        pods.push(pod_row(h, "team-a", "worker-0", "i-worker-0", "pod-a"));
        pods.push(pod_row(h, "team-b", "worker-0", "i-worker-0", "pod-b"));
    }
    let capacities: Vec<_> = (0..24).map(|h| capacity_row(h, "worker-0")).collect();
    let roles = vec![NodeRoleRow {
        node: "worker-0".to_string(),
        resource_id: "i-worker-0".to_string(),
        role: NodeRole::Worker,
    }];
    let enabled = EnabledKeys::from_keys(vec![]);
    let inputs = OcpInputs {
        pod_rows: &pods,
        storage_rows: &[],
        node_capacity_intervals: &capacities,
        node_roles: &roles,
        node_labels: &[],
        namespace_labels: &[],
        cost_category_rules: &[],
        enabled_keys: &enabled,
    };
    let ctx = RunContext { report_period_id: 7, cluster_id: "cluster-x", cluster_alias: "staging", provider: "aws" };
    let output = run_ocp_summary(&inputs, &ctx, &PerformanceConfig::default()).unwrap();

    let team_a: Vec<_> = output.iter().filter(|r| r.namespace.as_str() == "team-a").collect();
    let team_b: Vec<_> = output.iter().filter(|r| r.namespace.as_str() == "team-b").collect();
    let unallocated: Vec<_> = output.iter().filter(|r| r.namespace.as_str() == "Worker unallocated").collect();
    assert_eq!(team_a.len(), 1);
    assert_eq!(team_b.len(), 1);
    assert_eq!(unallocated.len(), 1);

    // Each pod used 0.5 CPU-hours/hour of request for 24 hours -> 12 core-hours, on
    // a 4-core node running 24 hours -> 96 core-hours of capacity.
    let used: f64 = team_a[0].pod_request_cpu_core_hours.unwrap() + team_b[0].pod_request_cpu_core_hours.unwrap();
    let remaining = unallocated[0].pod_request_cpu_core_hours.unwrap();
    assert!((used + remaining - 96.0).abs() < 1e-6, "unallocated law: usage + unallocated == capacity");
}

/// A storage volume fully claimed by one PVC and billed through EBS cost
/// should attribute its entire cost to that PVC's namespace, leaving nothing
/// for "Storage unattributed".
#[test]
fn fully_claimed_volume_attributes_entirely_to_its_namespace() {
    let pods = vec![pod_row(0, "team-a", "worker-0", "i-worker-0", "pod-a")];
    let storage = vec![storage_row(0, "team-a", "pod-a", "pv-1")];
    let enabled = EnabledKeys::from_keys(vec![]);
    let ocp_inputs = OcpInputs {
        pod_rows: &pods,
        storage_rows: &storage,
        node_capacity_intervals: &[],
        node_roles: &[],
        node_labels: &[],
        namespace_labels: &[],
        cost_category_rules: &[],
        enabled_keys: &enabled,
    };
    let ctx = RunContext { report_period_id: 1, cluster_id: "cluster-1", cluster_alias: "prod", provider: "aws" };
    let storage_summary =
        run_ocp_summary(&ocp_inputs, &ctx, &PerformanceConfig::default()).unwrap();

    // capacity_gb = cost / (rate / hours_in_month); solve for rate so the
    // solver recovers exactly 50GB from a $20 February (29-day, 696-hour) bill.
    let hours_in_february_2024 = 696.0;
    let hourly_rate = 20.0 * hours_in_february_2024 / 50.0;
    let ebs_rows = vec![CloudBillingRow {
        resource_id: "vol-pv-1".to_string(),
        usage_start: RawTimestamp::Text("2024-02-01 00:00:00".to_string()),
        product_code: "AmazonEC2".to_string(),
        usage_type: "EBS:VolumeUsage.gp2".to_string(),
        costs: CostFlavors { unblended_cost: 20.0, ..Default::default() },
        unblended_rate: hourly_rate,
        usage_amount: 50.0,
        tags_raw: "{}".to_string(),
        data_transfer_direction: None,
    }];
    let aws_inputs = AwsInputs { cloud_rows: &ebs_rows };
    let cost_cfg = CostConfig::default();
    let aws_cfg = AwsConfig::default();
    let attributed =
        run_ocp_aws_attribution(&ocp_inputs, &aws_inputs, &storage_summary, &ctx, &cost_cfg, &aws_cfg).unwrap();

    assert!(attributed.iter().any(|r| r.summary.namespace.as_str() == "team-a"));
    assert!(!attributed.iter().any(|r| r.summary.namespace.as_str() == "Storage unattributed"));
}

/// The AWS resource id on a CUR row is routinely a superstring of the OCP CSI
/// volume handle (an ARN, or a `vol-` prefix tacked onto the handle) rather
/// than an exact match -- the CSI join must suffix-match like the PV join
/// already does, or a fully-claimed volume wrongly falls through to
/// "Storage unattributed".
#[test]
fn csi_handle_matches_as_suffix_of_a_longer_aws_resource_id() {
    let pods = vec![pod_row(0, "team-a", "worker-0", "i-worker-0", "pod-a")];
    let storage = vec![storage_row(0, "team-a", "pod-a", "pv-1")];
    let enabled = EnabledKeys::from_keys(vec![]);
    let ocp_inputs = OcpInputs {
        pod_rows: &pods,
        storage_rows: &storage,
        node_capacity_intervals: &[],
        node_roles: &[],
        node_labels: &[],
        namespace_labels: &[],
        cost_category_rules: &[],
        enabled_keys: &enabled,
    };
    let ctx = RunContext { report_period_id: 1, cluster_id: "cluster-1", cluster_alias: "prod", provider: "aws" };
    let storage_summary =
        run_ocp_summary(&ocp_inputs, &ctx, &PerformanceConfig::default()).unwrap();

    let hours_in_february_2024 = 696.0;
    let hourly_rate = 20.0 * hours_in_february_2024 / 50.0;
    let ebs_rows = vec![CloudBillingRow {
        // A full ARN, strictly longer than the OCP-side CSI handle
        // ("vol-pv-1") it should still match as a suffix.
        resource_id: "arn:aws:ec2:us-east-1:123456789012:volume/vol-pv-1".to_string(),
        usage_start: RawTimestamp::Text("2024-02-01 00:00:00".to_string()),
        product_code: "AmazonEC2".to_string(),
        usage_type: "EBS:VolumeUsage.gp2".to_string(),
        costs: CostFlavors { unblended_cost: 20.0, ..Default::default() },
        unblended_rate: hourly_rate,
        usage_amount: 50.0,
        tags_raw: "{}".to_string(),
        data_transfer_direction: None,
    }];
    let aws_inputs = AwsInputs { cloud_rows: &ebs_rows };
    let cost_cfg = CostConfig::default();
    let aws_cfg = AwsConfig::default();
    let attributed =
        run_ocp_aws_attribution(&ocp_inputs, &aws_inputs, &storage_summary, &ctx, &cost_cfg, &aws_cfg).unwrap();

    assert!(attributed.iter().any(|r| r.summary.namespace.as_str() == "team-a"));
    assert!(!attributed.iter().any(|r| r.summary.namespace.as_str() == "Storage unattributed"));
}

/// Network transfer rows whose resource id cannot be matched to any OCP node
/// contribute nothing — they are silently dropped, never misattributed.
#[test]
fn unmatched_network_rows_do_not_appear_in_output() {
    let pods = vec![pod_row(0, "team-a", "worker-0", "i-worker-0", "pod-a")];
    let enabled = EnabledKeys::from_keys(vec![]);
    let ocp_inputs = OcpInputs {
        pod_rows: &pods,
        storage_rows: &[],
        node_capacity_intervals: &[],
        node_roles: &[],
        node_labels: &[],
        namespace_labels: &[],
        cost_category_rules: &[],
        enabled_keys: &enabled,
    };
    let ctx = RunContext { report_period_id: 1, cluster_id: "cluster-1", cluster_alias: "prod", provider: "aws" };
    let cloud_rows = vec![CloudBillingRow {
        resource_id: "arn:aws:ec2:i-totally-unrelated".to_string(),
        usage_start: RawTimestamp::Text("2024-02-01 00:00:00".to_string()),
        product_code: "AWSDataTransfer".to_string(),
        usage_type: "DataTransfer-Out-Bytes".to_string(),
        costs: CostFlavors { unblended_cost: 5.0, ..Default::default() },
        unblended_rate: 0.0,
        usage_amount: 1.0,
        tags_raw: "{}".to_string(),
        data_transfer_direction: Some(DataTransferDirection::Out),
    }];
    let aws_inputs = AwsInputs { cloud_rows: &cloud_rows };
    let attributed = run_ocp_aws_attribution(
        &ocp_inputs,
        &aws_inputs,
        &[],
        &ctx,
        &CostConfig::default(),
        &AwsConfig::default(),
    )
    .unwrap();
    assert!(attributed.is_empty());
}
