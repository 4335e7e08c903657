use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use crate::time_util::RawTimestamp;

/// Fixed namespace used to derive stable, reproducible row ids (see
/// `stable_row_id`). Re-running the engine over identical input must produce
/// identical ids so an upsert-based writer can de-duplicate safely.
const ROW_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6f, 0x63, 0x70, 0x2d, 0x63, 0x6f, 0x73, 0x74, 0x2d, 0x61, 0x74, 0x74, 0x72, 0x69, 0x62, 0x00,
]);

/// Deterministic row id: a UUIDv5 over a fixed namespace and the row's own
/// natural key. Two runs over identical input produce identical ids.
pub fn stable_row_id(natural_key_parts: &[&str]) -> Uuid {
    let joined = natural_key_parts.join("\u{1f}");
    Uuid::new_v5(&ROW_ID_NAMESPACE, joined.as_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Pod,
    Storage,
}

impl DataSource {
    pub fn as_str(self) -> &'static str {
        match self {
            DataSource::Pod => "Pod",
            DataSource::Storage => "Storage",
        }
    }
}

/// The four reserved namespace strings. Modeled as a tagged variant so the
/// rest of the engine can match on it exhaustively instead of comparing
/// against magic strings; collapses to the canonical string only at
/// serialization (`Namespace::as_str`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SyntheticNamespace {
    PlatformUnallocated,
    WorkerUnallocated,
    NetworkUnattributed,
    StorageUnattributed,
}

impl SyntheticNamespace {
    pub fn as_str(self) -> &'static str {
        match self {
            SyntheticNamespace::PlatformUnallocated => "Platform unallocated",
            SyntheticNamespace::WorkerUnallocated => "Worker unallocated",
            SyntheticNamespace::NetworkUnattributed => "Network unattributed",
            SyntheticNamespace::StorageUnattributed => "Storage unattributed",
        }
    }

    pub fn all() -> [SyntheticNamespace; 4] {
        [
            SyntheticNamespace::PlatformUnallocated,
            SyntheticNamespace::WorkerUnallocated,
            SyntheticNamespace::NetworkUnattributed,
            SyntheticNamespace::StorageUnattributed,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Namespace {
    User(String),
    Synthetic(SyntheticNamespace),
}

impl Namespace {
    pub fn as_str(&self) -> &str {
        match self {
            Namespace::User(s) => s.as_str(),
            Namespace::Synthetic(s) => s.as_str(),
        }
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self, Namespace::Synthetic(_))
    }

    pub fn from_raw(raw: &str) -> Self {
        for s in SyntheticNamespace::all() {
            if s.as_str() == raw {
                return Namespace::Synthetic(s);
            }
        }
        Namespace::User(raw.to_string())
    }
}

/// Node role as it appears in the node-role table. Roles collapse to the
/// alphabetically greatest when more than one is reported for the same
/// (node, resource-id), matching the reference system's `max()` on the role
/// string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Infra,
    Master,
    Worker,
}

impl NodeRole {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeRole::Infra => "infra",
            NodeRole::Master => "master",
            NodeRole::Worker => "worker",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "infra" => Some(NodeRole::Infra),
            "master" => Some(NodeRole::Master),
            "worker" => Some(NodeRole::Worker),
            _ => None,
        }
    }
}

impl PartialOrd for NodeRole {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeRole {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_str().cmp(other.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct NodeRoleRow {
    pub node: String,
    pub resource_id: String,
    pub role: NodeRole,
}

#[derive(Debug, Clone)]
pub struct CostCategoryRule {
    pub namespace_pattern: String,
    pub category_id: i64,
}

/// Returns `max(id)` among every rule whose pattern matches `namespace`.
/// A pattern ending in `%` matches as a prefix; otherwise it must match
/// exactly.
pub fn match_cost_category(namespace: &str, rules: &[CostCategoryRule]) -> Option<i64> {
    rules
        .iter()
        .filter(|rule| match rule.namespace_pattern.strip_suffix('%') {
            Some(prefix) => namespace.starts_with(prefix),
            None => namespace == rule.namespace_pattern,
        })
        .map(|rule| rule.category_id)
        .max()
}

#[derive(Debug, Clone)]
pub struct NodeLabelRow {
    pub date: NaiveDate,
    pub node: String,
    pub labels_raw: String,
}

#[derive(Debug, Clone)]
pub struct NamespaceLabelRow {
    pub date: NaiveDate,
    pub namespace: String,
    pub labels_raw: String,
}

/// A single hourly/daily measurement of one pod's usage on one node.
#[derive(Debug, Clone)]
pub struct PodUsageRow {
    pub interval_start: RawTimestamp,
    pub namespace: String,
    pub node: String,
    pub pod: String,
    pub resource_id: String,
    pub pod_labels_raw: String,
    pub usage_cpu_core_seconds: Option<f64>,
    pub request_cpu_core_seconds: Option<f64>,
    pub limit_cpu_core_seconds: Option<f64>,
    pub effective_usage_cpu_core_seconds: Option<f64>,
    pub usage_memory_byte_seconds: Option<f64>,
    pub request_memory_byte_seconds: Option<f64>,
    pub limit_memory_byte_seconds: Option<f64>,
    pub effective_usage_memory_byte_seconds: Option<f64>,
    pub node_capacity_cpu_core_seconds: Option<f64>,
    pub node_capacity_memory_byte_seconds: Option<f64>,
}

/// A single hourly/daily measurement of one PVC's usage.
#[derive(Debug, Clone)]
pub struct StorageUsageRow {
    pub interval_start: RawTimestamp,
    pub namespace: String,
    pub pod: String,
    pub persistentvolumeclaim: String,
    pub persistentvolume: String,
    pub storage_class: String,
    pub csi_volume_handle: Option<String>,
    pub pv_labels_raw: String,
    pub pvc_labels_raw: String,
    pub persistentvolumeclaim_capacity_bytes: Option<f64>,
    pub persistentvolumeclaim_capacity_byte_seconds: Option<f64>,
    pub volume_request_storage_byte_seconds: Option<f64>,
    pub persistentvolumeclaim_usage_byte_seconds: Option<f64>,
}

/// Raw per-interval node capacity, the input to the capacity calculator.
#[derive(Debug, Clone)]
pub struct NodeCapacityIntervalRow {
    pub interval_start: RawTimestamp,
    pub node: String,
    pub cpu_core_seconds: f64,
    pub memory_byte_seconds: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataTransferDirection {
    In,
    Out,
}

impl DataTransferDirection {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "" => None,
            s if s.eq_ignore_ascii_case("in") => Some(DataTransferDirection::In),
            s if s.eq_ignore_ascii_case("out") => Some(DataTransferDirection::Out),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataTransferDirection::In => "IN",
            DataTransferDirection::Out => "OUT",
        }
    }
}

#[derive(Debug, Clone, Default, Copy)]
pub struct CostFlavors {
    pub unblended_cost: f64,
    pub blended_cost: f64,
    pub savingsplan_effective_cost: f64,
    pub calculated_amortized_cost: f64,
}

impl CostFlavors {
    pub fn scale(&self, factor: f64) -> CostFlavors {
        CostFlavors {
            unblended_cost: self.unblended_cost * factor,
            blended_cost: self.blended_cost * factor,
            savingsplan_effective_cost: self.savingsplan_effective_cost * factor,
            calculated_amortized_cost: self.calculated_amortized_cost * factor,
        }
    }

    pub fn markup(&self, fraction: f64) -> CostFlavors {
        self.scale(fraction)
    }

    pub fn add(&self, other: &CostFlavors) -> CostFlavors {
        CostFlavors {
            unblended_cost: self.unblended_cost + other.unblended_cost,
            blended_cost: self.blended_cost + other.blended_cost,
            savingsplan_effective_cost: self.savingsplan_effective_cost + other.savingsplan_effective_cost,
            calculated_amortized_cost: self.calculated_amortized_cost + other.calculated_amortized_cost,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CloudBillingRow {
    pub resource_id: String,
    pub usage_start: RawTimestamp,
    pub product_code: String,
    pub usage_type: String,
    pub costs: CostFlavors,
    pub unblended_rate: f64,
    pub usage_amount: f64,
    pub tags_raw: String,
    pub data_transfer_direction: Option<DataTransferDirection>,
}

/// Output: one row of the aggregated summary table. Exactly one of the Pod
/// or Storage field groups is populated; the other carries `None`s.
#[derive(Debug, Clone)]
pub struct SummaryRow {
    pub id: Uuid,
    pub report_period_id: i64,
    pub cluster_id: String,
    pub cluster_alias: String,
    pub usage_start: NaiveDate,
    pub usage_end: NaiveDate,
    pub namespace: Namespace,
    pub node: String,
    pub resource_id: String,
    pub data_source: DataSource,
    pub cost_category_id: Option<i64>,

    // Pod family (hours / GB-hours).
    pub pod_usage_cpu_core_hours: Option<f64>,
    pub pod_request_cpu_core_hours: Option<f64>,
    pub pod_limit_cpu_core_hours: Option<f64>,
    pub pod_effective_usage_cpu_core_hours: Option<f64>,
    pub pod_usage_memory_gigabyte_hours: Option<f64>,
    pub pod_request_memory_gigabyte_hours: Option<f64>,
    pub pod_limit_memory_gigabyte_hours: Option<f64>,
    pub pod_effective_usage_memory_gigabyte_hours: Option<f64>,
    pub node_capacity_cpu_cores: Option<f64>,
    pub node_capacity_cpu_core_hours: Option<f64>,
    pub node_capacity_memory_gigabytes: Option<f64>,
    pub node_capacity_memory_gigabyte_hours: Option<f64>,
    pub cluster_capacity_cpu_core_hours: Option<f64>,
    pub cluster_capacity_memory_gigabyte_hours: Option<f64>,

    // Storage family.
    pub persistentvolumeclaim: Option<String>,
    pub persistentvolume: Option<String>,
    pub storage_class: Option<String>,
    pub csi_volume_handle: Option<String>,
    pub persistentvolumeclaim_capacity_gigabyte: Option<f64>,
    pub persistentvolumeclaim_capacity_gigabyte_months: Option<f64>,
    pub volume_request_storage_gigabyte_months: Option<f64>,
    pub persistentvolumeclaim_usage_gigabyte_months: Option<f64>,

    pub pod_labels_json: String,
    pub volume_labels_json: String,
    pub all_labels_json: String,
}

/// Output: an attributed (OCP-on-AWS) row. Superset of `SummaryRow` plus
/// cloud-side cost and identity columns.
#[derive(Debug, Clone)]
pub struct AttributedRow {
    pub summary: SummaryRow,
    pub account_id: String,
    pub region: String,
    pub availability_zone: String,
    pub instance_type: String,
    pub data_transfer_direction: Option<DataTransferDirection>,
    pub currency: String,
    pub costs: CostFlavors,
    pub markup_costs: CostFlavors,
    pub tags_json: String,
    pub aws_cost_category_json: String,
}
