use std::collections::HashMap;

use chrono::NaiveDate;
use tracing::warn;

use crate::labels::{byte_seconds_to_gigabyte_hours, seconds_to_hours};
use crate::model::NodeCapacityIntervalRow;

#[derive(Debug, Clone)]
pub struct NodeDailyCapacity {
    pub date: NaiveDate,
    pub node: String,
    pub node_capacity_cpu_core_hours: f64,
    pub node_capacity_memory_gigabyte_hours: f64,
    pub cluster_capacity_cpu_core_hours: f64,
    pub cluster_capacity_memory_gigabyte_hours: f64,
}

/// Three-level aggregation: interval-max (dedupe duplicate interval rows),
/// then day-sum per node, then day-sum per cluster broadcast back to every
/// node row for that day.
pub fn calculate_node_capacities(
    intervals: &[NodeCapacityIntervalRow],
) -> Result<Vec<NodeDailyCapacity>, crate::error::SchemaError> {
    if intervals.is_empty() {
        return Ok(Vec::new());
    }

    // Level 1: (interval_start, node) -> max(cpu_seconds, mem_byte_seconds).
    let mut per_interval: HashMap<(chrono::NaiveDateTime, String), (f64, f64)> = HashMap::new();
    for row in intervals {
        let ts = row.interval_start.normalize()?;
        let entry = per_interval.entry((ts, row.node.clone())).or_insert((0.0, 0.0));
        entry.0 = entry.0.max(row.cpu_core_seconds);
        entry.1 = entry.1.max(row.memory_byte_seconds);
    }

    // Level 2: (date, node) -> sum(cpu_seconds, mem_byte_seconds).
    let mut per_node_day: HashMap<(NaiveDate, String), (f64, f64)> = HashMap::new();
    for ((ts, node), (cpu_seconds, mem_byte_seconds)) in per_interval {
        let entry = per_node_day.entry((ts.date(), node)).or_insert((0.0, 0.0));
        entry.0 += cpu_seconds;
        entry.1 += mem_byte_seconds;
    }

    // Level 3: date -> sum across nodes.
    let mut per_cluster_day: HashMap<NaiveDate, (f64, f64)> = HashMap::new();
    for ((date, _node), (cpu_seconds, mem_byte_seconds)) in &per_node_day {
        let entry = per_cluster_day.entry(*date).or_insert((0.0, 0.0));
        entry.0 += cpu_seconds;
        entry.1 += mem_byte_seconds;
    }

    let mut output = Vec::with_capacity(per_node_day.len());
    for ((date, node), (cpu_seconds, mem_byte_seconds)) in per_node_day {
        let (cluster_cpu_seconds, cluster_mem_byte_seconds) = per_cluster_day[&date];
        if cluster_cpu_seconds <= 0.0 {
            warn!(date = %date, "cluster CPU capacity is zero or negative");
        }
        output.push(NodeDailyCapacity {
            date,
            node,
            node_capacity_cpu_core_hours: seconds_to_hours(cpu_seconds),
            node_capacity_memory_gigabyte_hours: byte_seconds_to_gigabyte_hours(mem_byte_seconds),
            cluster_capacity_cpu_core_hours: seconds_to_hours(cluster_cpu_seconds),
            cluster_capacity_memory_gigabyte_hours: byte_seconds_to_gigabyte_hours(cluster_mem_byte_seconds),
        });
    }
    Ok(output)
}
