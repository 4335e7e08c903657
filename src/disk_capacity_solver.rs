use std::collections::{HashMap, HashSet};

use chrono::{Datelike, NaiveDate};
use tracing::warn;

use crate::model::{CloudBillingRow, StorageUsageRow};
use crate::time_util::hours_in_month;

pub fn extract_matched_volumes(storage_rows: &[StorageUsageRow]) -> HashSet<String> {
    let mut volumes = HashSet::new();
    for row in storage_rows {
        if !row.persistentvolume.is_empty() {
            volumes.insert(row.persistentvolume.clone());
        }
        if let Some(handle) = &row.csi_volume_handle {
            if !handle.is_empty() {
                volumes.insert(handle.clone());
            }
        }
    }
    volumes
}

#[derive(Debug, Clone)]
pub struct DiskCapacity {
    pub resource_id: String,
    pub usage_date: NaiveDate,
    pub capacity_gigabytes: i64,
}

/// Recovers disk capacity from billing cost and rate by inverting the
/// per-GB-hour price: `capacity = cost / (rate / hours_in_month)`. Assumes a
/// steady hourly rate across the billing day.
pub fn calculate_disk_capacities(
    cloud_rows: &[CloudBillingRow],
    matched_volumes: &HashSet<String>,
) -> Result<Vec<DiskCapacity>, crate::error::SchemaError> {
    let mut grouped: HashMap<(String, NaiveDate), (f64, f64)> = HashMap::new();

    for row in cloud_rows {
        if !matched_volumes.is_empty()
            && !matched_volumes.contains(&row.resource_id)
            && !matched_volumes.iter().any(|v| !v.is_empty() && row.resource_id.ends_with(v.as_str()))
        {
            continue;
        }
        let usage_date = row.usage_start.normalize()?.date();
        let entry = grouped.entry((row.resource_id.clone(), usage_date)).or_insert((0.0, 0.0));
        entry.0 = entry.0.max(row.costs.unblended_cost);
        entry.1 = entry.1.max(row.unblended_rate);
    }

    let mut capacities = Vec::new();
    for ((resource_id, usage_date), (max_cost, max_rate)) in grouped {
        if max_rate <= 0.0 {
            continue;
        }
        let hours = hours_in_month(usage_date.year(), usage_date.month()) as f64;
        let capacity = max_cost / (max_rate / hours);
        if !capacity.is_finite() || capacity <= 0.0 {
            continue;
        }
        capacities.push(DiskCapacity {
            resource_id,
            usage_date,
            capacity_gigabytes: capacity.round() as i64,
        });
    }
    Ok(capacities)
}

/// Logs a warning (non-fatal) when recovered capacities fall outside a
/// plausible range for EBS volumes, and returns the count of implausible
/// entries so a caller can decide whether to treat it as fatal.
pub fn validate_capacities(capacities: &[DiskCapacity], min_gb: i64, max_gb: i64) -> usize {
    let mut out_of_range = 0;
    for c in capacities {
        if c.capacity_gigabytes < min_gb || c.capacity_gigabytes > max_gb {
            out_of_range += 1;
            warn!(
                resource_id = %c.resource_id,
                capacity_gb = c.capacity_gigabytes,
                min_gb,
                max_gb,
                "recovered disk capacity outside plausible range"
            );
        }
    }
    out_of_range
}
