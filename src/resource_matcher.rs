use std::collections::HashSet;

use tracing::warn;

use crate::model::{CloudBillingRow, PodUsageRow, StorageUsageRow};

/// The three categories of OCP-side identifiers a cloud resource id can be
/// suffix-matched against, checked in this priority order: a match against
/// an earlier category is never overwritten by a later one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    Node,
    Pv,
    CsiHandle,
}

#[derive(Debug, Clone, Default)]
pub struct OcpResourceIds {
    pub node_resource_ids: HashSet<String>,
    pub pv_names: HashSet<String>,
    pub csi_volume_handles: HashSet<String>,
}

pub fn extract_ocp_resource_ids(
    pod_rows: &[PodUsageRow],
    storage_rows: &[StorageUsageRow],
) -> OcpResourceIds {
    let mut ids = OcpResourceIds::default();
    for row in pod_rows {
        if !row.resource_id.is_empty() {
            ids.node_resource_ids.insert(row.resource_id.clone());
        }
    }
    for row in storage_rows {
        if !row.persistentvolume.is_empty() {
            ids.pv_names.insert(row.persistentvolume.clone());
        }
        if let Some(handle) = &row.csi_volume_handle {
            if !handle.is_empty() {
                ids.csi_volume_handles.insert(handle.clone());
            }
        }
    }
    ids
}

#[derive(Debug, Clone)]
pub struct ResourceMatch {
    pub matched_resource_id: String,
    pub match_type: MatchType,
}

/// Matches `cloud_resource_id` against the OCP id sets, checking node
/// resource ids, then PV names, then CSI handles. A match is suffix
/// equality: the OCP id must equal the trailing substring of the cloud id of
/// the same length (`cloud_resource_id` may carry an ARN-style prefix).
pub fn match_resource_id(cloud_resource_id: &str, ocp_ids: &OcpResourceIds) -> Option<ResourceMatch> {
    for (set, match_type) in [
        (&ocp_ids.node_resource_ids, MatchType::Node),
        (&ocp_ids.pv_names, MatchType::Pv),
        (&ocp_ids.csi_volume_handles, MatchType::CsiHandle),
    ] {
        for candidate in set {
            if !candidate.is_empty() && cloud_resource_id.ends_with(candidate.as_str()) {
                return Some(ResourceMatch { matched_resource_id: candidate.clone(), match_type });
            }
        }
    }
    None
}

pub struct MatchStats {
    pub total: usize,
    pub matched: usize,
}

impl MatchStats {
    pub fn match_rate(&self) -> f64 {
        if self.total == 0 { 0.0 } else { self.matched as f64 / self.total as f64 }
    }
}

/// Matches every cloud row against the OCP id sets, returning a match per
/// row (`None` for unmatched rows, left for the tag matcher) and aggregate
/// stats. Logs a warning (not an error) when the match rate falls below
/// `low_match_rate_threshold` — a low resource-id match rate is expected
/// whenever tag-based matching is the primary mechanism for a cluster.
pub fn match_all(
    cloud_rows: &[CloudBillingRow],
    ocp_ids: &OcpResourceIds,
    low_match_rate_threshold: f64,
) -> (Vec<Option<ResourceMatch>>, MatchStats) {
    let matches: Vec<Option<ResourceMatch>> =
        cloud_rows.iter().map(|row| match_resource_id(&row.resource_id, ocp_ids)).collect();
    let stats = MatchStats { total: cloud_rows.len(), matched: matches.iter().filter(|m| m.is_some()).count() };
    if stats.total > 0 && stats.match_rate() < low_match_rate_threshold {
        warn!(
            matched = stats.matched,
            total = stats.total,
            match_rate = stats.match_rate(),
            threshold = low_match_rate_threshold,
            "resource-id match rate below threshold; tag matching will run next"
        );
    }
    (matches, stats)
}
