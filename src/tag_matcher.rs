use std::collections::HashSet;

use crate::labels::{parse_labels, EnabledKeys};
use crate::model::{CloudBillingRow, PodUsageRow};
use crate::resource_matcher::ResourceMatch;

#[derive(Debug, Clone, Default)]
pub struct OcpTagValues {
    pub cluster_id: String,
    pub cluster_alias: String,
    pub nodes: HashSet<String>,
    pub namespaces: HashSet<String>,
}

pub fn extract_ocp_tag_values(cluster_id: &str, cluster_alias: &str, pod_rows: &[PodUsageRow]) -> OcpTagValues {
    let mut values = OcpTagValues {
        cluster_id: cluster_id.to_string(),
        cluster_alias: cluster_alias.to_string(),
        ..Default::default()
    };
    for row in pod_rows {
        if !row.node.is_empty() {
            values.nodes.insert(row.node.clone());
        }
        if !row.namespace.is_empty() {
            values.namespaces.insert(row.namespace.clone());
        }
    }
    values
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TagMatchKind {
    Cluster,
    Node,
    Namespace,
}

#[derive(Debug, Clone)]
pub struct TagMatch {
    pub kind: TagMatchKind,
    pub matched_value: String,
    pub matched_tag: String,
}

/// Evaluates a cloud row's tags in priority order: `openshift_cluster` (by id
/// or alias), then `openshift_node`, then `openshift_project`. Only the
/// highest-priority hit is recorded. Resource-id-matched rows are the
/// caller's responsibility to skip (this function does not look at
/// `ResourceMatch` itself, see `match_by_tags`).
pub fn match_tags(tags: &std::collections::BTreeMap<String, String>, ocp: &OcpTagValues) -> Option<TagMatch> {
    if let Some(v) = tags.get("openshift_cluster") {
        if v == &ocp.cluster_id || v == &ocp.cluster_alias {
            return Some(TagMatch {
                kind: TagMatchKind::Cluster,
                matched_value: v.clone(),
                matched_tag: format!("openshift_cluster={v}"),
            });
        }
    }
    if let Some(v) = tags.get("openshift_node") {
        if ocp.nodes.contains(v) {
            return Some(TagMatch {
                kind: TagMatchKind::Node,
                matched_value: v.clone(),
                matched_tag: format!("openshift_node={v}"),
            });
        }
    }
    if let Some(v) = tags.get("openshift_project") {
        if ocp.namespaces.contains(v) {
            return Some(TagMatch {
                kind: TagMatchKind::Namespace,
                matched_value: v.clone(),
                matched_tag: format!("openshift_project={v}"),
            });
        }
    }
    None
}

/// Runs tag matching over every cloud row, skipping rows already matched by
/// resource id. `enabled_keys = None` means "allow all tag keys".
pub fn match_by_tags(
    cloud_rows: &[CloudBillingRow],
    resource_matches: &[Option<ResourceMatch>],
    ocp: &OcpTagValues,
    enabled_keys: Option<&EnabledKeys>,
) -> Vec<Option<TagMatch>> {
    cloud_rows
        .iter()
        .zip(resource_matches.iter())
        .map(|(row, resource_match)| {
            if resource_match.is_some() {
                return None;
            }
            let tags = parse_labels(&row.tags_raw);
            let filtered = match enabled_keys {
                Some(enabled) => crate::labels::filter_enabled(&tags, enabled),
                None => tags,
            };
            match_tags(&filtered, ocp)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ocp() -> OcpTagValues {
        OcpTagValues {
            cluster_id: "cluster-1".to_string(),
            cluster_alias: "prod".to_string(),
            nodes: ["node-a".to_string()].into_iter().collect(),
            namespaces: ["team-a".to_string()].into_iter().collect(),
        }
    }

    fn tags(pairs: &[(&str, &str)]) -> std::collections::BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn cluster_tag_takes_priority_over_node_tag() {
        let t = tags(&[("openshift_cluster", "cluster-1"), ("openshift_node", "node-a")]);
        let m = match_tags(&t, &ocp()).unwrap();
        assert_eq!(m.kind, TagMatchKind::Cluster);
    }

    #[test]
    fn cluster_tag_matches_by_alias_too() {
        let t = tags(&[("openshift_cluster", "prod")]);
        let m = match_tags(&t, &ocp()).unwrap();
        assert_eq!(m.kind, TagMatchKind::Cluster);
    }

    #[test]
    fn falls_through_to_namespace_tag() {
        let t = tags(&[("openshift_project", "team-a")]);
        let m = match_tags(&t, &ocp()).unwrap();
        assert_eq!(m.kind, TagMatchKind::Namespace);
        assert_eq!(m.matched_value, "team-a");
    }

    #[test]
    fn unknown_values_do_not_match() {
        let t = tags(&[("openshift_project", "unknown-team")]);
        assert!(match_tags(&t, &ocp()).is_none());
    }

    #[test]
    fn resource_matched_rows_are_skipped() {
        let row = CloudBillingRow {
            resource_id: "x".to_string(),
            usage_start: crate::time_util::RawTimestamp::Text("2024-01-01 00:00:00".to_string()),
            product_code: "AmazonEC2".to_string(),
            usage_type: "BoxUsage".to_string(),
            costs: Default::default(),
            unblended_rate: 0.0,
            usage_amount: 0.0,
            tags_raw: r#"{"openshift_project":"team-a"}"#.to_string(),
            data_transfer_direction: None,
        };
        let resource_match = Some(ResourceMatch {
            matched_resource_id: "x".to_string(),
            match_type: crate::resource_matcher::MatchType::Node,
        });
        let result = match_by_tags(&[row], &[resource_match], &ocp(), None);
        assert!(result[0].is_none());
    }
}
