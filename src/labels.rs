use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

/// Canonical label representation. `BTreeMap` gives sorted-key iteration for
/// free, which is exactly the canonical-JSON contract the relational side
/// expects — no explicit sort step needed at serialization.
pub type LabelMap = BTreeMap<String, String>;

/// Always retained regardless of what the caller's allow-list contains.
pub const ALWAYS_ENABLED_KEY: &str = "vm_kubevirt_io_name";

#[derive(Debug, Clone, Default)]
pub struct EnabledKeys(BTreeSet<String>);

impl EnabledKeys {
    pub fn from_keys(keys: impl IntoIterator<Item = String>) -> Self {
        let mut set: BTreeSet<String> = keys.into_iter().collect();
        set.insert(ALWAYS_ENABLED_KEY.to_string());
        EnabledKeys(set)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains(key)
    }
}

/// Parses a label payload in either JSON object form (`{"k":"v"}`) or
/// pipe-delimited form (`label_k:v|label_k2:v2`, `label_` prefix stripped).
/// Invalid input fails soft to an empty map with a warning, never an error —
/// label parsing sits on the hot path of every aggregator and a single
/// malformed row must not abort a multi-million-row run.
pub fn parse_labels(raw: &str) -> LabelMap {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return LabelMap::new();
    }
    if trimmed.starts_with('{') {
        return match serde_json::from_str::<LabelMap>(trimmed) {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, raw = %truncate_for_log(trimmed), "failed to parse JSON label payload");
                LabelMap::new()
            }
        };
    }
    parse_pipe_labels(trimmed)
}

fn parse_pipe_labels(raw: &str) -> LabelMap {
    let mut map = LabelMap::new();
    for entry in raw.split('|') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let Some((key, value)) = entry.split_once(':') else {
            warn!(entry = %entry, "skipping malformed pipe-delimited label entry");
            continue;
        };
        let key = key.strip_prefix("label_").unwrap_or(key);
        if key.is_empty() {
            continue;
        }
        map.insert(key.to_string(), value.to_string());
    }
    map
}

fn truncate_for_log(s: &str) -> String {
    if s.len() > 120 { format!("{}…", &s[..120]) } else { s.to_string() }
}

pub fn filter_enabled(labels: &LabelMap, enabled: &EnabledKeys) -> LabelMap {
    labels
        .iter()
        .filter(|(k, _)| enabled.contains(k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Merges label maps left-to-right; later maps win on key collision.
pub fn merge_labels(maps: &[&LabelMap]) -> LabelMap {
    let mut merged = LabelMap::new();
    for map in maps {
        for (k, v) in map.iter() {
            merged.insert(k.clone(), v.clone());
        }
    }
    merged
}

/// Serializes to canonical JSON: sorted keys (via `BTreeMap`), compact
/// separators (`serde_json`'s default for maps). Falls back to `"{}"` on the
/// (unreachable in practice, since `LabelMap` values are always valid UTF-8
/// strings) serialization failure, to guarantee every emitted row carries
/// parseable JSON.
pub fn labels_to_json(labels: &LabelMap) -> String {
    serde_json::to_string(labels).unwrap_or_else(|_| "{}".to_string())
}

pub fn bytes_to_gigabytes(bytes: f64) -> f64 {
    bytes * 2f64.powi(-30)
}

pub fn seconds_to_hours(seconds: f64) -> f64 {
    seconds / 3600.0
}

pub fn byte_seconds_to_gigabyte_hours(byte_seconds: f64) -> f64 {
    seconds_to_hours(bytes_to_gigabytes(byte_seconds))
}

/// `byte_seconds / (86400 * days_in_month * 2^30)`, i.e. GB-months using the
/// actual number of days in the usage month.
pub fn byte_seconds_to_gigabyte_months(byte_seconds: f64, days_in_month: u32) -> f64 {
    byte_seconds / (86_400.0 * days_in_month as f64 * 2f64.powi(30))
}

pub fn coalesce(values: &[Option<f64>]) -> Option<f64> {
    values.iter().copied().find_map(|v| v)
}

pub fn safe_greatest(values: &[Option<f64>]) -> Option<f64> {
    values.iter().filter_map(|v| *v).fold(None, |acc, v| match acc {
        None => Some(v),
        Some(a) => Some(a.max(v)),
    })
}

pub fn safe_sum(values: &[Option<f64>]) -> f64 {
    values.iter().filter_map(|v| *v).sum()
}

/// `coalesce(effective, greatest(usage, request))`.
pub fn effective_usage(effective: Option<f64>, usage: Option<f64>, request: Option<f64>) -> Option<f64> {
    coalesce(&[effective, safe_greatest(&[usage, request])])
}
