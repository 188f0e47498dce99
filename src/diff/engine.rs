//! Capture comparison
//!
//! Entries are keyed by `(method, canonical URL)`: host lowercased,
//! fragment dropped. Keys only in the baseline are removals, keys only in
//! the compare are additions, shared keys get per-field change analysis.
//! Every change carries a significance derived from the classification
//! rules below; additions/removals are classified by resource type
//! (document/script/stylesheet are critical).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::har::{Entry, Har};

/// How much a single change matters.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Significance {
    Low,
    Medium,
    High,
}

impl Significance {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for Significance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// One detected difference between a baseline entry and its counterpart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    /// Which aspect changed ("status", "bodySize", "time", "headers")
    pub field: String,
    pub baseline: String,
    pub compare: String,
    pub significance: Significance,
}

/// A shared key whose entries differ.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifiedEntry {
    pub key: String,
    pub baseline: Entry,
    pub compare: Entry,
    pub changes: Vec<Change>,
}

/// An entry present on only one side, classified by its resource type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SideOnlyEntry {
    pub key: String,
    pub entry: Entry,
    pub significance: Significance,
}

/// Aggregate counters over a diff.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    pub baseline_entries: usize,
    pub compare_entries: usize,
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
    pub changes_low: usize,
    pub changes_medium: usize,
    pub changes_high: usize,
    pub baseline_bytes: i64,
    pub compare_bytes: i64,
    pub baseline_time_ms: f64,
    pub compare_time_ms: f64,
}

/// Full comparison of two captures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffResult {
    pub baseline_id: String,
    pub compare_id: String,
    pub added: Vec<SideOnlyEntry>,
    pub removed: Vec<SideOnlyEntry>,
    pub modified: Vec<ModifiedEntry>,
    pub summary: DiffSummary,
}

impl DiffResult {
    /// True when the two captures are indistinguishable under the keying
    /// and change rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    /// Drop changes (and change-less modifications) below the floor, then
    /// recompute the summary.
    #[must_use]
    pub fn at_min_significance(&self, floor: Significance) -> Self {
        let added: Vec<_> = self
            .added
            .iter()
            .filter(|e| e.significance >= floor)
            .cloned()
            .collect();
        let removed: Vec<_> = self
            .removed
            .iter()
            .filter(|e| e.significance >= floor)
            .cloned()
            .collect();
        let modified: Vec<_> = self
            .modified
            .iter()
            .filter_map(|m| {
                let changes: Vec<_> = m
                    .changes
                    .iter()
                    .filter(|c| c.significance >= floor)
                    .cloned()
                    .collect();
                (!changes.is_empty()).then(|| ModifiedEntry {
                    key: m.key.clone(),
                    baseline: m.baseline.clone(),
                    compare: m.compare.clone(),
                    changes,
                })
            })
            .collect();
        let summary = summarize(
            self.summary.baseline_entries,
            self.summary.compare_entries,
            &added,
            &removed,
            &modified,
            self.summary.baseline_bytes,
            self.summary.compare_bytes,
            self.summary.baseline_time_ms,
            self.summary.compare_time_ms,
        );
        Self {
            baseline_id: self.baseline_id.clone(),
            compare_id: self.compare_id.clone(),
            added,
            removed,
            modified,
            summary,
        }
    }
}

/// Canonical diff key: method plus URL with lowercased host and no
/// fragment. Unparseable URLs fall back to the raw string.
#[must_use]
pub fn entry_key(entry: &Entry) -> String {
    format!("{} {}", entry.request.method, canonical_url(&entry.request.url))
}

fn canonical_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_fragment(None);
            if let Some(host) = url.host_str().map(str::to_ascii_lowercase) {
                // set_host only fails for cannot-be-a-base URLs
                let _ = url.set_host(Some(&host));
            }
            url.to_string()
        }
        Err(_) => raw.to_string(),
    }
}

const CRITICAL_RESOURCE_TYPES: &[&str] = &["document", "script", "stylesheet"];

fn addition_significance(entry: &Entry) -> Significance {
    let critical = entry
        .resource_type
        .as_deref()
        .is_some_and(|t| CRITICAL_RESOURCE_TYPES.contains(&t.to_ascii_lowercase().as_str()));
    if critical {
        Significance::High
    } else {
        Significance::Medium
    }
}

fn status_class(status: i64) -> i64 {
    status / 100
}

fn body_size(entry: &Entry) -> i64 {
    let size = entry.response.content.size;
    if size >= 0 { size } else { entry.response.body_size.max(0) }
}

fn header_map(headers: &[crate::har::Header]) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|h| (h.name.to_ascii_lowercase(), h.value.clone()))
        .collect()
}

fn entry_changes(baseline: &Entry, compare: &Entry) -> Vec<Change> {
    let mut changes = Vec::new();

    let (b_status, c_status) = (baseline.response.status, compare.response.status);
    if b_status != c_status {
        let significance = if status_class(b_status) != status_class(c_status) {
            Significance::High
        } else {
            Significance::Low
        };
        changes.push(Change {
            field: "status".into(),
            baseline: b_status.to_string(),
            compare: c_status.to_string(),
            significance,
        });
    }

    let (b_size, c_size) = (body_size(baseline), body_size(compare));
    if b_size != c_size {
        let pct = if b_size > 0 {
            ((c_size - b_size).abs() as f64 / b_size as f64) * 100.0
        } else {
            // appearing-from-nothing is a full-size change
            100.0
        };
        let significance = if pct >= 50.0 {
            Significance::High
        } else if pct >= 25.0 {
            Significance::Medium
        } else {
            Significance::Low
        };
        changes.push(Change {
            field: "bodySize".into(),
            baseline: b_size.to_string(),
            compare: c_size.to_string(),
            significance,
        });
    }

    let (b_time, c_time) = (baseline.time, compare.time);
    if (b_time - c_time).abs() > f64::EPSILON {
        let pct = if b_time > 0.0 {
            ((c_time - b_time).abs() / b_time) * 100.0
        } else {
            100.0
        };
        let significance = if pct >= 100.0 {
            Significance::Medium
        } else {
            Significance::Low
        };
        changes.push(Change {
            field: "time".into(),
            baseline: format!("{b_time:.1}ms"),
            compare: format!("{c_time:.1}ms"),
            significance,
        });
    }

    let (b_headers, c_headers) = (
        header_map(&baseline.response.headers),
        header_map(&compare.response.headers),
    );
    if b_headers != c_headers {
        let added: Vec<_> = c_headers
            .keys()
            .filter(|k| !b_headers.contains_key(*k))
            .cloned()
            .collect();
        let removed: Vec<_> = b_headers
            .keys()
            .filter(|k| !c_headers.contains_key(*k))
            .cloned()
            .collect();
        let changed: Vec<_> = b_headers
            .iter()
            .filter(|(k, v)| c_headers.get(*k).is_some_and(|cv| cv != *v))
            .map(|(k, _)| k.clone())
            .collect();
        changes.push(Change {
            field: "headers".into(),
            baseline: format!("removed: {removed:?}, changed: {changed:?}"),
            compare: format!("added: {added:?}"),
            significance: Significance::Low,
        });
    }

    changes
}

#[allow(clippy::too_many_arguments)]
fn summarize(
    baseline_entries: usize,
    compare_entries: usize,
    added: &[SideOnlyEntry],
    removed: &[SideOnlyEntry],
    modified: &[ModifiedEntry],
    baseline_bytes: i64,
    compare_bytes: i64,
    baseline_time_ms: f64,
    compare_time_ms: f64,
) -> DiffSummary {
    let mut summary = DiffSummary {
        baseline_entries,
        compare_entries,
        added: added.len(),
        removed: removed.len(),
        modified: modified.len(),
        baseline_bytes,
        compare_bytes,
        baseline_time_ms,
        compare_time_ms,
        ..Default::default()
    };
    let mut count = |s: Significance| match s {
        Significance::Low => summary.changes_low += 1,
        Significance::Medium => summary.changes_medium += 1,
        Significance::High => summary.changes_high += 1,
    };
    for entry in added.iter().chain(removed) {
        count(entry.significance);
    }
    for modified_entry in modified {
        for change in &modified_entry.changes {
            count(change.significance);
        }
    }
    summary
}

/// Compare two HAR documents.
#[must_use]
pub fn diff(baseline_id: &str, baseline: &Har, compare_id: &str, compare: &Har) -> DiffResult {
    // Duplicate keys pair up index-wise; leftovers become added/removed
    let mut baseline_buckets: BTreeMap<String, Vec<&Entry>> = BTreeMap::new();
    for entry in &baseline.log.entries {
        baseline_buckets.entry(entry_key(entry)).or_default().push(entry);
    }
    let mut compare_buckets: BTreeMap<String, Vec<&Entry>> = BTreeMap::new();
    for entry in &compare.log.entries {
        compare_buckets.entry(entry_key(entry)).or_default().push(entry);
    }

    let mut added = Vec::new();
    let mut removed = Vec::new();
    let mut modified = Vec::new();

    for (key, baseline_entries) in &baseline_buckets {
        let compare_entries = compare_buckets.get(key).map(Vec::as_slice).unwrap_or(&[]);
        for (i, baseline_entry) in baseline_entries.iter().enumerate() {
            match compare_entries.get(i) {
                Some(compare_entry) => {
                    let changes = entry_changes(baseline_entry, compare_entry);
                    if !changes.is_empty() {
                        modified.push(ModifiedEntry {
                            key: key.clone(),
                            baseline: (*baseline_entry).clone(),
                            compare: (*compare_entry).clone(),
                            changes,
                        });
                    }
                }
                None => removed.push(SideOnlyEntry {
                    key: key.clone(),
                    entry: (*baseline_entry).clone(),
                    significance: addition_significance(baseline_entry),
                }),
            }
        }
    }
    for (key, compare_entries) in &compare_buckets {
        let baseline_count = baseline_buckets.get(key).map_or(0, Vec::len);
        for compare_entry in compare_entries.iter().skip(baseline_count) {
            added.push(SideOnlyEntry {
                key: key.clone(),
                entry: (*compare_entry).clone(),
                significance: addition_significance(compare_entry),
            });
        }
    }

    let sum_bytes = |har: &Har| har.log.entries.iter().map(body_size).sum();
    let sum_time = |har: &Har| har.log.entries.iter().map(|e| e.time).sum();
    let summary = summarize(
        baseline.log.entries.len(),
        compare.log.entries.len(),
        &added,
        &removed,
        &modified,
        sum_bytes(baseline),
        sum_bytes(compare),
        sum_time(baseline),
        sum_time(compare),
    );

    DiffResult {
        baseline_id: baseline_id.to_string(),
        compare_id: compare_id.to_string(),
        added,
        removed,
        modified,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::har::{Content, Creator, Header, Request, Response, wrap_entries};
    use chrono::Utc;

    fn entry(method: &str, url: &str, status: i64, size: i64, rtype: &str) -> Entry {
        Entry {
            started_date_time: Utc::now(),
            time: 10.0,
            request: Request {
                method: method.into(),
                url: url.into(),
                ..Default::default()
            },
            response: Response {
                status,
                content: Content {
                    size,
                    mime_type: "text/html".into(),
                    ..Default::default()
                },
                ..Default::default()
            },
            resource_type: Some(rtype.into()),
            ..Default::default()
        }
    }

    fn har(entries: Vec<Entry>) -> Har {
        wrap_entries(entries, Creator::default())
    }

    #[test]
    fn self_diff_is_empty() {
        let doc = har(vec![
            entry("GET", "https://example.com/", 200, 100, "document"),
            entry("GET", "https://example.com/a.js", 200, 50, "script"),
        ]);
        let result = diff("a", &doc, "a", &doc);
        assert!(result.is_empty());
        assert_eq!(result.summary.modified, 0);
    }

    #[test]
    fn key_canonicalization_lowercases_host_and_strips_fragment() {
        let a = entry("GET", "https://EXAMPLE.com/page#top", 200, 10, "document");
        let b = entry("GET", "https://example.com/page", 200, 10, "document");
        assert_eq!(entry_key(&a), entry_key(&b));
        // method is part of the key
        let c = entry("POST", "https://example.com/page", 200, 10, "document");
        assert_ne!(entry_key(&a), entry_key(&c));
    }

    #[test]
    fn added_critical_resource_is_high() {
        let baseline = har(vec![
            entry("GET", "https://example.com/", 200, 100, "document"),
            entry("GET", "https://example.com/a.js", 200, 50, "script"),
        ]);
        let compare = har(vec![
            entry("GET", "https://example.com/", 200, 100, "document"),
            entry("GET", "https://example.com/a.js", 200, 50, "script"),
            entry("GET", "https://example.com/b.js", 200, 60, "script"),
        ]);
        let result = diff("base", &baseline, "cmp", &compare);
        assert_eq!(result.added.len(), 1);
        assert_eq!(result.added[0].significance, Significance::High);
        assert_eq!(result.summary.changes_high, 1);
    }

    #[test]
    fn added_noncritical_resource_is_medium() {
        let baseline = har(vec![entry("GET", "https://example.com/", 200, 100, "document")]);
        let compare = har(vec![
            entry("GET", "https://example.com/", 200, 100, "document"),
            entry("GET", "https://example.com/hero.png", 200, 60, "image"),
        ]);
        let result = diff("base", &baseline, "cmp", &compare);
        assert_eq!(result.added[0].significance, Significance::Medium);
    }

    #[test]
    fn status_class_crossing_is_high() {
        let baseline = har(vec![entry("GET", "https://example.com/api", 200, 10, "xhr")]);
        let compare = har(vec![entry("GET", "https://example.com/api", 503, 10, "xhr")]);
        let result = diff("base", &baseline, "cmp", &compare);
        let change = &result.modified[0].changes[0];
        assert_eq!(change.field, "status");
        assert_eq!(change.significance, Significance::High);
    }

    #[test]
    fn same_class_status_change_is_low() {
        let baseline = har(vec![entry("GET", "https://example.com/", 301, 0, "document")]);
        let compare = har(vec![entry("GET", "https://example.com/", 302, 0, "document")]);
        let result = diff("base", &baseline, "cmp", &compare);
        let change = result.modified[0]
            .changes
            .iter()
            .find(|c| c.field == "status")
            .unwrap();
        assert_eq!(change.significance, Significance::Low);
    }

    #[test]
    fn body_size_thresholds() {
        let case = |b: i64, c: i64| {
            let baseline = har(vec![entry("GET", "https://example.com/x", 200, b, "xhr")]);
            let compare = har(vec![entry("GET", "https://example.com/x", 200, c, "xhr")]);
            let result = diff("base", &baseline, "cmp", &compare);
            result.modified[0]
                .changes
                .iter()
                .find(|ch| ch.field == "bodySize")
                .unwrap()
                .significance
        };
        assert_eq!(case(100, 160), Significance::High); // 60%
        assert_eq!(case(100, 130), Significance::Medium); // 30%
        assert_eq!(case(100, 110), Significance::Low); // 10%
    }

    #[test]
    fn timing_change_classification() {
        let mut slow = entry("GET", "https://example.com/", 200, 10, "document");
        slow.time = 30.0;
        let mut fast = entry("GET", "https://example.com/", 200, 10, "document");
        fast.time = 10.0;
        let result = diff("base", &har(vec![fast.clone()]), "cmp", &har(vec![slow]));
        let change = result.modified[0]
            .changes
            .iter()
            .find(|c| c.field == "time")
            .unwrap();
        // 200% change
        assert_eq!(change.significance, Significance::Medium);
    }

    #[test]
    fn header_changes_are_low() {
        let mut baseline_entry = entry("GET", "https://example.com/", 200, 10, "document");
        baseline_entry.response.headers = vec![Header {
            name: "X-Version".into(),
            value: "1".into(),
        }];
        let mut compare_entry = baseline_entry.clone();
        compare_entry.response.headers[0].value = "2".into();
        let result = diff(
            "base",
            &har(vec![baseline_entry]),
            "cmp",
            &har(vec![compare_entry]),
        );
        let change = &result.modified[0].changes[0];
        assert_eq!(change.field, "headers");
        assert_eq!(change.significance, Significance::Low);
    }

    #[test]
    fn min_significance_suppresses_and_recounts() {
        let baseline = har(vec![
            entry("GET", "https://example.com/", 200, 100, "document"),
            entry("GET", "https://example.com/style.css", 200, 40, "stylesheet"),
        ]);
        let compare = har(vec![
            // 10% body change -> low
            entry("GET", "https://example.com/", 200, 110, "document"),
            entry("GET", "https://example.com/style.css", 200, 40, "stylesheet"),
            // added image -> medium
            entry("GET", "https://example.com/logo.png", 200, 5, "image"),
        ]);
        let full = diff("base", &baseline, "cmp", &compare);
        assert_eq!(full.summary.changes_low, 1);
        assert_eq!(full.summary.changes_medium, 1);

        let trimmed = full.at_min_significance(Significance::Medium);
        assert_eq!(trimmed.modified.len(), 0);
        assert_eq!(trimmed.added.len(), 1);
        assert_eq!(trimmed.summary.changes_low, 0);
        assert_eq!(trimmed.summary.changes_medium, 1);
    }
}
