//! Differential capture: store, compare, classify, render
//!
//! Captures are labeled HAR documents persisted by [`CaptureStore`]; the
//! [`engine`] compares two of them into a [`DiffResult`] whose changes
//! carry a significance classification, and [`render`] projects the
//! result into operator-facing formats.

pub mod engine;
pub mod render;
pub mod store;

pub use engine::{Change, DiffResult, DiffSummary, ModifiedEntry, Significance, SideOnlyEntry, diff, entry_key};
pub use render::{ReportFormat, render};
pub use store::{CaptureRecord, CaptureStatus, CaptureStore};

use crate::error::Result;

/// Compare two completed captures by id.
pub async fn compare(store: &CaptureStore, baseline_id: &str, compare_id: &str) -> Result<DiffResult> {
    let baseline = store.load_har(baseline_id).await?;
    let comparison = store.load_har(compare_id).await?;
    Ok(diff(baseline_id, &baseline, compare_id, &comparison))
}

/// Render a diff and persist it under the store's reports directory.
pub async fn write_report(
    store: &CaptureStore,
    result: &DiffResult,
    format: ReportFormat,
    min_significance: Significance,
) -> Result<std::path::PathBuf> {
    let bytes = render(result, format, min_significance)?;
    store.write_report(format.extension(), &bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::har::{Creator, HarBuilder};

    #[tokio::test]
    async fn compare_self_yields_empty_diff() {
        let dir = tempfile::tempdir().unwrap();
        let store = CaptureStore::open(dir.path()).unwrap();
        let record = store
            .create_baseline("self", "https://example.com", BTreeMap::new())
            .await
            .unwrap();
        let bytes = HarBuilder::new(Creator::default(), None).to_json().unwrap();
        store.complete(&record.id, &bytes).await.unwrap();

        let result = compare(&store, &record.id, &record.id).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn report_lands_in_reports_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = CaptureStore::open(dir.path()).unwrap();
        let record = store
            .create_baseline("r", "https://example.com", BTreeMap::new())
            .await
            .unwrap();
        let bytes = HarBuilder::new(Creator::default(), None).to_json().unwrap();
        store.complete(&record.id, &bytes).await.unwrap();
        let result = compare(&store, &record.id, &record.id).await.unwrap();

        let path = write_report(&store, &result, ReportFormat::Text, Significance::Low)
            .await
            .unwrap();
        assert!(path.starts_with(store.reports_dir()));
        assert!(path.extension().and_then(|e| e.to_str()) == Some("txt"));
    }
}
