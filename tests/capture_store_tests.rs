//! Capture store lifecycle and the diff round-trip properties

use std::collections::BTreeMap;

use harcap::diff::{self, ReportFormat, Significance};
use harcap::har::{Creator, Entry, Request, Response, wrap_entries};
use harcap::{CaptureStatus, CaptureStore};
use tempfile::TempDir;

fn entry(url: &str, status: i64, rtype: &str) -> Entry {
    Entry {
        started_date_time: chrono::Utc::now(),
        request: Request {
            url: url.into(),
            ..Default::default()
        },
        response: Response {
            status,
            ..Default::default()
        },
        resource_type: Some(rtype.into()),
        ..Default::default()
    }
}

fn har_bytes(entries: Vec<Entry>) -> Vec<u8> {
    serde_json::to_vec_pretty(&wrap_entries(entries, Creator::default())).unwrap()
}

#[tokio::test]
async fn complete_list_load_compare_self_is_empty() {
    let dir = TempDir::new().unwrap();
    let store = CaptureStore::open(dir.path()).unwrap();

    let record = store
        .create_baseline(
            "checkout",
            "https://shop.example.com/checkout",
            BTreeMap::from([("env".to_string(), "staging".to_string())]),
        )
        .await
        .unwrap();

    let bytes = har_bytes(vec![
        entry("https://shop.example.com/checkout", 200, "document"),
        entry("https://shop.example.com/cart.js", 200, "script"),
    ]);
    store.complete(&record.id, &bytes).await.unwrap();

    let listed = store.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, CaptureStatus::Completed);
    assert_eq!(listed[0].labels["env"], "staging");

    let result = diff::compare(&store, &record.id, &record.id).await.unwrap();
    assert!(result.is_empty());
}

#[tokio::test]
async fn added_script_is_a_high_significance_change() {
    let dir = TempDir::new().unwrap();
    let store = CaptureStore::open(dir.path()).unwrap();

    let baseline = store
        .create_baseline("base", "https://example.com", BTreeMap::new())
        .await
        .unwrap();
    store
        .complete(
            &baseline.id,
            &har_bytes(vec![
                entry("https://example.com/", 200, "document"),
                entry("https://example.com/a.js", 200, "script"),
            ]),
        )
        .await
        .unwrap();

    let compare = store
        .create_baseline("compare", "https://example.com", BTreeMap::new())
        .await
        .unwrap();
    store
        .complete(
            &compare.id,
            &har_bytes(vec![
                entry("https://example.com/", 200, "document"),
                entry("https://example.com/a.js", 200, "script"),
                entry("https://example.com/b.js", 200, "script"),
            ]),
        )
        .await
        .unwrap();

    let result = diff::compare(&store, &baseline.id, &compare.id)
        .await
        .unwrap();
    assert_eq!(result.added.len(), 1);
    assert_eq!(result.added[0].significance, Significance::High);
    assert!(result.added[0].key.contains("/b.js"));
    assert_eq!(result.summary.changes_high, 1);
}

#[tokio::test]
async fn reports_render_in_every_format() {
    let dir = TempDir::new().unwrap();
    let store = CaptureStore::open(dir.path()).unwrap();
    let record = store
        .create_baseline("fmt", "https://example.com", BTreeMap::new())
        .await
        .unwrap();
    store
        .complete(
            &record.id,
            &har_bytes(vec![entry("https://example.com/", 200, "document")]),
        )
        .await
        .unwrap();
    let result = diff::compare(&store, &record.id, &record.id).await.unwrap();

    for format in [
        ReportFormat::Json,
        ReportFormat::Html,
        ReportFormat::Text,
        ReportFormat::Csv,
    ] {
        let path = diff::write_report(&store, &result, format, Significance::Low)
            .await
            .unwrap();
        assert!(path.exists());
        assert_eq!(
            path.extension().and_then(|e| e.to_str()),
            Some(format.extension())
        );
    }
}

#[tokio::test]
async fn incomplete_capture_cannot_be_compared() {
    let dir = TempDir::new().unwrap();
    let store = CaptureStore::open(dir.path()).unwrap();
    let record = store
        .create_baseline("partial", "https://example.com", BTreeMap::new())
        .await
        .unwrap();
    let err = store.load_har(&record.id).await.unwrap_err();
    assert_eq!(err.exit_code(), 5);
}

#[tokio::test]
async fn capture_files_use_id_naming() {
    let dir = TempDir::new().unwrap();
    let store = CaptureStore::open(dir.path()).unwrap();
    let record = store
        .create_baseline("layout", "https://example.com", BTreeMap::new())
        .await
        .unwrap();
    store
        .complete(&record.id, &har_bytes(Vec::new()))
        .await
        .unwrap();

    let captures = store.captures_dir();
    assert!(captures.join(format!("{}.har", record.id)).exists());
    assert!(captures.join(format!("{}.json", record.id)).exists());
}
