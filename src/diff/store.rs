//! On-disk capture store
//!
//! One record is two files under `{workdir}/captures/`: `{id}.har` (the
//! immutable document, written exactly once at completion) and
//! `{id}.json` (metadata). Ids are uuid v7, time-ordered, so a
//! lexicographic sort of ids is a chronological sort. Rendered diff
//! reports land under `{workdir}/reports/`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::har::Har;

/// Lifecycle of a capture record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureStatus {
    InProgress,
    Completed,
    Failed,
}

/// Metadata persisted as `{id}.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub url: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: CaptureStatus,
}

impl CaptureRecord {
    #[must_use]
    pub fn har_file_name(&self) -> String {
        format!("{}.har", self.id)
    }

    #[must_use]
    pub fn metadata_file_name(&self) -> String {
        format!("{}.json", self.id)
    }
}

/// Directory-backed store of capture records.
#[derive(Debug)]
pub struct CaptureStore {
    captures_dir: PathBuf,
    reports_dir: PathBuf,
    // Serializes writers per record id; uncontended reads skip it
    record_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl CaptureStore {
    /// Open (creating if needed) a store rooted at `workdir`.
    pub fn open(workdir: impl AsRef<Path>) -> Result<Self> {
        let workdir = workdir.as_ref();
        let captures_dir = workdir.join("captures");
        let reports_dir = workdir.join("reports");
        std::fs::create_dir_all(&captures_dir).map_err(|e| Error::io(&captures_dir, e))?;
        std::fs::create_dir_all(&reports_dir).map_err(|e| Error::io(&reports_dir, e))?;
        Ok(Self {
            captures_dir,
            reports_dir,
            record_locks: DashMap::new(),
        })
    }

    #[must_use]
    pub fn captures_dir(&self) -> &Path {
        &self.captures_dir
    }

    #[must_use]
    pub fn reports_dir(&self) -> &Path {
        &self.reports_dir
    }

    fn lock_for(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.record_locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn metadata_path(&self, id: &str) -> PathBuf {
        self.captures_dir.join(format!("{id}.json"))
    }

    fn har_path(&self, id: &str) -> PathBuf {
        self.captures_dir.join(format!("{id}.har"))
    }

    /// Create a new in-progress record and persist its metadata.
    pub async fn create_baseline(
        &self,
        name: &str,
        url: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<CaptureRecord> {
        if name.trim().is_empty() {
            return Err(Error::Validation("capture name must not be empty".into()));
        }
        let record = CaptureRecord {
            // v7 is time-ordered: newest ids sort last
            id: uuid::Uuid::now_v7().to_string(),
            name: name.to_string(),
            labels,
            url: url.to_string(),
            created_at: Utc::now(),
            completed_at: None,
            status: CaptureStatus::InProgress,
        };
        self.write_metadata(&record).await?;
        info!(id = %record.id, name = %record.name, "capture record created");
        Ok(record)
    }

    /// Attach the finished HAR to a record. Single-shot: a record that is
    /// already completed or failed rejects the write, and the HAR file is
    /// never rewritten.
    pub async fn complete(&self, id: &str, har_bytes: &[u8]) -> Result<CaptureRecord> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut record = self.load_record(id).await?;
        if record.status != CaptureStatus::InProgress {
            return Err(Error::Capture(format!(
                "capture {id} is already {:?}; complete is single-shot",
                record.status
            )));
        }
        let har_path = self.har_path(id);
        tokio::fs::write(&har_path, har_bytes)
            .await
            .map_err(|e| Error::io(&har_path, e))?;
        record.status = CaptureStatus::Completed;
        record.completed_at = Some(Utc::now());
        self.write_metadata(&record).await?;
        info!(id, bytes = har_bytes.len(), "capture completed");
        Ok(record)
    }

    /// Mark a record failed (e.g. the session died before `complete`).
    pub async fn fail(&self, id: &str) -> Result<CaptureRecord> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        let mut record = self.load_record(id).await?;
        if record.status == CaptureStatus::Completed {
            return Err(Error::Capture(format!(
                "capture {id} already completed; cannot fail it"
            )));
        }
        record.status = CaptureStatus::Failed;
        self.write_metadata(&record).await?;
        Ok(record)
    }

    /// Flip in-progress records older than `ttl` to failed. Returns the
    /// ids that were expired.
    pub async fn expire_stale(&self, ttl: chrono::Duration) -> Result<Vec<String>> {
        let cutoff = Utc::now() - ttl;
        let mut expired = Vec::new();
        for record in self.list().await? {
            if record.status == CaptureStatus::InProgress && record.created_at < cutoff {
                warn!(id = %record.id, "expiring stale in-progress capture");
                self.fail(&record.id).await?;
                expired.push(record.id);
            }
        }
        Ok(expired)
    }

    /// All records, sorted by id (== creation order for v7 ids).
    pub async fn list(&self) -> Result<Vec<CaptureRecord>> {
        let mut records = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.captures_dir)
            .await
            .map_err(|e| Error::io(&self.captures_dir, e))?;
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| Error::io(&self.captures_dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read_metadata(&path).await {
                Ok(record) => records.push(record),
                Err(e) => warn!("skipping unreadable record {}: {e}", path.display()),
            }
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    pub async fn load_record(&self, id: &str) -> Result<CaptureRecord> {
        let path = self.metadata_path(id);
        if !path.exists() {
            return Err(Error::CaptureNotFound(id.to_string()));
        }
        self.read_metadata(&path).await
    }

    /// Load a completed record's HAR document.
    pub async fn load_har(&self, id: &str) -> Result<Har> {
        let record = self.load_record(id).await?;
        if record.status != CaptureStatus::Completed {
            return Err(Error::Capture(format!(
                "capture {id} is {:?}, not completed",
                record.status
            )));
        }
        let path = self.har_path(id);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| Error::io(&path, e))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::Capture(format!("capture {id} has a malformed HAR: {e}")))
    }

    /// Remove both files of a record.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        let metadata = self.metadata_path(id);
        if !metadata.exists() {
            return Err(Error::CaptureNotFound(id.to_string()));
        }
        tokio::fs::remove_file(&metadata)
            .await
            .map_err(|e| Error::io(&metadata, e))?;
        let har = self.har_path(id);
        if har.exists() {
            tokio::fs::remove_file(&har)
                .await
                .map_err(|e| Error::io(&har, e))?;
        }
        self.record_locks.remove(id);
        debug!(id, "capture deleted");
        Ok(())
    }

    /// Write a rendered report; the name is a timestamp, not an id.
    pub async fn write_report(&self, extension: &str, bytes: &[u8]) -> Result<PathBuf> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let path = self.reports_dir.join(format!("{stamp}.{extension}"));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| Error::io(&path, e))?;
        info!("report written: {}", path.display());
        Ok(path)
    }

    async fn write_metadata(&self, record: &CaptureRecord) -> Result<()> {
        let path = self.metadata_path(&record.id);
        let bytes = serde_json::to_vec_pretty(record)
            .map_err(|e| Error::Capture(format!("metadata serialization failed: {e}")))?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| Error::io(&path, e))
    }

    async fn read_metadata(&self, path: &Path) -> Result<CaptureRecord> {
        let bytes = tokio::fs::read(path).await.map_err(|e| Error::io(path, e))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::Capture(format!("malformed record {}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::har::{Creator, HarBuilder};

    fn har_bytes() -> Vec<u8> {
        HarBuilder::new(Creator::default(), None).to_json().unwrap()
    }

    #[tokio::test]
    async fn create_complete_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CaptureStore::open(dir.path()).unwrap();
        let record = store
            .create_baseline("login-page", "https://example.com/login", BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(record.status, CaptureStatus::InProgress);

        let completed = store.complete(&record.id, &har_bytes()).await.unwrap();
        assert_eq!(completed.status, CaptureStatus::Completed);
        assert!(completed.completed_at.is_some());

        let har = store.load_har(&record.id).await.unwrap();
        assert!(har.log.entries.is_empty());
    }

    #[tokio::test]
    async fn complete_is_single_shot() {
        let dir = tempfile::tempdir().unwrap();
        let store = CaptureStore::open(dir.path()).unwrap();
        let record = store
            .create_baseline("x", "https://example.com", BTreeMap::new())
            .await
            .unwrap();
        store.complete(&record.id, &har_bytes()).await.unwrap();
        let err = store.complete(&record.id, &har_bytes()).await.unwrap_err();
        assert!(matches!(err, Error::Capture(_)));
    }

    #[tokio::test]
    async fn ids_sort_chronologically() {
        let dir = tempfile::tempdir().unwrap();
        let store = CaptureStore::open(dir.path()).unwrap();
        let first = store
            .create_baseline("a", "https://example.com/a", BTreeMap::new())
            .await
            .unwrap();
        let second = store
            .create_baseline("b", "https://example.com/b", BTreeMap::new())
            .await
            .unwrap();
        assert!(first.id < second.id);
        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, first.id);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = CaptureStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.load_record("no-such-id").await.unwrap_err(),
            Error::CaptureNotFound(_)
        ));
        assert!(matches!(
            store.delete("no-such-id").await.unwrap_err(),
            Error::CaptureNotFound(_)
        ));
    }

    #[tokio::test]
    async fn expire_flips_old_in_progress_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = CaptureStore::open(dir.path()).unwrap();
        let record = store
            .create_baseline("stale", "https://example.com", BTreeMap::new())
            .await
            .unwrap();
        // zero TTL: anything already created counts as stale
        let expired = store.expire_stale(chrono::Duration::zero()).await.unwrap();
        assert_eq!(expired, vec![record.id.clone()]);
        let reloaded = store.load_record(&record.id).await.unwrap();
        assert_eq!(reloaded.status, CaptureStatus::Failed);
    }

    #[tokio::test]
    async fn delete_removes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = CaptureStore::open(dir.path()).unwrap();
        let record = store
            .create_baseline("gone", "https://example.com", BTreeMap::new())
            .await
            .unwrap();
        store.complete(&record.id, &har_bytes()).await.unwrap();
        store.delete(&record.id).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }
}
