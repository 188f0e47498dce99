//! In-memory HAR document and its JSON projection

pub mod model;

pub use model::{
    BrowserInfo, Cache, Content, Cookie, Creator, Entry, HAR_VERSION, Har, Header, Log, Page,
    PageTimings, PostData, QueryString, Request, Response, Timings,
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::Result;

/// The single page id used for every entry in a one-page document.
pub const PAGE_ID: &str = "page_1";

/// Thread-safe owner of a HAR document under construction.
///
/// Entries are appended in arrival order and sorted by `startedDateTime`
/// only at serialization time, so concurrent recorders never contend on
/// ordering. `to_json` is deterministic for a given entry set.
#[derive(Debug)]
pub struct HarBuilder {
    log: Mutex<Log>,
}

impl HarBuilder {
    #[must_use]
    pub fn new(creator: Creator, browser: Option<BrowserInfo>) -> Self {
        Self {
            log: Mutex::new(Log {
                version: HAR_VERSION.to_string(),
                creator,
                browser,
                pages: Vec::new(),
                entries: Vec::new(),
                comment: None,
            }),
        }
    }

    /// Install the document's single page. Later calls replace it and
    /// re-point existing entries at the new id.
    pub fn set_page(&self, started: DateTime<Utc>, title: impl Into<String>) {
        let mut log = self.log.lock();
        log.pages = vec![Page {
            started_date_time: started,
            id: PAGE_ID.to_string(),
            title: title.into(),
            page_timings: PageTimings::default(),
        }];
        for entry in &mut log.entries {
            entry.pageref = Some(PAGE_ID.to_string());
        }
    }

    /// Record page-level load timings (milliseconds from page start).
    pub fn set_page_timings(&self, on_content_load: Option<f64>, on_load: Option<f64>) {
        let mut log = self.log.lock();
        if let Some(page) = log.pages.first_mut() {
            page.page_timings = PageTimings {
                on_content_load,
                on_load,
            };
        }
    }

    /// Append one entry. The pageref is stamped here so callers never
    /// have to know the page id.
    pub fn add_entry(&self, mut entry: Entry) {
        let mut log = self.log.lock();
        if !log.pages.is_empty() {
            entry.pageref = Some(PAGE_ID.to_string());
        }
        log.entries.push(entry);
    }

    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.log.lock().entries.len()
    }

    /// Attach a comment to every entry matching method and URL. Used to
    /// mark conditions discovered after emission, e.g. a POST body the
    /// browser refused to deliver.
    pub fn annotate_entry(&self, method: &str, url: &str, comment: &str) {
        let mut log = self.log.lock();
        for entry in &mut log.entries {
            if entry.request.method == method && entry.request.url.starts_with(url) {
                entry.comment = Some(comment.to_string());
            }
        }
    }

    /// Snapshot of the current entries, sorted by `startedDateTime`.
    #[must_use]
    pub fn entries(&self) -> Vec<Entry> {
        let mut entries = self.log.lock().entries.clone();
        sort_entries(&mut entries);
        entries
    }

    /// Serialize the full document. Stable: the same entry set always
    /// yields byte-identical output.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let har = self.snapshot();
        serde_json::to_vec_pretty(&har)
            .map_err(|e| crate::error::Error::Capture(format!("HAR serialization failed: {e}")))
    }

    /// Clone the document in its output form.
    #[must_use]
    pub fn snapshot(&self) -> Har {
        let mut log = self.log.lock().clone();
        sort_entries(&mut log.entries);
        Har { log }
    }

    /// Consume the builder, yielding the finished document.
    #[must_use]
    pub fn into_har(self) -> Har {
        let mut log = self.log.into_inner();
        sort_entries(&mut log.entries);
        Har { log }
    }
}

impl Default for HarBuilder {
    fn default() -> Self {
        Self::new(Creator::default(), None)
    }
}

fn sort_entries(entries: &mut [Entry]) {
    // Stable sort keeps arrival order for identical timestamps
    entries.sort_by_key(|e| e.started_date_time);
}

/// Wrap loose entries (e.g. a re-read NDJSON stream) in a HAR document.
#[must_use]
pub fn wrap_entries(mut entries: Vec<Entry>, creator: Creator) -> Har {
    sort_entries(&mut entries);
    Har {
        log: Log {
            version: HAR_VERSION.to_string(),
            creator,
            browser: None,
            pages: Vec::new(),
            entries,
            comment: None,
        },
    }
}
