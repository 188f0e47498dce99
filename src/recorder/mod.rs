//! Network-domain recording
//!
//! One actor task owns the transaction table and consumes every Network
//! event stream, so per-`requestId` processing is serialized without a
//! lock. Terminal events project the transaction into a HAR entry, which
//! flows through the filter stage into the batch document and, when a
//! sink is attached, onto the NDJSON stream in terminal-arrival order.

pub mod cookies;
pub mod transaction;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventDataReceived, EventLoadingFailed, EventLoadingFinished,
    EventRequestWillBeSent, EventRequestWillBeSentExtraInfo, EventResponseReceived,
    EventResponseReceivedExtraInfo, GetResponseBodyParams,
};
use chromiumoxide::cdp::browser_protocol::page::{EventDomContentEventFired, EventLoadEventFired};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::events::{CaptureEvent, CaptureEventBus};
use crate::filter::FilterStage;
use crate::har::HarBuilder;
use crate::rules::RuleMatcher;
use crate::session::options::BodyCapture;
use transaction::{ResponseMeta, Transaction};

/// Everything the recorder actor needs at install time.
pub struct RecorderConfig {
    pub rules: Arc<RuleMatcher>,
    pub har: Arc<HarBuilder>,
    pub filter: Arc<FilterStage>,
    pub body_capture: BodyCapture,
    /// NDJSON sink; entries stream here in terminal-arrival order
    pub stream: Option<mpsc::Sender<String>>,
    pub bus: Option<Arc<CaptureEventBus>>,
}

/// Handle to the running recorder.
#[derive(Debug)]
pub struct NetworkRecorder {
    in_flight: Arc<AtomicUsize>,
    entries_emitted: Arc<AtomicU64>,
    bytes_received: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl NetworkRecorder {
    /// Enable the Network domain and start the actor.
    pub async fn install(page: &Page, config: RecorderConfig, cancel: CancelToken) -> Result<Self> {
        page.execute(EnableParams::default()).await?;

        let requests = page.event_listener::<EventRequestWillBeSent>().await?;
        let request_extras = page
            .event_listener::<EventRequestWillBeSentExtraInfo>()
            .await?;
        let responses = page.event_listener::<EventResponseReceived>().await?;
        let response_extras = page
            .event_listener::<EventResponseReceivedExtraInfo>()
            .await?;
        let data = page.event_listener::<EventDataReceived>().await?;
        let finished = page.event_listener::<EventLoadingFinished>().await?;
        let failed = page.event_listener::<EventLoadingFailed>().await?;
        let dom_content = page.event_listener::<EventDomContentEventFired>().await?;
        let load_fired = page.event_listener::<EventLoadEventFired>().await?;

        let in_flight = Arc::new(AtomicUsize::new(0));
        let entries_emitted = Arc::new(AtomicU64::new(0));
        let bytes_received = Arc::new(AtomicU64::new(0));

        let mut actor = Actor {
            page: page.clone(),
            table: HashMap::new(),
            pending_request_extras: HashMap::new(),
            pending_response_extras: HashMap::new(),
            config,
            in_flight: in_flight.clone(),
            entries_emitted: entries_emitted.clone(),
            bytes_received: bytes_received.clone(),
            page_start_mono: None,
        };

        let task = tokio::spawn(async move {
            let mut requests = requests;
            let mut request_extras = request_extras;
            let mut responses = responses;
            let mut response_extras = response_extras;
            let mut data = data;
            let mut finished = finished;
            let mut failed = failed;
            let mut dom_content = dom_content;
            let mut load_fired = load_fired;

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        actor.drain_cancelled().await;
                        break;
                    }
                    Some(event) = requests.next() => actor.on_request(&event).await,
                    Some(event) = request_extras.next() => actor.on_request_extra(&event),
                    Some(event) = responses.next() => actor.on_response(&event),
                    Some(event) = response_extras.next() => actor.on_response_extra(&event),
                    Some(event) = finished.next() => actor.on_finished(&event).await,
                    Some(event) = failed.next() => actor.on_failed(&event).await,
                    Some(event) = dom_content.next() => actor.on_dom_content(&event),
                    Some(event) = load_fired.next() => actor.on_load(&event),
                    // Byte accounting polls last: a dropped tick only
                    // skews counters, never correctness
                    Some(event) = data.next() => actor.on_data(&event),
                    else => break,
                }
            }
            trace!("network recorder exited");
        });

        Ok(Self {
            in_flight,
            entries_emitted,
            bytes_received,
            task,
        })
    }

    /// Live in-flight request count, consumed by the network-idle signal.
    #[must_use]
    pub fn in_flight_counter(&self) -> Arc<AtomicUsize> {
        self.in_flight.clone()
    }

    #[must_use]
    pub fn entries_emitted(&self) -> u64 {
        self.entries_emitted.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Wait for the actor to finish after cancellation. One-shot: meant
    /// to be called exactly once, from session teardown.
    pub async fn join(&mut self) {
        if let Err(e) = (&mut self.task).await {
            if !e.is_cancelled() {
                warn!("recorder task panicked: {e}");
            }
        }
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

struct Actor {
    page: Page,
    table: HashMap<String, Transaction>,
    // ExtraInfo events can outrun requestWillBeSent; stash until it lands
    pending_request_extras: HashMap<String, chromiumoxide::cdp::browser_protocol::network::Headers>,
    pending_response_extras:
        HashMap<String, chromiumoxide::cdp::browser_protocol::network::Headers>,
    config: RecorderConfig,
    in_flight: Arc<AtomicUsize>,
    entries_emitted: Arc<AtomicU64>,
    bytes_received: Arc<AtomicU64>,
    page_start_mono: Option<f64>,
}

impl Actor {
    async fn on_request(&mut self, event: &EventRequestWillBeSent) {
        let id = event.request_id.inner().to_string();

        // A redirectResponse closes the predecessor under the same id
        let mut redirect_from = None;
        if let Some(redirect) = &event.redirect_response {
            if let Some(mut prev) = self.table.remove(&id) {
                redirect_from = Some(prev.url.clone());
                prev.set_response(ResponseMeta::from(redirect));
                prev.finish(*event.timestamp.inner(), redirect.encoded_data_length);
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
                self.emit(prev).await;
            }
        }

        // Blocked URLs never consume a transaction slot
        if self.config.rules.should_block(&event.request.url) {
            trace!(url = %event.request.url, "skipping blocked request");
            return;
        }

        let mut tx = Transaction::from_request_event(event);
        tx.redirect_from = redirect_from;
        if let Some(headers) = self.pending_request_extras.remove(&id) {
            tx.merge_request_extra(&headers);
        }
        if let Some(headers) = self.pending_response_extras.remove(&id) {
            tx.merge_response_extra(&headers);
        }
        if self.page_start_mono.is_none()
            && tx.resource_type.as_deref() == Some("document")
        {
            self.page_start_mono = Some(tx.start_mono);
        }
        if self.table.insert(id, tx).is_none() {
            self.in_flight.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn on_request_extra(&mut self, event: &EventRequestWillBeSentExtraInfo) {
        let id = event.request_id.inner().to_string();
        match self.table.get_mut(&id) {
            Some(tx) => tx.merge_request_extra(&event.headers),
            None => {
                self.pending_request_extras
                    .insert(id, event.headers.clone());
            }
        }
    }

    fn on_response(&mut self, event: &EventResponseReceived) {
        let id = event.request_id.inner().to_string();
        if let Some(tx) = self.table.get_mut(&id) {
            if tx.resource_type.is_none() {
                tx.resource_type = Some(format!("{:?}", event.r#type).to_ascii_lowercase());
            }
            tx.set_response(ResponseMeta::from(&event.response));
        }
    }

    fn on_response_extra(&mut self, event: &EventResponseReceivedExtraInfo) {
        let id = event.request_id.inner().to_string();
        match self.table.get_mut(&id) {
            Some(tx) => tx.merge_response_extra(&event.headers),
            None => {
                self.pending_response_extras
                    .insert(id, event.headers.clone());
            }
        }
    }

    fn on_data(&mut self, event: &EventDataReceived) {
        let id = event.request_id.inner().to_string();
        if let Some(tx) = self.table.get_mut(&id) {
            tx.add_data(event.data_length, event.encoded_data_length);
            self.bytes_received
                .fetch_add(event.encoded_data_length.max(0) as u64, Ordering::Relaxed);
        }
    }

    async fn on_finished(&mut self, event: &EventLoadingFinished) {
        let id = event.request_id.inner().to_string();
        let Some(mut tx) = self.table.remove(&id) else {
            return;
        };
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        tx.finish(*event.timestamp.inner(), event.encoded_data_length);

        if self.config.body_capture.wants(tx.mime_type()) {
            self.fetch_body(&mut tx, event).await;
        }
        self.emit(tx).await;
    }

    async fn fetch_body(&self, tx: &mut Transaction, event: &EventLoadingFinished) {
        let cap = self.config.body_capture.max_bytes;
        if cap > 0 && tx.decoded_length > 0 && tx.decoded_length as u64 > cap {
            debug!(url = %tx.url, "body exceeds capture cap; skipping fetch");
            return;
        }
        match self
            .page
            .execute(GetResponseBodyParams::new(event.request_id.clone()))
            .await
        {
            Ok(body) => {
                if cap > 0 && body.body.len() as u64 > cap {
                    debug!(url = %tx.url, "fetched body over cap; dropping");
                    return;
                }
                tx.body = Some((body.body.clone(), body.base64_encoded));
            }
            // Missing bodies are logged, the entry is still emitted
            Err(e) => debug!(url = %tx.url, "response body unavailable: {e}"),
        }
    }

    async fn on_failed(&mut self, event: &EventLoadingFailed) {
        let id = event.request_id.inner().to_string();
        let Some(mut tx) = self.table.remove(&id) else {
            return;
        };
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        let reason = if event.canceled == Some(true) && event.error_text.is_empty() {
            "canceled".to_string()
        } else {
            event.error_text.clone()
        };
        tx.fail(*event.timestamp.inner(), reason);
        self.emit(tx).await;
    }

    fn on_dom_content(&mut self, event: &EventDomContentEventFired) {
        if let Some(start) = self.page_start_mono {
            let ms = (*event.timestamp.inner() - start) * 1000.0;
            self.config.har.set_page_timings(Some(ms.max(0.0)), None);
        }
    }

    fn on_load(&mut self, event: &EventLoadEventFired) {
        if let Some(start) = self.page_start_mono {
            let ms = (*event.timestamp.inner() - start) * 1000.0;
            self.config.har.set_page_timings(None, Some(ms.max(0.0)));
        }
    }

    /// Cancellation drains in-flight transactions as failed entries.
    async fn drain_cancelled(&mut self) {
        let ids: Vec<String> = self.table.keys().cloned().collect();
        for id in ids {
            if let Some(mut tx) = self.table.remove(&id) {
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
                let start = tx.start_mono;
                tx.fail(start, "cancelled".to_string());
                self.emit(tx).await;
            }
        }
    }

    async fn emit(&mut self, tx: Transaction) {
        let url = tx.url.clone();
        if !self.config.rules.allowed(&url) || self.config.rules.should_omit(&url) {
            trace!(url = %url, "entry omitted by rules");
            return;
        }
        let entry = tx.to_entry();
        if let Some(bus) = &self.config.bus {
            bus.publish(CaptureEvent::EntryRecorded {
                url: url.clone(),
                status: entry.response.status,
                resource_type: entry.resource_type.clone(),
                timestamp: chrono::Utc::now(),
            });
        }
        let Some(entry) = self.config.filter.apply(entry) else {
            trace!(url = %url, "entry dropped by filter");
            return;
        };
        if let Some(sink) = &self.config.stream {
            match self.config.filter.render_line(&entry) {
                Ok(line) => {
                    if sink.send(line).await.is_err() {
                        debug!("NDJSON sink closed; continuing batch-only");
                    }
                }
                Err(e) => warn!("streaming render failed: {e}"),
            }
        }
        self.config.har.add_entry(entry);
        self.entries_emitted.fetch_add(1, Ordering::Relaxed);
    }
}
