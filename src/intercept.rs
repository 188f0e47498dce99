//! Fetch-domain request interception
//!
//! Once the Fetch domain is enabled with pattern `*`, every request the
//! page makes parks on a `requestPaused` event until someone answers it;
//! a single unanswered event wedges the page. The listener therefore
//! never decides anything itself: it forwards events into a bounded
//! queue, and on overflow answers continue-unmodified inline and counts
//! the drop. The worker answers each queued event exactly once: fail
//! (block rule), continue-with-override (active method rewrite), or
//! continue unmodified.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams, EventRequestPaused, RequestPattern,
};
use chromiumoxide::cdp::browser_protocol::network::ErrorReason;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::events::{CaptureEvent, CaptureEventBus};
use crate::rules::RuleMatcher;

/// Default bound on the paused-event queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// An in-progress `http_request` override: requests whose URL equals the
/// target (or extends it, for redirects) continue with this method and
/// body instead of what the page issued.
#[derive(Debug, Clone)]
pub struct RewriteTarget {
    pub url: String,
    pub method: String,
    pub body: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
struct ActiveRewrite {
    target: RewriteTarget,
    /// Cleared when the browser rejects the body override
    body_delivered: Arc<AtomicBool>,
}

/// Handle to the running interceptor.
#[derive(Debug)]
pub struct Interceptor {
    rewrite: Arc<Mutex<Option<ActiveRewrite>>>,
    answered: Arc<AtomicU64>,
    blocked: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    listener_task: JoinHandle<()>,
    worker_task: JoinHandle<()>,
}

impl Interceptor {
    /// Enable the Fetch domain on `page` and start the listener/worker
    /// pair. `handle_auth` additionally routes `authRequired` events to
    /// the session's responder.
    pub async fn install(
        page: &Page,
        rules: Arc<RuleMatcher>,
        bus: Option<Arc<CaptureEventBus>>,
        cancel: CancelToken,
        queue_capacity: usize,
        handle_auth: bool,
    ) -> Result<Self> {
        page.execute(EnableParams {
            patterns: Some(vec![RequestPattern {
                url_pattern: Some("*".into()),
                resource_type: None,
                request_stage: None,
            }]),
            handle_auth_requests: Some(handle_auth),
        })
        .await?;

        let mut paused = page.event_listener::<EventRequestPaused>().await?;
        let (queue_tx, mut queue_rx) =
            mpsc::channel::<Arc<EventRequestPaused>>(queue_capacity.max(1));

        let answered = Arc::new(AtomicU64::new(0));
        let blocked = Arc::new(AtomicU64::new(0));
        let dropped = Arc::new(AtomicU64::new(0));
        let rewrite: Arc<Mutex<Option<ActiveRewrite>>> = Arc::new(Mutex::new(None));

        let listener_task = {
            let page = page.clone();
            let dropped = dropped.clone();
            let answered = answered.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    let event = tokio::select! {
                        () = cancel.cancelled() => break,
                        event = paused.next() => match event {
                            Some(event) => event,
                            None => break,
                        },
                    };
                    match queue_tx.try_send(event) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(event)) => {
                            // Overflow policy: answer inline, count the drop
                            dropped.fetch_add(1, Ordering::Relaxed);
                            answered.fetch_add(1, Ordering::Relaxed);
                            let page = page.clone();
                            let request_id = event.request_id.clone();
                            tokio::spawn(async move {
                                if let Err(e) =
                                    page.execute(ContinueRequestParams::new(request_id)).await
                                {
                                    debug!("overflow continue failed: {e}");
                                }
                            });
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => break,
                    }
                }
                trace!("interceptor listener exited");
            })
        };

        let worker_task = {
            let page = page.clone();
            let rules = rules.clone();
            let rewrite = rewrite.clone();
            let answered = answered.clone();
            let blocked = blocked.clone();
            tokio::spawn(async move {
                while let Some(event) = queue_rx.recv().await {
                    let active = rewrite.lock().clone();
                    answer_one(&page, &rules, active, bus.as_deref(), &blocked, &event).await;
                    answered.fetch_add(1, Ordering::Relaxed);
                }
                trace!("interceptor worker exited");
            })
        };

        Ok(Self {
            rewrite,
            answered,
            blocked,
            dropped,
            listener_task,
            worker_task,
        })
    }

    /// Arm a method/body rewrite. Returns the delivery flag: it stays
    /// `true` unless the browser rejects the body override and the
    /// request is continued without it.
    pub fn set_rewrite(&self, target: RewriteTarget) -> Arc<AtomicBool> {
        let body_delivered = Arc::new(AtomicBool::new(true));
        *self.rewrite.lock() = Some(ActiveRewrite {
            target,
            body_delivered: body_delivered.clone(),
        });
        body_delivered
    }

    /// Disarm the rewrite after the forced navigation settles.
    pub fn clear_rewrite(&self) {
        *self.rewrite.lock() = None;
    }

    #[must_use]
    pub fn answered_count(&self) -> u64 {
        self.answered.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn blocked_count(&self) -> u64 {
        self.blocked.load(Ordering::Relaxed)
    }

    /// Events answered by the overflow path instead of the worker.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop both tasks. Pending queue items have already been answered by
    /// the worker loop draining before exit.
    pub fn shutdown(&self) {
        self.listener_task.abort();
        self.worker_task.abort();
    }
}

async fn answer_one(
    page: &Page,
    rules: &RuleMatcher,
    active: Option<ActiveRewrite>,
    bus: Option<&CaptureEventBus>,
    blocked: &AtomicU64,
    event: &EventRequestPaused,
) {
    let url = event.request.url.as_str();
    let request_id = event.request_id.clone();

    if rules.should_block(url) {
        blocked.fetch_add(1, Ordering::Relaxed);
        debug!(url, "failing blocked request");
        if let Some(bus) = bus {
            bus.publish(CaptureEvent::RequestBlocked {
                url: url.to_string(),
                timestamp: chrono::Utc::now(),
            });
        }
        if let Err(e) = page
            .execute(chromiumoxide::cdp::browser_protocol::fetch::FailRequestParams::new(
                request_id,
                ErrorReason::AccessDenied,
            ))
            .await
        {
            debug!("failRequest error (request may be gone): {e}");
        }
        return;
    }

    if let Some(active) = active
        && matches_target(url, &active.target.url)
    {
        continue_with_override(page, request_id, &active).await;
        return;
    }

    if let Err(e) = page.execute(ContinueRequestParams::new(request_id)).await {
        debug!("continueRequest error (request may be gone): {e}");
    }
}

/// Exact match, or the paused URL extends the target (redirect landing on
/// a longer URL, trailing slash, query string).
fn matches_target(url: &str, target: &str) -> bool {
    url == target || url.starts_with(target)
}

async fn continue_with_override(
    page: &Page,
    request_id: chromiumoxide::cdp::browser_protocol::fetch::RequestId,
    active: &ActiveRewrite,
) {
    use base64::Engine as _;

    let with_body = active.target.body.as_ref().map(|body| {
        base64::engine::general_purpose::STANDARD.encode(body)
    });

    let mut builder = ContinueRequestParams::builder()
        .request_id(request_id.clone())
        .method(active.target.method.clone());
    if let Some(encoded) = &with_body {
        builder = builder.post_data(chromiumoxide::Binary::from(encoded.clone()));
    }
    let params = match builder.build() {
        Ok(params) => params,
        Err(e) => {
            warn!("continueRequest build failed: {e}");
            let _ = page.execute(ContinueRequestParams::new(request_id)).await;
            return;
        }
    };

    match page.execute(params).await {
        Ok(_) => {
            debug!(
                method = %active.target.method,
                url = %active.target.url,
                "request method overridden"
            );
        }
        Err(e) if with_body.is_some() => {
            // Some browser builds reject postData on continueRequest.
            // Fall back to method-only and record that the body was lost.
            warn!("body override rejected ({e}); continuing without body");
            active.body_delivered.store(false, Ordering::Release);
            let fallback = ContinueRequestParams::builder()
                .request_id(request_id.clone())
                .method(active.target.method.clone())
                .build();
            match fallback {
                Ok(params) => {
                    if let Err(e) = page.execute(params).await {
                        debug!("method-only fallback failed: {e}");
                    }
                }
                Err(e) => {
                    warn!("fallback build failed: {e}");
                    let _ = page.execute(ContinueRequestParams::new(request_id)).await;
                }
            }
        }
        Err(e) => {
            debug!("continueRequest with override failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_matching_is_exact_or_prefix() {
        assert!(matches_target("https://e.com/api", "https://e.com/api"));
        assert!(matches_target("https://e.com/api?retry=1", "https://e.com/api"));
        assert!(matches_target("https://e.com/api/", "https://e.com/api"));
        assert!(!matches_target("https://e.com/other", "https://e.com/api"));
        assert!(!matches_target("https://e.com/ap", "https://e.com/api"));
    }

    #[test]
    fn rewrite_flag_starts_delivered() {
        let target = RewriteTarget {
            url: "https://e.com/api".into(),
            method: "POST".into(),
            body: Some(b"x".to_vec()),
        };
        let active = ActiveRewrite {
            target,
            body_delivered: Arc::new(AtomicBool::new(true)),
        };
        assert!(active.body_delivered.load(Ordering::Acquire));
    }
}
