//! Capture event bus
//!
//! Optional observability: the session and recorder publish progress
//! events that external listeners can subscribe to. Delivery is
//! best-effort broadcast; nothing in the capture path awaits a
//! subscriber, and a missing subscriber is not an error.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::broadcast;

/// Reason the bus shut down.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum ShutdownReason {
    /// Capture completed normally
    Completed,
    /// Capture failed
    Error(String),
    /// Caller cancelled the capture
    Cancelled,
}

/// Events emitted during a capture session.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum CaptureEvent {
    /// Browser process launched or attached
    SessionReady {
        browser_version: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    /// Navigation committed
    NavigationStarted {
        url: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    /// Stability detector reached a verdict
    PageSettled {
        url: String,
        timed_out: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    /// One HAR entry was emitted
    EntryRecorded {
        url: String,
        status: i64,
        resource_type: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    /// The interceptor failed a request on a block rule
    RequestBlocked {
        url: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    /// Bus is shutting down; subscribers should exit their loops
    Shutdown {
        reason: ShutdownReason,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Error surfaced to subscribers.
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    /// Receiver fell behind and missed events
    #[error("receiver lagged behind, missed {0} events")]
    ReceiverLagged(u64),

    /// Bus or receiver was closed
    #[error("event bus shutdown")]
    Shutdown,
}

/// Broadcast bus for [`CaptureEvent`]s.
#[derive(Debug)]
pub struct CaptureEventBus {
    sender: broadcast::Sender<CaptureEvent>,
    shutdown_flag: AtomicBool,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl CaptureEventBus {
    /// `capacity` bounds the per-subscriber backlog; slow subscribers lag
    /// rather than block publishers.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            shutdown_flag: AtomicBool::new(false),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Publish one event. Best-effort: with no subscribers the event is
    /// counted as dropped and the capture continues.
    pub fn publish(&self, event: CaptureEvent) {
        if self.shutdown_flag.load(Ordering::Acquire) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        match self.sender.send(event) {
            Ok(_) => {
                self.published.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Subscribe to all events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a predicate; non-matching events are skipped while
    /// draining the backlog, never returned.
    pub fn subscribe_filtered<F>(&self, filter: F) -> FilteredReceiver<F>
    where
        F: Fn(&CaptureEvent) -> bool + Send + Sync + 'static,
    {
        FilteredReceiver {
            receiver: self.sender.subscribe(),
            filter,
        }
    }

    /// Announce shutdown to subscribers and stop accepting events.
    pub fn shutdown(&self, reason: ShutdownReason) {
        let _ = self.sender.send(CaptureEvent::Shutdown {
            reason,
            timestamp: chrono::Utc::now(),
        });
        self.shutdown_flag.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    #[must_use]
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for CaptureEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Receiver that only yields events passing its filter.
pub struct FilteredReceiver<F>
where
    F: Fn(&CaptureEvent) -> bool + Send + Sync + 'static,
{
    receiver: broadcast::Receiver<CaptureEvent>,
    filter: F,
}

impl<F> FilteredReceiver<F>
where
    F: Fn(&CaptureEvent) -> bool + Send + Sync + 'static,
{
    /// Wait for the next matching event. Buffered non-matching events are
    /// skipped without loss of later ones.
    pub async fn recv(&mut self) -> Result<CaptureEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if (self.filter)(&event) {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return Err(EventBusError::Shutdown),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    return Err(EventBusError::ReceiverLagged(n));
                }
            }
        }
    }

    /// Non-blocking variant; `Ok(None)` when nothing matching is buffered.
    pub fn try_recv(&mut self) -> Result<Option<CaptureEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if (self.filter)(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Closed) => return Err(EventBusError::Shutdown),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Err(EventBusError::ReceiverLagged(n));
                }
            }
        }
    }
}
