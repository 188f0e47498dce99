//! Page stability detection
//!
//! Decides when a page is "done loading" for capture purposes by
//! combining independent signals: network-idle, DOM-stable,
//! resource-loaded, and an optional visible-selector probe. The
//! configured conjunction of enabled signals must hold on a single poll
//! tick; the overall wait is bounded by a timeout that reports
//! [`Readiness::Timeout`] rather than an error, so a slow page still
//! gets captured.

pub mod signals;

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::{Duration, Instant};

use chromiumoxide::Page;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use signals::{DomStableSignal, NetworkIdleSignal, ResourceLoadedSignal, SelectorSignal};

/// Thresholds for the stability signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityConfig {
    /// Enable the network-idle signal
    pub network_idle: bool,
    /// In-flight request count treated as "idle" (inclusive)
    pub max_in_flight: usize,
    /// How long the in-flight count must stay at or below the threshold
    pub network_quiet_ms: u64,
    /// Enable the DOM-stable signal
    pub dom_stable: bool,
    /// How long the DOM must go without mutations
    pub dom_quiet_ms: u64,
    /// Enable the resource-loaded signal
    pub resources_loaded: bool,
    /// CSS selector that must resolve to a visible element
    pub selector: Option<String>,
    /// Poll cadence
    pub poll_interval_ms: u64,
    /// Overall bound on the wait
    pub timeout_secs: u64,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            network_idle: true,
            max_in_flight: 2,
            network_quiet_ms: 500,
            dom_stable: true,
            dom_quiet_ms: 500,
            resources_loaded: true,
            selector: None,
            poll_interval_ms: 100,
            timeout_secs: 30,
        }
    }
}

/// Outcome of a stability wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Readiness {
    /// All enabled signals held on one tick
    Stable,
    /// The deadline passed first; the caller may proceed
    Timeout,
}

/// Combinator over the enabled signals. Owns per-signal state; pure over
/// their outputs.
pub struct StabilityDetector {
    network_idle: Option<NetworkIdleSignal>,
    dom_stable: Option<DomStableSignal>,
    resources: Option<ResourceLoadedSignal>,
    selector: Option<SelectorSignal>,
    poll_interval: Duration,
    timeout: Duration,
}

impl StabilityDetector {
    /// Build a detector. `in_flight` is the recorder's live request
    /// counter; without it the network-idle signal is disabled.
    #[must_use]
    pub fn new(config: &StabilityConfig, in_flight: Option<Arc<AtomicUsize>>) -> Self {
        let network_idle = match (config.network_idle, in_flight) {
            (true, Some(counter)) => Some(NetworkIdleSignal::new(
                counter,
                config.max_in_flight,
                Duration::from_millis(config.network_quiet_ms),
            )),
            (true, None) => {
                warn!("network-idle signal requested without a request counter; disabled");
                None
            }
            _ => None,
        };
        Self {
            network_idle,
            dom_stable: config
                .dom_stable
                .then(|| DomStableSignal::new(Duration::from_millis(config.dom_quiet_ms))),
            resources: config.resources_loaded.then(ResourceLoadedSignal::default),
            selector: config.selector.as_deref().map(SelectorSignal::new),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(10)),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// True when no signal is enabled; the wait degenerates to a no-op.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.network_idle.is_none()
            && self.dom_stable.is_none()
            && self.resources.is_none()
            && self.selector.is_none()
    }

    /// Poll until every enabled signal holds, the timeout passes, or the
    /// token is cancelled.
    pub async fn wait(&mut self, page: &Page, cancel: &CancelToken) -> Result<Readiness> {
        if self.is_empty() {
            return Ok(Readiness::Stable);
        }
        let deadline = Instant::now() + self.timeout;
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => return Err(Error::Cancelled),
                _ = ticker.tick() => {}
            }
            let now = Instant::now();
            if now >= deadline {
                debug!("stability wait timed out");
                return Ok(Readiness::Timeout);
            }
            if self.all_satisfied(page, now).await? {
                debug!("page stable");
                return Ok(Readiness::Stable);
            }
        }
    }

    async fn all_satisfied(&mut self, page: &Page, now: Instant) -> Result<bool> {
        if let Some(signal) = &mut self.network_idle {
            if !signal.poll(now) {
                return Ok(false);
            }
        }
        if let Some(signal) = &mut self.dom_stable {
            if !signal.poll(page).await? {
                return Ok(false);
            }
        }
        if let Some(signal) = &self.resources {
            if !signal.poll(page).await? {
                return Ok(false);
            }
        }
        if let Some(signal) = &self.selector {
            if !signal.poll(page).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn defaults_match_documented_thresholds() {
        let config = StabilityConfig::default();
        assert_eq!(config.max_in_flight, 2);
        assert_eq!(config.network_quiet_ms, 500);
        assert_eq!(config.dom_quiet_ms, 500);
        assert_eq!(config.poll_interval_ms, 100);
    }

    #[test]
    fn detector_without_signals_is_empty() {
        let config = StabilityConfig {
            network_idle: false,
            dom_stable: false,
            resources_loaded: false,
            selector: None,
            ..Default::default()
        };
        let detector = StabilityDetector::new(&config, None);
        assert!(detector.is_empty());
    }

    #[test]
    fn network_idle_without_counter_is_disabled() {
        let config = StabilityConfig {
            dom_stable: false,
            resources_loaded: false,
            ..Default::default()
        };
        let detector = StabilityDetector::new(&config, None);
        assert!(detector.is_empty());
    }

    #[test]
    fn network_idle_with_counter_is_armed() {
        let config = StabilityConfig {
            dom_stable: false,
            resources_loaded: false,
            ..Default::default()
        };
        let counter = Arc::new(AtomicUsize::new(0));
        counter.store(0, Ordering::Release);
        let detector = StabilityDetector::new(&config, Some(counter));
        assert!(!detector.is_empty());
    }
}
