//! Individual readiness signals
//!
//! Each signal is a self-contained observer with its own state; the
//! detector combines their outputs without knowing how they work.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chromiumoxide::Page;
use tracing::trace;

use crate::error::Result;

/// Network-idle: true once the in-flight request count has stayed at or
/// below the threshold for the whole quiet window.
#[derive(Debug)]
pub struct NetworkIdleSignal {
    in_flight: Arc<AtomicUsize>,
    max_in_flight: usize,
    quiet_window: Duration,
    below_since: Option<Instant>,
}

impl NetworkIdleSignal {
    #[must_use]
    pub fn new(in_flight: Arc<AtomicUsize>, max_in_flight: usize, quiet_window: Duration) -> Self {
        Self {
            in_flight,
            max_in_flight,
            quiet_window,
            below_since: None,
        }
    }

    pub fn poll(&mut self, now: Instant) -> bool {
        let current = self.in_flight.load(Ordering::Acquire);
        if current <= self.max_in_flight {
            let since = *self.below_since.get_or_insert(now);
            let quiet = now.duration_since(since) >= self.quiet_window;
            trace!(current, quiet, "network-idle poll");
            quiet
        } else {
            self.below_since = None;
            false
        }
    }
}

const MUTATION_PROBE_INSTALL: &str = r#"
(() => {
    if (window.__harcapLastMutation === undefined) {
        window.__harcapLastMutation = Date.now();
        const observer = new MutationObserver(() => {
            window.__harcapLastMutation = Date.now();
        });
        observer.observe(document.documentElement || document, {
            childList: true,
            subtree: true,
            attributes: true,
            characterData: true
        });
    }
    return true;
})()
"#;

const MUTATION_PROBE_QUERY: &str =
    "Date.now() - (window.__harcapLastMutation === undefined ? 0 : window.__harcapLastMutation)";

/// DOM-stable: no mutations observed for the quiet window, measured by a
/// MutationObserver injected into the page.
#[derive(Debug)]
pub struct DomStableSignal {
    quiet_window: Duration,
    installed: bool,
}

impl DomStableSignal {
    #[must_use]
    pub fn new(quiet_window: Duration) -> Self {
        Self {
            quiet_window,
            installed: false,
        }
    }

    pub async fn poll(&mut self, page: &Page) -> Result<bool> {
        if !self.installed {
            page.evaluate(MUTATION_PROBE_INSTALL).await?;
            self.installed = true;
            // First tick after install never counts as quiet
            return Ok(false);
        }
        let elapsed_ms: f64 = page
            .evaluate(MUTATION_PROBE_QUERY)
            .await?
            .into_value()
            .unwrap_or(0.0);
        Ok(elapsed_ms >= self.quiet_window.as_millis() as f64)
    }
}

const RESOURCES_PROBE: &str = r#"
(() => {
    if (document.readyState !== 'complete') return false;
    const images = Array.from(document.images).every(img => img.complete);
    const sheets = Array.from(document.querySelectorAll('link[rel="stylesheet"]'))
        .every(link => link.sheet !== null);
    const fonts = !document.fonts || document.fonts.status === 'loaded';
    return images && sheets && fonts;
})()
"#;

/// Resource-loaded: readyState complete, every image and stylesheet
/// settled, fonts ready.
#[derive(Debug, Default)]
pub struct ResourceLoadedSignal;

impl ResourceLoadedSignal {
    pub async fn poll(&self, page: &Page) -> Result<bool> {
        let done: bool = page
            .evaluate(RESOURCES_PROBE)
            .await?
            .into_value()
            .unwrap_or(false);
        Ok(done)
    }
}

/// Custom selector: a caller-supplied CSS selector resolves to a visible
/// element.
#[derive(Debug)]
pub struct SelectorSignal {
    probe: String,
}

impl SelectorSignal {
    #[must_use]
    pub fn new(selector: &str) -> Self {
        let selector_json =
            serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string());
        let probe = format!(
            r#"
(() => {{
    const el = document.querySelector({selector_json});
    if (!el) return false;
    const rect = el.getBoundingClientRect();
    const style = window.getComputedStyle(el);
    return rect.width > 0 && rect.height > 0
        && style.visibility !== 'hidden'
        && style.display !== 'none';
}})()
"#
        );
        Self { probe }
    }

    pub async fn poll(&self, page: &Page) -> Result<bool> {
        let visible: bool = page
            .evaluate(self.probe.as_str())
            .await?
            .into_value()
            .unwrap_or(false);
        Ok(visible)
    }
}
