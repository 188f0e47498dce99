//! harcap: drive a Chromium browser over CDP and record what it does
//!
//! The pipeline: a [`session::BrowserSession`] launches or attaches to a
//! browser, the [`intercept`] layer blocks and rewrites requests at the
//! Fetch domain, the [`recorder`] assembles Network-domain events into
//! transactions and emits HAR entries (batch and NDJSON streaming), the
//! [`stability`] detector decides when a page is done loading, and the
//! [`diff`] controller stores captures and compares them.

pub mod cancel;
pub mod diff;
pub mod error;
pub mod events;
pub mod filter;
pub mod har;
pub mod intercept;
pub mod profile;
pub mod recorder;
pub mod rules;
pub mod session;
pub mod stability;

pub use cancel::CancelToken;
pub use diff::{
    CaptureRecord, CaptureStatus, CaptureStore, DiffResult, ReportFormat, Significance,
};
pub use error::{Error, Result};
pub use events::{CaptureEvent, CaptureEventBus, ShutdownReason};
pub use filter::{EntryTemplate, FilterExpr, FilterStage};
pub use har::{Entry, Har, HarBuilder};
pub use intercept::Interceptor;
pub use profile::{ProfileProvisioner, TempProfile, reap_stale_profiles};
pub use recorder::NetworkRecorder;
pub use rules::{RuleConfig, RuleMatcher};
pub use session::options::{
    BodyCapture, ProfileRequest, ProxyConfig, RemoteTarget, SecurityProfile, SessionOptions,
    WaitPolicy,
};
pub use session::{BrowserSession, SessionHooks, SessionState};
pub use stability::{Readiness, StabilityConfig, StabilityDetector};

/// One-shot capture: launch, navigate, tear down, return the document.
///
/// The session closes even when navigation fails, so a timeout still
/// yields whatever was captured before the deadline.
pub async fn capture(url: &str, opts: SessionOptions) -> Result<Har> {
    capture_with(url, opts, SessionHooks::default()).await
}

/// [`capture`] with injected collaborators (filter stage, NDJSON stream,
/// event bus, profile provisioner).
pub async fn capture_with(url: &str, opts: SessionOptions, hooks: SessionHooks) -> Result<Har> {
    // The session timeout bounds navigation and stability together; the
    // per-operation timeouts inside are narrower
    let session_timeout = std::time::Duration::from_secs(opts.session_timeout_secs.max(1));
    let mut session = BrowserSession::launch_with(opts, hooks).await?;
    let navigation = match tokio::time::timeout(session_timeout, session.navigate(url)).await {
        Ok(result) => result,
        Err(_) => {
            session.cancel();
            Err(Error::Timeout {
                op: "session",
                timeout: session_timeout,
            })
        }
    };
    let har = session.har();
    let close_result = session.close().await;
    match navigation {
        Ok(readiness) => {
            tracing::debug!(?readiness, "capture navigation settled");
        }
        Err(e) => return Err(e),
    }
    close_result?;
    Ok(har.snapshot())
}
