//! Session configuration
//!
//! Options cover both launch ("start a fresh browser with this posture")
//! and attach ("talk to the one already running on this port"). The
//! fluent `with_*` methods keep call sites readable without a separate
//! builder type.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::rules::RuleConfig;
use crate::stability::StabilityConfig;

/// How aggressively the browser is locked down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityProfile {
    /// Sandbox on, site isolation, everything non-essential disabled
    Strict,
    /// Sandbox on, stability flags for containerized environments
    #[default]
    Balanced,
    /// Web security off. Emits a visible warning on launch.
    Permissive,
}

/// Seed the user-data-dir from a named source profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRequest {
    pub name: String,
    #[serde(default)]
    pub cookie_domains: Vec<String>,
}

/// Upstream proxy for all page traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// e.g. "http://proxy.internal:3128" or "socks5://127.0.0.1:1080"
    pub server: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bypass_list: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl ProxyConfig {
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.username.is_some() || self.password.is_some()
    }
}

/// Attach to an already-running browser instead of launching one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
    /// Specific tab to drive; the first page tab otherwise
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<String>,
}

/// When is the page "done loading".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitPolicy {
    /// Require the network-idle signal
    pub network_idle: bool,
    /// Require this CSS selector to resolve to a visible element
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// Signal thresholds
    pub stability: StabilityConfig,
    /// Overall navigation deadline in seconds
    pub timeout_secs: u64,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            network_idle: true,
            selector: None,
            stability: StabilityConfig::default(),
            timeout_secs: 30,
        }
    }
}

impl WaitPolicy {
    /// Fold the policy-level toggles into the signal thresholds.
    #[must_use]
    pub fn stability_config(&self) -> StabilityConfig {
        let mut config = self.stability.clone();
        config.network_idle = self.network_idle;
        if config.selector.is_none() {
            config.selector = self.selector.clone();
        }
        config.timeout_secs = self.timeout_secs;
        config
    }
}

/// Response-body capture policy. Fetching bodies is one CDP round-trip
/// per entry, so it is opt-in and bounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyCapture {
    pub enabled: bool,
    /// MIME prefixes worth keeping ("text/", "application/json", ...)
    pub mime_allow: Vec<String>,
    /// Bodies larger than this are dropped, not truncated
    pub max_bytes: u64,
}

impl Default for BodyCapture {
    fn default() -> Self {
        Self {
            enabled: false,
            mime_allow: vec![
                "text/".into(),
                "application/json".into(),
                "application/javascript".into(),
                "application/xml".into(),
            ],
            max_bytes: 2 * 1024 * 1024,
        }
    }
}

impl BodyCapture {
    /// Should this MIME type's body be requested at all.
    #[must_use]
    pub fn wants(&self, mime_type: &str) -> bool {
        self.enabled
            && self
                .mime_allow
                .iter()
                .any(|prefix| mime_type.starts_with(prefix.as_str()))
    }
}

/// Everything a session needs to launch (or attach) and capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOptions {
    pub headless: bool,
    /// Explicit browser executable; discovery runs when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chrome_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<ProfileRequest>,
    /// Remote debugging port for a fresh launch (ephemeral when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_port: Option<u16>,
    pub wait: WaitPolicy,
    pub security: SecurityProfile,
    /// Raw flags appended after the profile's flag set
    #[serde(default)]
    pub extra_flags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteTarget>,
    /// Evaluated on every new document, before page scripts run
    #[serde(default)]
    pub scripts_before: Vec<String>,
    /// Evaluated in the top frame once the page is stable
    #[serde(default)]
    pub scripts_after: Vec<String>,
    /// URL rule set: block/allow rules drive the interceptor, omit rules
    /// drive output inclusion. `None` records everything.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking: Option<RuleConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewport: Option<(u32, u32)>,
    pub body_capture: BodyCapture,
    /// Hosts we are willing to attach to
    pub allowed_attach_hosts: Vec<String>,
    pub launch_timeout_secs: u64,
    pub script_timeout_secs: u64,
    /// Bound on the whole session, navigation and scripts included
    pub session_timeout_secs: u64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            profile: None,
            debug_port: None,
            wait: WaitPolicy::default(),
            security: SecurityProfile::default(),
            extra_flags: Vec::new(),
            proxy: None,
            remote: None,
            scripts_before: Vec::new(),
            scripts_after: Vec::new(),
            blocking: None,
            viewport: None,
            body_capture: BodyCapture::default(),
            allowed_attach_hosts: vec!["localhost".into(), "127.0.0.1".into()],
            launch_timeout_secs: 30,
            script_timeout_secs: 30,
            session_timeout_secs: 300,
        }
    }
}

impl SessionOptions {
    #[must_use]
    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    #[must_use]
    pub fn with_chrome_path(mut self, path: PathBuf) -> Self {
        self.chrome_path = Some(path);
        self
    }

    #[must_use]
    pub fn with_security(mut self, profile: SecurityProfile) -> Self {
        self.security = profile;
        self
    }

    #[must_use]
    pub fn with_wait(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    #[must_use]
    pub fn with_blocking(mut self, rules: RuleConfig) -> Self {
        self.blocking = Some(rules);
        self
    }

    #[must_use]
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    #[must_use]
    pub fn with_remote(mut self, remote: RemoteTarget) -> Self {
        self.remote = Some(remote);
        self
    }

    #[must_use]
    pub fn with_profile(mut self, profile: ProfileRequest) -> Self {
        self.profile = Some(profile);
        self
    }

    #[must_use]
    pub fn with_body_capture(mut self, capture: BodyCapture) -> Self {
        self.body_capture = capture;
        self
    }

    #[must_use]
    pub fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = Some((width, height));
        self
    }

    #[must_use]
    pub fn with_script_before(mut self, source: impl Into<String>) -> Self {
        self.scripts_before.push(source.into());
        self
    }

    #[must_use]
    pub fn with_script_after(mut self, source: impl Into<String>) -> Self {
        self.scripts_after.push(source.into());
        self
    }

    #[must_use]
    pub fn with_extra_flag(mut self, flag: impl Into<String>) -> Self {
        self.extra_flags.push(flag.into());
        self
    }

    /// Basic sanity checks before anything is launched.
    pub fn validate(&self) -> crate::error::Result<()> {
        if let Some(remote) = &self.remote {
            let allowed = self
                .allowed_attach_hosts
                .iter()
                .any(|h| h.eq_ignore_ascii_case(&remote.host));
            if !allowed {
                return Err(crate::error::Error::Validation(format!(
                    "attach host '{}' is not on the allow-list {:?}",
                    remote.host, self.allowed_attach_hosts
                )));
            }
        }
        if self.wait.timeout_secs == 0 {
            return Err(crate::error::Error::Validation(
                "wait timeout must be at least 1 second".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_safe() {
        let opts = SessionOptions::default();
        assert!(opts.headless);
        assert_eq!(opts.security, SecurityProfile::Balanced);
        assert!(!opts.body_capture.enabled);
        assert_eq!(
            opts.allowed_attach_hosts,
            vec!["localhost".to_string(), "127.0.0.1".to_string()]
        );
        opts.validate().unwrap();
    }

    #[test]
    fn attach_host_allow_list_is_enforced() {
        let opts = SessionOptions::default().with_remote(RemoteTarget {
            host: "build-server.internal".into(),
            port: 9222,
            tab_id: None,
        });
        assert!(opts.validate().is_err());

        let opts = SessionOptions {
            allowed_attach_hosts: vec!["build-server.internal".into()],
            ..SessionOptions::default()
        }
        .with_remote(RemoteTarget {
            host: "build-server.internal".into(),
            port: 9222,
            tab_id: None,
        });
        opts.validate().unwrap();
    }

    #[test]
    fn body_capture_predicate_honors_mime_prefixes() {
        let capture = BodyCapture {
            enabled: true,
            ..Default::default()
        };
        assert!(capture.wants("text/html"));
        assert!(capture.wants("application/json"));
        assert!(!capture.wants("image/png"));

        let disabled = BodyCapture::default();
        assert!(!disabled.wants("text/html"));
    }

    #[test]
    fn wait_policy_folds_into_stability_config() {
        let policy = WaitPolicy {
            network_idle: false,
            selector: Some("#done".into()),
            stability: StabilityConfig::default(),
            timeout_secs: 7,
        };
        let config = policy.stability_config();
        assert!(!config.network_idle);
        assert_eq!(config.selector.as_deref(), Some("#done"));
        assert_eq!(config.timeout_secs, 7);
    }

    #[test]
    fn blocking_rules_are_optional() {
        let opts = SessionOptions::default().with_blocking(RuleConfig {
            block: vec![r".*\.gif$".into()],
            ..Default::default()
        });
        assert!(opts.blocking.is_some());
        assert!(SessionOptions::default().blocking.is_none());
    }
}
