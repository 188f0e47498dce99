//! Remote attach over the DevTools HTTP endpoints
//!
//! `/json/version` yields the browser build and its WebSocket debugger
//! URL; `/json/list` enumerates tabs. The attach host must already have
//! passed the options allow-list before anything here runs.

use serde::Deserialize;
use tracing::{debug, info};

use super::options::RemoteTarget;
use crate::error::{Error, Result};

/// Subset of `/json/version` we consume.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionInfo {
    #[serde(rename = "Browser")]
    pub browser: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: String,
}

impl VersionInfo {
    /// Split "Chrome/124.0.6367.60" into name and version.
    #[must_use]
    pub fn name_and_version(&self) -> (String, String) {
        match self.browser.split_once('/') {
            Some((name, version)) => (name.to_string(), version.to_string()),
            None => (self.browser.clone(), String::new()),
        }
    }
}

/// Subset of a `/json/list` tab descriptor.
#[derive(Debug, Clone, Deserialize)]
pub struct TabInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    #[serde(rename = "webSocketDebuggerUrl", default)]
    pub web_socket_debugger_url: Option<String>,
}

/// What a successful probe hands back to the session.
#[derive(Debug, Clone)]
pub struct AttachInfo {
    pub version: VersionInfo,
    /// Target id of the requested tab, when one was asked for
    pub tab_target_id: Option<String>,
}

fn attach_error(target: &RemoteTarget, reason: impl std::fmt::Display) -> Error {
    Error::Attach {
        host: target.host.clone(),
        port: target.port,
        reason: reason.to_string(),
    }
}

/// Probe the remote endpoint and resolve the requested tab.
pub async fn probe(target: &RemoteTarget) -> Result<AttachInfo> {
    let base = format!("http://{}:{}", target.host, target.port);
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .map_err(|e| attach_error(target, e))?;

    let version: VersionInfo = client
        .get(format!("{base}/json/version"))
        .send()
        .await
        .map_err(|e| attach_error(target, e))?
        .error_for_status()
        .map_err(|e| attach_error(target, e))?
        .json()
        .await
        .map_err(|e| attach_error(target, format!("malformed /json/version: {e}")))?;
    info!(browser = %version.browser, "remote browser identified");

    let tab_target_id = match &target.tab_id {
        None => None,
        Some(wanted) => {
            let tabs: Vec<TabInfo> = client
                .get(format!("{base}/json/list"))
                .send()
                .await
                .map_err(|e| attach_error(target, e))?
                .error_for_status()
                .map_err(|e| attach_error(target, e))?
                .json()
                .await
                .map_err(|e| attach_error(target, format!("malformed /json/list: {e}")))?;
            debug!(count = tabs.len(), "remote tabs listed");
            let tab = tabs
                .into_iter()
                .find(|t| t.id == *wanted && t.kind == "page")
                .ok_or_else(|| attach_error(target, format!("no page tab with id {wanted}")))?;
            Some(tab.id)
        }
    };

    Ok(AttachInfo {
        version,
        tab_target_id,
    })
}

/// The URL `chromiumoxide::Browser::connect` expects for this target.
#[must_use]
pub fn connect_url(target: &RemoteTarget) -> String {
    format!("http://{}:{}", target.host, target.port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_splits_name_and_number() {
        let v = VersionInfo {
            browser: "Chrome/124.0.6367.60".into(),
            web_socket_debugger_url: "ws://127.0.0.1:9222/devtools/browser/abc".into(),
        };
        let (name, version) = v.name_and_version();
        assert_eq!(name, "Chrome");
        assert_eq!(version, "124.0.6367.60");
    }

    #[test]
    fn version_without_slash_is_name_only() {
        let v = VersionInfo {
            browser: "HeadlessShell".into(),
            web_socket_debugger_url: String::new(),
        };
        let (name, version) = v.name_and_version();
        assert_eq!(name, "HeadlessShell");
        assert!(version.is_empty());
    }

    #[test]
    fn tab_descriptor_deserializes_devtools_shape() {
        let json = r#"{
            "id": "F00D",
            "type": "page",
            "title": "Example",
            "url": "https://example.com/",
            "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/page/F00D"
        }"#;
        let tab: TabInfo = serde_json::from_str(json).unwrap();
        assert_eq!(tab.id, "F00D");
        assert_eq!(tab.kind, "page");
        assert!(tab.web_socket_debugger_url.is_some());
    }
}
