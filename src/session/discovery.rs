//! Browser executable discovery
//!
//! The session only asks for "a browser executable path"; where it comes
//! from is behind [`ExecutableLocator`]. The default locator checks the
//! `CHROMIUM_PATH` override, then well-known install locations per
//! platform, then `which`.

use std::path::PathBuf;
use std::process::Command;
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Capability consumed by the session: produce a runnable browser path.
pub trait ExecutableLocator: Send + Sync {
    fn locate(&self) -> Result<PathBuf>;
}

/// Environment + well-known-paths + `which` discovery.
#[derive(Debug, Default)]
pub struct DefaultLocator;

impl ExecutableLocator for DefaultLocator {
    fn locate(&self) -> Result<PathBuf> {
        // Environment variable overrides all other methods
        if let Ok(path) = std::env::var("CHROMIUM_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                info!("using browser from CHROMIUM_PATH: {}", path.display());
                return Ok(path);
            }
            warn!(
                "CHROMIUM_PATH points to a non-existent file: {}",
                path.display()
            );
        }

        let candidates: Vec<PathBuf> = if cfg!(target_os = "windows") {
            [
                r"C:\Program Files\Google\Chrome\Application\chrome.exe",
                r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
                r"C:\Program Files\Chromium\Application\chrome.exe",
            ]
            .iter()
            .map(PathBuf::from)
            .collect()
        } else if cfg!(target_os = "macos") {
            let mut paths: Vec<PathBuf> = [
                "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
                "/Applications/Google Chrome Canary.app/Contents/MacOS/Google Chrome Canary",
                "/Applications/Chromium.app/Contents/MacOS/Chromium",
                "/opt/homebrew/bin/chromium",
            ]
            .iter()
            .map(PathBuf::from)
            .collect();
            if let Some(home) = dirs::home_dir() {
                paths.push(home.join("Applications/Google Chrome.app/Contents/MacOS/Google Chrome"));
            }
            paths
        } else {
            [
                "/usr/bin/google-chrome",
                "/usr/bin/google-chrome-stable",
                "/usr/bin/chromium",
                "/usr/bin/chromium-browser",
                "/snap/bin/chromium",
                "/usr/local/bin/chromium",
                "/opt/google/chrome/chrome",
            ]
            .iter()
            .map(PathBuf::from)
            .collect()
        };

        for path in candidates {
            if path.exists() {
                info!("found browser at: {}", path.display());
                return Ok(path);
            }
        }

        if !cfg!(target_os = "windows") {
            for name in ["chromium", "chromium-browser", "google-chrome", "chrome"] {
                if let Ok(output) = Command::new("which").arg(name).output()
                    && output.status.success()
                {
                    let found = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !found.is_empty() {
                        info!("found browser via which: {found}");
                        return Ok(PathBuf::from(found));
                    }
                }
            }
        }

        Err(Error::Launch(
            "no Chrome/Chromium executable found; set CHROMIUM_PATH or pass chrome_path".into(),
        ))
    }
}

/// Locator that always answers with a fixed path (explicit config, tests).
#[derive(Debug)]
pub struct FixedLocator(pub PathBuf);

impl ExecutableLocator for FixedLocator {
    fn locate(&self) -> Result<PathBuf> {
        if self.0.exists() {
            Ok(self.0.clone())
        } else {
            Err(Error::Configuration(format!(
                "configured browser path does not exist: {}",
                self.0.display()
            )))
        }
    }
}
