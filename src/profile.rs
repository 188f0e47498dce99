//! Browser profile provisioning
//!
//! The session never inspects a profile directory's contents; it only
//! consumes the [`ProfileProvisioner`] interface. The default
//! [`TempProfile`] keeps each session on its own uuid-named directory so
//! concurrent sessions never fight over Chrome's `SingletonLock`.

use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Capability consumed by the browser session: produce an isolated
/// user-data-dir, optionally seed it from a named source profile, and
/// clean up afterwards.
///
/// `cleanup` must be idempotent and must not run before the browser
/// process has terminated.
pub trait ProfileProvisioner: Send + Sync {
    /// Create (or return) the working directory for this session.
    fn setup_workdir(&mut self) -> Result<PathBuf>;

    /// Populate the workdir from the named source profile, restricted to
    /// the given cookie domains.
    fn copy_profile(&mut self, source_name: &str, cookie_domains: &[String]) -> Result<()>;

    /// The directory handed to the browser as `--user-data-dir`.
    fn work_dir(&self) -> &Path;

    /// Remove the directory. Safe to call more than once.
    fn cleanup(&mut self) -> Result<()>;
}

/// Default provisioner: a unique directory under the system temp dir,
/// removed on drop unless ownership was transferred with `into_path`.
#[derive(Debug)]
pub struct TempProfile {
    path: PathBuf,
    created: bool,
    cleanup_on_drop: bool,
}

const PROFILE_PREFIX: &str = "harcap_chrome";

impl TempProfile {
    /// Reserve a unique profile path without touching the filesystem yet.
    #[must_use]
    pub fn new() -> Self {
        let path = std::env::temp_dir().join(format!("{PROFILE_PREFIX}_{}", Uuid::new_v4()));
        Self {
            path,
            created: false,
            cleanup_on_drop: true,
        }
    }

    /// Use a caller-supplied directory. It is created if missing and NOT
    /// removed on drop; the caller owns its lifetime.
    #[must_use]
    pub fn at(path: PathBuf) -> Self {
        Self {
            path,
            created: false,
            cleanup_on_drop: false,
        }
    }

    /// Consume the provisioner and return the path, disabling cleanup.
    /// Use when another teardown mechanism takes over the directory.
    #[must_use]
    pub fn into_path(mut self) -> PathBuf {
        self.cleanup_on_drop = false;
        std::mem::take(&mut self.path)
    }
}

impl Default for TempProfile {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileProvisioner for TempProfile {
    fn setup_workdir(&mut self) -> Result<PathBuf> {
        if !self.created {
            // create_dir (not create_dir_all) is atomic: a uuid collision
            // surfaces as an error instead of silently sharing a profile
            std::fs::create_dir(&self.path)
                .or_else(|e| {
                    if e.kind() == std::io::ErrorKind::AlreadyExists && !self.cleanup_on_drop {
                        Ok(())
                    } else {
                        Err(e)
                    }
                })
                .map_err(|e| Error::io(self.path.clone(), e))?;
            self.created = true;
            info!("created profile directory: {}", self.path.display());
        }
        Ok(self.path.clone())
    }

    fn copy_profile(&mut self, source_name: &str, cookie_domains: &[String]) -> Result<()> {
        if !self.created {
            self.setup_workdir()?;
        }
        // Minimal seeding: record what the session asked for so an external
        // profile copier can materialize it. The core never reads this back.
        let manifest = serde_json::json!({
            "source": source_name,
            "cookieDomains": cookie_domains,
        });
        let manifest_path = self.path.join("harcap_profile_request.json");
        std::fs::write(
            &manifest_path,
            serde_json::to_vec_pretty(&manifest)
                .context("profile manifest serialization")
                .map_err(Error::from)?,
        )
        .map_err(|e| Error::io(manifest_path, e))?;
        debug!(
            source = source_name,
            domains = cookie_domains.len(),
            "profile copy requested"
        );
        Ok(())
    }

    fn work_dir(&self) -> &Path {
        &self.path
    }

    fn cleanup(&mut self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_dir_all(&self.path).map_err(|e| Error::io(self.path.clone(), e))?;
            info!("removed profile directory: {}", self.path.display());
        }
        self.created = false;
        self.cleanup_on_drop = false;
        Ok(())
    }
}

impl Drop for TempProfile {
    fn drop(&mut self) {
        if self.cleanup_on_drop && self.path.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                warn!(
                    "failed to remove profile directory {}: {e}",
                    self.path.display()
                );
            }
        }
    }
}

/// Check whether a profile's `SingletonLock` belongs to a dead process.
///
/// Chrome writes the lock as a symlink targeting `{hostname}-{pid}`. A
/// missing `/proc/{pid}` means the owner is gone and the directory can be
/// reaped.
#[cfg(target_os = "linux")]
#[must_use]
pub fn is_singleton_lock_stale(profile_dir: &Path) -> bool {
    let lock_path = profile_dir.join("SingletonLock");
    if !lock_path.exists() && !lock_path.is_symlink() {
        return true;
    }
    match std::fs::read_link(&lock_path) {
        Ok(target) => {
            let target = target.to_string_lossy().into_owned();
            if let Some(pid) = target.rsplit('-').next().and_then(|p| p.parse::<u32>().ok()) {
                let alive = Path::new(&format!("/proc/{pid}")).exists();
                if !alive {
                    debug!("SingletonLock stale: pid {pid} no longer exists");
                }
                return !alive;
            }
            warn!("could not parse pid from SingletonLock target: {target}");
            false
        }
        // Not a symlink: a plain file here is corruption, treat as stale
        Err(_) => lock_path.is_file(),
    }
}

#[cfg(not(target_os = "linux"))]
#[must_use]
pub fn is_singleton_lock_stale(_profile_dir: &Path) -> bool {
    // No reliable process probe; uuid naming already isolates sessions
    true
}

/// Remove orphaned profile directories left behind by crashed sessions.
/// Returns how many were reaped.
pub fn reap_stale_profiles() -> Result<usize> {
    let temp_dir = std::env::temp_dir();
    let mut reaped = 0;
    let entries =
        std::fs::read_dir(&temp_dir).map_err(|e| Error::io(temp_dir.clone(), e))?;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_ours = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(PROFILE_PREFIX));
        if is_ours && path.is_dir() && is_singleton_lock_stale(&path) {
            if let Err(e) = std::fs::remove_dir_all(&path) {
                warn!("failed to reap stale profile {}: {e}", path.display());
            } else {
                debug!("reaped stale profile: {}", path.display());
                reaped += 1;
            }
        }
    }
    if reaped > 0 {
        info!("reaped {reaped} stale profile directories");
    }
    Ok(reaped)
}
