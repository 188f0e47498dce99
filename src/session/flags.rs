//! Security-profile flag sets
//!
//! Each profile maps to an exact list of Chromium switches. The lists are
//! data, not logic, so tests can pin them and operators can audit what a
//! profile actually turns on or off.

use super::options::SecurityProfile;

/// Flags shared by every profile.
pub const COMMON_FLAGS: &[&str] = &[
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-infobars",
    "--disable-notifications",
    "--mute-audio",
    "--hide-scrollbars",
];

/// Locked down: sandbox on, site isolation, rendering extras off, GPU and
/// /dev/shm left alone.
const STRICT_FLAGS: &[&str] = &[
    "--site-per-process",
    "--enable-features=NetworkServiceSandbox",
    "--block-new-web-contents",
    "--disable-plugins",
    "--disable-java",
    "--disable-3d-apis",
    "--disable-webgl",
    "--disable-extensions",
    "--use-mock-keychain",
    "--password-store=basic",
    "--force-color-profile=srgb",
];

/// Default posture: sandbox on, stability flags for constrained or
/// containerized hosts, GPU and /dev/shm disabled.
const BALANCED_FLAGS: &[&str] = &[
    "--site-per-process",
    "--disable-extensions",
    "--disable-gpu",
    "--disable-dev-shm-usage",
    "--disable-background-networking",
    "--disable-background-timer-throttling",
    "--disable-breakpad",
    "--disable-sync",
    "--disable-hang-monitor",
    "--use-mock-keychain",
];

/// Everything open. Only for pages that refuse to load otherwise.
const PERMISSIVE_FLAGS: &[&str] = &[
    "--disable-web-security",
    "--disable-popup-blocking",
    "--safebrowsing-disable-auto-update",
];

/// The switch list for a profile, common flags included.
#[must_use]
pub fn flags_for(profile: SecurityProfile) -> Vec<String> {
    let profile_flags = match profile {
        SecurityProfile::Strict => STRICT_FLAGS,
        SecurityProfile::Balanced => BALANCED_FLAGS,
        SecurityProfile::Permissive => PERMISSIVE_FLAGS,
    };
    COMMON_FLAGS
        .iter()
        .chain(profile_flags)
        .map(|s| (*s).to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_keeps_gpu_and_dev_shm() {
        let flags = flags_for(SecurityProfile::Strict);
        assert!(!flags.iter().any(|f| f == "--disable-gpu"));
        assert!(!flags.iter().any(|f| f == "--disable-dev-shm-usage"));
        assert!(flags.iter().any(|f| f == "--site-per-process"));
        assert!(flags.iter().any(|f| f == "--force-color-profile=srgb"));
        assert!(flags.iter().any(|f| f == "--block-new-web-contents"));
    }

    #[test]
    fn no_profile_disables_the_sandbox() {
        for profile in [
            SecurityProfile::Strict,
            SecurityProfile::Balanced,
            SecurityProfile::Permissive,
        ] {
            let flags = flags_for(profile);
            assert!(
                !flags.iter().any(|f| f == "--no-sandbox"),
                "{profile:?} must not disable the sandbox"
            );
        }
    }

    #[test]
    fn balanced_disables_gpu_and_dev_shm() {
        let flags = flags_for(SecurityProfile::Balanced);
        assert!(flags.iter().any(|f| f == "--disable-gpu"));
        assert!(flags.iter().any(|f| f == "--disable-dev-shm-usage"));
        assert!(flags.iter().any(|f| f == "--disable-breakpad"));
        assert!(flags.iter().any(|f| f == "--use-mock-keychain"));
    }

    #[test]
    fn permissive_turns_off_web_security() {
        let flags = flags_for(SecurityProfile::Permissive);
        assert!(flags.iter().any(|f| f == "--disable-web-security"));
        assert!(flags.iter().any(|f| f == "--disable-popup-blocking"));
    }
}
