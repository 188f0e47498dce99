//! Session options, security-profile flags, and error-code contracts

use harcap::session::flags::flags_for;
use harcap::{Error, RemoteTarget, SecurityProfile, SessionOptions, WaitPolicy};

#[test]
fn strict_profile_flag_set_is_pinned() {
    let flags = flags_for(SecurityProfile::Strict);
    for expected in [
        "--site-per-process",
        "--enable-features=NetworkServiceSandbox",
        "--block-new-web-contents",
        "--disable-plugins",
        "--disable-3d-apis",
        "--disable-webgl",
        "--disable-extensions",
        "--use-mock-keychain",
        "--password-store=basic",
        "--force-color-profile=srgb",
    ] {
        assert!(flags.iter().any(|f| f == expected), "missing {expected}");
    }
    // strict keeps GPU and /dev/shm
    assert!(!flags.iter().any(|f| f == "--disable-gpu"));
    assert!(!flags.iter().any(|f| f == "--disable-dev-shm-usage"));
}

#[test]
fn balanced_profile_flag_set_is_pinned() {
    let flags = flags_for(SecurityProfile::Balanced);
    for expected in [
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
    ] {
        assert!(flags.iter().any(|f| f == expected), "missing {expected}");
    }
}

#[test]
fn permissive_profile_flag_set_is_pinned() {
    let flags = flags_for(SecurityProfile::Permissive);
    for expected in [
        "--disable-web-security",
        "--disable-popup-blocking",
        "--safebrowsing-disable-auto-update",
    ] {
        assert!(flags.iter().any(|f| f == expected), "missing {expected}");
    }
}

#[test]
fn localhost_is_attachable_by_default() {
    for host in ["localhost", "127.0.0.1"] {
        let opts = SessionOptions::default().with_remote(RemoteTarget {
            host: host.into(),
            port: 9222,
            tab_id: None,
        });
        opts.validate().unwrap();
    }
}

#[test]
fn foreign_hosts_require_explicit_allow_listing() {
    let opts = SessionOptions::default().with_remote(RemoteTarget {
        host: "10.1.2.3".into(),
        port: 9222,
        tab_id: None,
    });
    let err = opts.validate().unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn zero_wait_timeout_is_rejected() {
    let opts = SessionOptions::default().with_wait(WaitPolicy {
        timeout_secs: 0,
        ..Default::default()
    });
    assert!(opts.validate().is_err());
}

#[test]
fn error_exit_codes_cover_the_cli_contract() {
    assert_eq!(
        Error::LaunchTimeout(std::time::Duration::from_secs(30)).exit_code(),
        3
    );
    assert_eq!(
        Error::NavigationTimeout {
            url: "https://example.com".into(),
            timeout: std::time::Duration::from_secs(30),
        }
        .exit_code(),
        4
    );
    assert_eq!(Error::Capture("boom".into()).exit_code(), 5);
    assert_eq!(Error::CaptureNotFound("01HZX".into()).exit_code(), 6);
}
