/*!
 * Diagnostics Integration Tests
 *
 * Warn-once and rate-limited macros against the process-wide registry
 */

use kcompat_sync::monitoring::{registry, reset_diagnostics};
use kcompat_sync::{warn_on_once, warn_ratelimited, WaitableFlag};
use serial_test::serial;
use std::sync::Arc;
use std::thread;

fn report(value: i32) -> bool {
    warn_on_once!(value < 0, "negative value {}", value)
}

fn noisy() -> bool {
    warn_ratelimited!(2, "noisy path hit")
}

#[test]
#[serial]
fn test_warn_on_once_returns_condition() {
    reset_diagnostics();

    assert!(!report(1));
    assert!(report(-1));
    // Still reports the condition after the site has used its warning
    assert!(report(-2));
}

#[test]
#[serial]
fn test_reset_diagnostics_rearms_warning() {
    reset_diagnostics();
    let site = "diagnostics_test::explicit";

    assert!(registry().warn_once(site, format_args!("first")));
    assert!(!registry().warn_once(site, format_args!("second")));
    assert_eq!(registry().suppressed(site), 1);

    reset_diagnostics();
    assert!(!registry().has_warned(site));
    assert!(registry().warn_once(site, format_args!("after reset")));
}

#[test]
#[serial]
fn test_rate_limit_caps_burst() {
    reset_diagnostics();

    let emitted = (0..20).filter(|_| noisy()).count();
    assert_eq!(emitted, 2);
}

#[test]
#[serial]
fn test_rate_limit_is_shared_across_threads() {
    reset_diagnostics();

    let handles: Vec<_> = (0..4)
        .map(|_| thread::spawn(|| (0..10).filter(|_| noisy()).count()))
        .collect();
    let emitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(emitted, 2);
}

#[test]
#[serial]
fn test_reset_with_waiters_is_tolerated() {
    reset_diagnostics();

    let flag = Arc::new(WaitableFlag::new());
    let flag_clone = flag.clone();
    let waiter = thread::spawn(move || flag_clone.wait());

    while flag.waiters() == 0 {
        thread::yield_now();
    }
    flag.reset();
    flag.complete();
    waiter.join().unwrap();
}
