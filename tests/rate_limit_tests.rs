//! Rate limiter behavior against a simulated clock
//!
//! - Sliding window admits at most `max_attempts` per hash
//! - Rejections are not recorded
//! - Buckets are independent
//! - Concurrent callers on one hash never exceed the limit
//! - Memory is reclaimed past the cleanup threshold

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use mcp_authguard::clock::{ManualClock, SystemClock};
use mcp_authguard::config::RateLimitConfig;
use mcp_authguard::guard::{CLEANUP_THRESHOLD, RateLimiter, hash_token};

fn limiter(max_attempts: u32, window_seconds: u64) -> (Arc<ManualClock>, RateLimiter) {
    let clock = Arc::new(ManualClock::starting_now());
    let config = RateLimitConfig {
        enabled: true,
        max_attempts,
        window_seconds,
    };
    let limiter = RateLimiter::new(&config, clock.clone()).unwrap();
    (clock, limiter)
}

/// Ten attempts inside one minute, then the eleventh is limited
#[test]
fn test_default_budget() {
    let clock = Arc::new(ManualClock::starting_now());
    let limiter = RateLimiter::new(&RateLimitConfig::default(), clock.clone()).unwrap();
    let hash = hash_token("eyJhbGciOiJSUzI1NiJ9.payload.sig");

    for _ in 0..10 {
        assert!(!limiter.check_rate_limit(hash.as_str()));
        clock.advance(Duration::from_secs(1));
    }
    assert!(limiter.check_rate_limit(hash.as_str()));
}

/// Attempts slide out of the window one at a time
#[test]
fn test_sliding_window() {
    let (clock, limiter) = limiter(3, 60);

    assert!(!limiter.check_rate_limit("h")); // t=0
    clock.advance(Duration::from_secs(20));
    assert!(!limiter.check_rate_limit("h")); // t=20
    clock.advance(Duration::from_secs(20));
    assert!(!limiter.check_rate_limit("h")); // t=40
    assert!(limiter.check_rate_limit("h"));

    // t=61: the t=0 attempt has left the window
    clock.advance(Duration::from_secs(21));
    assert!(!limiter.check_rate_limit("h"));
    assert!(limiter.check_rate_limit("h"));
}

/// Rejected attempts do not extend the lockout
#[test]
fn test_rejections_not_recorded() {
    let (clock, limiter) = limiter(2, 10);

    assert!(!limiter.check_rate_limit("h"));
    assert!(!limiter.check_rate_limit("h"));
    for _ in 0..50 {
        assert!(limiter.check_rate_limit("h"));
    }

    clock.advance(Duration::from_secs(11));
    assert!(!limiter.check_rate_limit("h"));
}

/// Exhausting one credential does not affect another
#[test]
fn test_independent_buckets() {
    let (_clock, limiter) = limiter(1, 60);
    let a = hash_token("token-a");
    let b = hash_token("token-b");

    assert!(!limiter.check_rate_limit(a.as_str()));
    assert!(limiter.check_rate_limit(a.as_str()));
    assert!(!limiter.check_rate_limit(b.as_str()));
    assert!(!limiter.check_rate_limit(""));
    assert!(limiter.check_rate_limit(""));
}

/// Disabled limiter keeps no state
#[test]
fn test_disabled() {
    let config = RateLimitConfig {
        enabled: false,
        ..RateLimitConfig::default()
    };
    let limiter = RateLimiter::new(&config, SystemClock::shared()).unwrap();

    for i in 0..5000 {
        assert!(!limiter.check_rate_limit(&format!("hash-{i}")));
        assert!(!limiter.check_rate_limit("same"));
    }
    assert_eq!(limiter.tracked_buckets(), 0);
}

/// Out-of-range configuration fails construction
#[test]
fn test_invalid_config() {
    for (max_attempts, window_seconds) in [(0, 60), (1001, 60), (10, 0), (10, 3601)] {
        let config = RateLimitConfig {
            enabled: true,
            max_attempts,
            window_seconds,
        };
        assert!(
            RateLimiter::new(&config, SystemClock::shared()).is_err(),
            "{max_attempts}/{window_seconds}"
        );
    }
}

/// N concurrent attempts on one hash admit exactly K
#[test]
fn test_concurrent_attempts_admit_exactly_max() {
    const THREADS: usize = 16;
    const PER_THREAD: usize = 25;
    const MAX: u32 = 37;

    let (_clock, limiter) = limiter(MAX, 3600);
    let limiter = Arc::new(limiter);
    let admitted = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            let admitted = Arc::clone(&admitted);
            thread::spawn(move || {
                for _ in 0..PER_THREAD {
                    if !limiter.check_rate_limit("shared-hash") {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(admitted.load(Ordering::SeqCst), MAX as usize);
}

/// Idle buckets are evicted once the map passes the threshold
#[test]
fn test_cleanup_bounds_memory() {
    let (clock, limiter) = limiter(5, 60);

    for i in 0..CLEANUP_THRESHOLD {
        limiter.check_rate_limit(&format!("old-{i}"));
    }
    assert_eq!(limiter.tracked_buckets(), CLEANUP_THRESHOLD);

    clock.advance(Duration::from_secs(120));
    // Crossing the threshold triggers cleanup of every idle bucket
    limiter.check_rate_limit("new");
    assert_eq!(limiter.tracked_buckets(), 1);
}

/// Explicit cleanup keeps active buckets
#[test]
fn test_manual_cleanup() {
    let (clock, limiter) = limiter(5, 60);

    limiter.check_rate_limit("idle");
    clock.advance(Duration::from_secs(90));
    limiter.check_rate_limit("active");

    assert_eq!(limiter.cleanup(), 1);
    assert_eq!(limiter.tracked_buckets(), 1);
    assert_eq!(limiter.cleanup(), 0);
}
