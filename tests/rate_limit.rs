use callguard::{client_key, Clock, ManualClock, RateLimitRule, RateLimiterStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const WINDOW: Duration = Duration::from_millis(60_000);

fn manual_store() -> (RateLimiterStore, ManualClock) {
    let clock = ManualClock::new(1_000_000);
    let store = RateLimiterStore::builder().clock(clock.clone()).build().expect("store");
    (store, clock)
}

#[test]
fn third_request_in_window_is_rejected_then_window_rolls_over() {
    let (store, clock) = manual_store();
    let t0 = clock.now_millis();

    let first = store.check("ip1", 2, WINDOW);
    assert!(first.success);
    assert_eq!((first.limit, first.remaining, first.reset), (2, 1, t0 + 60_000));

    let second = store.check("ip1", 2, WINDOW);
    assert!(second.success);
    assert_eq!(second.remaining, 0);

    let third = store.check("ip1", 2, WINDOW);
    assert!(!third.success);
    assert_eq!(third.remaining, 0);
    assert_eq!(third.reset, t0 + 60_000);

    clock.advance(Duration::from_millis(60_001));
    let fourth = store.check("ip1", 2, WINDOW);
    assert!(fourth.success);
    assert_eq!(fourth.remaining, 1);
    assert_eq!(fourth.reset, clock.now_millis() + 60_000);
}

#[test]
fn keys_are_counted_independently() {
    let (store, _clock) = manual_store();
    assert!(store.check("ip1", 1, WINDOW).success);
    assert!(!store.check("ip1", 1, WINDOW).success);

    let other = store.check("ip2", 1, WINDOW);
    assert!(other.success);
    assert_eq!(other.remaining, 0);
    assert_eq!(store.len(), 2);
}

#[test]
fn scenario_ten_per_minute_counts_down_then_rejects() {
    let (store, clock) = manual_store();
    let reset = clock.now_millis() + 60_000;

    for expected in (0..10).rev() {
        let result = store.check("127.0.0.1", 10, WINDOW);
        assert!(result.success);
        assert_eq!(result.limit, 10);
        assert_eq!(result.remaining, expected);
        assert_eq!(result.reset, reset);
    }

    let eleventh = store.check("127.0.0.1", 10, WINDOW);
    assert_eq!((eleventh.success, eleventh.remaining, eleventh.reset), (false, 0, reset));
}

#[test]
fn immediate_repeat_rejections_change_nothing() {
    let (store, _clock) = manual_store();
    for _ in 0..3 {
        assert!(store.check("repeat", 3, WINDOW).success);
    }

    let first_rejection = store.check("repeat", 3, WINDOW);
    assert!(!first_rejection.success);
    for _ in 0..20 {
        assert_eq!(store.check("repeat", 3, WINDOW), first_rejection);
    }
}

#[test]
fn reset_is_tracked_per_key() {
    let (store, clock) = manual_store();
    let t0 = clock.now_millis();

    let a = store.check("a", 2, WINDOW);
    clock.advance(Duration::from_millis(20_000));
    let b = store.check("b", 2, WINDOW);
    assert_eq!(a.reset, t0 + 60_000);
    assert_eq!(b.reset, t0 + 80_000);

    // Exhaust and hammer "a"; "b" keeps its own window and count.
    for _ in 0..5 {
        store.check("a", 2, WINDOW);
    }
    clock.advance(Duration::from_millis(40_000));
    let a_rolled = store.check("a", 2, WINDOW);
    assert!(a_rolled.success);
    assert_eq!(a_rolled.reset, t0 + 120_000);

    let b_again = store.check("b", 2, WINDOW);
    assert!(b_again.success);
    assert_eq!(b_again.remaining, 0);
    assert_eq!(b_again.reset, t0 + 80_000);
}

#[test]
fn rejected_requests_do_not_extend_the_block() {
    let (store, clock) = manual_store();
    assert!(store.check("burst", 1, WINDOW).success);
    for _ in 0..50 {
        clock.advance(Duration::from_millis(1_000));
        assert!(!store.check("burst", 1, WINDOW).success);
    }
    // 50s used; the window opened at t0 still expires at t0 + 60s.
    clock.advance(Duration::from_millis(10_000));
    assert!(store.check("burst", 1, WINDOW).success);
}

#[test]
fn reset_stays_fixed_for_the_whole_window() {
    let (store, clock) = manual_store();
    let reset = store.check("fixed", 10, WINDOW).reset;
    for _ in 0..9 {
        clock.advance(Duration::from_millis(5_000));
        assert_eq!(store.check("fixed", 10, WINDOW).reset, reset);
    }
}

#[test]
fn rule_helpers_drive_the_same_counters() {
    let (store, _clock) = manual_store();
    let rule = RateLimitRule::per_minute(2);
    assert!(store.check_rule("k", &rule).success);
    let second = store.check("k", 2, Duration::from_secs(60));
    assert!(second.success);
    assert_eq!(second.remaining, 0);
    assert!(!store.check_rule("k", &rule).success);
}

#[test]
fn concurrent_checks_admit_exactly_the_limit() {
    let clock = ManualClock::new(0);
    let store = Arc::new(RateLimiterStore::builder().clock(clock).build().expect("store"));
    let admitted = Arc::new(AtomicUsize::new(0));
    let limit = 25;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            let admitted = admitted.clone();
            std::thread::spawn(move || {
                for _ in 0..20 {
                    if store.check("shared", limit, WINDOW).success {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("thread");
    }

    assert_eq!(admitted.load(Ordering::SeqCst), limit as usize);
}

#[test]
fn forwarded_header_feeds_the_limiter() {
    let (store, _clock) = manual_store();
    let booking = callguard::presets::booking_rule();
    let from_proxy = client_key(Some(" 203.0.113.9 , 10.0.0.1"), callguard::UNKNOWN_CLIENT);
    assert_eq!(from_proxy, "203.0.113.9");

    for _ in 0..booking.limit {
        assert!(store.check_rule(&from_proxy, &booking).success);
    }
    let blocked = store.check_rule(&from_proxy, &booking);
    assert!(!blocked.success);

    let direct = client_key(None, callguard::UNKNOWN_CLIENT);
    assert_eq!(direct, "unknown");
    assert!(store.check_rule(&direct, &booking).success);
}

#[test]
fn rejected_result_carries_headers_and_retry_after() {
    let (store, clock) = manual_store();
    store.check("h", 1, WINDOW);
    clock.advance(Duration::from_millis(15_000));
    let blocked = store.check("h", 1, WINDOW);

    let headers = blocked.headers();
    assert_eq!(headers[0], ("X-RateLimit-Limit", "1".to_string()));
    assert_eq!(headers[1], ("X-RateLimit-Remaining", "0".to_string()));
    assert_eq!(headers[2].1, blocked.reset.to_string());
    assert_eq!(blocked.retry_after(clock.now_millis()), Duration::from_millis(45_000));
}
