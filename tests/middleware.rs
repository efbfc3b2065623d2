use callguard::{
    InstantSleeper, ManualClock, RateLimitLayer, RateLimitRule, RateLimiterStore, RetryError,
    RetryPolicy,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::{service_fn, ServiceBuilder, ServiceExt};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("upstream returned {0}")]
struct UpstreamError(u16);

#[derive(Debug, Clone, PartialEq, Eq)]
struct Page {
    status: u16,
}

#[tokio::test]
async fn retry_layer_retries_flaky_upstream() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let upstream = service_fn(move |id: u32| {
        let n = seen.fetch_add(1, Ordering::SeqCst);
        async move {
            if n < 2 {
                Err(UpstreamError(503))
            } else {
                Ok(Page { status: 200 + id as u16 })
            }
        }
    });

    let policy = RetryPolicy::<Page, UpstreamError>::builder()
        .name("upstream")
        .max_retries(3)
        .initial_delay(Duration::from_millis(5))
        .with_sleeper(InstantSleeper)
        .build()
        .expect("policy");

    let svc = ServiceBuilder::new().layer(policy.into_layer()).service(upstream);
    let page = svc.oneshot(0).await.expect("eventually succeeds");

    assert_eq!(page, Page { status: 200 });
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn retry_layer_applies_predicate_to_responses() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let upstream = service_fn(move |_: u32| {
        seen.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, UpstreamError>(Page { status: 202 }) }
    });

    let policy = RetryPolicy::<Page, UpstreamError>::builder()
        .name("job-status")
        .max_retries(2)
        .predicate(|page| page.status == 200)
        .with_sleeper(InstantSleeper)
        .build()
        .expect("policy");

    let svc = ServiceBuilder::new().layer(policy.into_layer()).service(upstream);
    let err = svc.oneshot(7).await.unwrap_err();

    assert_eq!(err, RetryError::PredicateRejected { operation: "job-status".into(), attempts: 3 });
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn limited_requests_never_reach_the_retried_service() {
    let clock = ManualClock::new(0);
    let store = Arc::new(RateLimiterStore::builder().clock(clock.clone()).build().expect("store"));
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let upstream = service_fn(move |_: u32| {
        seen.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, UpstreamError>(Page { status: 200 }) }
    });

    let policy = RetryPolicy::<Page, UpstreamError>::builder()
        .with_sleeper(InstantSleeper)
        .build()
        .expect("policy");
    let svc = ServiceBuilder::new()
        .layer(RateLimitLayer::new(store.clone(), RateLimitRule::per_minute(2), |id: &u32| {
            format!("client-{}", id)
        }))
        .layer(policy.into_layer())
        .service(upstream);

    assert!(svc.clone().oneshot(1).await.is_ok());
    assert!(svc.clone().oneshot(1).await.is_ok());
    let err = svc.clone().oneshot(1).await.unwrap_err();
    assert!(err.is_limited());
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // A different client still gets through.
    assert!(svc.clone().oneshot(2).await.is_ok());

    clock.advance(Duration::from_secs(60));
    assert!(svc.oneshot(1).await.is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}
