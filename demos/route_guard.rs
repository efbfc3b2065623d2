//! A booking route guarded on both edges: inbound requests are rate limited per client,
//! the outbound notification call is retried with backoff.
use callguard::prelude::*;
use callguard::presets;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
struct NotifyError(&'static str);

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

impl std::error::Error for NotifyError {}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_target(false).init();

    let store = Arc::new(RateLimiterStore::builder().max_keys(10_000).build()?);
    let sweeper = RateLimiterStore::spawn_sweeper(&store, Duration::from_secs(60));

    let notify = presets::external_fetch::<&'static str, NotifyError>("notify-clinic")
        .initial_delay(Duration::from_millis(100))
        .build()?;
    let flaky = Arc::new(AtomicUsize::new(0));

    // The same client submits seven bookings in a row.
    for n in 1..=7 {
        let client = client_key(Some("198.51.100.23, 10.0.0.2"), UNKNOWN_CLIENT);
        let gate = store.check_rule(&client, &presets::booking_rule());
        if !gate.success {
            let wait = gate.retry_after(store.clock().now_millis());
            println!("booking {n}: 429, retry in {}s {:?}", wait.as_secs(), gate.headers());
            continue;
        }

        let flaky = flaky.clone();
        let sent = notify
            .execute(|| {
                let call = flaky.fetch_add(1, Ordering::SeqCst);
                async move {
                    // Every third call to the upstream fails once.
                    if call % 3 == 0 {
                        Err(NotifyError("upstream 503"))
                    } else {
                        Ok("delivered")
                    }
                }
            })
            .await;
        match sent {
            Ok(status) => println!("booking {n}: accepted, notification {status}, {} left", gate.remaining),
            Err(e) => println!("booking {n}: accepted, notification failed: {e}"),
        }
    }

    sweeper.abort();
    Ok(())
}
