use crate::adaptive::DynamicConfig;
use crate::rate_limit::{RateLimitError, RateLimitRule, RateLimiterStore};
use futures::future::{self, BoxFuture};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// A layer that checks every request against a [`RateLimiterStore`] before it reaches the
/// wrapped service.
///
/// `key_fn` maps a request to its client key, typically via
/// [`client_key`](crate::rate_limit::client_key) on the `X-Forwarded-For` header.
pub struct RateLimitLayer<K> {
    store: Arc<RateLimiterStore>,
    rule: DynamicConfig<RateLimitRule>,
    key_fn: Arc<K>,
}

impl<K> RateLimitLayer<K> {
    /// Create a new rate limit layer.
    pub fn new(store: Arc<RateLimiterStore>, rule: RateLimitRule, key_fn: K) -> Self {
        Self { store, rule: DynamicConfig::new(rule), key_fn: Arc::new(key_fn) }
    }

    /// Handle for changing the rule of this layer and every service it produced.
    pub fn rule_handle(&self) -> DynamicConfig<RateLimitRule> {
        self.rule.clone()
    }
}

impl<K> Clone for RateLimitLayer<K> {
    fn clone(&self) -> Self {
        Self { store: self.store.clone(), rule: self.rule.clone(), key_fn: self.key_fn.clone() }
    }
}

impl<S, K> Layer<S> for RateLimitLayer<K> {
    type Service = RateLimitService<S, K>;

    fn layer(&self, service: S) -> Self::Service {
        RateLimitService {
            inner: service,
            store: self.store.clone(),
            rule: self.rule.clone(),
            key_fn: self.key_fn.clone(),
        }
    }
}

/// Middleware service that enforces rate limits.
pub struct RateLimitService<S, K> {
    inner: S,
    store: Arc<RateLimiterStore>,
    rule: DynamicConfig<RateLimitRule>,
    key_fn: Arc<K>,
}

impl<S: Clone, K> Clone for RateLimitService<S, K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            store: self.store.clone(),
            rule: self.rule.clone(),
            key_fn: self.key_fn.clone(),
        }
    }
}

impl<S, K, Req> Service<Req> for RateLimitService<S, K>
where
    S: Service<Req>,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    S::Error: Send + 'static,
    K: Fn(&Req) -> String,
{
    type Response = S::Response;
    type Error = RateLimitError<S::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(RateLimitError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let key = (self.key_fn)(&req);
        let rule = self.rule.get();
        let decision = self.store.check_rule(&key, &rule);
        if !decision.success {
            return Box::pin(future::ready(Err(RateLimitError::Limited(decision))));
        }

        let fut = self.inner.call(req);
        Box::pin(async move { fut.await.map_err(RateLimitError::Inner) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::convert::Infallible;
    use std::time::Duration;
    use tower::{service_fn, ServiceBuilder, ServiceExt};

    fn store() -> (Arc<RateLimiterStore>, ManualClock) {
        let clock = ManualClock::new(0);
        (Arc::new(RateLimiterStore::builder().clock(clock.clone()).build().unwrap()), clock)
    }

    #[tokio::test]
    async fn allows_then_limits_per_key() {
        let (store, _clock) = store();
        let layer = RateLimitLayer::new(store, RateLimitRule::per_minute(2), |req: &&'static str| {
            req.to_string()
        });
        let svc = ServiceBuilder::new()
            .layer(layer)
            .service(service_fn(|req: &'static str| async move { Ok::<_, Infallible>(req.len()) }));

        assert_eq!(svc.clone().oneshot("alice").await.unwrap(), 5);
        assert_eq!(svc.clone().oneshot("alice").await.unwrap(), 5);
        let err = svc.clone().oneshot("alice").await.unwrap_err();
        assert_eq!(err.limited().map(|r| r.remaining), Some(0));
        assert!(svc.oneshot("bob").await.is_ok());
    }

    #[tokio::test]
    async fn rule_updates_apply_to_built_services() {
        let (store, clock) = store();
        let layer = RateLimitLayer::new(store, RateLimitRule::per_minute(1), |_: &()| "k".to_string());
        let handle = layer.rule_handle();
        let svc = ServiceBuilder::new()
            .layer(layer)
            .service(service_fn(|_: ()| async { Ok::<_, Infallible>(()) }));

        assert!(svc.clone().oneshot(()).await.is_ok());
        assert!(svc.clone().oneshot(()).await.is_err());

        handle.set(RateLimitRule::per_minute(3));
        assert!(svc.clone().oneshot(()).await.is_ok());

        clock.advance(Duration::from_secs(60));
        assert!(svc.oneshot(()).await.is_ok());
    }
}
