/// Per-source rate limiting for the public resolve endpoint
///
/// Each source (peer IP) gets its own GCRA bucket, created lazily on first
/// request and dropped by a background sweep once it has been idle longer
/// than the configured window.
use crate::{
    config::RateLimitConfig,
    error::{MonaliasError, MonaliasResult},
    metrics,
};
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::{Clock, DefaultClock, Reference},
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorLimiter,
};
use std::{
    collections::HashMap,
    net::SocketAddr,
    num::NonZeroU32,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

type SourceBucket<C> =
    GovernorLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<<C as Clock>::Instant>>;

struct SourceEntry<C: Clock> {
    bucket: Arc<SourceBucket<C>>,
    last_seen: C::Instant,
}

/// Keyed token-bucket limiter
pub struct SourceRateLimiter<C: Clock = DefaultClock> {
    quota: Quota,
    clock: C,
    idle_ttl: Duration,
    retry_after: Duration,
    sources: Mutex<HashMap<String, SourceEntry<C>>>,
}

impl SourceRateLimiter<DefaultClock> {
    pub fn new(config: &RateLimitConfig) -> MonaliasResult<Self> {
        Self::with_clock(config, DefaultClock::default())
    }
}

impl<C: Clock + Clone> SourceRateLimiter<C> {
    /// Build a limiter on an explicit clock (tests pass a fake one)
    pub fn with_clock(config: &RateLimitConfig, clock: C) -> MonaliasResult<Self> {
        let burst = NonZeroU32::new(config.burst)
            .ok_or_else(|| MonaliasError::Config("Rate limit burst must be > 0".to_string()))?;
        if !(config.requests_per_second.is_finite() && config.requests_per_second > 0.0) {
            return Err(MonaliasError::Config(
                "Rate limit requests per second must be > 0".to_string(),
            ));
        }
        let period = Duration::try_from_secs_f64(1.0 / config.requests_per_second)
            .map_err(|_| MonaliasError::Config("Rate limit requests per second is too small".to_string()))?;
        let quota = Quota::with_period(period)
            .ok_or_else(|| MonaliasError::Config("Rate limit period rounds to zero".to_string()))?
            .allow_burst(burst);

        Ok(Self {
            quota,
            clock,
            idle_ttl: config.idle_ttl,
            retry_after: config.retry_after,
            sources: Mutex::new(HashMap::new()),
        })
    }

    fn sources(&self) -> MutexGuard<'_, HashMap<String, SourceEntry<C>>> {
        // Nothing panics while holding the lock, but don't let poisoning wedge admission
        self.sources.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fetch (or create) the bucket for `source`, stamping last access
    fn bucket_for(&self, source: &str) -> Arc<SourceBucket<C>> {
        let now = self.clock.now();
        let mut sources = self.sources();

        if let Some(entry) = sources.get_mut(source) {
            entry.last_seen = now;
            return Arc::clone(&entry.bucket);
        }

        let bucket = Arc::new(GovernorLimiter::direct_with_clock(
            self.quota,
            self.clock.clone(),
        ));
        sources.insert(
            source.to_string(),
            SourceEntry {
                bucket: Arc::clone(&bucket),
                last_seen: now,
            },
        );
        metrics::RATE_LIMIT_BUCKETS.set(sources.len() as i64);
        bucket
    }

    /// Try to consume one token for `source`. Never blocks or queues.
    pub fn admit(&self, source: &str) -> bool {
        self.bucket_for(source).check().is_ok()
    }

    /// `admit` as a result carrying the static retry hint
    pub fn check(&self, source: &str) -> MonaliasResult<()> {
        if self.admit(source) {
            Ok(())
        } else {
            Err(MonaliasError::RateLimited {
                retry_after: self.retry_after,
            })
        }
    }

    /// Drop buckets idle longer than the window, returning how many went
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let idle_ttl = self.idle_ttl;
        let mut sources = self.sources();
        let before = sources.len();

        sources.retain(|_, entry| Duration::from(now.duration_since(entry.last_seen)) <= idle_ttl);

        metrics::RATE_LIMIT_BUCKETS.set(sources.len() as i64);
        before - sources.len()
    }

    /// Number of live buckets
    pub(crate) fn len(&self) -> usize {
        self.sources().len()
    }
}

/// Source key for a request: the peer IP when the server exposes it
pub fn source_key(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Rate limiting middleware for the resolve route
pub async fn rate_limit_middleware(
    State(ctx): State<crate::context::AppContext>,
    request: Request,
    next: Next,
) -> Response {
    let source = source_key(&request);

    match ctx.rate_limiter.check(&source) {
        Ok(()) => next.run(request).await,
        Err(err) => {
            metrics::RATE_LIMITED_TOTAL.inc();
            tracing::debug!(source = %source, "rate_limited");
            err.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use governor::clock::FakeRelativeClock;

    fn config(rps: f64, burst: u32) -> RateLimitConfig {
        RateLimitConfig {
            requests_per_second: rps,
            burst,
            idle_ttl: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(120),
            retry_after: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_burst_then_refill() {
        let clock = FakeRelativeClock::default();
        let limiter = SourceRateLimiter::with_clock(&config(1.0, 10), clock.clone()).unwrap();

        for _ in 0..10 {
            assert!(limiter.admit("203.0.113.7"));
        }
        assert!(!limiter.admit("203.0.113.7"));

        clock.advance(Duration::from_secs(1));
        assert!(limiter.admit("203.0.113.7"));
        assert!(!limiter.admit("203.0.113.7"));
    }

    #[test]
    fn test_sources_are_independent() {
        let clock = FakeRelativeClock::default();
        let limiter = SourceRateLimiter::with_clock(&config(1.0, 2), clock).unwrap();

        assert!(limiter.admit("a"));
        assert!(limiter.admit("a"));
        assert!(!limiter.admit("a"));

        assert!(limiter.admit("b"));
        assert_eq!(limiter.len(), 2);
    }

    #[test]
    fn test_check_reports_static_retry_hint() {
        let limiter =
            SourceRateLimiter::with_clock(&config(1.0, 1), FakeRelativeClock::default()).unwrap();

        assert!(limiter.check("a").is_ok());
        match limiter.check("a") {
            Err(MonaliasError::RateLimited { retry_after }) => {
                assert_eq!(retry_after, Duration::from_secs(30))
            }
            other => panic!("expected rate limit, got {:?}", other),
        }
    }

    #[test]
    fn test_sweep_evicts_idle_sources() {
        let clock = FakeRelativeClock::default();
        let limiter = SourceRateLimiter::with_clock(&config(1.0, 10), clock.clone()).unwrap();

        limiter.admit("idle");
        clock.advance(Duration::from_secs(300));
        limiter.admit("active");

        assert_eq!(limiter.sweep(), 0);

        clock.advance(Duration::from_secs(301));
        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.len(), 1);

        // A swept source comes back with a fresh bucket
        assert!(limiter.admit("idle"));
        assert_eq!(limiter.len(), 2);
    }

    #[test]
    fn test_concurrent_first_requests_share_one_bucket() {
        let limiter = Arc::new(
            SourceRateLimiter::with_clock(&config(1.0, 10), FakeRelativeClock::default()).unwrap(),
        );

        let admitted: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    let limiter = Arc::clone(&limiter);
                    scope.spawn(move || limiter.admit("198.51.100.1"))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap() as usize)
                .sum()
        });

        assert_eq!(limiter.len(), 1);
        assert_eq!(admitted, 10);
    }

    #[test]
    fn test_rejects_zero_burst() {
        assert!(SourceRateLimiter::with_clock(&config(1.0, 0), FakeRelativeClock::default()).is_err());
        assert!(SourceRateLimiter::with_clock(&config(0.0, 5), FakeRelativeClock::default()).is_err());
    }

    #[test]
    fn test_source_key_without_connect_info() {
        let request = Request::new(axum::body::Body::empty());
        assert_eq!(source_key(&request), "unknown");
    }

    #[test]
    fn test_vanishing_rate_is_a_config_error() {
        let err = SourceRateLimiter::with_clock(&config(1e-300, 10), FakeRelativeClock::default())
            .err()
            .unwrap();
        assert!(matches!(err, MonaliasError::Config(_)));
    }
}
