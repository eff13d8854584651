//! Rate limiting middleware.
//!
//! Fixed-window admission per caller key. Each key owns one window; the
//! windows live in a sharded map so callers with different keys never
//! contend on the same lock.

use crate::api::AppState;
use crate::clock::{Clock, SystemClock};
use crate::config::RateLimitConfig;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Denied { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

pub trait RateLimiter: Send + Sync {
    fn allow(&self, key: &str) -> RateDecision;

    /// Drop state that can no longer affect a decision.
    fn cleanup(&self) {}
}

/// Build the limiter selected by configuration.
pub fn from_config(config: &RateLimitConfig) -> Arc<dyn RateLimiter> {
    if config.enabled {
        Arc::new(FixedWindowLimiter::new(
            config.requests_per_window,
            config.window,
        ))
    } else {
        Arc::new(Unlimited)
    }
}

/// Disabled mode. Admits everything and keeps no state.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unlimited;

impl RateLimiter for Unlimited {
    fn allow(&self, _key: &str) -> RateDecision {
        RateDecision::Allowed {
            remaining: u32::MAX,
        }
    }
}

struct RateWindow {
    count: u32,
    started: Instant,
}

pub struct FixedWindowLimiter<C: Clock = SystemClock> {
    limit: u32,
    window: Duration,
    windows: DashMap<String, RateWindow>,
    clock: Arc<C>,
}

impl FixedWindowLimiter<SystemClock> {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self::with_clock(limit, window, Arc::new(SystemClock))
    }
}

impl<C: Clock> FixedWindowLimiter<C> {
    pub fn with_clock(limit: u32, window: Duration, clock: Arc<C>) -> Self {
        Self {
            limit,
            window,
            windows: DashMap::new(),
            clock,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Number of keys currently holding a window.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    fn admit(&self, window: &mut RateWindow, now: Instant) -> RateDecision {
        if now.saturating_duration_since(window.started) >= self.window {
            window.count = 0;
            window.started = now;
        }

        if window.count >= self.limit {
            return RateDecision::Denied {
                retry_after: (window.started + self.window).saturating_duration_since(now),
            };
        }

        window.count += 1;
        RateDecision::Allowed {
            remaining: self.limit - window.count,
        }
    }
}

impl<C: Clock> RateLimiter for FixedWindowLimiter<C> {
    fn allow(&self, key: &str) -> RateDecision {
        let now = self.clock.now();

        // Existing keys avoid allocating an owned String.
        if let Some(mut window) = self.windows.get_mut(key) {
            return self.admit(&mut window, now);
        }

        let mut window = self
            .windows
            .entry(key.to_string())
            .or_insert(RateWindow {
                count: 0,
                started: now,
            });
        self.admit(&mut window, now)
    }

    fn cleanup(&self) {
        let now = self.clock.now();
        let idle = self.window * 2;
        self.windows
            .retain(|_, window| now.saturating_duration_since(window.started) < idle);
    }
}

/// Caller key for rate limiting: `ip:<addr>`.
///
/// Proxy headers win over the socket peer, `X-Real-IP` first.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| {
            headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        });

    match (forwarded, peer) {
        (Some(ip), _) => format!("ip:{}", ip),
        (None, Some(addr)) => format!("ip:{}", addr.ip()),
        (None, None) => "ip:unknown".to_string(),
    }
}

/// Rate limiting middleware function.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_key(request.headers(), peer);

    match state.pipeline.admit(&key) {
        Ok(()) => next.run(request).await,
        Err(rejection) => rejection.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ManualClock;
    use axum::http::HeaderValue;

    fn limiter(limit: u32, window_secs: u64) -> (FixedWindowLimiter<ManualClock>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let limiter =
            FixedWindowLimiter::with_clock(limit, Duration::from_secs(window_secs), clock.clone());
        (limiter, clock)
    }

    #[test]
    fn test_five_per_five_seconds() {
        let (limiter, clock) = limiter(5, 5);
        let key = "ip:1.2.3.4";

        for expected_remaining in (0..5).rev() {
            assert_eq!(
                limiter.allow(key),
                RateDecision::Allowed {
                    remaining: expected_remaining
                }
            );
        }

        match limiter.allow(key) {
            RateDecision::Denied { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(5));
            }
            other => panic!("sixth call should be denied, got {:?}", other),
        }

        clock.advance(Duration::from_secs(5));
        assert_eq!(limiter.allow(key), RateDecision::Allowed { remaining: 4 });
    }

    #[test]
    fn test_retry_after_shrinks_within_window() {
        let (limiter, clock) = limiter(1, 10);
        assert!(limiter.allow("k").is_allowed());

        clock.advance(Duration::from_secs(3));
        assert_eq!(
            limiter.allow("k"),
            RateDecision::Denied {
                retry_after: Duration::from_secs(7)
            }
        );
    }

    #[test]
    fn test_denied_calls_do_not_extend_window() {
        let (limiter, clock) = limiter(2, 5);
        assert!(limiter.allow("k").is_allowed());
        assert!(limiter.allow("k").is_allowed());

        for _ in 0..10 {
            clock.advance(Duration::from_millis(400));
            assert!(!limiter.allow("k").is_allowed());
        }

        clock.advance(Duration::from_secs(1));
        assert!(limiter.allow("k").is_allowed());
    }

    #[test]
    fn test_keys_are_isolated() {
        let (limiter, _clock) = limiter(1, 60);
        assert!(limiter.allow("ip:10.0.0.1").is_allowed());
        assert!(!limiter.allow("ip:10.0.0.1").is_allowed());
        assert!(limiter.allow("ip:10.0.0.2").is_allowed());
    }

    #[test]
    fn test_concurrent_callers_never_over_admit() {
        let limiter = FixedWindowLimiter::new(50, Duration::from_secs(60));
        let admitted = std::sync::atomic::AtomicU32::new(0);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..100 {
                        if limiter.allow("ip:shared").is_allowed() {
                            admitted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(admitted.into_inner(), 50);
    }

    #[test]
    fn test_cleanup_drops_idle_windows() {
        let (limiter, clock) = limiter(5, 5);
        limiter.allow("old");
        clock.advance(Duration::from_secs(6));
        limiter.allow("fresh");

        clock.advance(Duration::from_secs(4));
        limiter.cleanup();

        assert_eq!(limiter.tracked_keys(), 1);
        assert_eq!(limiter.allow("fresh"), RateDecision::Allowed { remaining: 3 });
    }

    #[test]
    fn test_disabled_mode_admits_everything() {
        let limiter = from_config(&RateLimitConfig {
            enabled: false,
            requests_per_window: 1,
            window: Duration::from_secs(60),
        });

        for _ in 0..1000 {
            assert!(limiter.allow("ip:1.2.3.4").is_allowed());
        }
    }

    #[test]
    fn test_client_key_precedence() {
        let peer: SocketAddr = "192.168.1.9:51000".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_key(&headers, Some(peer)), "ip:192.168.1.9");
        assert_eq!(client_key(&headers, None), "ip:unknown");

        headers.insert("x-forwarded-for", HeaderValue::from_static("10.1.1.1, 10.2.2.2"));
        assert_eq!(client_key(&headers, Some(peer)), "ip:10.1.1.1");

        headers.insert("x-real-ip", HeaderValue::from_static("1.2.3.4"));
        assert_eq!(client_key(&headers, Some(peer)), "ip:1.2.3.4");
    }
}
