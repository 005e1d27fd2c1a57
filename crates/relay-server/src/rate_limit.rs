//! Fixed-window rate limiting for the producer endpoint.
//!
//! Each peer IP gets `max_requests` per `window`. The window starts at the
//! first request and resets once it has fully elapsed.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use metrics::counter;
use parking_lot::Mutex;
use relay_settings::IngressSettings;
use serde_json::json;
use tokio::time::Instant;
use tracing::warn;

use crate::metrics::RATE_LIMITED_TOTAL;

/// Windows are pruned once this many peers are tracked.
const PRUNE_THRESHOLD: usize = 4096;

/// Body of the 429 response.
pub const RATE_LIMIT_MESSAGE: &str = "Too many requests, please try again later.";

/// Result of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// Request admitted.
    Allowed {
        /// Requests left in the current window.
        remaining: u32,
    },
    /// Request refused.
    Limited {
        /// Time until the window resets.
        retry_after: Duration,
    },
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: Instant,
    count: u32,
}

/// Per-IP fixed-window limiter.
pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    windows: Mutex<HashMap<IpAddr, Window>>,
}

impl RateLimiter {
    /// Create a limiter allowing `max_requests` per `window` per IP.
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests: max_requests.max(1),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Create a limiter from ingress settings.
    pub fn from_settings(settings: &IngressSettings) -> Self {
        Self::new(
            Duration::from_millis(settings.rate_limit_window_ms),
            settings.rate_limit_max_requests,
        )
    }

    /// Count a request from `ip` at `now`.
    pub fn check(&self, ip: IpAddr, now: Instant) -> RateLimitDecision {
        let mut windows = self.windows.lock();
        if windows.len() >= PRUNE_THRESHOLD {
            let window = self.window;
            windows.retain(|_, w| now.saturating_duration_since(w.started_at) < window);
        }

        let entry = windows.entry(ip).or_insert(Window {
            started_at: now,
            count: 0,
        });
        let elapsed = now.saturating_duration_since(entry.started_at);
        if elapsed >= self.window {
            *entry = Window {
                started_at: now,
                count: 0,
            };
        }

        if entry.count >= self.max_requests {
            let retry_after = self.window.saturating_sub(now.saturating_duration_since(entry.started_at));
            return RateLimitDecision::Limited { retry_after };
        }
        entry.count += 1;
        RateLimitDecision::Allowed {
            remaining: self.max_requests - entry.count,
        }
    }

    /// Number of peers currently tracked.
    pub fn tracked(&self) -> usize {
        self.windows.lock().len()
    }
}

/// Axum middleware refusing over-limit producers with `429`.
///
/// The peer address comes from `ConnectInfo`; requests without it share
/// one bucket.
pub async fn limit_producers(State(limiter): State<Arc<RateLimiter>>, request: Request, next: Next) -> Response {
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED), |ConnectInfo(addr)| addr.ip());

    match limiter.check(ip, Instant::now()) {
        RateLimitDecision::Allowed { .. } => next.run(request).await,
        RateLimitDecision::Limited { retry_after } => {
            counter!(RATE_LIMITED_TOTAL).increment(1);
            warn!(%ip, "producer rate limited");
            let secs = retry_after.as_secs().max(1);
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, secs.to_string())],
                Json(json!({ "message": RATE_LIMIT_MESSAGE })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn allows_up_to_max() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 3);
        let now = Instant::now();
        assert_eq!(limiter.check(ip(1), now), RateLimitDecision::Allowed { remaining: 2 });
        assert_eq!(limiter.check(ip(1), now), RateLimitDecision::Allowed { remaining: 1 });
        assert_eq!(limiter.check(ip(1), now), RateLimitDecision::Allowed { remaining: 0 });
        assert!(matches!(limiter.check(ip(1), now), RateLimitDecision::Limited { .. }));
    }

    #[test]
    fn peers_are_independent() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        let now = Instant::now();
        assert!(matches!(limiter.check(ip(1), now), RateLimitDecision::Allowed { .. }));
        assert!(matches!(limiter.check(ip(1), now), RateLimitDecision::Limited { .. }));
        assert!(matches!(limiter.check(ip(2), now), RateLimitDecision::Allowed { .. }));
        assert_eq!(limiter.tracked(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn window_resets() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        assert!(matches!(limiter.check(ip(1), Instant::now()), RateLimitDecision::Allowed { .. }));

        tokio::time::advance(Duration::from_secs(45)).await;
        match limiter.check(ip(1), Instant::now()) {
            RateLimitDecision::Limited { retry_after } => assert_eq!(retry_after, Duration::from_secs(15)),
            other => panic!("expected limited, got {other:?}"),
        }

        tokio::time::advance(Duration::from_secs(15)).await;
        assert!(matches!(limiter.check(ip(1), Instant::now()), RateLimitDecision::Allowed { .. }));
    }

    #[test]
    fn default_settings_allow_ten_per_minute() {
        let limiter = RateLimiter::from_settings(&IngressSettings::default());
        let now = Instant::now();
        for _ in 0..10 {
            assert!(matches!(limiter.check(ip(9), now), RateLimitDecision::Allowed { .. }));
        }
        assert!(matches!(limiter.check(ip(9), now), RateLimitDecision::Limited { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_windows_are_pruned() {
        let limiter = RateLimiter::new(Duration::from_secs(1), 5);
        for i in 0..PRUNE_THRESHOLD {
            #[allow(clippy::cast_possible_truncation)]
            let addr = IpAddr::V4(Ipv4Addr::from(i as u32));
            let _ = limiter.check(addr, Instant::now());
        }
        assert_eq!(limiter.tracked(), PRUNE_THRESHOLD);
        tokio::time::advance(Duration::from_secs(2)).await;
        let _ = limiter.check(ip(1), Instant::now());
        assert_eq!(limiter.tracked(), 1);
    }
}
