//! Per-client rate limiting with a sliding window.
//!
//! Each (client IP, tier) pair keeps the instants of its recent requests; a
//! request is admitted while fewer than the tier's limit fall inside the
//! trailing window.

use axum::{
    async_trait,
    body::Body,
    extract::{ConnectInfo, FromRequestParts, State},
    http::{request::Parts, HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::error::ApiError;
use crate::config::RateLimitConfig;
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitTier {
    /// Airport, METAR and user endpoints
    Api,
    /// Login, registration and session refresh
    Auth,
}

#[derive(Debug)]
pub struct RateLimiter {
    /// Request instants inside the current window, oldest first
    entries: DashMap<(IpAddr, RateLimitTier), VecDeque<Instant>>,
    config: RateLimitConfig,
    window: Duration,
}

/// Rate limit status reported back in response headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub remaining: u32,
    pub limit: u32,
    /// Seconds until the oldest counted request leaves the window
    pub reset_after: u64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            entries: DashMap::new(),
            window: Duration::from_secs(config.window_seconds),
            config,
        }
    }

    fn limit(&self, tier: RateLimitTier) -> u32 {
        match tier {
            RateLimitTier::Api => self.config.api_requests_per_window,
            RateLimitTier::Auth => self.config.auth_requests_per_window,
        }
    }

    /// Record a request. Returns `Err(retry_after_seconds)` when the client
    /// is over its limit.
    pub fn check(&self, ip: IpAddr, tier: RateLimitTier) -> Result<RateLimitInfo, u64> {
        self.check_at(ip, tier, Instant::now())
    }

    fn check_at(&self, ip: IpAddr, tier: RateLimitTier, now: Instant) -> Result<RateLimitInfo, u64> {
        let limit = self.limit(tier);
        if !self.config.enabled {
            return Ok(RateLimitInfo {
                remaining: limit,
                limit,
                reset_after: 0,
            });
        }

        let mut hits = self.entries.entry((ip, tier)).or_default();
        while let Some(&oldest) = hits.front() {
            if now.duration_since(oldest) >= self.window {
                hits.pop_front();
            } else {
                break;
            }
        }

        let reset_after = |oldest: Option<&Instant>| {
            oldest
                .map(|t| self.window.saturating_sub(now.duration_since(*t)))
                .unwrap_or(self.window)
                .as_secs()
                .max(1)
        };

        if hits.len() >= limit as usize {
            return Err(reset_after(hits.front()));
        }

        hits.push_back(now);
        Ok(RateLimitInfo {
            remaining: limit.saturating_sub(hits.len() as u32),
            limit,
            reset_after: reset_after(hits.front()),
        })
    }

    /// Forget clients with no requests inside the window.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, hits| {
            hits.back()
                .map(|last| now.duration_since(*last) < self.window)
                .unwrap_or(false)
        });
        before.saturating_sub(self.entries.len())
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

/// Client address: the first `X-Forwarded-For` hop when the peer is a local
/// proxy, otherwise the peer itself.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> IpAddr {
    let forwarded = || {
        headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|ip| ip.trim().parse::<IpAddr>().ok())
            .or_else(|| {
                headers
                    .get("x-real-ip")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|ip| ip.trim().parse::<IpAddr>().ok())
            })
    };

    match peer {
        Some(addr) if !addr.ip().is_loopback() => addr.ip(),
        Some(addr) => forwarded().unwrap_or(addr.ip()),
        None => forwarded().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)),
    }
}

/// Extractor for the caller's address. Never rejects.
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub IpAddr);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);
        Ok(ClientIp(client_ip(&parts.headers, peer)))
    }
}

pub async fn rate_limit_api(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    rate_limit_with_tier(&state, request, next, RateLimitTier::Api).await
}

pub async fn rate_limit_auth(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    rate_limit_with_tier(&state, request, next, RateLimitTier::Auth).await
}

async fn rate_limit_with_tier(
    state: &AppState,
    request: Request<Body>,
    next: Next,
    tier: RateLimitTier,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let ip = client_ip(request.headers(), peer);

    match state.rate_limiter.check(ip, tier) {
        Ok(info) => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert("x-ratelimit-limit", HeaderValue::from(info.limit));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(info.remaining));
            headers.insert("x-ratelimit-reset", HeaderValue::from(info.reset_after));
            response
        }
        Err(retry_after) => {
            tracing::warn!(ip = %ip, tier = ?tier, retry_after, "Rate limit exceeded");
            let mut response = ApiError::rate_limited(retry_after).into_response();
            let headers = response.headers_mut();
            headers.insert("retry-after", HeaderValue::from(retry_after));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(0u32));
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            window_seconds: 60,
            api_requests_per_window: 10,
            auth_requests_per_window: 3,
        }
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_allows_until_limit() {
        let limiter = RateLimiter::new(test_config());
        for i in 0..10 {
            let info = limiter.check(ip("192.168.1.1"), RateLimitTier::Api).unwrap();
            assert_eq!(info.remaining, 9 - i);
        }
        assert!(limiter.check(ip("192.168.1.1"), RateLimitTier::Api).is_err());
    }

    #[test]
    fn test_tiers_and_clients_are_separate() {
        let limiter = RateLimiter::new(test_config());
        for _ in 0..3 {
            limiter.check(ip("10.0.0.1"), RateLimitTier::Auth).unwrap();
        }
        assert!(limiter.check(ip("10.0.0.1"), RateLimitTier::Auth).is_err());
        assert!(limiter.check(ip("10.0.0.1"), RateLimitTier::Api).is_ok());
        assert!(limiter.check(ip("10.0.0.2"), RateLimitTier::Auth).is_ok());
    }

    #[test]
    fn test_window_slides() {
        let limiter = RateLimiter::new(test_config());
        let start = Instant::now();
        let client = ip("10.0.0.1");

        limiter.check_at(client, RateLimitTier::Auth, start).unwrap();
        limiter
            .check_at(client, RateLimitTier::Auth, start + Duration::from_secs(30))
            .unwrap();
        limiter
            .check_at(client, RateLimitTier::Auth, start + Duration::from_secs(40))
            .unwrap();

        let retry = limiter
            .check_at(client, RateLimitTier::Auth, start + Duration::from_secs(50))
            .unwrap_err();
        assert_eq!(retry, 10);

        // The first request has left the window, one slot opens
        let info = limiter
            .check_at(client, RateLimitTier::Auth, start + Duration::from_secs(61))
            .unwrap();
        assert_eq!(info.remaining, 0);
    }

    #[test]
    fn test_disabled() {
        let limiter = RateLimiter::new(RateLimitConfig {
            enabled: false,
            ..test_config()
        });
        for _ in 0..100 {
            assert!(limiter.check(ip("10.0.0.1"), RateLimitTier::Auth).is_ok());
        }
        assert_eq!(limiter.entry_count(), 0);
    }

    #[test]
    fn test_cleanup_keeps_active_clients() {
        let limiter = RateLimiter::new(test_config());
        limiter.check(ip("10.0.0.1"), RateLimitTier::Api).unwrap();
        assert_eq!(limiter.cleanup_expired(), 0);
        assert_eq!(limiter.entry_count(), 1);

        let limiter = RateLimiter::new(RateLimitConfig {
            window_seconds: 0,
            ..test_config()
        });
        let _ = limiter.check(ip("10.0.0.1"), RateLimitTier::Api);
        assert_eq!(limiter.cleanup_expired(), 1);
    }

    #[test]
    fn test_client_ip_resolution() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));

        let proxy: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        assert_eq!(client_ip(&headers, Some(proxy)), ip("203.0.113.7"));

        // A remote peer cannot spoof its address
        let remote: SocketAddr = "198.51.100.4:5000".parse().unwrap();
        assert_eq!(client_ip(&headers, Some(remote)), ip("198.51.100.4"));

        assert_eq!(client_ip(&HeaderMap::new(), None), ip("127.0.0.1"));
    }
}
