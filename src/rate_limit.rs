use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::config::RateLimitConfig;
use crate::error::ApiError;
use crate::state::AppState;

const STORE_CLEANUP_THRESHOLD: usize = 10_000;
const STORE_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// Fixed quota per client IP over a rolling window. The response for an
/// over-quota request is the same whether or not the wrapped operation would
/// have found an account, so the guard itself leaks nothing.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    store: Mutex<HashMap<IpAddr, VecDeque<Instant>>>,
    last_cleanup: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(cfg: &RateLimitConfig) -> Self {
        Self {
            max_requests: cfg.max_requests.max(1),
            window: Duration::from_secs(cfg.window_seconds.max(1)),
            store: Mutex::new(HashMap::new()),
            last_cleanup: Mutex::new(Instant::now()),
        }
    }

    /// Records a hit for `key` at `now`, or returns the seconds to wait.
    pub fn check(&self, key: IpAddr, now: Instant) -> Result<(), u64> {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        if self.should_cleanup(store.len(), now) {
            store.retain(|_, hits| {
                prune_expired(hits, now, self.window);
                !hits.is_empty()
            });
            *self.last_cleanup.lock().unwrap_or_else(|e| e.into_inner()) = now;
        }

        let hits = store.entry(key).or_default();
        prune_expired(hits, now, self.window);

        if hits.len() >= self.max_requests as usize {
            let retry_after = hits
                .front()
                .map(|oldest| {
                    self.window
                        .saturating_sub(now.duration_since(*oldest))
                        .as_secs()
                        .max(1)
                })
                .unwrap_or(1);
            return Err(retry_after);
        }

        hits.push_back(now);
        Ok(())
    }

    fn should_cleanup(&self, store_len: usize, now: Instant) -> bool {
        let last = *self.last_cleanup.lock().unwrap_or_else(|e| e.into_inner());
        store_len > STORE_CLEANUP_THRESHOLD || now.duration_since(last) >= STORE_CLEANUP_INTERVAL
    }
}

fn prune_expired(hits: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = hits.front() {
        if now.duration_since(*oldest) >= window {
            hits.pop_front();
        } else {
            break;
        }
    }
}

pub async fn ip_rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let key = client_ip(&request);
    match state.limiter.check(key, Instant::now()) {
        Ok(()) => next.run(request).await,
        Err(retry_after) => ApiError::Throttled { retry_after }.into_response(),
    }
}

/// First hop of X-Forwarded-For when behind a proxy, socket peer otherwise.
fn client_ip(request: &Request) -> IpAddr {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse::<IpAddr>().ok())
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0.ip())
        })
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32, window_seconds: u64) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            max_requests,
            window_seconds,
        })
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn allows_up_to_quota_then_rejects() {
        let limiter = limiter(3, 60);
        let now = Instant::now();
        for _ in 0..3 {
            assert!(limiter.check(ip(1), now).is_ok());
        }
        let retry = limiter.check(ip(1), now).unwrap_err();
        assert!(retry >= 1 && retry <= 60);
    }

    #[test]
    fn keys_are_independent() {
        let limiter = limiter(1, 60);
        let now = Instant::now();
        assert!(limiter.check(ip(1), now).is_ok());
        assert!(limiter.check(ip(2), now).is_ok());
        assert!(limiter.check(ip(1), now).is_err());
    }

    #[test]
    fn window_slides() {
        let limiter = limiter(1, 1);
        let start = Instant::now();
        assert!(limiter.check(ip(1), start).is_ok());
        assert!(limiter.check(ip(1), start).is_err());
        let later = start + Duration::from_secs(2);
        assert!(limiter.check(ip(1), later).is_ok());
    }

    #[test]
    fn prune_drops_only_expired() {
        let window = Duration::from_secs(10);
        let start = Instant::now();
        let mut hits: VecDeque<Instant> =
            vec![start, start + Duration::from_secs(5)].into_iter().collect();
        prune_expired(&mut hits, start + Duration::from_secs(11), window);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn retry_after_counts_down() {
        let limiter = limiter(1, 30);
        let start = Instant::now();
        assert!(limiter.check(ip(1), start).is_ok());
        let retry = limiter
            .check(ip(1), start + Duration::from_secs(20))
            .unwrap_err();
        assert_eq!(retry, 10);
    }
}
