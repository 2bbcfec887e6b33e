//! Token-bucket rate limiting.
//!
//! One [`RateLimiter`] type serves two keys: client IPs on the HTTP router
//! and user ids on the send path.

use std::collections::HashMap;
use std::hash::Hash;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use tokio::sync::Mutex;
use tracing::warn;

use chatwave_shared::error::ChatError;

use crate::error::ServerError;

/// Sustained rate and burst size of a limiter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quota {
    pub per_sec: f64,
    pub burst: f64,
}

#[derive(Debug, Clone)]
struct Bucket {
    available: f64,
    refilled_at: Instant,
}

impl Bucket {
    fn full(quota: Quota, now: Instant) -> Self {
        Self {
            available: quota.burst,
            refilled_at: now,
        }
    }

    fn take(&mut self, quota: Quota, now: Instant) -> bool {
        let idle = now.saturating_duration_since(self.refilled_at).as_secs_f64();
        self.available = (self.available + idle * quota.per_sec).min(quota.burst);
        self.refilled_at = now;

        let granted = self.available >= 1.0;
        if granted {
            self.available -= 1.0;
        }
        granted
    }
}

#[derive(Clone)]
pub struct RateLimiter<K = IpAddr> {
    buckets: Arc<Mutex<HashMap<K, Bucket>>>,
    quota: Quota,
}

impl<K> RateLimiter<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new(per_sec: f64, burst: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            quota: Quota { per_sec, burst },
        }
    }

    pub fn quota(&self) -> Quota {
        self.quota
    }

    /// Spend one token for `key`. `false` means the caller is over quota.
    pub async fn check(&self, key: K) -> bool {
        let now = Instant::now();
        let quota = self.quota;
        self.buckets
            .lock()
            .await
            .entry(key)
            .or_insert_with(|| Bucket::full(quota, now))
            .take(quota, now)
    }

    /// Forget keys that have not been seen for `idle`.
    pub async fn purge_idle(&self, idle: Duration) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();
        buckets.retain(|_, b| now.saturating_duration_since(b.refilled_at) < idle);
        before - buckets.len()
    }
}

/// 10 requests per second per IP, bursts of 30.
impl Default for RateLimiter<IpAddr> {
    fn default() -> Self {
        Self::new(10.0, 30.0)
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter<IpAddr>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ServerError> {
    if let Some(ip) = client_ip(&req) {
        if !limiter.check(ip).await {
            warn!(%ip, path = %req.uri().path(), "Request throttled");
            return Err(ChatError::RateLimited.into());
        }
    }
    Ok(next.run(req).await)
}

/// Peer address when served with connect info, else the first hop of a
/// proxy header.
fn client_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return Some(addr.ip());
    }

    ["x-forwarded-for", "x-real-ip"].iter().find_map(|name| {
        req.headers()
            .get(*name)?
            .to_str()
            .ok()?
            .split(',')
            .next()?
            .trim()
            .parse()
            .ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatwave_shared::types::UserId;

    #[tokio::test]
    async fn burst_then_throttle() {
        let limiter: RateLimiter = RateLimiter::new(10.0, 5.0);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();

        for _ in 0..5 {
            assert!(limiter.check(ip).await);
        }
        assert!(!limiter.check(ip).await);
    }

    #[tokio::test]
    async fn users_have_separate_buckets() {
        let limiter: RateLimiter<UserId> = RateLimiter::new(0.01, 2.0);
        let (alice, bob) = (UserId::new(), UserId::new());

        assert!(limiter.check(alice).await);
        assert!(limiter.check(alice).await);
        assert!(!limiter.check(alice).await);

        assert!(limiter.check(bob).await);
    }

    #[tokio::test]
    async fn idle_keys_are_purged() {
        let limiter: RateLimiter = RateLimiter::new(10.0, 5.0);
        limiter.check("192.168.1.1".parse().unwrap()).await;

        assert_eq!(limiter.purge_idle(Duration::from_secs(600)).await, 0);
        assert_eq!(limiter.purge_idle(Duration::ZERO).await, 1);
        assert!(limiter.buckets.lock().await.is_empty());
    }

    #[test]
    fn proxy_headers_are_used_without_connect_info() {
        let req = Request::builder()
            .header("x-forwarded-for", "10.1.2.3, 172.16.0.1")
            .body(())
            .unwrap();
        assert_eq!(client_ip(&req), Some("10.1.2.3".parse().unwrap()));

        let req = Request::builder()
            .header("x-real-ip", "10.9.9.9")
            .body(())
            .unwrap();
        assert_eq!(client_ip(&req), Some("10.9.9.9".parse().unwrap()));

        assert_eq!(client_ip(&Request::new(())), None);
    }
}
