//! Exploration rate limiter
//!
//! Applies only to GET requests that fall through every lookup tier and
//! would trigger fabrication — cache hits and mutating verbs are never
//! counted. One sliding window per client IP.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Limiter backend failures
#[derive(Debug, Error)]
#[error("rate limiter error: {0}")]
pub struct LimiterError(pub String);

/// Outcome of a rate check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Under budget; fabrication may proceed
    Allowed,
    /// Over budget; respond 429 carrying the window's remaining TTL
    Limited { retry_after: i64 },
}

/// Sliding-window counter for novel exploration traffic.
#[async_trait]
pub trait ExplorationLimiter: Send + Sync {
    /// Count one novel fabrication attempt for this client and decide.
    async fn check(&self, client_ip: &str) -> Result<RateDecision, LimiterError>;
}

/// Redis-backed limiter: `INCR`, first-hit `EXPIRE`, `TTL` when over budget.
pub struct RedisLimiter {
    conn: redis::aio::ConnectionManager,
    limit: u64,
    window_secs: i64,
}

impl RedisLimiter {
    pub fn new(conn: redis::aio::ConnectionManager, limit: u64, window_secs: i64) -> Self {
        Self {
            conn,
            limit,
            window_secs,
        }
    }

    fn key(client_ip: &str) -> String {
        format!("rate:newget:{client_ip}")
    }
}

#[async_trait]
impl ExplorationLimiter for RedisLimiter {
    async fn check(&self, client_ip: &str) -> Result<RateDecision, LimiterError> {
        let key = Self::key(client_ip);
        let mut conn = self.conn.clone();

        let count: u64 = redis::cmd("INCR")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| LimiterError(e.to_string()))?;

        if count == 1 {
            redis::cmd("EXPIRE")
                .arg(&key)
                .arg(self.window_secs)
                .query_async::<_, ()>(&mut conn)
                .await
                .map_err(|e| LimiterError(e.to_string()))?;
        }

        if count > self.limit {
            let ttl: i64 = redis::cmd("TTL")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .map_err(|e| LimiterError(e.to_string()))?;

            return Ok(RateDecision::Limited {
                retry_after: ttl.max(0),
            });
        }

        Ok(RateDecision::Allowed)
    }
}

/// In-process limiter for single-instance deployments and tests.
#[derive(Debug)]
pub struct MemoryLimiter {
    windows: Mutex<HashMap<String, (u64, Instant)>>,
    limit: u64,
    window: Duration,
}

impl MemoryLimiter {
    pub fn new(limit: u64, window_secs: i64) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            limit,
            window: Duration::from_secs(window_secs.max(0) as u64),
        }
    }
}

#[async_trait]
impl ExplorationLimiter for MemoryLimiter {
    async fn check(&self, client_ip: &str) -> Result<RateDecision, LimiterError> {
        let mut windows = self
            .windows
            .lock()
            .map_err(|_| LimiterError("limiter lock poisoned".to_string()))?;

        let now = Instant::now();
        let entry = windows
            .entry(client_ip.to_string())
            .or_insert((0, now + self.window));

        // Window elapsed: start a fresh one, like an expired counter key.
        if entry.1 <= now {
            *entry = (0, now + self.window);
        }

        entry.0 += 1;
        if entry.0 > self.limit {
            let retry_after = entry.1.saturating_duration_since(now).as_secs() as i64;
            return Ok(RateDecision::Limited { retry_after });
        }

        Ok(RateDecision::Allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_up_to_the_limit() {
        let limiter = MemoryLimiter::new(10, 900);
        for _ in 0..10 {
            assert_eq!(
                limiter.check("10.0.0.1").await.unwrap(),
                RateDecision::Allowed
            );
        }
    }

    #[tokio::test]
    async fn eleventh_check_is_limited_with_bounded_ttl() {
        let limiter = MemoryLimiter::new(10, 900);
        for _ in 0..10 {
            limiter.check("10.0.0.1").await.unwrap();
        }

        match limiter.check("10.0.0.1").await.unwrap() {
            RateDecision::Limited { retry_after } => {
                assert!(retry_after <= 900);
                assert!(retry_after >= 0);
            }
            RateDecision::Allowed => panic!("expected limited"),
        }
    }

    #[tokio::test]
    async fn clients_are_counted_independently() {
        let limiter = MemoryLimiter::new(1, 900);
        assert_eq!(
            limiter.check("10.0.0.1").await.unwrap(),
            RateDecision::Allowed
        );
        assert_eq!(
            limiter.check("10.0.0.2").await.unwrap(),
            RateDecision::Allowed
        );
        assert!(matches!(
            limiter.check("10.0.0.1").await.unwrap(),
            RateDecision::Limited { .. }
        ));
    }

    #[tokio::test]
    async fn elapsed_window_resets_the_counter() {
        let limiter = MemoryLimiter::new(1, 0);
        limiter.check("10.0.0.1").await.unwrap();
        assert_eq!(
            limiter.check("10.0.0.1").await.unwrap(),
            RateDecision::Allowed
        );
    }
}
