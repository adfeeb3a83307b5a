//! Fabrication gate — distributed TTL mutex keyed by request fingerprint
//!
//! Prevents concurrent duplicate fabrication: the first request for a
//! fingerprint wins the gate and fabricates; losers fail fast with a
//! "locked, retry later" outcome instead of queuing. The TTL bounds how
//! long a crashed holder can block a fingerprint.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Gate backend failures (the shared store, not contention)
#[derive(Debug, Error)]
#[error("gate error: {0}")]
pub struct GateError(pub String);

/// Per-fingerprint TTL mutex. Collisions are rejected, never serialized.
#[async_trait]
pub trait FabricationGate: Send + Sync {
    /// Try to take the gate. `false` means another holder is active and the
    /// caller must answer with the locked outcome — no state change.
    async fn acquire(&self, key: &str) -> Result<bool, GateError>;

    /// Release the gate. Callers must release on every exit path of the
    /// critical section; the TTL is only the crash backstop.
    async fn release(&self, key: &str) -> Result<(), GateError>;
}

/// Redis-backed gate: `SET key NX EX ttl` / `DEL key`.
pub struct RedisGate {
    conn: redis::aio::ConnectionManager,
    ttl: Duration,
}

impl RedisGate {
    pub fn new(conn: redis::aio::ConnectionManager, ttl: Duration) -> Self {
        Self { conn, ttl }
    }

    fn key(fingerprint: &str) -> String {
        format!("gate:{fingerprint}")
    }
}

#[async_trait]
impl FabricationGate for RedisGate {
    async fn acquire(&self, key: &str) -> Result<bool, GateError> {
        let mut conn = self.conn.clone();
        let set: Option<String> = redis::cmd("SET")
            .arg(Self::key(key))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(self.ttl.as_secs())
            .query_async(&mut conn)
            .await
            .map_err(|e| GateError(e.to_string()))?;

        Ok(set.is_some())
    }

    async fn release(&self, key: &str) -> Result<(), GateError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(Self::key(key))
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| GateError(e.to_string()))?;
        Ok(())
    }
}

/// In-process gate for single-instance deployments and tests.
#[derive(Debug, Default)]
pub struct MemoryGate {
    held: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl MemoryGate {
    pub fn new(ttl: Duration) -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
            ttl,
        }
    }
}

#[async_trait]
impl FabricationGate for MemoryGate {
    async fn acquire(&self, key: &str) -> Result<bool, GateError> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| GateError("gate lock poisoned".to_string()))?;

        let now = Instant::now();
        held.retain(|_, expires| *expires > now);

        if held.contains_key(key) {
            return Ok(false);
        }

        held.insert(key.to_string(), now + self.ttl);
        Ok(true)
    }

    async fn release(&self, key: &str) -> Result<(), GateError> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| GateError("gate lock poisoned".to_string()))?;
        held.remove(key);
        Ok(())
    }
}
