//! Fixed-window usage quota for anonymous query traffic.
//!
//! Each identity gets a counter that starts at 1 on first use and expires
//! `window` later, at which point it resets wholesale. While the counter
//! is below the ceiling a call increments it and is allowed; at or above
//! the ceiling a call is denied and the counter is left alone.
//!
//! The check and the increment happen as one step inside the
//! [`QuotaStore`], so concurrent calls at the boundary cannot both get in.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::QuotaConfig;
use crate::error::QuotaError;

/// Counter storage with an atomic check-and-increment.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// If the counter for `key` is below `ceiling`, increment it (creating
    /// it at 1 with a `ttl` expiry when absent) and return the new value.
    /// Otherwise return `None` without touching it.
    async fn try_increment(
        &self,
        key: &str,
        ceiling: u64,
        ttl: Duration,
    ) -> Result<Option<u64>, QuotaError>;
}

// ============ In-memory ============

struct Counter {
    count: u64,
    expires_at: Instant,
}

/// Process-local store. Counters do not survive a restart.
#[derive(Default)]
pub struct MemoryQuotaStore {
    counters: Mutex<HashMap<String, Counter>>,
}

const PURGE_THRESHOLD: usize = 10_000;

impl MemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn try_increment(
        &self,
        key: &str,
        ceiling: u64,
        ttl: Duration,
    ) -> Result<Option<u64>, QuotaError> {
        let now = Instant::now();
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| QuotaError::Unavailable("quota counter lock poisoned".to_string()))?;

        if counters.len() > PURGE_THRESHOLD {
            counters.retain(|_, c| c.expires_at > now);
        }

        match counters.get_mut(key) {
            Some(counter) if counter.expires_at > now => {
                if counter.count >= ceiling {
                    return Ok(None);
                }
                counter.count += 1;
                Ok(Some(counter.count))
            }
            _ => {
                counters.insert(
                    key.to_string(),
                    Counter {
                        count: 1,
                        expires_at: now + ttl,
                    },
                );
                Ok(Some(1))
            }
        }
    }
}

// ============ Redis ============

const INCREMENT_SCRIPT: &str = r#"
    local current = tonumber(redis.call('GET', KEYS[1]) or '0')
    if current >= tonumber(ARGV[1]) then
        return -1
    end
    local count = redis.call('INCR', KEYS[1])
    if count == 1 then
        redis.call('PEXPIRE', KEYS[1], ARGV[2])
    end
    return count
"#;

/// Shared store; counters are plain Redis integers with a `PEXPIRE`.
#[derive(Clone)]
pub struct RedisQuotaStore {
    manager: ConnectionManager,
    prefix: String,
}

impl RedisQuotaStore {
    pub async fn connect(redis_url: &str, prefix: impl Into<String>) -> Result<Self, QuotaError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| QuotaError::Unavailable(e.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| QuotaError::Unavailable(e.to_string()))?;
        Ok(Self {
            manager,
            prefix: prefix.into(),
        })
    }

    fn key(&self, identity: &str) -> String {
        format!("{}:{}", self.prefix, identity)
    }
}

#[async_trait]
impl QuotaStore for RedisQuotaStore {
    async fn try_increment(
        &self,
        key: &str,
        ceiling: u64,
        ttl: Duration,
    ) -> Result<Option<u64>, QuotaError> {
        let ttl_ms = (ttl.as_millis() as u64).max(1);
        let mut conn = self.manager.clone();
        let script = redis::Script::new(INCREMENT_SCRIPT);
        let count: i64 = script
            .key(self.key(key))
            .arg(ceiling)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| QuotaError::Unavailable(e.to_string()))?;

        if count < 0 {
            Ok(None)
        } else {
            Ok(Some(count as u64))
        }
    }
}

// ============ Tracker ============

/// Result of one quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub remaining: u64,
}

pub struct QuotaTracker {
    store: Arc<dyn QuotaStore>,
    ceiling: u64,
    window: Duration,
}

impl QuotaTracker {
    pub fn new(store: Arc<dyn QuotaStore>, ceiling: u64, window: Duration) -> Self {
        Self {
            store,
            ceiling,
            window,
        }
    }

    /// Build the configured backend (`memory` or `redis`).
    pub async fn from_config(config: &QuotaConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn QuotaStore> = match config.backend.as_str() {
            "redis" => {
                let url = config
                    .redis_url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("quota.redis_url is required for redis"))?;
                Arc::new(RedisQuotaStore::connect(url, config.key_prefix.clone()).await?)
            }
            _ => Arc::new(MemoryQuotaStore::new()),
        };
        Ok(Self::new(store, config.ceiling, config.window()))
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    pub async fn check_and_increment(&self, identity: &str) -> Result<QuotaDecision, QuotaError> {
        match self
            .store
            .try_increment(identity, self.ceiling, self.window)
            .await?
        {
            Some(count) => Ok(QuotaDecision {
                allowed: true,
                remaining: self.ceiling.saturating_sub(count),
            }),
            None => Ok(QuotaDecision {
                allowed: false,
                remaining: 0,
            }),
        }
    }
}
