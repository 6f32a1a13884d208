use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Redis,
    /// Non-atomic fallback; duplicate reservations become possible and the
    /// coordinator flags every entry into this mode.
    Disabled,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: String,
    /// TTL for item/order detail entries written by ordinary mutations.
    pub entry_ttl: Duration,
    /// Shorter TTL used after reservation and migration, forcing an early
    /// reload of store-confirmed state.
    pub reserved_ttl: Duration,
    pub lock_wait: Duration,
    pub lock_lease: Duration,
    pub lock_mode: LockMode,
    /// Redeliveries before an event is dead-lettered.
    pub dispatch_max_attempts: u32,
}

impl CacheConfig {
    pub fn from_env() -> Result<Self> {
        let redis_url = env::var("REDIS_URL").context("REDIS_URL must be set")?;
        let entry_ttl_secs = env::var("CACHE_TTL_SECONDS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(3600);
        let reserved_ttl_secs = env::var("CACHE_RESERVED_TTL_SECONDS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(300);
        let lock_wait_ms = env::var("LOCK_WAIT_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(3000);
        let lock_lease_ms = env::var("LOCK_LEASE_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(30_000);
        let lock_mode = match env::var("LOCK_MODE").as_deref() {
            Ok("disabled") => LockMode::Disabled,
            _ => LockMode::Redis,
        };
        let dispatch_max_attempts = env::var("DISPATCH_MAX_ATTEMPTS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(5);

        Ok(Self {
            redis_url,
            entry_ttl: Duration::from_secs(entry_ttl_secs.max(1)),
            reserved_ttl: Duration::from_secs(reserved_ttl_secs.max(1)),
            lock_wait: Duration::from_millis(lock_wait_ms),
            lock_lease: Duration::from_millis(lock_lease_ms.max(1)),
            lock_mode,
            dispatch_max_attempts: dispatch_max_attempts.max(1),
        })
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: String::new(),
            entry_ttl: Duration::from_secs(3600),
            reserved_ttl: Duration::from_secs(300),
            lock_wait: Duration::from_secs(3),
            lock_lease: Duration::from_secs(30),
            lock_mode: LockMode::Redis,
            dispatch_max_attempts: 5,
        }
    }
}
