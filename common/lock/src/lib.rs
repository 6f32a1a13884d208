//! Lease-based mutual exclusion keyed by resource id.
//!
//! `try_lock` waits at most `wait` for the lock and holds it for at most
//! `lease`; the lease is the backstop against a crashed holder. A
//! successful acquisition returns a holder token that must be presented
//! to `unlock`: the release compares the token before deleting, so a
//! stale unlock from a holder whose lease already expired can never
//! release the key out from under the new owner.
//!
//! `DisabledLock` is the documented degraded mode: acquisition always
//! succeeds without excluding anyone, and `is_atomic()` reports `false`
//! so callers can flag the fallback.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

use redis::aio::ConnectionManager;

#[async_trait]
pub trait LockManager: Send + Sync {
    /// Acquire `key` with the given lease, waiting at most `wait`.
    /// Returns the holder token on success, `None` when the wait bound is
    /// exhausted.
    async fn try_lock(&self, key: &str, wait: Duration, lease: Duration)
        -> Result<Option<String>>;
    /// Release `key` if still held under `token`; a no-op when the lease
    /// expired and someone else holds the key now.
    async fn unlock(&self, key: &str, token: &str) -> Result<()>;
    /// False for implementations that do not actually exclude contenders.
    fn is_atomic(&self) -> bool;
}

const ACQUIRE_RETRY_INTERVAL: Duration = Duration::from_millis(50);

// ---------------- Redis implementation ----------------

/// SET NX PX lock with a per-acquisition holder token.
#[derive(Clone)]
pub struct RedisLock {
    manager: ConnectionManager,
}

impl RedisLock {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;
        let manager = ConnectionManager::new(client)
            .await
            .context("Failed to create Redis connection manager")?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl LockManager for RedisLock {
    async fn try_lock(
        &self,
        key: &str,
        wait: Duration,
        lease: Duration,
    ) -> Result<Option<String>> {
        let token = Uuid::new_v4().to_string();
        let deadline = Instant::now() + wait;
        loop {
            let mut conn = self.manager.clone();
            let acquired: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(lease.as_millis() as u64)
                .query_async(&mut conn)
                .await?;
            if acquired.is_some() {
                return Ok(Some(token));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(ACQUIRE_RETRY_INTERVAL.min(wait)).await;
        }
    }

    async fn unlock(&self, key: &str, token: &str) -> Result<()> {
        // Compare-and-delete must be atomic or a lease-expired lock held
        // by a new owner could be released here.
        let script = redis::Script::new(
            r#"if redis.call('get', KEYS[1]) == ARGV[1] then
                   return redis.call('del', KEYS[1])
               else
                   return 0
               end"#,
        );
        let mut conn = self.manager.clone();
        let released: i64 = script.key(key).arg(token).invoke_async(&mut conn).await?;
        if released == 0 {
            tracing::warn!(key, "Lock lease expired before release");
        }
        Ok(())
    }

    fn is_atomic(&self) -> bool {
        true
    }
}

// ---------------- In-memory implementation (tests) ----------------

struct Holder {
    token: String,
    expires_at: Instant,
}

#[derive(Clone, Default)]
pub struct MemoryLock {
    holders: Arc<Mutex<HashMap<String, Holder>>>,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockManager for MemoryLock {
    async fn try_lock(
        &self,
        key: &str,
        wait: Duration,
        lease: Duration,
    ) -> Result<Option<String>> {
        let token = Uuid::new_v4().to_string();
        let deadline = Instant::now() + wait;
        loop {
            {
                let mut holders = self.holders.lock().await;
                let now = Instant::now();
                let free = match holders.get(key) {
                    Some(holder) => holder.expires_at <= now,
                    None => true,
                };
                if free {
                    holders.insert(
                        key.to_string(),
                        Holder {
                            token: token.clone(),
                            expires_at: now + lease,
                        },
                    );
                    return Ok(Some(token));
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(5).min(wait)).await;
        }
    }

    async fn unlock(&self, key: &str, token: &str) -> Result<()> {
        let mut holders = self.holders.lock().await;
        if holders.get(key).is_some_and(|h| h.token == token) {
            holders.remove(key);
        } else {
            tracing::warn!(key, "Lock lease expired before release");
        }
        Ok(())
    }

    fn is_atomic(&self) -> bool {
        true
    }
}

// ---------------- Disabled fallback (degraded mode) ----------------

/// No-op lock for deployments without a lock service. Mutual exclusion is
/// NOT provided; concurrent critical sections can interleave. Callers must
/// check `is_atomic()` and flag the degraded mode.
#[derive(Clone, Copy, Default)]
pub struct DisabledLock;

#[async_trait]
impl LockManager for DisabledLock {
    async fn try_lock(
        &self,
        _key: &str,
        _wait: Duration,
        _lease: Duration,
    ) -> Result<Option<String>> {
        Ok(Some(String::new()))
    }

    async fn unlock(&self, _key: &str, _token: &str) -> Result<()> {
        Ok(())
    }

    fn is_atomic(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_times_out_while_held() {
        let lock = MemoryLock::new();
        assert!(lock
            .try_lock("item:lock:1", Duration::from_millis(10), Duration::from_secs(5))
            .await
            .unwrap()
            .is_some());
        let contender = lock.clone();
        assert!(contender
            .try_lock("item:lock:1", Duration::from_millis(30), Duration::from_secs(5))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn unlock_frees_the_key() {
        let lock = MemoryLock::new();
        let token = lock
            .try_lock("item:lock:2", Duration::from_millis(10), Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        lock.unlock("item:lock:2", &token).await.unwrap();
        assert!(lock
            .try_lock("item:lock:2", Duration::from_millis(10), Duration::from_secs(5))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn lease_expiry_releases_a_crashed_holder() {
        let lock = MemoryLock::new();
        assert!(lock
            .try_lock("item:lock:3", Duration::from_millis(10), Duration::from_millis(20))
            .await
            .unwrap()
            .is_some());
        // No unlock: the lease must expire on its own.
        assert!(lock
            .try_lock("item:lock:3", Duration::from_millis(100), Duration::from_secs(5))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn stale_unlock_cannot_release_the_next_holder() {
        let lock = MemoryLock::new();
        let stale = lock
            .try_lock("item:lock:4", Duration::from_millis(10), Duration::from_millis(20))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        // The lease expired; a new holder takes over.
        let fresh = lock
            .try_lock("item:lock:4", Duration::from_millis(50), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(fresh.is_some());

        // The first holder's late unlock must not free the new holder's lock.
        lock.unlock("item:lock:4", &stale).await.unwrap();
        assert!(lock
            .try_lock("item:lock:4", Duration::from_millis(30), Duration::from_secs(5))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn disabled_lock_admits_everyone() {
        let lock = DisabledLock;
        assert!(!lock.is_atomic());
        assert!(lock
            .try_lock("item:lock:5", Duration::from_millis(1), Duration::from_secs(1))
            .await
            .unwrap()
            .is_some());
        assert!(lock
            .try_lock("item:lock:5", Duration::from_millis(1), Duration::from_secs(1))
            .await
            .unwrap()
            .is_some());
    }
}
