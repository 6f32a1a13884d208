//! Cache store adapters: a string key-value store with TTL-bounded entries
//! and named sorted index sets (score -> member).
//!
//! Two implementations of each trait: `RedisStore` for deployments and
//! `MemoryStore` for tests and lightweight local runs. Both traits are
//! object-safe so callers can hold `Arc<dyn KvStore>` / `Arc<dyn
//! SortedIndexStore>` and swap engines without code changes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

/// Generic get/set/delete/expire over a string keyspace.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    /// Unconditional overwrite with a TTL after which the entry is absent.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;
}

/// Named ordered sets plus the plain membership sets used for
/// seller-items tracking. Members with equal scores order
/// lexicographically, matching Redis ZSET semantics.
#[async_trait]
pub trait SortedIndexStore: Send + Sync {
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()>;
    async fn zrem(&self, key: &str, member: &str) -> Result<()>;
    /// Inclusive rank range in ascending score order. A negative `stop`
    /// counts from the end (Redis convention).
    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;
    async fn zrevrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;
    async fn zcard(&self, key: &str) -> Result<u64>;
    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>>;

    async fn set_add(&self, key: &str, member: &str) -> Result<()>;
    async fn set_remove(&self, key: &str, member: &str) -> Result<()>;
    async fn set_members(&self, key: &str) -> Result<Vec<String>>;
}

// ---------------- Redis implementation ----------------

#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;
        let manager = ConnectionManager::new(client)
            .await
            .context("Failed to create Redis connection manager")?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        let found: bool = conn.exists(key).await?;
        Ok(found)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.expire(key, ttl.as_secs().max(1) as i64).await?;
        Ok(())
    }
}

#[async_trait]
impl SortedIndexStore for RedisStore {
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.zadd(key, member, score).await?;
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.zrem(key, member).await?;
        Ok(())
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        let members: Vec<String> = conn.zrange(key, start as isize, stop as isize).await?;
        Ok(members)
    }

    async fn zrevrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        let members: Vec<String> = conn.zrevrange(key, start as isize, stop as isize).await?;
        Ok(members)
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let mut conn = self.manager.clone();
        let count: u64 = conn.zcard(key).await?;
        Ok(count)
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        let mut conn = self.manager.clone();
        let score: Option<f64> = conn.zscore(key, member).await?;
        Ok(score)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.sadd(key, member).await?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.srem(key, member).await?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        let members: Vec<String> = conn.smembers(key).await?;
        Ok(members)
    }
}

// ---------------- In-memory implementation (tests / local dev) ----------------

struct KvEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

#[derive(Default)]
struct MemoryInner {
    kv: HashMap<String, KvEntry>,
    zsets: HashMap<String, HashMap<String, f64>>,
    sets: HashMap<String, HashSet<String>>,
}

/// Process-local store. TTL expiry is applied lazily on read.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_members(zset: &HashMap<String, f64>) -> Vec<(String, f64)> {
    let mut members: Vec<(String, f64)> = zset
        .iter()
        .map(|(member, score)| (member.clone(), *score))
        .collect();
    members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    members
}

fn slice_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let stop = if stop < 0 { len + stop } else { stop };
    if start >= len || stop < start {
        return None;
    }
    let from = start.max(0) as usize;
    let to = (stop.min(len - 1) as usize) + 1;
    Some((from, to))
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut guard = self.inner.lock().await;
        match guard.kv.get(key) {
            Some(entry) if entry.expired() => {
                guard.kv.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut guard = self.inner.lock().await;
        guard.kv.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut guard = self.inner.lock().await;
        guard.kv.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut guard = self.inner.lock().await;
        match guard.kv.get(key) {
            Some(entry) if entry.expired() => {
                guard.kv.remove(key);
                Ok(false)
            }
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut guard = self.inner.lock().await;
        if let Some(entry) = guard.kv.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }
}

#[async_trait]
impl SortedIndexStore for MemoryStore {
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut guard = self.inner.lock().await;
        guard
            .zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<()> {
        let mut guard = self.inner.lock().await;
        if let Some(zset) = guard.zsets.get_mut(key) {
            zset.remove(member);
            if zset.is_empty() {
                guard.zsets.remove(key);
            }
        }
        Ok(())
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let guard = self.inner.lock().await;
        let Some(zset) = guard.zsets.get(key) else {
            return Ok(Vec::new());
        };
        let members = sorted_members(zset);
        let Some((from, to)) = slice_range(members.len(), start, stop) else {
            return Ok(Vec::new());
        };
        Ok(members[from..to].iter().map(|(m, _)| m.clone()).collect())
    }

    async fn zrevrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let guard = self.inner.lock().await;
        let Some(zset) = guard.zsets.get(key) else {
            return Ok(Vec::new());
        };
        let mut members = sorted_members(zset);
        members.reverse();
        let Some((from, to)) = slice_range(members.len(), start, stop) else {
            return Ok(Vec::new());
        };
        Ok(members[from..to].iter().map(|(m, _)| m.clone()).collect())
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let guard = self.inner.lock().await;
        Ok(guard.zsets.get(key).map_or(0, |zset| zset.len() as u64))
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        let guard = self.inner.lock().await;
        Ok(guard.zsets.get(key).and_then(|zset| zset.get(member).copied()))
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        let mut guard = self.inner.lock().await;
        guard
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        let mut guard = self.inner.lock().await;
        if let Some(set) = guard.sets.get_mut(key) {
            set.remove(member);
            if set.is_empty() {
                guard.sets.remove(key);
            }
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let guard = self.inner.lock().await;
        let mut members: Vec<String> = guard
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn kv_ttl_expires_entries() {
        let store = MemoryStore::new();
        store.set("k", "v", Duration::from_millis(20)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn zrange_orders_by_score_then_member() {
        let store = MemoryStore::new();
        store.zadd("z", "b", 2.0).await.unwrap();
        store.zadd("z", "a", 1.0).await.unwrap();
        store.zadd("z", "c", 2.0).await.unwrap();
        assert_eq!(store.zrange("z", 0, -1).await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(store.zrevrange("z", 0, 1).await.unwrap(), vec!["c", "b"]);
        assert_eq!(store.zcard("z").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn zadd_updates_score_in_place() {
        let store = MemoryStore::new();
        store.zadd("z", "a", 1.0).await.unwrap();
        store.zadd("z", "b", 2.0).await.unwrap();
        store.zadd("z", "a", 3.0).await.unwrap();
        assert_eq!(store.zrange("z", 0, -1).await.unwrap(), vec!["b", "a"]);
        assert_eq!(store.zcard("z").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn range_clamps_out_of_bounds_pages() {
        let store = MemoryStore::new();
        store.zadd("z", "a", 1.0).await.unwrap();
        assert!(store.zrange("z", 5, 9).await.unwrap().is_empty());
        assert_eq!(store.zrange("z", 0, 9).await.unwrap(), vec!["a"]);
        assert!(store.zrange("missing", 0, 9).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn plain_sets_add_and_remove() {
        let store = MemoryStore::new();
        store.set_add("s", "7").await.unwrap();
        store.set_add("s", "7").await.unwrap();
        store.set_add("s", "9").await.unwrap();
        assert_eq!(store.set_members("s").await.unwrap(), vec!["7", "9"]);
        store.set_remove("s", "7").await.unwrap();
        assert_eq!(store.set_members("s").await.unwrap(), vec!["9"]);
    }
}
