//! Read-through cache of item entities plus the per-category and global
//! sorted indexes (recency, price, popularity).
//!
//! Reads never touch the indexes; memberships are maintained explicitly by
//! the mutation paths so a read-through miss cannot leave a half-built
//! index visible.

use crate::app_state::AppState;
use crate::error::CacheError;
use crate::events::{self, ChangeEvent, Topic};
use crate::keys;
use crate::model::{IndexScope, Item, SortField};
use std::time::Duration;

#[derive(Clone)]
pub struct ItemCache {
    state: AppState,
}

impl ItemCache {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Read-through lookup. A cache miss loads from the durable store,
    /// populates the entry and signals a downstream-warm event. Decode
    /// failures count as misses: the corrupt entry is dropped and the
    /// durable store is consulted.
    pub async fn get(&self, item_id: i64) -> Result<Option<Item>, CacheError> {
        let key = keys::item_detail(item_id);
        if let Some(json) = self.state.kv.get(&key).await? {
            match serde_json::from_str::<Item>(&json) {
                Ok(item) if item.is_deleted => return Ok(None),
                Ok(item) => {
                    self.state.metrics.cache_hits.inc();
                    return Ok(Some(item));
                }
                Err(err) => {
                    tracing::warn!(item_id, %err, "Dropping undecodable cache entry");
                    self.state.kv.delete(&key).await?;
                }
            }
        }
        self.state.metrics.cache_misses.inc();
        let Some(item) = self.state.items.find_by_id(item_id).await? else {
            return Ok(None);
        };
        self.put(&item).await?;
        self.state
            .bus
            .publish(ChangeEvent::new(Topic::WarmItem, events::item_id_payload(item_id)))
            .await?;
        Ok(Some(item))
    }

    /// Unconditional overwrite with the standard entry TTL.
    pub async fn put(&self, item: &Item) -> Result<(), CacheError> {
        self.put_with_ttl(item, self.state.config.entry_ttl).await
    }

    pub async fn put_with_ttl(&self, item: &Item, ttl: Duration) -> Result<(), CacheError> {
        let json = serde_json::to_string(item)?;
        self.state
            .kv
            .set(&keys::item_detail(item.item_id), &json, ttl)
            .await?;
        Ok(())
    }

    pub async fn delete_entry(&self, item_id: i64) -> Result<(), CacheError> {
        self.state.kv.delete(&keys::item_detail(item_id)).await?;
        Ok(())
    }

    /// Write the item's memberships with freshly computed scores.
    ///
    /// All three sort-field entries of a scope are written consecutively
    /// before returning, so a mutation never leaves a partially updated
    /// scope readable after the synchronous path completes. When the
    /// category changed, `old_category` must be supplied: membership left
    /// in the old category is a correctness bug, not staleness.
    pub async fn index_upsert(
        &self,
        item: &Item,
        old_category: Option<i64>,
    ) -> Result<(), CacheError> {
        let member = item.item_id.to_string();
        if let Some(old) = old_category.filter(|old| *old != item.category_id) {
            for field in SortField::ALL {
                self.state
                    .index
                    .zrem(&IndexScope::Category(old).zset_key(field), &member)
                    .await?;
            }
        }
        for field in SortField::ALL {
            let score = item.score(field);
            let category = IndexScope::Category(item.category_id).zset_key(field);
            let onsale = IndexScope::OnSale.zset_key(field);
            let all = IndexScope::All.zset_key(field);
            if item.is_deleted {
                self.state.index.zrem(&category, &member).await?;
                self.state.index.zrem(&onsale, &member).await?;
                self.state.index.zrem(&all, &member).await?;
            } else if item.is_on_sale() {
                self.state.index.zadd(&category, &member, score).await?;
                self.state.index.zadd(&onsale, &member, score).await?;
                self.state.index.zadd(&all, &member, score).await?;
            } else {
                self.state.index.zrem(&category, &member).await?;
                self.state.index.zrem(&onsale, &member).await?;
                self.state.index.zadd(&all, &member, score).await?;
            }
        }
        Ok(())
    }

    /// Remove the item's three memberships from one scope without touching
    /// the cache entry.
    pub async fn index_remove(&self, item_id: i64, scope: IndexScope) -> Result<(), CacheError> {
        let member = item_id.to_string();
        for field in SortField::ALL {
            self.state.index.zrem(&scope.zset_key(field), &member).await?;
        }
        Ok(())
    }

    /// Rank-range query. An empty result means the cache is cold for this
    /// page; callers fall back to the durable store and republish a warm
    /// event, never populate the index synchronously.
    pub async fn page_by_index(
        &self,
        scope: IndexScope,
        field: SortField,
        page: u64,
        size: u64,
        descending: bool,
    ) -> Result<Vec<i64>, CacheError> {
        if size == 0 {
            return Ok(Vec::new());
        }
        let key = scope.zset_key(field);
        let start = (page * size) as i64;
        let stop = start + size as i64 - 1;
        let members = if descending {
            self.state.index.zrevrange(&key, start, stop).await?
        } else {
            self.state.index.zrange(&key, start, stop).await?
        };
        Ok(members.iter().filter_map(|m| m.parse().ok()).collect())
    }

    pub async fn index_count(&self, scope: IndexScope, field: SortField) -> Result<u64, CacheError> {
        Ok(self.state.index.zcard(&scope.zset_key(field)).await?)
    }

    pub async fn seller_add(&self, seller_id: i64, item_id: i64) -> Result<(), CacheError> {
        self.state
            .index
            .set_add(&keys::seller_items(seller_id), &item_id.to_string())
            .await?;
        Ok(())
    }

    pub async fn seller_remove(&self, seller_id: i64, item_id: i64) -> Result<(), CacheError> {
        self.state
            .index
            .set_remove(&keys::seller_items(seller_id), &item_id.to_string())
            .await?;
        Ok(())
    }

    pub async fn seller_items(&self, seller_id: i64) -> Result<Vec<i64>, CacheError> {
        let members = self
            .state
            .index
            .set_members(&keys::seller_items(seller_id))
            .await?;
        Ok(members.iter().filter_map(|m| m.parse().ok()).collect())
    }

    /// Rewrite every cache key and index entry that referenced a
    /// provisional id to the store-assigned permanent id.
    ///
    /// The fresh entry goes in first and the provisional entry is dropped
    /// last, so a reader resolving the old id mid-migration sees either
    /// the final pre-migration snapshot or "not found" and re-resolves via
    /// the index, which by then only contains the new id.
    pub async fn migrate(&self, old_id: i64, item: &Item) -> Result<(), CacheError> {
        let old_member = old_id.to_string();
        let new_member = item.item_id.to_string();
        self.put_with_ttl(item, self.state.config.reserved_ttl).await?;

        for field in SortField::ALL {
            let score = item.score(field);
            for scope in [
                IndexScope::Category(item.category_id),
                IndexScope::OnSale,
                IndexScope::All,
            ] {
                let key = scope.zset_key(field);
                self.state.index.zrem(&key, &old_member).await?;
                let insert = match scope {
                    IndexScope::All => !item.is_deleted,
                    _ => item.is_on_sale(),
                };
                if insert {
                    self.state.index.zadd(&key, &new_member, score).await?;
                }
            }
        }

        let seller_key = keys::seller_items(item.seller_id);
        self.state.index.set_remove(&seller_key, &old_member).await?;
        self.state.index.set_add(&seller_key, &new_member).await?;

        self.delete_entry(old_id).await?;
        Ok(())
    }
}
