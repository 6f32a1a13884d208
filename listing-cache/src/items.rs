//! Listing operations: optimistic create, update, availability toggle,
//! favorite/unfavorite, delete and the paged read paths. Every mutation
//! updates the cache and indexes synchronously, returns immediately, and
//! enqueues a change event for the write-behind consumers.

use crate::app_state::AppState;
use crate::error::CacheError;
use crate::events::{self, ChangeEvent, Topic};
use crate::item_cache::ItemCache;
use crate::model::{IndexScope, Item, SortField};
use bigdecimal::BigDecimal;
use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

// Strictly decreasing, never reused. Provisional ids exist only until the
// durable store assigns the permanent positive id.
static PROVISIONAL_IDS: AtomicI64 = AtomicI64::new(-1);

pub fn next_provisional_id() -> i64 {
    PROVISIONAL_IDS.fetch_sub(1, Ordering::SeqCst)
}

/// Fields supplied by the seller at create time.
#[derive(Debug, Clone)]
pub struct ItemDraft {
    pub category_id: i64,
    pub seller_id: i64,
    pub title: String,
    pub description: String,
    pub condition: String,
    pub image_url: String,
    pub price: BigDecimal,
}

/// Seller-editable fields for update.
#[derive(Debug, Clone)]
pub struct ItemUpdate {
    pub title: String,
    pub description: String,
    pub condition: String,
    pub price: BigDecimal,
    pub category_id: i64,
    pub new_image_url: Option<String>,
}

#[derive(Clone)]
pub struct Listings {
    state: AppState,
    cache: ItemCache,
}

impl Listings {
    pub fn new(state: AppState) -> Self {
        let cache = ItemCache::new(state.clone());
        Self { state, cache }
    }

    pub fn cache(&self) -> &ItemCache {
        &self.cache
    }

    /// Optimistic create: the caller gets a provisional negative id back
    /// immediately; the create consumer persists the entity and migrates
    /// every cache structure to the store-assigned id.
    pub async fn create_item(&self, draft: ItemDraft) -> Result<Item, CacheError> {
        let item = Item {
            item_id: next_provisional_id(),
            category_id: draft.category_id,
            seller_id: draft.seller_id,
            title: draft.title,
            description: draft.description,
            condition: draft.condition,
            image_url: draft.image_url,
            price: draft.price,
            likes: 0,
            is_available: true,
            is_deleted: false,
            update_time: Utc::now(),
        };
        self.cache.put(&item).await?;
        self.cache.seller_add(item.seller_id, item.item_id).await?;
        self.cache.index_upsert(&item, None).await?;
        let payload = events::create_item_payload(&item)?;
        self.state
            .bus
            .publish(ChangeEvent::new(Topic::CreateItem, payload))
            .await?;
        Ok(item)
    }

    pub async fn get_item(&self, item_id: i64) -> Result<Item, CacheError> {
        self.cache
            .get(item_id)
            .await?
            .ok_or_else(|| CacheError::not_found(format!("item {item_id}")))
    }

    pub async fn update_item(
        &self,
        item_id: i64,
        operator_id: i64,
        update: ItemUpdate,
    ) -> Result<Item, CacheError> {
        let mut item = self.get_item(item_id).await?;
        if item.seller_id != operator_id {
            return Err(CacheError::Forbidden { item_id, operator_id });
        }
        let old_category_id = item.category_id;
        item.title = update.title;
        item.description = update.description;
        item.condition = update.condition;
        item.price = update.price;
        item.category_id = update.category_id;
        if let Some(url) = &update.new_image_url {
            item.image_url = url.clone();
        }
        item.update_time = Utc::now();

        self.cache.put(&item).await?;
        self.cache.index_upsert(&item, Some(old_category_id)).await?;
        let payload = events::update_item_payload(
            item_id,
            old_category_id,
            item.category_id,
            update.new_image_url.as_deref(),
        );
        self.state
            .bus
            .publish(ChangeEvent::new(Topic::UpdateItem, payload))
            .await?;
        Ok(item)
    }

    pub async fn toggle_availability(
        &self,
        item_id: i64,
        is_available: bool,
        operator_id: i64,
    ) -> Result<Item, CacheError> {
        let mut item = self.get_item(item_id).await?;
        if item.seller_id != operator_id {
            return Err(CacheError::Forbidden { item_id, operator_id });
        }
        if is_available && !item.is_available {
            // Relisting counts as fresh activity for the recency index.
            item.update_time = Utc::now();
        }
        item.is_available = is_available;
        self.cache.put(&item).await?;
        self.cache.index_upsert(&item, None).await?;
        self.state
            .bus
            .publish(ChangeEvent::new(
                Topic::ToggleItemAvailability,
                events::toggle_payload(item_id, is_available, operator_id),
            ))
            .await?;
        Ok(item)
    }

    pub async fn favorite(&self, item_id: i64) -> Result<Item, CacheError> {
        self.adjust_likes(item_id, 1, Topic::FavoriteItem).await
    }

    pub async fn unfavorite(&self, item_id: i64) -> Result<Item, CacheError> {
        self.adjust_likes(item_id, -1, Topic::UnfavoriteItem).await
    }

    async fn adjust_likes(
        &self,
        item_id: i64,
        delta: i64,
        topic: Topic,
    ) -> Result<Item, CacheError> {
        let mut item = self.get_item(item_id).await?;
        item.likes = (item.likes + delta).max(0);
        self.cache.put(&item).await?;
        self.cache.index_upsert(&item, None).await?;
        self.state
            .bus
            .publish(ChangeEvent::new(topic, events::item_id_payload(item_id)))
            .await?;
        Ok(item)
    }

    /// Soft delete tombstones the entry and clears every index membership;
    /// hard delete additionally drops the cache entry. The durable store
    /// is updated in the same call (delete has no write-behind topic).
    pub async fn delete_item(
        &self,
        item_id: i64,
        operator_id: i64,
        hard: bool,
    ) -> Result<(), CacheError> {
        let mut item = self.get_item(item_id).await?;
        if item.seller_id != operator_id {
            return Err(CacheError::Forbidden { item_id, operator_id });
        }
        item.is_deleted = true;
        item.is_available = false;
        self.cache.index_upsert(&item, None).await?;
        self.cache.seller_remove(item.seller_id, item_id).await?;
        if hard {
            self.cache.delete_entry(item_id).await?;
            self.state.items.delete(item_id).await?;
        } else {
            self.cache.put(&item).await?;
            self.state.items.save(item.clone()).await?;
        }
        self.state.search.remove(item_id).await?;
        Ok(())
    }

    /// Paged index read with the two-tier fallback: an empty index result
    /// is "cache cold for this page", answered from one durable-store scan
    /// while a rebuild event re-warms the index for the next reader.
    pub async fn get_page(
        &self,
        scope: IndexScope,
        field: SortField,
        page: u64,
        size: u64,
        descending: bool,
    ) -> Result<(Vec<Item>, u64), CacheError> {
        let ids = self
            .cache
            .page_by_index(scope, field, page, size, descending)
            .await?;
        if !ids.is_empty() {
            let mut items = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(item) = self.cache.get(id).await? {
                    if self.scope_admits(scope, &item) {
                        items.push(item);
                    }
                }
            }
            let total = self.cache.index_count(scope, field).await?;
            return Ok((items, total));
        }

        let mut rows: Vec<Item> = match scope {
            IndexScope::Category(category_id) => {
                self.state.items.find_by_category(category_id).await?
            }
            IndexScope::OnSale => self.state.items.find_on_sale().await?,
            IndexScope::All => self.state.items.find_all().await?,
        };
        rows.retain(|item| self.scope_admits(scope, item));
        // Equal scores break ties the same way the sorted index does:
        // lexicographically on the id string, not numerically.
        rows.sort_by(|a, b| {
            a.score(field)
                .total_cmp(&b.score(field))
                .then_with(|| a.item_id.to_string().cmp(&b.item_id.to_string()))
        });
        if descending {
            rows.reverse();
        }
        let total = rows.len() as u64;
        let start = (page * size).min(total) as usize;
        let end = ((page + 1) * size).min(total) as usize;
        let items = rows[start..end].to_vec();

        if total > 0 {
            self.state
                .bus
                .publish(ChangeEvent::new(Topic::RebuildIndex, scope.to_string()))
                .await?;
        }
        Ok((items, total))
    }

    fn scope_admits(&self, scope: IndexScope, item: &Item) -> bool {
        match scope {
            IndexScope::All => !item.is_deleted,
            IndexScope::OnSale | IndexScope::Category(_) => item.is_on_sale(),
        }
    }

    /// Seller view: all of the seller's non-deleted items, unavailable
    /// ones included.
    pub async fn seller_items(&self, seller_id: i64) -> Result<Vec<Item>, CacheError> {
        let ids = self.cache.seller_items(seller_id).await?;
        if !ids.is_empty() {
            let mut items = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(item) = self.cache.get(id).await? {
                    items.push(item);
                }
            }
            return Ok(items);
        }
        let rows = self.state.items.find_by_seller(seller_id).await?;
        for item in &rows {
            self.cache.put(item).await?;
            self.cache.seller_add(seller_id, item.item_id).await?;
        }
        Ok(rows)
    }
}
