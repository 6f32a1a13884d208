//! Purchase reservation: at most one buyer wins an available item. The
//! winner is decided under a per-item lock, the item is flipped to
//! unavailable with a shortened TTL, and a pending order is cached and
//! handed to the write-behind pipeline.

use crate::app_state::AppState;
use crate::error::CacheError;
use crate::events::{self, ChangeEvent, Topic};
use crate::item_cache::ItemCache;
use crate::keys;
use crate::model::{IndexScope, Item, Order, OrderStatus};
use crate::orders::cache_order;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

static ORDER_SEQ: AtomicU64 = AtomicU64::new(0);

fn next_order_id() -> String {
    let seq = ORDER_SEQ.fetch_add(1, Ordering::SeqCst) % 1000;
    format!("ORD{}{:03}", Utc::now().timestamp_millis(), seq)
}

#[derive(Clone)]
pub struct ReservationCoordinator {
    state: AppState,
    cache: ItemCache,
}

impl ReservationCoordinator {
    pub fn new(state: AppState) -> Self {
        let cache = ItemCache::new(state.clone());
        Self { state, cache }
    }

    /// Reserve `item_id` for `buyer_id`. Exactly one concurrent caller
    /// succeeds; the rest see `AlreadyReserved` or `LockUnavailable`.
    pub async fn reserve(&self, item_id: i64, buyer_id: i64) -> Result<Order, CacheError> {
        // Cheap pre-checks outside the lock.
        let item = self
            .cache
            .get(item_id)
            .await?
            .ok_or_else(|| CacheError::not_found(format!("item {item_id}")))?;
        if item.seller_id == buyer_id {
            return Err(CacheError::SelfPurchase { item_id, buyer_id });
        }
        if !item.is_available {
            self.state.metrics.reservation_conflict.inc();
            return Err(CacheError::AlreadyReserved(item_id));
        }

        let lock_key = keys::item_lock(item_id);
        let token = if self.state.lock.is_atomic() {
            let acquired = self
                .state
                .lock
                .try_lock(
                    &lock_key,
                    self.state.config.lock_wait,
                    self.state.config.lock_lease,
                )
                .await?;
            match acquired {
                Some(token) => Some(token),
                None => {
                    self.state.metrics.reservation_conflict.inc();
                    return Err(CacheError::LockUnavailable(item_id));
                }
            }
        } else {
            warn!(item_id, "reserving without mutual exclusion, lock backend disabled");
            self.state.metrics.reservation_degraded.inc();
            None
        };

        let reserved = self.reserve_under_lock(item_id, buyer_id).await;
        if let Some(token) = token {
            if let Err(err) = self.state.lock.unlock(&lock_key, &token).await {
                warn!(item_id, error = %err, "failed to release reservation lock");
            }
        }
        let item = reserved?;

        let order = Order {
            order_id: next_order_id(),
            item_id,
            buyer_id,
            seller_id: item.seller_id,
            amount: item.price.clone(),
            status: OrderStatus::Pending,
            buyer_confirmed: false,
            seller_confirmed: false,
            buyer_credit: None,
            seller_credit: None,
            create_time: Utc::now(),
            confirm_time: None,
            cancel_time: None,
            finish_time: None,
        };
        cache_order(&self.state, &order).await?;
        self.state
            .bus
            .publish(ChangeEvent::new(
                Topic::CreateOrder,
                events::create_order_payload(buyer_id, item_id, &order.order_id),
            ))
            .await?;
        self.state.metrics.reservation_success.inc();
        Ok(order)
    }

    /// The critical section: re-read the entry, flip availability, shorten
    /// the TTL and drop the item from the on-sale indexes.
    async fn reserve_under_lock(&self, item_id: i64, buyer_id: i64) -> Result<Item, CacheError> {
        let mut item = self
            .cache
            .get(item_id)
            .await?
            .ok_or_else(|| CacheError::not_found(format!("item {item_id}")))?;
        if item.seller_id == buyer_id {
            return Err(CacheError::SelfPurchase { item_id, buyer_id });
        }
        if !item.is_available {
            self.state.metrics.reservation_conflict.inc();
            return Err(CacheError::AlreadyReserved(item_id));
        }
        item.is_available = false;
        self.cache
            .put_with_ttl(&item, self.state.config.reserved_ttl)
            .await?;
        self.cache.index_remove(item_id, IndexScope::OnSale).await?;
        self.cache
            .index_remove(item_id, IndexScope::Category(item.category_id))
            .await?;
        Ok(item)
    }

    /// Put a reserved item back on sale (order cancelled). Relisting
    /// re-stamps the recency score and restores every index membership.
    pub async fn release(&self, item_id: i64) -> Result<(), CacheError> {
        let Some(mut item) = self.cache.get(item_id).await? else {
            return Ok(());
        };
        if item.is_available {
            return Ok(());
        }
        item.is_available = true;
        item.update_time = Utc::now();
        self.cache.put(&item).await?;
        self.cache.index_upsert(&item, None).await?;
        self.state
            .bus
            .publish(ChangeEvent::new(
                Topic::ToggleItemAvailability,
                events::toggle_payload(item_id, true, item.seller_id),
            ))
            .await?;
        Ok(())
    }
}
