//! Write-behind pipeline: the event bus mutations are published on, and
//! the dispatcher that consumes them into the durable store.
//!
//! Every handler is idempotent, so redelivery after a transient failure is
//! safe. A failed event is republished with an incremented attempt count;
//! once the retry budget is spent it is logged and dropped (dead letter).

use crate::app_state::AppState;
use crate::error::CacheError;
use crate::events::{self, ChangeEvent, Topic};
use crate::item_cache::ItemCache;
use crate::keys;
use crate::messages::Messages;
use crate::model::{IndexScope, Item, Message, Order, OrderStatus};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, warn};

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: ChangeEvent) -> Result<()>;
}

/// Default bus: an unbounded in-process channel feeding the dispatcher
/// task. Redeliveries land back on the same channel.
pub struct InProcessBus {
    tx: UnboundedSender<ChangeEvent>,
}

impl InProcessBus {
    pub fn new() -> (Self, UnboundedReceiver<ChangeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventBus for InProcessBus {
    async fn publish(&self, event: ChangeEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|err| anyhow::anyhow!("event channel closed: {err}"))
    }
}

#[cfg(feature = "kafka-producer")]
pub mod kafka {
    use super::*;
    use rdkafka::config::ClientConfig;
    use rdkafka::producer::{FutureProducer, FutureRecord};
    use rdkafka::util::Timeout;
    use std::time::Duration;

    /// Kafka-backed bus for multi-process deployments. Topic names match
    /// `Topic::as_str`; payloads are the flat positional strings.
    pub struct KafkaBus {
        producer: FutureProducer,
    }

    impl KafkaBus {
        pub fn new(brokers: &str) -> Result<Self> {
            let producer = ClientConfig::new()
                .set("bootstrap.servers", brokers)
                .set("message.timeout.ms", "5000")
                .create()?;
            Ok(Self { producer })
        }
    }

    #[async_trait]
    impl EventBus for KafkaBus {
        async fn publish(&self, event: ChangeEvent) -> Result<()> {
            let record = FutureRecord::<(), str>::to(event.topic.as_str()).payload(&event.payload);
            self.producer
                .send(record, Timeout::After(Duration::from_secs(5)))
                .await
                .map_err(|(err, _)| anyhow::anyhow!("kafka publish failed: {err}"))?;
            Ok(())
        }
    }
}

/// Consumes change events and reconciles the durable store with the state
/// the synchronous path already wrote to the cache.
#[derive(Clone)]
pub struct Dispatcher {
    state: AppState,
    cache: ItemCache,
    messages: Messages,
}

impl Dispatcher {
    pub fn new(state: AppState) -> Self {
        let cache = ItemCache::new(state.clone());
        let messages = Messages::new(state.clone());
        Self {
            state,
            cache,
            messages,
        }
    }

    /// Long-running consumer loop; exits when every sender is dropped.
    pub async fn run(self, mut rx: UnboundedReceiver<ChangeEvent>) {
        while let Some(event) = rx.recv().await {
            self.dispatch(event).await;
        }
    }

    /// Process everything currently queued, including events the handlers
    /// themselves enqueue. Used by tests to settle the pipeline inline.
    pub async fn drain(&self, rx: &mut UnboundedReceiver<ChangeEvent>) {
        while let Ok(event) = rx.try_recv() {
            self.dispatch(event).await;
        }
    }

    pub async fn dispatch(&self, event: ChangeEvent) {
        let topic = event.topic.as_str();
        if let Err(err) = self.handle(&event).await {
            if event.attempt + 1 >= self.state.config.dispatch_max_attempts {
                error!(
                    topic,
                    payload = %event.payload,
                    attempt = event.attempt,
                    error = %err,
                    "Dropping change event, retry budget exhausted"
                );
                self.state.metrics.dispatch_dead_letters.inc();
                return;
            }
            warn!(topic, attempt = event.attempt, error = %err, "Change event failed, redelivering");
            self.state.metrics.dispatch_retries.inc();
            if let Err(err) = self.state.bus.publish(event.redelivery()).await {
                error!(topic, error = %err, "Failed to republish change event");
                self.state.metrics.dispatch_dead_letters.inc();
            }
        }
    }

    async fn handle(&self, event: &ChangeEvent) -> Result<(), CacheError> {
        match event.topic {
            Topic::CreateItem => self.on_create_item(&event.payload).await,
            Topic::UpdateItem => self.on_update_item(&event.payload).await,
            Topic::ToggleItemAvailability => self.on_toggle(&event.payload).await,
            Topic::FavoriteItem | Topic::UnfavoriteItem => {
                self.on_favorite_changed(&event.payload).await
            }
            Topic::CreateOrder => self.on_create_order(&event.payload).await,
            Topic::OrderConfirm | Topic::OrderCancel | Topic::OrderComplete | Topic::OrderCredit => {
                let order_id = match event.topic {
                    Topic::OrderComplete => events::parse_order_complete(&event.payload)?.0,
                    Topic::OrderCredit => events::parse_order_credit(&event.payload)?.0,
                    _ => event.payload.clone(),
                };
                self.persist_cached_order(&order_id).await
            }
            Topic::AddMessage => self.on_add_message(&event.payload).await,
            Topic::RootMessages => self.on_warm_root_messages(&event.payload).await,
            Topic::ReplyMessages => self.on_warm_replies(&event.payload).await,
            Topic::WarmItem => self.on_warm_item(&event.payload).await,
            Topic::RebuildIndex => self.on_rebuild_index(&event.payload).await,
        }
    }

    /// Persist an optimistically created item and migrate every cache
    /// structure from the provisional id to the store-assigned one. The
    /// cached entry, not the event payload, is the source of truth: likes
    /// and availability may have moved since publish.
    async fn on_create_item(&self, payload: &str) -> Result<(), CacheError> {
        let provisional = events::parse_create_item(payload)?;
        let key = keys::item_detail(provisional.item_id);
        let Some(json) = self.state.kv.get(&key).await? else {
            debug!(
                provisional_id = provisional.item_id,
                "Provisional entry gone, create already reconciled"
            );
            return Ok(());
        };
        let current: Item = serde_json::from_str(&json)?;
        let persisted = self.state.items.insert(current).await?;
        self.cache.migrate(provisional.item_id, &persisted).await?;
        self.state.metrics.migrations_completed.inc();
        self.state.search.upsert(&persisted).await?;
        debug!(
            provisional_id = provisional.item_id,
            item_id = persisted.item_id,
            "Migrated provisional item"
        );
        Ok(())
    }

    async fn on_update_item(&self, payload: &str) -> Result<(), CacheError> {
        let (item_id, _old_category_id, new_category_id, new_image_url) =
            events::parse_update_item(payload)?;
        if item_id < 0 {
            // Still provisional. The create consumer persists the current
            // cached state, edits included.
            return Ok(());
        }
        let Some(mut row) = self.state.items.find_by_id(item_id).await? else {
            debug!(item_id, "updateItem for unknown item, skipping");
            return Ok(());
        };
        if let Some(cached) = self.cached_item(item_id).await? {
            row = cached;
        } else {
            row.category_id = new_category_id;
            if let Some(url) = new_image_url {
                row.image_url = url;
            }
        }
        self.state.items.save(row.clone()).await?;
        self.state.search.upsert(&row).await?;
        Ok(())
    }

    async fn on_toggle(&self, payload: &str) -> Result<(), CacheError> {
        let (item_id, is_available, _operator_id) = events::parse_toggle(payload)?;
        if item_id < 0 {
            return Ok(());
        }
        let Some(mut row) = self.state.items.find_by_id(item_id).await? else {
            debug!(item_id, "toggleItemAvailability for unknown item, skipping");
            return Ok(());
        };
        if let Some(cached) = self.cached_item(item_id).await? {
            row = cached;
        } else {
            row.is_available = is_available;
            if is_available {
                row.update_time = Utc::now();
            }
        }
        self.state.items.save(row).await?;
        Ok(())
    }

    /// Favorite counts are persisted as the absolute cached value, so a
    /// redelivered event never double-counts.
    async fn on_favorite_changed(&self, payload: &str) -> Result<(), CacheError> {
        let item_id = events::parse_item_id(payload)?;
        if item_id < 0 {
            return Ok(());
        }
        let Some(mut row) = self.state.items.find_by_id(item_id).await? else {
            debug!(item_id, "favorite change for unknown item, skipping");
            return Ok(());
        };
        let Some(cached) = self.cached_item(item_id).await? else {
            return Ok(());
        };
        row.likes = cached.likes;
        self.state.items.save(row).await?;
        Ok(())
    }

    async fn on_create_order(&self, payload: &str) -> Result<(), CacheError> {
        let (buyer_id, item_id, order_id) = events::parse_create_order(payload)?;
        if self.state.orders.find_by_id(&order_id).await?.is_some() {
            return Ok(());
        }
        if item_id < 0 {
            // The item row does not exist yet; retry after migration.
            return Err(CacheError::Dispatch(format!(
                "order {order_id} references provisional item {item_id}"
            )));
        }
        let Some(mut item) = self.state.items.find_by_id(item_id).await? else {
            return Err(CacheError::Dispatch(format!(
                "order {order_id} references unknown item {item_id}"
            )));
        };
        // The reservation flipped availability in cache only; the durable
        // row must agree or an expired cache entry resurrects the item.
        if item.is_available {
            item.is_available = false;
            self.state.items.save(item.clone()).await?;
        }
        if let Some(json) = self.state.kv.get(&keys::order_detail(&order_id)).await? {
            let order: Order = serde_json::from_str(&json)?;
            self.state.orders.save(order).await?;
            return Ok(());
        }
        let order = Order {
            order_id,
            item_id,
            buyer_id,
            seller_id: item.seller_id,
            amount: item.price,
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
        self.state.orders.save(order).await?;
        Ok(())
    }

    /// Order transitions write the post-transition order to the cache
    /// before publishing, so persisting is one overwrite of the row.
    async fn persist_cached_order(&self, order_id: &str) -> Result<(), CacheError> {
        let Some(json) = self.state.kv.get(&keys::order_detail(order_id)).await? else {
            return Err(CacheError::Dispatch(format!(
                "order {order_id} missing from cache"
            )));
        };
        let order: Order = serde_json::from_str(&json)?;
        self.state.orders.save(order).await?;
        Ok(())
    }

    /// Persist an optimistically added message and migrate the thread
    /// structures to the store-assigned id. The cached entry is the source
    /// of truth: its parent may have been rewritten since publish.
    async fn on_add_message(&self, payload: &str) -> Result<(), CacheError> {
        let provisional = events::parse_add_message(payload)?;
        let key = keys::message_detail(provisional.message_id);
        let Some(json) = self.state.kv.get(&key).await? else {
            debug!(
                provisional_id = provisional.message_id,
                "Provisional message gone, add already reconciled"
            );
            return Ok(());
        };
        let current: Message = serde_json::from_str(&json)?;
        if current.parent_id < 0 {
            // Parent not migrated yet; retry after its event lands.
            return Err(CacheError::Dispatch(format!(
                "message {} still replies to provisional parent {}",
                provisional.message_id, current.parent_id
            )));
        }
        let persisted = self.state.messages.insert(current).await?;
        self.messages.migrate(provisional.message_id, &persisted).await?;
        self.state.metrics.migrations_completed.inc();
        debug!(
            provisional_id = provisional.message_id,
            message_id = persisted.message_id,
            "Migrated provisional message"
        );
        Ok(())
    }

    /// Re-warm an item's root-thread set from the durable store. Live
    /// entries are left alone; only membership and empty slots are filled.
    async fn on_warm_root_messages(&self, payload: &str) -> Result<(), CacheError> {
        let item_id = events::parse_item_id(payload)?;
        for row in self.state.messages.find_roots_by_item(item_id).await? {
            if !self.state.kv.exists(&keys::message_detail(row.message_id)).await? {
                self.messages.put(&row).await?;
            }
            self.state
                .index
                .set_add(&keys::item_root_messages(item_id), &row.message_id.to_string())
                .await?;
        }
        Ok(())
    }

    async fn on_warm_replies(&self, payload: &str) -> Result<(), CacheError> {
        let parent_id = events::parse_item_id(payload)?;
        for row in self.state.messages.find_replies(parent_id).await? {
            if !self.state.kv.exists(&keys::message_detail(row.message_id)).await? {
                self.messages.put(&row).await?;
            }
            self.state
                .index
                .set_add(&keys::parent_replies(parent_id), &row.message_id.to_string())
                .await?;
        }
        Ok(())
    }

    async fn on_warm_item(&self, payload: &str) -> Result<(), CacheError> {
        let item_id = events::parse_item_id(payload)?;
        let Some(row) = self.state.items.find_by_id(item_id).await? else {
            return Ok(());
        };
        // A live entry may already carry mutations newer than the store
        // row; only fill the slot when it is empty.
        if !self.state.kv.exists(&keys::item_detail(item_id)).await? {
            self.cache.put(&row).await?;
        }
        self.state.search.upsert(&row).await?;
        Ok(())
    }

    /// Re-warm a cold index scope from a durable-store scan.
    async fn on_rebuild_index(&self, payload: &str) -> Result<(), CacheError> {
        let Some(scope) = IndexScope::parse(payload) else {
            return Err(CacheError::Dispatch(format!(
                "malformed rebuildIndex scope: {payload}"
            )));
        };
        let rows = match scope {
            IndexScope::Category(category_id) => {
                self.state.items.find_by_category(category_id).await?
            }
            IndexScope::OnSale => self.state.items.find_on_sale().await?,
            IndexScope::All => self.state.items.find_all().await?,
        };
        for row in &rows {
            self.cache.put(row).await?;
            self.cache.index_upsert(row, None).await?;
        }
        debug!(scope = %scope, items = rows.len(), "Rebuilt index scope");
        Ok(())
    }

    async fn cached_item(&self, item_id: i64) -> Result<Option<Item>, CacheError> {
        let Some(json) = self.state.kv.get(&keys::item_detail(item_id)).await? else {
            return Ok(None);
        };
        Ok(serde_json::from_str(&json).ok())
    }
}
