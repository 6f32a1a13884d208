use crate::config::{CacheConfig, LockMode};
use crate::dispatch::{EventBus, InProcessBus};
use crate::events::ChangeEvent;
use crate::metrics::CacheMetrics;
use crate::repo::{
    ItemRepository, MemoryItemRepository, MemoryMessageRepository, MemoryOrderRepository,
    MessageRepository, OrderRepository,
};
use crate::search::{LogSearchIndex, SearchIndex};
use anyhow::Result;
use common_lock::{DisabledLock, LockManager, MemoryLock, RedisLock};
use common_store::{KvStore, MemoryStore, RedisStore, SortedIndexStore};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

/// Shared application state: the two cache store adapters, the lock
/// manager, the event bus and the durable-store collaborators.
#[derive(Clone)]
pub struct AppState {
    pub kv: Arc<dyn KvStore>,
    pub index: Arc<dyn SortedIndexStore>,
    pub lock: Arc<dyn LockManager>,
    pub bus: Arc<dyn EventBus>,
    pub items: Arc<dyn ItemRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub search: Arc<dyn SearchIndex>,
    pub metrics: Arc<CacheMetrics>,
    pub config: Arc<CacheConfig>,
}

impl AppState {
    /// Redis-backed state for a deployment. Returns the receiver half of
    /// the in-process bus for the dispatcher loop.
    pub async fn connect(config: CacheConfig) -> Result<(Self, UnboundedReceiver<ChangeEvent>)> {
        let store = RedisStore::connect(&config.redis_url).await?;
        let lock: Arc<dyn LockManager> = match config.lock_mode {
            LockMode::Redis => Arc::new(RedisLock::connect(&config.redis_url).await?),
            LockMode::Disabled => {
                tracing::warn!("Lock manager disabled; reservations run non-atomically");
                Arc::new(DisabledLock)
            }
        };
        let (bus, rx) = InProcessBus::new();
        let state = Self {
            kv: Arc::new(store.clone()),
            index: Arc::new(store),
            lock,
            bus: Arc::new(bus),
            items: Arc::new(MemoryItemRepository::new()),
            orders: Arc::new(MemoryOrderRepository::new()),
            messages: Arc::new(MemoryMessageRepository::new()),
            search: Arc::new(LogSearchIndex),
            metrics: Arc::new(CacheMetrics::new()),
            config: Arc::new(config),
        };
        Ok((state, rx))
    }

    /// Fully in-process state for tests and local development.
    pub fn in_memory(config: CacheConfig) -> (Self, UnboundedReceiver<ChangeEvent>) {
        let store = MemoryStore::new();
        let (bus, rx) = InProcessBus::new();
        let lock: Arc<dyn LockManager> = match config.lock_mode {
            LockMode::Redis => Arc::new(MemoryLock::new()),
            LockMode::Disabled => Arc::new(DisabledLock),
        };
        let state = Self {
            kv: Arc::new(store.clone()),
            index: Arc::new(store),
            lock,
            bus: Arc::new(bus),
            items: Arc::new(MemoryItemRepository::new()),
            orders: Arc::new(MemoryOrderRepository::new()),
            messages: Arc::new(MemoryMessageRepository::new()),
            search: Arc::new(LogSearchIndex),
            metrics: Arc::new(CacheMetrics::new()),
            config: Arc::new(config),
        };
        (state, rx)
    }

    pub fn with_item_repository(mut self, items: Arc<dyn ItemRepository>) -> Self {
        self.items = items;
        self
    }

    pub fn with_order_repository(mut self, orders: Arc<dyn OrderRepository>) -> Self {
        self.orders = orders;
        self
    }

    pub fn with_message_repository(mut self, messages: Arc<dyn MessageRepository>) -> Self {
        self.messages = messages;
        self
    }
}
