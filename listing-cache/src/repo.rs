//! Durable-store collaborator interfaces. The relational layer itself is
//! out of scope; the cache core only needs load/save-by-id operations and
//! the scoped scans backing the cold-page fallback. In-memory
//! implementations serve tests and local runs.

use crate::model::{Item, Message, Order};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

#[async_trait]
pub trait ItemRepository: Send + Sync {
    async fn find_by_id(&self, item_id: i64) -> Result<Option<Item>>;
    /// Persist a new row; the store assigns the permanent id and the
    /// returned entity carries it.
    async fn insert(&self, item: Item) -> Result<Item>;
    async fn save(&self, item: Item) -> Result<()>;
    async fn delete(&self, item_id: i64) -> Result<()>;
    async fn find_by_category(&self, category_id: i64) -> Result<Vec<Item>>;
    async fn find_on_sale(&self) -> Result<Vec<Item>>;
    async fn find_all(&self) -> Result<Vec<Item>>;
    async fn find_by_seller(&self, seller_id: i64) -> Result<Vec<Item>>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn find_by_id(&self, order_id: &str) -> Result<Option<Order>>;
    async fn save(&self, order: Order) -> Result<()>;
    async fn find_by_buyer(&self, buyer_id: i64) -> Result<Vec<Order>>;
    async fn find_by_seller(&self, seller_id: i64) -> Result<Vec<Order>>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn find_by_id(&self, message_id: i64) -> Result<Option<Message>>;
    /// Persist a new row; the store assigns the permanent id and the
    /// returned entity carries it.
    async fn insert(&self, message: Message) -> Result<Message>;
    async fn save(&self, message: Message) -> Result<()>;
    async fn find_roots_by_item(&self, item_id: i64) -> Result<Vec<Message>>;
    async fn find_replies(&self, parent_id: i64) -> Result<Vec<Message>>;
}

// ---------------- In-memory implementations ----------------

#[derive(Clone)]
pub struct MemoryItemRepository {
    rows: Arc<RwLock<HashMap<i64, Item>>>,
    next_id: Arc<AtomicI64>,
}

impl MemoryItemRepository {
    pub fn new() -> Self {
        Self::with_next_id(1)
    }

    /// Control the first store-assigned id (useful in tests).
    pub fn with_next_id(next_id: i64) -> Self {
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicI64::new(next_id)),
        }
    }

    /// Seed a row keeping its id, without going through `insert`.
    pub async fn seed(&self, item: Item) {
        self.rows.write().await.insert(item.item_id, item);
    }
}

impl Default for MemoryItemRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ItemRepository for MemoryItemRepository {
    async fn find_by_id(&self, item_id: i64) -> Result<Option<Item>> {
        let rows = self.rows.read().await;
        Ok(rows.get(&item_id).filter(|item| !item.is_deleted).cloned())
    }

    async fn insert(&self, mut item: Item) -> Result<Item> {
        item.item_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.rows.write().await.insert(item.item_id, item.clone());
        Ok(item)
    }

    async fn save(&self, item: Item) -> Result<()> {
        self.rows.write().await.insert(item.item_id, item);
        Ok(())
    }

    async fn delete(&self, item_id: i64) -> Result<()> {
        self.rows.write().await.remove(&item_id);
        Ok(())
    }

    async fn find_by_category(&self, category_id: i64) -> Result<Vec<Item>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|item| item.category_id == category_id && !item.is_deleted)
            .cloned()
            .collect())
    }

    async fn find_on_sale(&self) -> Result<Vec<Item>> {
        let rows = self.rows.read().await;
        Ok(rows.values().filter(|item| item.is_on_sale()).cloned().collect())
    }

    async fn find_all(&self) -> Result<Vec<Item>> {
        let rows = self.rows.read().await;
        Ok(rows.values().filter(|item| !item.is_deleted).cloned().collect())
    }

    async fn find_by_seller(&self, seller_id: i64) -> Result<Vec<Item>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|item| item.seller_id == seller_id && !item.is_deleted)
            .cloned()
            .collect())
    }
}

#[derive(Clone)]
pub struct MemoryMessageRepository {
    rows: Arc<RwLock<HashMap<i64, Message>>>,
    next_id: Arc<AtomicI64>,
}

impl MemoryMessageRepository {
    pub fn new() -> Self {
        Self::with_next_id(1)
    }

    pub fn with_next_id(next_id: i64) -> Self {
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicI64::new(next_id)),
        }
    }

    /// Seed a row keeping its id, without going through `insert`.
    pub async fn seed(&self, message: Message) {
        self.rows.write().await.insert(message.message_id, message);
    }
}

impl Default for MemoryMessageRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageRepository for MemoryMessageRepository {
    async fn find_by_id(&self, message_id: i64) -> Result<Option<Message>> {
        let rows = self.rows.read().await;
        Ok(rows.get(&message_id).filter(|m| !m.is_deleted).cloned())
    }

    async fn insert(&self, mut message: Message) -> Result<Message> {
        message.message_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.rows
            .write()
            .await
            .insert(message.message_id, message.clone());
        Ok(message)
    }

    async fn save(&self, message: Message) -> Result<()> {
        self.rows.write().await.insert(message.message_id, message);
        Ok(())
    }

    async fn find_roots_by_item(&self, item_id: i64) -> Result<Vec<Message>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|m| m.item_id == item_id && m.is_root() && !m.is_deleted)
            .cloned()
            .collect())
    }

    async fn find_replies(&self, parent_id: i64) -> Result<Vec<Message>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|m| m.parent_id == parent_id && !m.is_deleted)
            .cloned()
            .collect())
    }
}

#[derive(Clone, Default)]
pub struct MemoryOrderRepository {
    rows: Arc<RwLock<HashMap<String, Order>>>,
}

impl MemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderRepository for MemoryOrderRepository {
    async fn find_by_id(&self, order_id: &str) -> Result<Option<Order>> {
        Ok(self.rows.read().await.get(order_id).cloned())
    }

    async fn save(&self, order: Order) -> Result<()> {
        self.rows.write().await.insert(order.order_id.clone(), order);
        Ok(())
    }

    async fn find_by_buyer(&self, buyer_id: i64) -> Result<Vec<Order>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|order| order.buyer_id == buyer_id)
            .cloned()
            .collect())
    }

    async fn find_by_seller(&self, seller_id: i64) -> Result<Vec<Order>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|order| order.seller_id == seller_id)
            .cloned()
            .collect())
    }
}
