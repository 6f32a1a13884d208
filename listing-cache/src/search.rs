//! Downstream search-index collaborator. The real synchronization job is
//! an external system; the cache core only emits upsert/remove
//! notifications to it.

use crate::model::Item;
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn upsert(&self, item: &Item) -> Result<()>;
    async fn remove(&self, item_id: i64) -> Result<()>;
}

/// Default collaborator that only records the notification.
#[derive(Clone, Copy, Default)]
pub struct LogSearchIndex;

#[async_trait]
impl SearchIndex for LogSearchIndex {
    async fn upsert(&self, item: &Item) -> Result<()> {
        tracing::debug!(item_id = item.item_id, "Search index upsert notification");
        Ok(())
    }

    async fn remove(&self, item_id: i64) -> Result<()> {
        tracing::debug!(item_id, "Search index remove notification");
        Ok(())
    }
}
