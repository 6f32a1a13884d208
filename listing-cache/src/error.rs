use thiserror::Error;

/// Synchronous-path error taxonomy. Consumer-side failures never surface
/// here; they are retried by republishing the event.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("item {0} already reserved or off sale")]
    AlreadyReserved(i64),

    #[error("buyer {buyer_id} cannot purchase own item {item_id}")]
    SelfPurchase { item_id: i64, buyer_id: i64 },

    #[error("operator {operator_id} has no permission on item {item_id}")]
    Forbidden { item_id: i64, operator_id: i64 },

    #[error("operator {operator_id} has no permission on message {message_id}")]
    MessageForbidden { message_id: i64, operator_id: i64 },

    #[error("reservation lock unavailable for item {0}")]
    LockUnavailable(i64),

    #[error("order {order_id} is {state}, cannot {action}")]
    InvalidState {
        order_id: String,
        state: &'static str,
        action: &'static str,
    },

    #[error("cache entry serialization failed")]
    Serialization(#[from] serde_json::Error),

    #[error("event dispatch failed: {0}")]
    Dispatch(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl CacheError {
    pub fn not_found(what: impl Into<String>) -> Self {
        CacheError::NotFound(what.into())
    }
}
