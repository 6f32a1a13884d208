//! Order lifecycle against the cache: cache-first reads with durable-store
//! fallback, state-machine-guarded transitions, and per-user order history
//! indexes keyed by creation time.

use crate::app_state::AppState;
use crate::error::CacheError;
use crate::events::{self, ChangeEvent, Topic};
use crate::keys;
use crate::model::{is_valid_transition, Order, OrderStatus, Party};
use crate::reservation::ReservationCoordinator;
use chrono::Utc;

/// Write the order entry and both history index memberships. Shared by the
/// reservation path and every transition below.
pub(crate) async fn cache_order(state: &AppState, order: &Order) -> Result<(), CacheError> {
    let body = serde_json::to_string(order)?;
    state
        .kv
        .set(&keys::order_detail(&order.order_id), &body, state.config.entry_ttl)
        .await?;
    state
        .index
        .zadd(
            &keys::buyer_orders(order.buyer_id),
            &order.order_id,
            order.create_score(),
        )
        .await?;
    state
        .index
        .zadd(
            &keys::seller_orders(order.seller_id),
            &order.order_id,
            order.create_score(),
        )
        .await?;
    Ok(())
}

#[derive(Clone)]
pub struct Orders {
    state: AppState,
}

impl Orders {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub async fn get_order(&self, order_id: &str) -> Result<Order, CacheError> {
        if let Some(body) = self.state.kv.get(&keys::order_detail(order_id)).await? {
            return Ok(serde_json::from_str(&body)?);
        }
        let order = self
            .state
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| CacheError::not_found(format!("order {order_id}")))?;
        cache_order(&self.state, &order).await?;
        Ok(order)
    }

    async fn transition(&self, order_id: &str, to: OrderStatus, action: &'static str) -> Result<Order, CacheError> {
        let mut order = self.get_order(order_id).await?;
        if !is_valid_transition(order.status, to) {
            return Err(CacheError::InvalidState {
                order_id: order_id.to_string(),
                state: order.status.as_str(),
                action,
            });
        }
        order.status = to;
        Ok(order)
    }

    /// Seller accepts the pending order.
    pub async fn confirm_order(&self, order_id: &str) -> Result<Order, CacheError> {
        let mut order = self.transition(order_id, OrderStatus::Confirmed, "confirm").await?;
        order.confirm_time = Some(Utc::now());
        cache_order(&self.state, &order).await?;
        self.state
            .bus
            .publish(ChangeEvent::new(
                Topic::OrderConfirm,
                events::order_id_payload(order_id),
            ))
            .await?;
        Ok(order)
    }

    /// Cancel the order and put the item back on sale.
    pub async fn cancel_order(&self, order_id: &str) -> Result<Order, CacheError> {
        let mut order = self.transition(order_id, OrderStatus::Cancelled, "cancel").await?;
        order.cancel_time = Some(Utc::now());
        cache_order(&self.state, &order).await?;
        ReservationCoordinator::new(self.state.clone())
            .release(order.item_id)
            .await?;
        self.state
            .bus
            .publish(ChangeEvent::new(
                Topic::OrderCancel,
                events::order_id_payload(order_id),
            ))
            .await?;
        Ok(order)
    }

    /// One side signals completion. The order finishes once both sides
    /// have; until then it parks in `awaiting_confirm`.
    pub async fn complete_order(&self, order_id: &str, party: Party) -> Result<Order, CacheError> {
        let mut order = self.get_order(order_id).await?;
        if !matches!(
            order.status,
            OrderStatus::Confirmed | OrderStatus::AwaitingConfirm
        ) {
            return Err(CacheError::InvalidState {
                order_id: order_id.to_string(),
                state: order.status.as_str(),
                action: "complete",
            });
        }
        match party {
            Party::Buyer => order.buyer_confirmed = true,
            Party::Seller => order.seller_confirmed = true,
        }
        if order.buyer_confirmed && order.seller_confirmed {
            order.status = OrderStatus::Completed;
            order.finish_time = Some(Utc::now());
        } else {
            order.status = OrderStatus::AwaitingConfirm;
        }
        cache_order(&self.state, &order).await?;
        self.state
            .bus
            .publish(ChangeEvent::new(
                Topic::OrderComplete,
                events::order_complete_payload(order_id, party),
            ))
            .await?;
        Ok(order)
    }

    /// Post-completion rating. Each side rates once, 1..=5.
    pub async fn credit_order(
        &self,
        order_id: &str,
        party: Party,
        credit: i32,
    ) -> Result<Order, CacheError> {
        let mut order = self.get_order(order_id).await?;
        if order.status != OrderStatus::Completed {
            return Err(CacheError::InvalidState {
                order_id: order_id.to_string(),
                state: order.status.as_str(),
                action: "credit",
            });
        }
        match party {
            Party::Buyer => order.buyer_credit = Some(credit),
            Party::Seller => order.seller_credit = Some(credit),
        }
        cache_order(&self.state, &order).await?;
        self.state
            .bus
            .publish(ChangeEvent::new(
                Topic::OrderCredit,
                events::order_credit_payload(order_id, party, credit),
            ))
            .await?;
        Ok(order)
    }

    /// Newest-first order history for one side of the marketplace, with a
    /// durable-store fallback that re-warms the history index.
    pub async fn orders_page(
        &self,
        party: Party,
        user_id: i64,
        page: u64,
        size: u64,
    ) -> Result<Vec<Order>, CacheError> {
        if size == 0 {
            return Ok(Vec::new());
        }
        let zset = match party {
            Party::Buyer => keys::buyer_orders(user_id),
            Party::Seller => keys::seller_orders(user_id),
        };
        let start = (page * size) as i64;
        let stop = ((page + 1) * size) as i64 - 1;
        let ids = self.state.index.zrevrange(&zset, start, stop).await?;
        if !ids.is_empty() {
            let mut orders = Vec::with_capacity(ids.len());
            for id in ids {
                orders.push(self.get_order(&id).await?);
            }
            return Ok(orders);
        }

        let mut rows = match party {
            Party::Buyer => self.state.orders.find_by_buyer(user_id).await?,
            Party::Seller => self.state.orders.find_by_seller(user_id).await?,
        };
        rows.sort_by(|a, b| b.create_time.cmp(&a.create_time));
        for order in &rows {
            cache_order(&self.state, order).await?;
        }
        let total = rows.len();
        let start = (page as usize * size as usize).min(total);
        let end = ((page as usize + 1) * size as usize).min(total);
        Ok(rows[start..end].to_vec())
    }
}
