//! Change-event topics and their flat positional payload formats.
//!
//! Payloads are parseable strings, never rich objects, so consumers stay
//! decoupled from producer in-memory types. The formats are stable;
//! consumers split on commas by position.

use crate::model::{Item, Message, Party};
use anyhow::{bail, Context, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    CreateItem,
    UpdateItem,
    ToggleItemAvailability,
    FavoriteItem,
    UnfavoriteItem,
    CreateOrder,
    OrderConfirm,
    OrderCancel,
    OrderComplete,
    OrderCredit,
    AddMessage,
    RootMessages,
    ReplyMessages,
    WarmItem,
    RebuildIndex,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::CreateItem => "createItem",
            Topic::UpdateItem => "updateItem",
            Topic::ToggleItemAvailability => "toggleItemAvailability",
            Topic::FavoriteItem => "favoriteItem",
            Topic::UnfavoriteItem => "unfavoriteItem",
            Topic::CreateOrder => "createOrder",
            Topic::OrderConfirm => "orderConfirm",
            Topic::OrderCancel => "orderCancel",
            Topic::OrderComplete => "orderComplete",
            Topic::OrderCredit => "orderCredit",
            Topic::AddMessage => "addMessage",
            Topic::RootMessages => "RootMessage",
            Topic::ReplyMessages => "replyMessage",
            Topic::WarmItem => "warmItem",
            Topic::RebuildIndex => "rebuildIndex",
        }
    }
}

/// Immutable mutation description. `attempt` is delivery metadata used by
/// the retry budget; it is never part of the payload grammar.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub topic: Topic,
    pub payload: String,
    pub attempt: u32,
}

impl ChangeEvent {
    pub fn new(topic: Topic, payload: impl Into<String>) -> Self {
        Self {
            topic,
            payload: payload.into(),
            attempt: 0,
        }
    }

    pub fn redelivery(&self) -> Self {
        Self {
            topic: self.topic,
            payload: self.payload.clone(),
            attempt: self.attempt + 1,
        }
    }
}

// createItem -> serialized entity, provisional id included.

pub fn create_item_payload(item: &Item) -> Result<String> {
    serde_json::to_string(item).context("serialize createItem payload")
}

pub fn parse_create_item(payload: &str) -> Result<Item> {
    serde_json::from_str(payload).context("parse createItem payload")
}

// updateItem -> itemId,oldCategoryId,newCategoryId,newImageUrlOrEmpty

pub fn update_item_payload(
    item_id: i64,
    old_category_id: i64,
    new_category_id: i64,
    new_image_url: Option<&str>,
) -> String {
    format!(
        "{item_id},{old_category_id},{new_category_id},{}",
        new_image_url.unwrap_or("")
    )
}

pub fn parse_update_item(payload: &str) -> Result<(i64, i64, i64, Option<String>)> {
    let parts: Vec<&str> = payload.splitn(4, ',').collect();
    if parts.len() < 3 {
        bail!("malformed updateItem payload: {payload}");
    }
    let item_id = parts[0].parse().context("updateItem itemId")?;
    let old_category_id = parts[1].parse().context("updateItem oldCategoryId")?;
    let new_category_id = parts[2].parse().context("updateItem newCategoryId")?;
    let image = parts
        .get(3)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());
    Ok((item_id, old_category_id, new_category_id, image))
}

// toggleItemAvailability -> itemId,isAvailable,operatorId

pub fn toggle_payload(item_id: i64, is_available: bool, operator_id: i64) -> String {
    format!("{item_id},{is_available},{operator_id}")
}

pub fn parse_toggle(payload: &str) -> Result<(i64, bool, i64)> {
    let parts: Vec<&str> = payload.split(',').collect();
    if parts.len() != 3 {
        bail!("malformed toggleItemAvailability payload: {payload}");
    }
    Ok((
        parts[0].parse().context("toggle itemId")?,
        parts[1].parse().context("toggle isAvailable")?,
        parts[2].parse().context("toggle operatorId")?,
    ))
}

// addMessage -> serialized message, provisional id included.
// RootMessage carries the item id, replyMessage the parent message id;
// both reuse the plain numeric payload below.

pub fn add_message_payload(message: &Message) -> Result<String> {
    serde_json::to_string(message).context("serialize addMessage payload")
}

pub fn parse_add_message(payload: &str) -> Result<Message> {
    serde_json::from_str(payload).context("parse addMessage payload")
}

// favoriteItem / unfavoriteItem / warmItem -> itemId

pub fn item_id_payload(item_id: i64) -> String {
    item_id.to_string()
}

pub fn parse_item_id(payload: &str) -> Result<i64> {
    payload.trim().parse().context("parse itemId payload")
}

// createOrder -> buyerId,itemId,orderId

pub fn create_order_payload(buyer_id: i64, item_id: i64, order_id: &str) -> String {
    format!("{buyer_id},{item_id},{order_id}")
}

pub fn parse_create_order(payload: &str) -> Result<(i64, i64, String)> {
    let parts: Vec<&str> = payload.splitn(3, ',').collect();
    if parts.len() != 3 {
        bail!("malformed createOrder payload: {payload}");
    }
    Ok((
        parts[0].parse().context("createOrder buyerId")?,
        parts[1].parse().context("createOrder itemId")?,
        parts[2].to_string(),
    ))
}

// orderConfirm / orderCancel -> orderId

pub fn order_id_payload(order_id: &str) -> String {
    order_id.to_string()
}

// orderComplete -> orderId,{"buyer"|"seller"}

pub fn order_complete_payload(order_id: &str, party: Party) -> String {
    format!("{order_id},{}", party.as_str())
}

pub fn parse_order_complete(payload: &str) -> Result<(String, Party)> {
    let parts: Vec<&str> = payload.splitn(2, ',').collect();
    if parts.len() != 2 {
        bail!("malformed orderComplete payload: {payload}");
    }
    let party = Party::from_str(parts[1])
        .with_context(|| format!("orderComplete party: {}", parts[1]))?;
    Ok((parts[0].to_string(), party))
}

// orderCredit -> orderId,{"buyer"|"seller"},creditValue

pub fn order_credit_payload(order_id: &str, party: Party, credit: i32) -> String {
    format!("{order_id},{},{credit}", party.as_str())
}

pub fn parse_order_credit(payload: &str) -> Result<(String, Party, i32)> {
    let parts: Vec<&str> = payload.splitn(3, ',').collect();
    if parts.len() != 3 {
        bail!("malformed orderCredit payload: {payload}");
    }
    let party = Party::from_str(parts[1])
        .with_context(|| format!("orderCredit party: {}", parts[1]))?;
    Ok((
        parts[0].to_string(),
        party,
        parts[2].parse().context("orderCredit value")?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_item_payload_keeps_positions() {
        let payload = update_item_payload(42, 3, 5, Some("https://img/x.png"));
        assert_eq!(payload, "42,3,5,https://img/x.png");
        let (id, old_cat, new_cat, image) = parse_update_item(&payload).unwrap();
        assert_eq!((id, old_cat, new_cat), (42, 3, 5));
        assert_eq!(image.as_deref(), Some("https://img/x.png"));

        let (_, _, _, image) = parse_update_item("42,3,5,").unwrap();
        assert_eq!(image, None);
        let (_, _, _, image) = parse_update_item("42,3,5").unwrap();
        assert_eq!(image, None);
    }

    #[test]
    fn toggle_payload_roundtrip() {
        let payload = toggle_payload(7, false, 12);
        assert_eq!(payload, "7,false,12");
        assert_eq!(parse_toggle(&payload).unwrap(), (7, false, 12));
        assert!(parse_toggle("7,false").is_err());
    }

    #[test]
    fn order_payloads_parse_positionally() {
        let (buyer, item, order) = parse_create_order("5,42,ORD123").unwrap();
        assert_eq!((buyer, item, order.as_str()), (5, 42, "ORD123"));

        let (order, party) = parse_order_complete("ORD123,seller").unwrap();
        assert_eq!((order.as_str(), party), ("ORD123", Party::Seller));
        assert!(parse_order_complete("ORD123,nobody").is_err());

        let (order, party, credit) = parse_order_credit("ORD123,buyer,5").unwrap();
        assert_eq!((order.as_str(), party, credit), ("ORD123", Party::Buyer, 5));
    }

    #[test]
    fn redelivery_bumps_attempt_only() {
        let event = ChangeEvent::new(Topic::WarmItem, "42");
        let retry = event.redelivery();
        assert_eq!(retry.attempt, 1);
        assert_eq!(retry.payload, event.payload);
        assert_eq!(retry.topic, event.topic);
    }
}
