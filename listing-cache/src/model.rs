use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A marketplace listing. Negative `item_id` is a provisional identifier
/// minted at optimistic-create time; the durable store assigns the
/// permanent positive id asynchronously.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub item_id: i64,
    pub category_id: i64,
    pub seller_id: i64,
    pub title: String,
    pub description: String,
    pub condition: String,
    pub image_url: String,
    pub price: BigDecimal,
    pub likes: i64,
    pub is_available: bool,
    pub is_deleted: bool,
    pub update_time: DateTime<Utc>,
}

impl Item {
    pub fn is_provisional(&self) -> bool {
        self.item_id < 0
    }

    /// Eligible for the on-sale indexes.
    pub fn is_on_sale(&self) -> bool {
        self.is_available && !self.is_deleted
    }

    /// Numeric projection for one sorted index.
    pub fn score(&self, field: SortField) -> f64 {
        match field {
            SortField::UpdateTime => self.update_time.timestamp() as f64,
            SortField::Price => self.price.to_f64().unwrap_or(0.0),
            SortField::Likes => self.likes as f64,
        }
    }
}

/// A comment on a listing. Roots carry `parent_id == 0`; replies point at
/// their root. Negative `message_id` is provisional, same scheme as items.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub message_id: i64,
    pub item_id: i64,
    pub sender_id: i64,
    pub parent_id: i64,
    pub content: String,
    pub is_deleted: bool,
    pub reply_time: DateTime<Utc>,
}

impl Message {
    pub fn is_provisional(&self) -> bool {
        self.message_id < 0
    }

    pub fn is_root(&self) -> bool {
        self.parent_id == 0
    }
}

/// The three index sort dimensions. Every scope keeps one sorted set per
/// field so queries never re-sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortField {
    UpdateTime,
    Price,
    Likes,
}

impl SortField {
    pub const ALL: [SortField; 3] = [SortField::UpdateTime, SortField::Price, SortField::Likes];

    pub fn as_str(&self) -> &'static str {
        match self {
            SortField::UpdateTime => "update_time",
            SortField::Price => "price",
            SortField::Likes => "likes",
        }
    }

    pub fn from_str(s: &str) -> Option<SortField> {
        match s {
            "update_time" => Some(SortField::UpdateTime),
            "price" => Some(SortField::Price),
            "likes" => Some(SortField::Likes),
            _ => None,
        }
    }
}

/// Logical partition of the item indexes: one per category plus the two
/// global scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexScope {
    Category(i64),
    OnSale,
    All,
}

impl IndexScope {
    /// Sorted-set key for this scope and sort field.
    pub fn zset_key(&self, field: SortField) -> String {
        match self {
            IndexScope::Category(category_id) => {
                format!("category:{category_id}:items:zset:{}", field.as_str())
            }
            IndexScope::OnSale => format!("item:onsale:sorted:{}", field.as_str()),
            IndexScope::All => format!("item:all:sorted:{}", field.as_str()),
        }
    }

    /// Parse the scope form used in rebuild-index event payloads.
    pub fn parse(s: &str) -> Option<IndexScope> {
        match s {
            "item:onsale" => Some(IndexScope::OnSale),
            "item:all" => Some(IndexScope::All),
            _ => {
                let category_id = s.strip_prefix("category:")?.parse().ok()?;
                Some(IndexScope::Category(category_id))
            }
        }
    }
}

impl fmt::Display for IndexScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexScope::Category(category_id) => write!(f, "category:{category_id}"),
            IndexScope::OnSale => write!(f, "item:onsale"),
            IndexScope::All => write!(f, "item:all"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    AwaitingConfirm,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::AwaitingConfirm => "awaiting_confirm",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

/// Valid transitions:
/// pending -> confirmed | cancelled
/// confirmed -> awaiting_confirm | completed | cancelled
/// awaiting_confirm -> completed | cancelled
/// completed and cancelled are terminal (credit updates are not transitions).
pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
    match from {
        OrderStatus::Pending => matches!(to, OrderStatus::Confirmed | OrderStatus::Cancelled),
        OrderStatus::Confirmed => matches!(
            to,
            OrderStatus::AwaitingConfirm | OrderStatus::Completed | OrderStatus::Cancelled
        ),
        OrderStatus::AwaitingConfirm => {
            matches!(to, OrderStatus::Completed | OrderStatus::Cancelled)
        }
        OrderStatus::Completed | OrderStatus::Cancelled => false,
    }
}

/// Which side of an order acts in a complete/credit operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Buyer,
    Seller,
}

impl Party {
    pub fn as_str(&self) -> &'static str {
        match self {
            Party::Buyer => "buyer",
            Party::Seller => "seller",
        }
    }

    pub fn from_str(s: &str) -> Option<Party> {
        match s {
            "buyer" => Some(Party::Buyer),
            "seller" => Some(Party::Seller),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub order_id: String,
    pub item_id: i64,
    pub buyer_id: i64,
    pub seller_id: i64,
    pub amount: BigDecimal,
    pub status: OrderStatus,
    pub buyer_confirmed: bool,
    pub seller_confirmed: bool,
    pub buyer_credit: Option<i32>,
    pub seller_credit: Option<i32>,
    pub create_time: DateTime<Utc>,
    pub confirm_time: Option<DateTime<Utc>>,
    pub cancel_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
}

impl Order {
    pub fn create_score(&self) -> f64 {
        self.create_time.timestamp() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_keys_follow_the_grammar() {
        assert_eq!(
            IndexScope::Category(3).zset_key(SortField::Price),
            "category:3:items:zset:price"
        );
        assert_eq!(
            IndexScope::OnSale.zset_key(SortField::UpdateTime),
            "item:onsale:sorted:update_time"
        );
        assert_eq!(
            IndexScope::All.zset_key(SortField::Likes),
            "item:all:sorted:likes"
        );
    }

    #[test]
    fn scope_roundtrips_through_display() {
        for scope in [IndexScope::Category(12), IndexScope::OnSale, IndexScope::All] {
            assert_eq!(IndexScope::parse(&scope.to_string()), Some(scope));
        }
        assert_eq!(IndexScope::parse("category:abc"), None);
        assert_eq!(IndexScope::parse("bogus"), None);
    }

    #[test]
    fn terminal_states_do_not_transition() {
        assert!(is_valid_transition(OrderStatus::Pending, OrderStatus::Confirmed));
        assert!(is_valid_transition(OrderStatus::Confirmed, OrderStatus::Completed));
        assert!(is_valid_transition(OrderStatus::AwaitingConfirm, OrderStatus::Cancelled));
        assert!(!is_valid_transition(OrderStatus::Completed, OrderStatus::Cancelled));
        assert!(!is_valid_transition(OrderStatus::Cancelled, OrderStatus::Confirmed));
        assert!(!is_valid_transition(OrderStatus::Pending, OrderStatus::Completed));
    }
}
