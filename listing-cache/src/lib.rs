//! Read-through / write-behind cache layer for marketplace listings and
//! orders: cached item entries with multi-dimensional sorted indexes, a
//! lock-guarded purchase reservation protocol, and an asynchronous
//! reconciliation pipeline that migrates provisional ids to permanent ones.

pub mod app_state;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod item_cache;
pub mod items;
pub mod keys;
pub mod messages;
pub mod metrics;
pub mod model;
pub mod orders;
pub mod repo;
pub mod reservation;
pub mod search;

pub use app_state::AppState;
pub use config::{CacheConfig, LockMode};
pub use dispatch::{Dispatcher, EventBus, InProcessBus};
pub use error::CacheError;
pub use item_cache::ItemCache;
pub use items::{ItemDraft, ItemUpdate, Listings};
pub use messages::{MessageDraft, Messages};
pub use model::{IndexScope, Item, Message, Order, OrderStatus, Party, SortField};
pub use orders::Orders;
pub use reservation::ReservationCoordinator;
