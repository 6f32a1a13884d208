//! Comment threads on listings: optimistic add with provisional ids,
//! cache-first thread reads with a durable-store fallback, sender-only
//! delete. Roots and replies are membership sets keyed by item and parent;
//! entries live under their own keys so a message is cached once no matter
//! how it is reached.

use crate::app_state::AppState;
use crate::error::CacheError;
use crate::events::{self, ChangeEvent, Topic};
use crate::keys;
use crate::model::Message;
use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

// Strictly decreasing, shared scheme with items: provisional ids exist
// only until the durable store assigns the permanent positive id.
static PROVISIONAL_MESSAGE_IDS: AtomicI64 = AtomicI64::new(-1);

fn next_provisional_id() -> i64 {
    PROVISIONAL_MESSAGE_IDS.fetch_sub(1, Ordering::SeqCst)
}

/// Fields supplied by the sender. `parent_id == 0` starts a new root
/// thread; anything else replies to an existing message.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub item_id: i64,
    pub sender_id: i64,
    pub parent_id: i64,
    pub content: String,
}

#[derive(Clone)]
pub struct Messages {
    state: AppState,
}

impl Messages {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Optimistic add: the caller gets a provisional negative id back
    /// immediately; the add consumer persists the message and migrates the
    /// thread structures to the store-assigned id.
    pub async fn add_message(&self, draft: MessageDraft) -> Result<Message, CacheError> {
        if draft.parent_id != 0 {
            self.get_message(draft.parent_id).await?;
        }
        let message = Message {
            message_id: next_provisional_id(),
            item_id: draft.item_id,
            sender_id: draft.sender_id,
            parent_id: draft.parent_id,
            content: draft.content,
            is_deleted: false,
            reply_time: Utc::now(),
        };
        self.put(&message).await?;
        self.state
            .index
            .set_add(&thread_key(&message), &message.message_id.to_string())
            .await?;
        let payload = events::add_message_payload(&message)?;
        self.state
            .bus
            .publish(ChangeEvent::new(Topic::AddMessage, payload))
            .await?;
        Ok(message)
    }

    pub async fn get_message(&self, message_id: i64) -> Result<Message, CacheError> {
        self.lookup(message_id)
            .await?
            .ok_or_else(|| CacheError::not_found(format!("message {message_id}")))
    }

    /// Root threads of an item, newest first. An empty membership set
    /// falls back to the durable store and queues a thread warm event.
    pub async fn root_messages(&self, item_id: i64) -> Result<Vec<Message>, CacheError> {
        let ids = self
            .state
            .index
            .set_members(&keys::item_root_messages(item_id))
            .await?;
        let mut rows = self.collect(&ids).await?;
        if rows.is_empty() {
            rows = self.state.messages.find_roots_by_item(item_id).await?;
            if !rows.is_empty() {
                self.state
                    .bus
                    .publish(ChangeEvent::new(
                        Topic::RootMessages,
                        events::item_id_payload(item_id),
                    ))
                    .await?;
            }
        }
        rows.sort_by(|a, b| {
            b.reply_time
                .cmp(&a.reply_time)
                .then_with(|| b.message_id.cmp(&a.message_id))
        });
        Ok(rows)
    }

    /// Replies under one message, oldest first.
    pub async fn replies(&self, parent_id: i64) -> Result<Vec<Message>, CacheError> {
        let ids = self
            .state
            .index
            .set_members(&keys::parent_replies(parent_id))
            .await?;
        let mut rows = self.collect(&ids).await?;
        if rows.is_empty() {
            rows = self.state.messages.find_replies(parent_id).await?;
            if !rows.is_empty() {
                self.state
                    .bus
                    .publish(ChangeEvent::new(
                        Topic::ReplyMessages,
                        events::item_id_payload(parent_id),
                    ))
                    .await?;
            }
        }
        rows.sort_by(|a, b| {
            a.reply_time
                .cmp(&b.reply_time)
                .then_with(|| a.message_id.cmp(&b.message_id))
        });
        Ok(rows)
    }

    /// Only the sender may delete. The cache structures are cleaned
    /// synchronously; the durable row is soft-deleted in place. Replies of
    /// a deleted root stay cached but are unreachable through it.
    pub async fn delete_message(
        &self,
        message_id: i64,
        operator_id: i64,
    ) -> Result<(), CacheError> {
        let mut message = self.get_message(message_id).await?;
        if message.sender_id != operator_id {
            return Err(CacheError::MessageForbidden {
                message_id,
                operator_id,
            });
        }
        self.state
            .kv
            .delete(&keys::message_detail(message_id))
            .await?;
        self.state
            .index
            .set_remove(&thread_key(&message), &message_id.to_string())
            .await?;
        if !message.is_provisional() {
            message.is_deleted = true;
            self.state.messages.save(message).await?;
        }
        Ok(())
    }

    /// Rewrite the entry, thread membership and any replies already
    /// attached to the provisional id. New structures go in before the old
    /// ones go away, mirroring the item migration ordering.
    pub(crate) async fn migrate(&self, old_id: i64, message: &Message) -> Result<(), CacheError> {
        let old_member = old_id.to_string();
        let new_member = message.message_id.to_string();
        self.put(message).await?;
        let thread = thread_key(message);
        self.state.index.set_add(&thread, &new_member).await?;
        self.state.index.set_remove(&thread, &old_member).await?;

        // Replies published against the provisional id re-home to the
        // permanent one. Consumption order guarantees the root migrates
        // before its replies, so the old set is complete here.
        let old_replies = keys::parent_replies(old_id);
        let new_replies = keys::parent_replies(message.message_id);
        for member in self.state.index.set_members(&old_replies).await? {
            self.state.index.set_add(&new_replies, &member).await?;
            self.state.index.set_remove(&old_replies, &member).await?;
            let Ok(reply_id) = member.parse::<i64>() else {
                continue;
            };
            if let Some(json) = self.state.kv.get(&keys::message_detail(reply_id)).await? {
                if let Ok(mut reply) = serde_json::from_str::<Message>(&json) {
                    if reply.parent_id == old_id {
                        reply.parent_id = message.message_id;
                        self.put(&reply).await?;
                    }
                }
            }
        }
        self.state.kv.delete(&keys::message_detail(old_id)).await?;
        Ok(())
    }

    pub(crate) async fn put(&self, message: &Message) -> Result<(), CacheError> {
        let json = serde_json::to_string(message)?;
        self.state
            .kv
            .set(
                &keys::message_detail(message.message_id),
                &json,
                self.state.config.entry_ttl,
            )
            .await?;
        Ok(())
    }

    async fn lookup(&self, message_id: i64) -> Result<Option<Message>, CacheError> {
        let key = keys::message_detail(message_id);
        if let Some(json) = self.state.kv.get(&key).await? {
            match serde_json::from_str::<Message>(&json) {
                Ok(message) if message.is_deleted => return Ok(None),
                Ok(message) => return Ok(Some(message)),
                Err(err) => {
                    tracing::warn!(message_id, %err, "Dropping undecodable message entry");
                    self.state.kv.delete(&key).await?;
                }
            }
        }
        Ok(self.state.messages.find_by_id(message_id).await?)
    }

    async fn collect(&self, ids: &[String]) -> Result<Vec<Message>, CacheError> {
        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            let Ok(message_id) = id.parse::<i64>() else {
                continue;
            };
            if let Some(json) = self.state.kv.get(&keys::message_detail(message_id)).await? {
                if let Ok(message) = serde_json::from_str::<Message>(&json) {
                    if !message.is_deleted {
                        rows.push(message);
                    }
                }
            }
        }
        Ok(rows)
    }
}

fn thread_key(message: &Message) -> String {
    if message.is_root() {
        keys::item_root_messages(message.item_id)
    } else {
        keys::parent_replies(message.parent_id)
    }
}
