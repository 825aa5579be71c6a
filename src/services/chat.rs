//! Buyer/seller conversations. A conversation is the set of messages between
//! two users about one product.

use std::collections::HashMap;
use tracing::info;

use super::validation::Validator;
use super::Marketplace;
use crate::domain::*;
use crate::error::{BazaarError, Result};
use crate::hub::HubPayload;
use crate::metrics;

pub const MAX_MESSAGE_LEN: usize = 2000;

#[derive(Debug, Clone)]
pub struct ConversationView {
    pub key: String,
    pub other: User,
    pub product: Product,
    pub messages: Vec<ChatMessageView>,
}

impl Marketplace {
    pub async fn send_message(&self, sender: &User, receiver_id: Id, product_id: Id, content: &str) -> Result<ChatMessage> {
        let content = content.trim();
        Validator::new()
            .required("Message", content)
            .max_len("Message", content, MAX_MESSAGE_LEN)
            .check(receiver_id != sender.id, "You cannot message yourself")
            .finish()?;
        self.storage.get_user(receiver_id).await?.ok_or_else(|| BazaarError::not_found("user"))?;
        self.product(product_id).await?;

        let message = self.storage.insert_message(sender.id, receiver_id, product_id, content).await?;
        metrics::chat_message_sent();
        info!(message_id = message.id, sender_id = sender.id, receiver_id, product_id, "Chat message sent");

        self.hub.to_conversation(
            conversation_key(sender.id, receiver_id, product_id),
            HubPayload::ReceiveMessage {
                message_id: message.id,
                product_id,
                sender_id: sender.id,
                receiver_id,
                content: message.content.clone(),
                sent_at: message.sent_at,
            },
        );
        self.hub.to_user(receiver_id, HubPayload::NewUnreadMessage { sender_id: sender.id, product_id });
        Ok(message)
    }

    /// Opens a conversation and marks what the viewer received as read.
    pub async fn open_conversation(&self, viewer: &User, other_id: Id, product_id: Id) -> Result<ConversationView> {
        if other_id == viewer.id {
            return Err(BazaarError::invalid("You cannot chat with yourself"));
        }
        let other = self.storage.get_user(other_id).await?.ok_or_else(|| BazaarError::not_found("user"))?;
        let product = self.product(product_id).await?;
        let messages = self.storage.conversation(viewer.id, other_id, product_id).await?;
        self.storage.mark_conversation_read(viewer.id, other_id, Some(product_id)).await?;
        Ok(ConversationView { key: conversation_key(viewer.id, other_id, product_id), other, product, messages })
    }

    /// Opens the conversation with the product's owner.
    pub async fn chat_with_seller(&self, viewer: &User, product_id: Id) -> Result<ConversationView> {
        let product = self.product(product_id).await?;
        if product.owner_id == viewer.id {
            return Err(BazaarError::invalid("This is your own product"));
        }
        self.open_conversation(viewer, product.owner_id, product_id).await
    }

    /// One entry per (product, other user), most recent first.
    pub async fn conversations(&self, user: &User) -> Result<Vec<ConversationSummary>> {
        let messages = self.storage.messages_for_user(user.id).await?;
        let mut order: Vec<(Id, Id)> = Vec::new();
        let mut grouped: HashMap<(Id, Id), (ChatMessageView, i64)> = HashMap::new();
        for view in messages {
            let other = view.message.counterpart(user.id);
            let unread = i64::from(view.message.receiver_id == user.id && !view.message.is_read);
            let key = (view.message.product_id, other);
            match grouped.get_mut(&key) {
                Some((_, count)) => *count += unread,
                None => {
                    order.push(key);
                    grouped.insert(key, (view, unread));
                }
            }
        }

        let mut summaries = Vec::with_capacity(order.len());
        for key in order {
            let Some((last, unread_count)) = grouped.remove(&key) else { continue };
            let (product_id, other_id) = key;
            let other = self.storage.get_user(other_id).await?;
            let other_user_name = if last.message.sender_id == other_id { last.sender_name } else { last.receiver_name };
            summaries.push(ConversationSummary {
                conversation_key: conversation_key(user.id, other_id, product_id),
                product_id,
                product_name: last.product_name,
                other_user_id: other_id,
                other_user_name,
                other_user_image: other
                    .as_ref()
                    .map(|u| u.avatar_url().to_string())
                    .unwrap_or_else(|| DEFAULT_AVATAR.to_string()),
                last_message: last.message.content,
                last_message_at: last.message.sent_at,
                unread_count,
            });
        }
        summaries.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        Ok(summaries)
    }

    /// Hides the conversation from the caller's side only.
    pub async fn delete_conversation(&self, user: &User, other_id: Id, product_id: Id) -> Result<usize> {
        let hidden = self.storage.hide_conversation(user.id, other_id, product_id).await?;
        info!(user_id = user.id, other_id, product_id, hidden, "Conversation hidden");
        Ok(hidden)
    }

    pub async fn unread_message_count(&self, user_id: Id) -> Result<i64> {
        self.storage.unread_message_count(user_id).await
    }

    pub async fn mark_conversation_read(&self, user: &User, other_id: Id, product_id: Option<Id>) -> Result<usize> {
        self.storage.mark_conversation_read(user.id, other_id, product_id).await
    }
}
