//! In-process publish/subscribe for chat and back-office notifications.
//!
//! Every connection subscribes to one broadcast channel and filters events
//! by audience. Delivery is best effort: a lagging subscriber skips events.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::{parse_conversation_key, Id, NotificationKind};

pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Both participants of a product conversation, by conversation key.
    Conversation(String),
    User(Id),
    Admins,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum HubPayload {
    #[serde(rename_all = "camelCase")]
    ReceiveMessage {
        message_id: Id,
        product_id: Id,
        sender_id: Id,
        receiver_id: Id,
        content: String,
        sent_at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    NewUnreadMessage { sender_id: Id, product_id: Id },
    #[serde(rename_all = "camelCase")]
    Notification { title: String, message: String, kind: NotificationKind, link_url: Option<String> },
    #[serde(rename_all = "camelCase")]
    AdminNotification { title: String, message: String, link_url: Option<String> },
    #[serde(rename_all = "camelCase")]
    NewProduct { product_id: Id },
    #[serde(rename_all = "camelCase")]
    NewOrder { order_id: Id },
    #[serde(rename_all = "camelCase")]
    NewReport { report_id: Id },
    #[serde(rename_all = "camelCase")]
    NewVerification { verification_id: Id },
    #[serde(rename_all = "camelCase")]
    SuspiciousActivity { user_id: Option<Id>, description: String },
    #[serde(rename_all = "camelCase")]
    ProductApproved { product_id: Id },
}

#[derive(Debug, Clone)]
pub struct HubEvent {
    pub audience: Audience,
    pub payload: HubPayload,
}

#[derive(Clone)]
pub struct Hub {
    tx: broadcast::Sender<Arc<HubEvent>>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Hub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<HubEvent>> {
        self.tx.subscribe()
    }

    pub fn publish(&self, audience: Audience, payload: HubPayload) {
        let event = Arc::new(HubEvent { audience, payload });
        if self.tx.send(event).is_err() {
            debug!("Hub event published with no subscribers");
        }
    }

    pub fn to_conversation(&self, key: impl Into<String>, payload: HubPayload) {
        self.publish(Audience::Conversation(key.into()), payload);
    }

    pub fn to_user(&self, user_id: Id, payload: HubPayload) {
        self.publish(Audience::User(user_id), payload);
    }

    pub fn to_admins(&self, payload: HubPayload) {
        self.publish(Audience::Admins, payload);
    }
}

/// What one connection is allowed to hear.
#[derive(Debug, Clone)]
pub struct Membership {
    user_id: Id,
    is_admin: bool,
    conversations: HashSet<String>,
}

impl Membership {
    pub fn new(user_id: Id, is_admin: bool) -> Self {
        Self { user_id, is_admin, conversations: HashSet::new() }
    }

    /// Joins a conversation group. Only its two participants may join.
    pub fn join(&mut self, key: &str) -> bool {
        match parse_conversation_key(key) {
            Some((low, high, _)) if low == self.user_id || high == self.user_id => {
                self.conversations.insert(key.to_string());
                true
            }
            _ => false,
        }
    }

    pub fn leave(&mut self, key: &str) -> bool {
        self.conversations.remove(key)
    }

    pub fn accepts(&self, event: &HubEvent) -> bool {
        match &event.audience {
            Audience::Conversation(key) => self.conversations.contains(key),
            Audience::User(id) => *id == self.user_id,
            Audience::Admins => self.is_admin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::conversation_key;

    #[test]
    fn membership_filters_by_audience() {
        let mut buyer = Membership::new(4, false);
        let admin = Membership::new(1, true);
        let key = conversation_key(4, 9, 2);

        let chat = HubEvent {
            audience: Audience::Conversation(key.clone()),
            payload: HubPayload::NewUnreadMessage { sender_id: 9, product_id: 2 },
        };
        assert!(!buyer.accepts(&chat));
        assert!(buyer.join(&key));
        assert!(buyer.accepts(&chat));
        assert!(!admin.accepts(&chat));

        let admins_only = HubEvent { audience: Audience::Admins, payload: HubPayload::NewOrder { order_id: 1 } };
        assert!(admin.accepts(&admins_only));
        assert!(!buyer.accepts(&admins_only));

        let direct = HubEvent { audience: Audience::User(4), payload: HubPayload::NewProduct { product_id: 3 } };
        assert!(buyer.accepts(&direct));
        assert!(buyer.leave(&key));
        assert!(!buyer.accepts(&chat));
    }

    #[test]
    fn outsiders_cannot_join_a_conversation() {
        let mut stranger = Membership::new(5, false);
        assert!(!stranger.join(&conversation_key(4, 9, 2)));
        assert!(!stranger.join("not-a-key"));
    }

    #[test]
    fn payload_serializes_with_camel_case_fields() {
        let payload = HubPayload::NewUnreadMessage { sender_id: 3, product_id: 8 };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "NewUnreadMessage");
        assert_eq!(json["data"]["senderId"], 3);
        assert_eq!(json["data"]["productId"], 8);
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let hub = Hub::new(8);
        let mut rx = hub.subscribe();
        hub.to_admins(HubPayload::NewReport { report_id: 11 });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.audience, Audience::Admins);
        assert_eq!(event.payload, HubPayload::NewReport { report_id: 11 });
    }
}
