use serde::Serialize;
use tracing::{debug, warn};

use super::Marketplace;
use crate::domain::*;
use crate::error::Result;
use crate::hub::HubPayload;

pub const RECENT_LIMIT: i64 = 10;

/// A notification fanned out to every admin, with an optional typed hub event.
#[derive(Debug, Clone)]
pub struct AdminAlert {
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub link_url: Option<String>,
    pub event: Option<HubPayload>,
}

impl AdminAlert {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self { title: title.into(), message: message.into(), kind: NotificationKind::Info, link_url: None, event: None }
    }

    pub fn kind(mut self, kind: NotificationKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn link(mut self, url: impl Into<String>) -> Self {
        self.link_url = Some(url.into());
        self
    }

    pub fn event(mut self, event: HubPayload) -> Self {
        self.event = Some(event);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationCounts {
    pub unread_notifications: i64,
    pub unread_messages: i64,
    /// Unread chat messages across the whole site; admins only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_unread_messages: Option<i64>,
}

impl Marketplace {
    /// Stores a notification for one user and pushes it to their open sockets.
    pub async fn notify(
        &self,
        user_id: Id,
        title: &str,
        message: &str,
        kind: NotificationKind,
        link_url: Option<&str>,
    ) -> Result<Notification> {
        let notification = self
            .storage
            .insert_notification(&NewNotification {
                user_id,
                title: title.to_string(),
                message: message.to_string(),
                kind,
                link_url: link_url.map(str::to_string),
            })
            .await?;
        self.hub.to_user(
            user_id,
            HubPayload::Notification {
                title: notification.title.clone(),
                message: notification.message.clone(),
                kind,
                link_url: notification.link_url.clone(),
            },
        );
        Ok(notification)
    }

    /// One stored notification per admin, then a single broadcast to the
    /// admin group. Returns how many admins were notified.
    pub async fn broadcast_to_admins(&self, alert: AdminAlert) -> Result<usize> {
        let admins = self.storage.admin_ids().await?;
        for admin_id in &admins {
            self.storage
                .insert_notification(&NewNotification {
                    user_id: *admin_id,
                    title: alert.title.clone(),
                    message: alert.message.clone(),
                    kind: alert.kind,
                    link_url: alert.link_url.clone(),
                })
                .await?;
        }
        self.hub.to_admins(HubPayload::AdminNotification {
            title: alert.title.clone(),
            message: alert.message.clone(),
            link_url: alert.link_url.clone(),
        });
        if let Some(event) = alert.event {
            self.hub.to_admins(event);
        }
        debug!(title = %alert.title, admins = admins.len(), "Admin alert sent");
        Ok(admins.len())
    }

    /// Like [`Self::broadcast_to_admins`] but never fails the caller.
    pub(crate) async fn alert_admins(&self, alert: AdminAlert) {
        let title = alert.title.clone();
        if let Err(e) = self.broadcast_to_admins(alert).await {
            warn!(error = %e, %title, "Failed to alert admins");
        }
    }

    pub async fn recent_notifications(&self, user_id: Id) -> Result<Vec<Notification>> {
        self.storage.recent_notifications(user_id, RECENT_LIMIT).await
    }

    pub async fn notification_counts(&self, user: &User) -> Result<NotificationCounts> {
        let system_unread_messages = if user.is_admin() {
            Some(self.storage.total_unread_messages().await?)
        } else {
            None
        };
        Ok(NotificationCounts {
            unread_notifications: self.storage.unread_notification_count(user.id).await?,
            unread_messages: self.storage.unread_message_count(user.id).await?,
            system_unread_messages,
        })
    }

    pub async fn mark_notification_read(&self, user_id: Id, notification_id: Id) -> Result<bool> {
        self.storage.mark_notification_read(user_id, notification_id).await
    }

    pub async fn mark_all_notifications_read(&self, user_id: Id) -> Result<usize> {
        self.storage.mark_all_notifications_read(user_id).await
    }
}
