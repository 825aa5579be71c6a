use async_trait::async_trait;
use rusqlite::{params, Row};

use super::*;
use crate::domain::*;
use crate::storage::NotificationStore;

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        title: row.get("title")?,
        message: row.get("message")?,
        kind: get_enum(row, "kind")?,
        is_read: row.get("is_read")?,
        read_at: get_opt_ts(row, "read_at")?,
        link_url: row.get("link_url")?,
        created_at: get_ts(row, "created_at")?,
    })
}

#[async_trait]
impl NotificationStore for SqliteStorage {
    async fn insert_notification(&self, n: &NewNotification) -> Result<Notification> {
        self.with_conn(|conn| {
            let created_at = Utc::now();
            conn.execute(
                "INSERT INTO notifications (user_id, title, message, kind, link_url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![n.user_id, n.title, n.message, n.kind.as_str(), n.link_url, ts(&created_at)],
            )?;
            Ok(Notification {
                id: conn.last_insert_rowid(),
                user_id: n.user_id,
                title: n.title.clone(),
                message: n.message.clone(),
                kind: n.kind,
                is_read: false,
                read_at: None,
                link_url: n.link_url.clone(),
                created_at,
            })
        })
    }

    async fn recent_notifications(&self, user_id: Id, limit: i64) -> Result<Vec<Notification>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, title, message, kind, is_read, read_at, link_url, created_at
                 FROM notifications WHERE user_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![user_id, limit], notification_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    async fn unread_notification_count(&self, user_id: Id) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
                params![user_id],
                |r| r.get(0),
            )?)
        })
    }

    async fn mark_notification_read(&self, user_id: Id, id: Id) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE notifications SET is_read = 1, read_at = ?1 WHERE id = ?2 AND user_id = ?3 AND is_read = 0",
                params![ts(&Utc::now()), id, user_id],
            )?;
            Ok(changed > 0)
        })
    }

    async fn mark_all_notifications_read(&self, user_id: Id) -> Result<usize> {
        self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE notifications SET is_read = 1, read_at = ?1 WHERE user_id = ?2 AND is_read = 0",
                params![ts(&Utc::now()), user_id],
            )?)
        })
    }

    async fn mark_notifications_read_by_link(&self, title: &str, link_url: &str) -> Result<usize> {
        self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE notifications SET is_read = 1, read_at = ?1 WHERE title = ?2 AND link_url = ?3 AND is_read = 0",
                params![ts(&Utc::now()), title, link_url],
            )?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    fn note(user_id: Id, title: &str, link: Option<&str>) -> NewNotification {
        NewNotification {
            user_id,
            title: title.into(),
            message: "m".into(),
            kind: NotificationKind::Info,
            link_url: link.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn read_by_link_touches_only_matching_rows() {
        let store = storage();
        let a = user(&store, "a@uni.edu").await;
        let b = user(&store, "b@uni.edu").await;
        store.insert_notification(&note(a.id, "New Product", Some("/admin/products/1"))).await.unwrap();
        store.insert_notification(&note(b.id, "New Product", Some("/admin/products/1"))).await.unwrap();
        store.insert_notification(&note(a.id, "New Product", Some("/admin/products/2"))).await.unwrap();

        assert_eq!(store.mark_notifications_read_by_link("New Product", "/admin/products/1").await.unwrap(), 2);
        assert_eq!(store.unread_notification_count(a.id).await.unwrap(), 1);
        assert_eq!(store.unread_notification_count(b.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn users_only_mark_their_own() {
        let store = storage();
        let a = user(&store, "a2@uni.edu").await;
        let b = user(&store, "b2@uni.edu").await;
        let n = store.insert_notification(&note(a.id, "Hi", None)).await.unwrap();
        assert!(!store.mark_notification_read(b.id, n.id).await.unwrap());
        assert!(store.mark_notification_read(a.id, n.id).await.unwrap());
        let recent = store.recent_notifications(a.id, 10).await.unwrap();
        assert!(recent[0].is_read);
        assert!(recent[0].read_at.is_some());
    }
}
