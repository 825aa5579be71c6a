use async_trait::async_trait;
use rusqlite::{params, OptionalExtension, Row};

use super::*;
use crate::domain::*;
use crate::storage::ChatStore;

const VIEW_SELECT: &str = "SELECT m.id, m.sender_id, m.receiver_id, m.product_id, m.content, m.sent_at, m.is_read,
        s.full_name AS sender_name, r.full_name AS receiver_name, p.name AS product_name";

const VIEW_FROM: &str = "FROM chat_messages m
     JOIN users s ON s.id = m.sender_id
     JOIN users r ON r.id = m.receiver_id
     JOIN products p ON p.id = m.product_id";

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.get("id")?,
        sender_id: row.get("sender_id")?,
        receiver_id: row.get("receiver_id")?,
        product_id: row.get("product_id")?,
        content: row.get("content")?,
        sent_at: get_ts(row, "sent_at")?,
        is_read: row.get("is_read")?,
    })
}

fn view_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMessageView> {
    Ok(ChatMessageView {
        message: message_from_row(row)?,
        sender_name: row.get("sender_name")?,
        receiver_name: row.get("receiver_name")?,
        product_name: row.get("product_name")?,
    })
}

fn query_views(conn: &Connection, filter_sql: &str, order: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<ChatMessageView>> {
    let sql = format!("{} {} WHERE {} {}", VIEW_SELECT, VIEW_FROM, filter_sql, order);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(args, view_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[async_trait]
impl ChatStore for SqliteStorage {
    async fn insert_message(&self, sender_id: Id, receiver_id: Id, product_id: Id, content: &str) -> Result<ChatMessage> {
        self.with_conn(|conn| {
            let sent_at = Utc::now();
            conn.execute(
                "INSERT INTO chat_messages (sender_id, receiver_id, product_id, content, sent_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![sender_id, receiver_id, product_id, content, ts(&sent_at)],
            )?;
            Ok(ChatMessage {
                id: conn.last_insert_rowid(),
                sender_id,
                receiver_id,
                product_id,
                content: content.to_string(),
                sent_at,
                is_read: false,
            })
        })
    }

    async fn get_message(&self, id: Id) -> Result<Option<ChatMessage>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, sender_id, receiver_id, product_id, content, sent_at, is_read FROM chat_messages WHERE id = ?1",
                    params![id],
                    message_from_row,
                )
                .optional()?)
        })
    }

    async fn conversation(&self, viewer: Id, other: Id, product_id: Id) -> Result<Vec<ChatMessageView>> {
        self.with_conn(|conn| {
            query_views(
                conn,
                "m.product_id = ?1 AND (
                    (m.sender_id = ?2 AND m.receiver_id = ?3 AND m.deleted_by_sender = 0)
                    OR (m.sender_id = ?3 AND m.receiver_id = ?2 AND m.deleted_by_receiver = 0))",
                "ORDER BY m.sent_at, m.id",
                &[&product_id, &viewer, &other],
            )
        })
    }

    async fn messages_between(&self, a: Id, b: Id, product_id: Id) -> Result<Vec<ChatMessageView>> {
        self.with_conn(|conn| {
            query_views(
                conn,
                "m.product_id = ?1 AND ((m.sender_id = ?2 AND m.receiver_id = ?3) OR (m.sender_id = ?3 AND m.receiver_id = ?2))",
                "ORDER BY m.sent_at, m.id",
                &[&product_id, &a, &b],
            )
        })
    }

    async fn mark_conversation_read(&self, reader: Id, other: Id, product_id: Option<Id>) -> Result<usize> {
        self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE chat_messages SET is_read = 1
                 WHERE receiver_id = ?1 AND sender_id = ?2 AND is_read = 0 AND (?3 IS NULL OR product_id = ?3)",
                params![reader, other, product_id],
            )?)
        })
    }

    async fn messages_for_user(&self, user_id: Id) -> Result<Vec<ChatMessageView>> {
        self.with_conn(|conn| {
            query_views(
                conn,
                "((m.sender_id = ?1 AND m.deleted_by_sender = 0) OR (m.receiver_id = ?1 AND m.deleted_by_receiver = 0))",
                "ORDER BY m.sent_at DESC, m.id DESC",
                &[&user_id],
            )
        })
    }

    async fn unread_message_count(&self, user_id: Id) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM chat_messages WHERE receiver_id = ?1 AND is_read = 0 AND deleted_by_receiver = 0",
                params![user_id],
                |r| r.get(0),
            )?)
        })
    }

    async fn total_unread_messages(&self) -> Result<i64> {
        self.with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM chat_messages WHERE is_read = 0", [], |r| r.get(0))?))
    }

    async fn hide_conversation(&self, user_id: Id, other: Id, product_id: Id) -> Result<usize> {
        self.with_tx(|tx| {
            let sent = tx.execute(
                "UPDATE chat_messages SET deleted_by_sender = 1 WHERE product_id = ?1 AND sender_id = ?2 AND receiver_id = ?3",
                params![product_id, user_id, other],
            )?;
            let received = tx.execute(
                "UPDATE chat_messages SET deleted_by_receiver = 1, is_read = 1
                 WHERE product_id = ?1 AND sender_id = ?2 AND receiver_id = ?3",
                params![product_id, other, user_id],
            )?;
            // rows hidden from both sides are gone for good
            tx.execute(
                "DELETE FROM chat_messages WHERE product_id = ?1 AND deleted_by_sender = 1 AND deleted_by_receiver = 1",
                params![product_id],
            )?;
            Ok(sent + received)
        })
    }

    async fn delete_message(&self, id: Id) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM chat_messages WHERE id = ?1", params![id])?;
            expect_row(changed, "message")
        })
    }

    async fn search_messages(&self, filter: &ChatFilter) -> Result<Page<ChatMessageView>> {
        self.with_conn(|conn| {
            let mut cond = Conditions::new();
            if let Some(product_id) = filter.product_id {
                cond.push("m.product_id = ?").bind(product_id);
            }
            if let Some(user_id) = filter.user_id {
                cond.push("(m.sender_id = ? OR m.receiver_id = ?)").bind(user_id).bind(user_id);
            }
            if let Some(term) = non_empty(&filter.search) {
                let pattern = like_pattern(term);
                cond.push(
                    "(lower(m.content) LIKE ? ESCAPE '\\' OR lower(s.full_name) LIKE ? ESCAPE '\\'
                      OR lower(r.full_name) LIKE ? ESCAPE '\\' OR lower(p.name) LIKE ? ESCAPE '\\')",
                );
                for _ in 0..4 {
                    cond.bind(pattern.clone());
                }
            }
            let from_where = format!("{}{}", VIEW_FROM, cond.where_sql());
            paged_query(conn, VIEW_SELECT, &from_where, "ORDER BY m.sent_at DESC, m.id DESC", &cond, filter.page, view_from_row)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn conversation_respects_per_side_hiding() {
        let store = storage();
        let seller = user(&store, "seller@uni.edu").await;
        let buyer = user(&store, "buyer@uni.edu").await;
        let cat = category(&store, "Books").await;
        let p = approved_product(&store, seller.id, cat.id, "Guitar", 90000).await;

        store.insert_message(buyer.id, seller.id, p.id, "Is it available?").await.unwrap();
        store.insert_message(seller.id, buyer.id, p.id, "Yes").await.unwrap();

        assert_eq!(store.unread_message_count(seller.id).await.unwrap(), 1);
        assert_eq!(store.mark_conversation_read(seller.id, buyer.id, Some(p.id)).await.unwrap(), 1);
        assert_eq!(store.unread_message_count(seller.id).await.unwrap(), 0);

        assert_eq!(store.hide_conversation(buyer.id, seller.id, p.id).await.unwrap(), 2);
        assert!(store.conversation(buyer.id, seller.id, p.id).await.unwrap().is_empty());
        let seller_view = store.conversation(seller.id, buyer.id, p.id).await.unwrap();
        assert_eq!(seller_view.len(), 2);
        assert_eq!(seller_view[0].message.content, "Is it available?");

        store.hide_conversation(seller.id, buyer.id, p.id).await.unwrap();
        assert!(store.messages_between(seller.id, buyer.id, p.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_covers_names_and_content() {
        let store = storage();
        let seller = user(&store, "hana@uni.edu").await;
        let buyer = user(&store, "youssef@uni.edu").await;
        let cat = category(&store, "Books").await;
        let p = approved_product(&store, seller.id, cat.id, "Microscope", 90000).await;
        store.insert_message(buyer.id, seller.id, p.id, "price negotiable?").await.unwrap();

        for term in ["NEGOTIABLE", "hana", "youssef", "microscope"] {
            let page = store
                .search_messages(&ChatFilter { search: Some(term.into()), ..Default::default() })
                .await
                .unwrap();
            assert_eq!(page.total_count, 1, "term {term}");
        }
        let none = store
            .search_messages(&ChatFilter { user_id: Some(seller.id + buyer.id + 100), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(none.total_count, 0);
    }
}
