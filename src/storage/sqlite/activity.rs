use async_trait::async_trait;
use rusqlite::{params, Row};

use super::*;
use crate::domain::*;
use crate::storage::ActivityStore;

fn activity_from_row(row: &Row<'_>) -> rusqlite::Result<ActivityView> {
    Ok(ActivityView {
        log: ActivityLog {
            id: row.get("id")?,
            action: row.get("action")?,
            user_id: row.get("user_id")?,
            details: row.get("details")?,
            entity_type: row.get("entity_type")?,
            entity_id: row.get("entity_id")?,
            ip_address: row.get("ip_address")?,
            user_agent: row.get("user_agent")?,
            created_at: get_ts(row, "created_at")?,
        },
        user_name: row.get("user_name")?,
    })
}

#[async_trait]
impl ActivityStore for SqliteStorage {
    async fn record_activity(&self, a: &NewActivity) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO activity_logs (action, user_id, details, entity_type, entity_id, ip_address, user_agent, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![a.action, a.user_id, a.details, a.entity_type, a.entity_id, a.ip_address, a.user_agent, ts(&Utc::now())],
            )?;
            Ok(())
        })
    }

    async fn list_activity(&self, filter: &ActivityFilter) -> Result<Page<ActivityView>> {
        self.with_conn(|conn| {
            let mut cond = Conditions::new();
            if let Some(action) = non_empty(&filter.action) {
                cond.push("lower(a.action) LIKE ? ESCAPE '\\'").bind(like_pattern(action));
            }
            if let Some(user_id) = filter.user_id {
                cond.push("a.user_id = ?").bind(user_id);
            }
            let select = "SELECT a.id, a.action, a.user_id, a.details, a.entity_type, a.entity_id, a.ip_address,
                 a.user_agent, a.created_at, u.full_name AS user_name";
            let from_where = format!("FROM activity_logs a LEFT JOIN users u ON u.id = a.user_id{}", cond.where_sql());
            paged_query(conn, select, &from_where, "ORDER BY a.created_at DESC, a.id DESC", &cond, filter.page, activity_from_row)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn filters_by_action_substring_and_user() {
        let store = storage();
        let u = user(&store, "log@uni.edu").await;
        store.record_activity(&NewActivity::new("Login", Some(u.id))).await.unwrap();
        store
            .record_activity(&NewActivity::new("ProductCreated", Some(u.id)).entity("Product", 4).details("Lamp"))
            .await
            .unwrap();
        store.record_activity(&NewActivity::new("Login", None)).await.unwrap();

        let logins = store
            .list_activity(&ActivityFilter { action: Some("login".into()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(logins.total_count, 2);

        let mine = store.list_activity(&ActivityFilter { user_id: Some(u.id), ..Default::default() }).await.unwrap();
        assert_eq!(mine.total_count, 2);
        assert_eq!(mine.items[0].log.action, "ProductCreated");
        assert_eq!(mine.items[0].log.entity_id, Some(4));
        assert_eq!(mine.items[0].user_name.as_deref(), Some("log"));
    }
}
