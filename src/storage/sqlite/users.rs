use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::*;
use crate::domain::*;
use crate::storage::{BlockInfo, UserStore};

pub(crate) const USER_COLUMNS: &str = "u.id, u.full_name, u.email, u.password_hash, u.phone_number, u.address, \
     u.profile_picture_url, u.role, u.trust_score, u.is_verified, u.is_suspended, u.suspended_until, \
     u.is_blocked, u.block_reason, u.blocked_at, u.blocked_by, u.university_id, u.college_id, u.created_at";

pub(crate) fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        full_name: row.get("full_name")?,
        email: row.get("email")?,
        password_hash: row.get("password_hash")?,
        phone_number: row.get("phone_number")?,
        address: row.get("address")?,
        profile_picture_url: row.get("profile_picture_url")?,
        role: get_enum(row, "role")?,
        trust_score: row.get("trust_score")?,
        is_verified: row.get("is_verified")?,
        is_suspended: row.get("is_suspended")?,
        suspended_until: get_opt_ts(row, "suspended_until")?,
        is_blocked: row.get("is_blocked")?,
        block_reason: row.get("block_reason")?,
        blocked_at: get_opt_ts(row, "blocked_at")?,
        blocked_by: row.get("blocked_by")?,
        university_id: row.get("university_id")?,
        college_id: row.get("college_id")?,
        created_at: get_ts(row, "created_at")?,
    })
}

fn fetch_user(conn: &Connection, id: Id) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users u WHERE u.id = ?1", USER_COLUMNS);
    Ok(conn.query_row(&sql, params![id], user_from_row).optional()?)
}

#[async_trait]
impl UserStore for SqliteStorage {
    async fn create_user(&self, user: &NewUser) -> Result<User> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (full_name, email, password_hash, role, phone_number, university_id, college_id, trust_score, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    user.full_name,
                    user.email.trim(),
                    user.password_hash,
                    user.role.as_str(),
                    user.phone_number,
                    user.university_id,
                    user.college_id,
                    DEFAULT_TRUST_SCORE,
                    ts(&Utc::now()),
                ],
            )
            .map_err(|e| unique_violation(e, "email is already registered"))?;
            let id = conn.last_insert_rowid();
            fetch_user(conn, id)?.ok_or_else(|| BazaarError::not_found("user"))
        })
    }

    async fn get_user(&self, id: Id) -> Result<Option<User>> {
        self.with_conn(|conn| fetch_user(conn, id))
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM users u WHERE u.email = ?1", USER_COLUMNS);
            Ok(conn.query_row(&sql, params![email.trim()], user_from_row).optional()?)
        })
    }

    async fn update_profile(&self, id: Id, update: &ProfileUpdate) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE users SET full_name = ?1, email = ?2, phone_number = ?3, address = ?4,
                         university_id = ?5, college_id = ?6,
                         profile_picture_url = COALESCE(?7, profile_picture_url)
                     WHERE id = ?8",
                    params![
                        update.full_name,
                        update.email.trim(),
                        update.phone_number,
                        update.address,
                        update.university_id,
                        update.college_id,
                        update.profile_picture_url,
                        id,
                    ],
                )
                .map_err(|e| unique_violation(e, "email is already registered"))?;
            expect_row(changed, "user")
        })
    }

    async fn set_password_hash(&self, id: Id, hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute("UPDATE users SET password_hash = ?1 WHERE id = ?2", params![hash, id])?;
            expect_row(changed, "user")
        })
    }

    async fn set_role(&self, id: Id, role: UserRole) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute("UPDATE users SET role = ?1 WHERE id = ?2", params![role.as_str(), id])?;
            expect_row(changed, "user")
        })
    }

    async fn list_users(&self, filter: &SearchFilter) -> Result<Page<User>> {
        self.with_conn(|conn| {
            let mut cond = Conditions::new();
            if let Some(term) = non_empty(&filter.search) {
                let pattern = like_pattern(term);
                cond.push("(lower(u.full_name) LIKE ? ESCAPE '\\' OR lower(u.email) LIKE ? ESCAPE '\\')")
                    .bind(pattern.clone())
                    .bind(pattern);
            }
            let select = format!("SELECT {}", USER_COLUMNS);
            let from_where = format!("FROM users u{}", cond.where_sql());
            paged_query(conn, &select, &from_where, "ORDER BY u.created_at DESC, u.id DESC", &cond, filter.page, user_from_row)
        })
    }

    async fn all_users(&self) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM users u ORDER BY u.id", USER_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let users = stmt.query_map([], user_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(users)
        })
    }

    async fn admin_ids(&self) -> Result<Vec<Id>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM users WHERE role = ?1 ORDER BY id")?;
            let ids = stmt
                .query_map(params![UserRole::Admin.as_str()], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<Id>>>()?;
            Ok(ids)
        })
    }

    async fn set_suspension(&self, id: Id, suspended: bool, until: Option<DateTime<Utc>>) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET is_suspended = ?1, suspended_until = ?2 WHERE id = ?3",
                params![suspended, opt_ts(&until), id],
            )?;
            expect_row(changed, "user")
        })
    }

    async fn set_block(&self, id: Id, block: Option<&BlockInfo>) -> Result<()> {
        self.with_conn(|conn| {
            let changed = match block {
                Some(info) => conn.execute(
                    "UPDATE users SET is_blocked = 1, block_reason = ?1, blocked_by = ?2, blocked_at = ?3 WHERE id = ?4",
                    params![info.reason, info.blocked_by, ts(&info.blocked_at), id],
                )?,
                None => conn.execute(
                    "UPDATE users SET is_blocked = 0, block_reason = NULL, blocked_by = NULL, blocked_at = NULL WHERE id = ?1",
                    params![id],
                )?,
            };
            expect_row(changed, "user")
        })
    }

    async fn set_trust_score(&self, id: Id, score: i32) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET trust_score = ?1 WHERE id = ?2",
                params![score.clamp(0, 100), id],
            )?;
            expect_row(changed, "user")
        })
    }

    async fn create_session(&self, token_hash: &str, user_id: Id, expires_at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (token_hash, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
                params![token_hash, user_id, ts(&Utc::now()), ts(&expires_at)],
            )?;
            Ok(())
        })
    }

    async fn session_user(&self, token_hash: &str, now: DateTime<Utc>) -> Result<Option<User>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM sessions s JOIN users u ON u.id = s.user_id
                 WHERE s.token_hash = ?1 AND s.expires_at > ?2",
                USER_COLUMNS
            );
            Ok(conn.query_row(&sql, params![token_hash, ts(&now)], user_from_row).optional()?)
        })
    }

    async fn delete_session(&self, token_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM sessions WHERE token_hash = ?1", params![token_hash])?;
            Ok(())
        })
    }

    async fn delete_user_sessions(&self, user_id: Id) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM sessions WHERE user_id = ?1", params![user_id])?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn email_is_unique_case_insensitively() {
        let store = storage();
        user(&store, "sara@uni.edu").await;
        let err = store
            .create_user(&NewUser {
                full_name: "Sara Two".into(),
                email: "SARA@uni.edu".into(),
                password_hash: "x".into(),
                role: UserRole::Student,
                phone_number: None,
                university_id: None,
                college_id: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BazaarError::Conflict(_)));
        assert!(store.get_user_by_email("Sara@Uni.edu").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sessions_expire() {
        let store = storage();
        let u = user(&store, "omar@uni.edu").await;
        let now = Utc::now();
        store.create_session("abc", u.id, now + Duration::hours(1)).await.unwrap();
        assert_eq!(store.session_user("abc", now).await.unwrap().map(|s| s.id), Some(u.id));
        assert!(store.session_user("abc", now + Duration::hours(2)).await.unwrap().is_none());
        store.delete_user_sessions(u.id).await.unwrap();
        assert!(store.session_user("abc", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn block_and_unblock() {
        let store = storage();
        let admin = user(&store, "admin@uni.edu").await;
        let u = user(&store, "bad@uni.edu").await;
        let info = BlockInfo { reason: "spam".into(), blocked_by: admin.id, blocked_at: Utc::now() };
        store.set_block(u.id, Some(&info)).await.unwrap();
        let blocked = store.get_user(u.id).await.unwrap().unwrap();
        assert!(blocked.is_blocked);
        assert_eq!(blocked.block_reason.as_deref(), Some("spam"));

        store.set_block(u.id, None).await.unwrap();
        let unblocked = store.get_user(u.id).await.unwrap().unwrap();
        assert!(!unblocked.is_blocked);
        assert!(unblocked.block_reason.is_none());
    }

    #[tokio::test]
    async fn list_users_searches_name_and_email() {
        let store = storage();
        user(&store, "layla@uni.edu").await;
        user(&store, "karim@college.edu").await;
        let page = store
            .list_users(&SearchFilter { search: Some("COLLEGE".into()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(page.total_count, 1);
        assert_eq!(page.items[0].email, "karim@college.edu");
    }

    #[tokio::test]
    async fn updates_on_missing_user_are_not_found() {
        let store = storage();
        let err = store.set_trust_score(99, 10).await.unwrap_err();
        assert!(matches!(err, BazaarError::NotFound(_)));
    }
}
