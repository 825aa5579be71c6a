use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{ToSql, Type};
use rusqlite::{Connection, Row, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::domain::{Money, Page, PageRequest};
use crate::error::{BazaarError, Result};

mod academics;
mod activity;
mod cart;
mod catalog;
mod chat;
mod moderation;
mod notifications;
mod orders;
mod stats;
mod users;

const SCHEMA: &str = include_str!("../schema.sql");

/// SQLite-backed store. One connection, serialized behind a mutex.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        info!(path = %path.display(), "Opened SQLite database");
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// `:memory:` opens a private in-memory database.
    pub fn open_from_config(path: &str) -> Result<Self> {
        if path == ":memory:" {
            Self::open_in_memory()
        } else {
            Self::open(path)
        }
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        debug!("Schema applied");
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| BazaarError::Storage("connection mutex poisoned".into()))?;
        f(&conn)
    }

    pub(crate) fn with_tx<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| BazaarError::Storage("connection mutex poisoned".into()))?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

pub(crate) fn ts(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn opt_ts(value: &Option<DateTime<Utc>>) -> Option<String> {
    value.as_ref().map(ts)
}

fn conversion_error(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn column_index(row: &Row<'_>, col: &str) -> usize {
    row.as_ref().column_index(col).unwrap_or(0)
}

pub(crate) fn get_ts(row: &Row<'_>, col: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(col)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(column_index(row, col), e))
}

pub(crate) fn get_opt_ts(row: &Row<'_>, col: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(col)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_error(column_index(row, col), e))
    })
    .transpose()
}

pub(crate) fn get_enum<T>(row: &Row<'_>, col: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(col)?;
    raw.parse().map_err(|e| conversion_error(column_index(row, col), e))
}

pub(crate) fn get_money(row: &Row<'_>, col: &str) -> rusqlite::Result<Money> {
    Ok(Money::from_cents(row.get(col)?))
}

pub(crate) fn get_opt_money(row: &Row<'_>, col: &str) -> rusqlite::Result<Option<Money>> {
    Ok(row.get::<_, Option<i64>>(col)?.map(Money::from_cents))
}

/// `%term%` for a case-insensitive `LIKE ... ESCAPE '\'`.
pub(crate) fn like_pattern(term: &str) -> String {
    let escaped = term
        .trim()
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Fails with `NotFound` when an UPDATE or DELETE touched nothing.
pub(crate) fn expect_row(changed: usize, what: &str) -> Result<()> {
    if changed == 0 {
        Err(BazaarError::not_found(what))
    } else {
        Ok(())
    }
}

/// Maps a UNIQUE violation onto `Conflict` with the given message.
pub(crate) fn unique_violation(err: rusqlite::Error, message: &str) -> BazaarError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
            BazaarError::conflict(message)
        }
        _ => BazaarError::Database(err),
    }
}

/// Accumulates WHERE clauses and their positional parameters.
#[derive(Default)]
pub(crate) struct Conditions {
    clauses: Vec<String>,
    params: Vec<Box<dyn ToSql>>,
}

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, clause: &str) -> &mut Self {
        self.clauses.push(clause.to_string());
        self
    }

    pub fn bind(&mut self, value: impl ToSql + 'static) -> &mut Self {
        self.params.push(Box::new(value));
        self
    }

    pub fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub fn params(&self) -> impl Iterator<Item = &Box<dyn ToSql>> + '_ {
        self.params.iter()
    }
}

/// Runs `SELECT COUNT(*) {from_where}` and the paged `{select} {from_where} {order}`.
pub(crate) fn paged_query<T>(
    conn: &Connection,
    select: &str,
    from_where: &str,
    order: &str,
    conditions: &Conditions,
    page: Option<PageRequest>,
    map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Page<T>> {
    let count_sql = format!("SELECT COUNT(*) {}", from_where);
    let total: i64 = conn.query_row(&count_sql, rusqlite::params_from_iter(conditions.params()), |r| r.get(0))?;

    let request = page.unwrap_or(PageRequest { page: 1, page_size: total.max(1) });
    let sql = format!("{} {} {} LIMIT {} OFFSET {}", select, from_where, order, request.page_size, request.offset());
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(rusqlite::params_from_iter(conditions.params()), map)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(Page::new(items, total, request))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::domain::*;
    use crate::storage::*;

    pub fn storage() -> SqliteStorage {
        SqliteStorage::open_in_memory().expect("in-memory database")
    }

    pub async fn user(store: &SqliteStorage, email: &str) -> User {
        store
            .create_user(&NewUser {
                full_name: email.split('@').next().unwrap_or(email).to_string(),
                email: email.to_string(),
                password_hash: "hash".into(),
                role: UserRole::Student,
                phone_number: None,
                university_id: None,
                college_id: None,
            })
            .await
            .expect("create user")
    }

    pub async fn category(store: &SqliteStorage, name: &str) -> Category {
        store.create_category(name).await.expect("create category")
    }

    pub async fn product(store: &SqliteStorage, owner: Id, category: Id, name: &str, cents: i64) -> Product {
        store
            .create_product(&NewProduct {
                name: name.to_string(),
                category_id: category,
                price: Money::from_cents(cents),
                owner_id: owner,
                is_for_rent: false,
                price_per_day: None,
            })
            .await
            .expect("create product")
    }

    pub async fn approved_product(store: &SqliteStorage, owner: Id, category: Id, name: &str, cents: i64) -> Product {
        let mut p = product(store, owner, category, name, cents).await;
        p.is_approved = true;
        p.approved_at = Some(chrono::Utc::now());
        store.update_product(&p).await.expect("approve");
        p
    }

    pub async fn listing(store: &SqliteStorage, product: &Product) -> Listing {
        store
            .create_listing(&NewListing {
                product_id: product.id,
                seller_id: product.owner_id,
                price: product.price,
                condition: ListingCondition::Good,
                description: String::new(),
                discount: Money::ZERO,
                status: ListingStatus::Available,
            })
            .await
            .expect("create listing")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern(" Laptop "), "%laptop%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[test]
    fn timestamps_round_trip_through_text() {
        let now = Utc::now();
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (at TEXT NOT NULL)").unwrap();
        conn.execute("INSERT INTO t (at) VALUES (?1)", [ts(&now)]).unwrap();
        let back = conn.query_row("SELECT at FROM t", [], |row| get_ts(row, "at")).unwrap();
        assert_eq!(back.timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn schema_applies_twice() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage.with_conn(|conn| Ok(conn.execute_batch(SCHEMA)?)).unwrap();
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bazaar.db");
        SqliteStorage::open(&path).unwrap();
        assert!(path.exists());
    }
}
