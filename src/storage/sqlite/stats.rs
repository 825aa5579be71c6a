use async_trait::async_trait;
use rusqlite::params;

use super::*;
use crate::domain::*;
use crate::storage::{StatsStore, UserStats};

#[async_trait]
impl StatsStore for SqliteStorage {
    async fn dashboard_counts(&self) -> Result<DashboardCounts> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT
                    (SELECT COUNT(*) FROM users) AS users,
                    (SELECT COUNT(*) FROM products) AS products,
                    (SELECT COUNT(*) FROM products WHERE is_sold = 1) AS sold_products,
                    (SELECT COUNT(*) FROM chat_messages) AS messages,
                    (SELECT COUNT(*) FROM orders) AS orders,
                    (SELECT COUNT(*) FROM reports WHERE resolved = 0) AS pending_reports,
                    (SELECT COUNT(*) FROM student_verifications WHERE approved = 0 AND rejection_reason IS NULL)
                        AS pending_verifications,
                    (SELECT COUNT(*) FROM universities) AS universities,
                    (SELECT COUNT(*) FROM colleges) AS colleges,
                    (SELECT COUNT(*) FROM categories) AS categories",
                [],
                |row| {
                    Ok(DashboardCounts {
                        users: row.get("users")?,
                        products: row.get("products")?,
                        sold_products: row.get("sold_products")?,
                        messages: row.get("messages")?,
                        orders: row.get("orders")?,
                        pending_reports: row.get("pending_reports")?,
                        pending_verifications: row.get("pending_verifications")?,
                        universities: row.get("universities")?,
                        colleges: row.get("colleges")?,
                        categories: row.get("categories")?,
                    })
                },
            )?)
        })
    }

    async fn revenue_for_status(&self, status: OrderStatus) -> Result<Money> {
        self.with_conn(|conn| {
            let cents: i64 = conn.query_row(
                "SELECT COALESCE(SUM(total_cents), 0) FROM orders WHERE status = ?1",
                params![status.as_str()],
                |r| r.get(0),
            )?;
            Ok(Money::from_cents(cents))
        })
    }

    async fn revenue_by_month(&self, status: OrderStatus, since_month: &str) -> Result<Vec<MonthlyRevenue>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT substr(order_date, 1, 7) AS month, SUM(total_cents) AS revenue
                 FROM orders WHERE status = ?1 AND substr(order_date, 1, 7) >= ?2
                 GROUP BY month ORDER BY month",
            )?;
            let rows = stmt
                .query_map(params![status.as_str(), since_month], |row| {
                    Ok(MonthlyRevenue { month: row.get("month")?, revenue: get_money(row, "revenue")? })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    async fn top_categories(&self, limit: i64) -> Result<Vec<CategoryCount>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.name AS name, COUNT(p.id) AS product_count
                 FROM categories c JOIN products p ON p.category_id = c.id
                 GROUP BY c.id HAVING COUNT(p.id) > 0
                 ORDER BY product_count DESC, c.name LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit], |row| {
                    Ok(CategoryCount { name: row.get("name")?, product_count: row.get("product_count")? })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    async fn user_stats(&self, user_id: Id) -> Result<UserStats> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT
                    (SELECT COUNT(*) FROM products WHERE owner_id = ?1) AS products,
                    (SELECT COUNT(*) FROM products WHERE owner_id = ?1 AND is_sold = 1) AS sold_products,
                    (SELECT COUNT(*) FROM orders WHERE buyer_id = ?1) AS orders,
                    (SELECT COALESCE(SUM(oi.subtotal_cents), 0)
                       FROM order_items oi
                       JOIN orders o ON o.id = oi.order_id
                       JOIN products p ON p.id = oi.product_id
                      WHERE p.owner_id = ?1 AND o.status = ?2) AS revenue",
                params![user_id, OrderStatus::Delivered.as_str()],
                |row| {
                    Ok(UserStats {
                        products: row.get("products")?,
                        sold_products: row.get("sold_products")?,
                        orders: row.get("orders")?,
                        revenue: get_money(row, "revenue")?,
                    })
                },
            )?)
        })
    }
}
