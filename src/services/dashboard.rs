use chrono::{Datelike, NaiveDate, Utc};
use serde::Serialize;

use super::Marketplace;
use crate::domain::*;
use crate::error::Result;
use crate::storage::UserStats;

const RECENT_LIMIT: i64 = 5;
const TOP_CATEGORY_LIMIT: i64 = 10;
const REVENUE_MONTHS: u32 = 12;

#[derive(Debug, Clone, Serialize)]
pub struct AdminDashboard {
    pub counts: DashboardCounts,
    pub total_revenue: Money,
    pub recent_products: Vec<ProductCard>,
    pub recent_orders: Vec<OrderSummary>,
    pub open_reports: Vec<ReportView>,
    pub monthly_revenue: Vec<MonthlyRevenue>,
    pub top_categories: Vec<CategoryCount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserDashboard {
    pub user: User,
    pub stats: UserStats,
    pub recent_orders: Vec<OrderSummary>,
}

/// The `count` months ending with the month of `today`, oldest first, as `YYYY-MM`.
pub fn trailing_months(today: NaiveDate, count: u32) -> Vec<String> {
    let mut year = today.year();
    let mut month = today.month();
    let mut months = Vec::with_capacity(count as usize);
    for _ in 0..count {
        months.push(format!("{:04}-{:02}", year, month));
        if month == 1 {
            month = 12;
            year -= 1;
        } else {
            month -= 1;
        }
    }
    months.reverse();
    months
}

/// Lines revenue rows up with `months`, filling gaps with zero.
fn fill_months(months: &[String], rows: Vec<MonthlyRevenue>) -> Vec<MonthlyRevenue> {
    months
        .iter()
        .map(|month| MonthlyRevenue {
            month: month.clone(),
            revenue: rows.iter().find(|r| &r.month == month).map(|r| r.revenue).unwrap_or(Money::ZERO),
        })
        .collect()
}

impl Marketplace {
    pub async fn admin_dashboard(&self) -> Result<AdminDashboard> {
        let recent = || Some(PageRequest::new(Some(1), Some(RECENT_LIMIT), RECENT_LIMIT));

        let counts = self.storage.dashboard_counts().await?;
        let total_revenue = self.storage.revenue_for_status(OrderStatus::Completed).await?;
        let recent_products = self
            .storage
            .list_products(&ProductFilter { include_sold: true, page: recent(), ..Default::default() })
            .await?
            .items;
        let recent_orders = self
            .storage
            .list_orders(&OrderFilter { page: recent(), ..Default::default() })
            .await?
            .items;
        let open_reports = self
            .storage
            .list_reports(&ReportFilter { resolved: Some(false), target_type: None, page: recent() })
            .await?
            .items;

        let months = trailing_months(Utc::now().date_naive(), REVENUE_MONTHS);
        let rows = match months.first() {
            Some(first) => self.storage.revenue_by_month(OrderStatus::Completed, first).await?,
            None => Vec::new(),
        };
        let top_categories = self.storage.top_categories(TOP_CATEGORY_LIMIT).await?;

        Ok(AdminDashboard {
            counts,
            total_revenue,
            recent_products,
            recent_orders,
            open_reports,
            monthly_revenue: fill_months(&months, rows),
            top_categories,
        })
    }

    pub async fn user_dashboard(&self, user: &User) -> Result<UserDashboard> {
        let stats = self.storage.user_stats(user.id).await?;
        let recent_orders = self
            .storage
            .list_orders(&OrderFilter {
                buyer_id: Some(user.id),
                page: Some(PageRequest::new(Some(1), Some(RECENT_LIMIT), RECENT_LIMIT)),
                ..Default::default()
            })
            .await?
            .items;
        Ok(UserDashboard { user: user.clone(), stats, recent_orders })
    }
}
