//! Persistence traits and the SQLite implementation behind them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::*;
use crate::error::Result;

pub mod sqlite;

pub use sqlite::SqliteStorage;

/// Who blocked a user and why.
#[derive(Debug, Clone)]
pub struct BlockInfo {
    pub reason: String,
    pub blocked_by: Id,
    pub blocked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserStats {
    pub products: i64,
    pub sold_products: i64,
    pub orders: i64,
    /// Value of items sold by the user in Delivered orders.
    pub revenue: Money,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(&self, user: &NewUser) -> Result<User>;
    async fn get_user(&self, id: Id) -> Result<Option<User>>;
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn update_profile(&self, id: Id, update: &ProfileUpdate) -> Result<()>;
    async fn set_password_hash(&self, id: Id, hash: &str) -> Result<()>;
    async fn set_role(&self, id: Id, role: UserRole) -> Result<()>;
    async fn list_users(&self, filter: &SearchFilter) -> Result<Page<User>>;
    async fn all_users(&self) -> Result<Vec<User>>;
    async fn admin_ids(&self) -> Result<Vec<Id>>;
    async fn set_suspension(&self, id: Id, suspended: bool, until: Option<DateTime<Utc>>) -> Result<()>;
    async fn set_block(&self, id: Id, block: Option<&BlockInfo>) -> Result<()>;
    async fn set_trust_score(&self, id: Id, score: i32) -> Result<()>;

    // Sessions
    async fn create_session(&self, token_hash: &str, user_id: Id, expires_at: DateTime<Utc>) -> Result<()>;
    async fn session_user(&self, token_hash: &str, now: DateTime<Utc>) -> Result<Option<User>>;
    async fn delete_session(&self, token_hash: &str) -> Result<()>;
    async fn delete_user_sessions(&self, user_id: Id) -> Result<()>;
}

#[async_trait]
pub trait AcademicStore: Send + Sync {
    async fn create_university(&self, name: &str, location: &str) -> Result<University>;
    async fn get_university(&self, id: Id) -> Result<Option<University>>;
    async fn find_university_by_name(&self, name: &str) -> Result<Option<University>>;
    async fn update_university(&self, university: &University) -> Result<()>;
    async fn delete_university(&self, id: Id) -> Result<()>;
    async fn list_universities(&self, filter: &SearchFilter) -> Result<Page<UniversitySummary>>;
    async fn all_universities(&self) -> Result<Vec<University>>;
    async fn count_users_in_university(&self, id: Id) -> Result<i64>;

    async fn create_college(&self, name: &str, university_id: Id) -> Result<College>;
    async fn get_college(&self, id: Id) -> Result<Option<College>>;
    async fn update_college(&self, college: &College) -> Result<()>;
    async fn delete_college(&self, id: Id) -> Result<()>;
    /// `filter.parent_id` restricts to one university.
    async fn list_colleges(&self, filter: &SearchFilter) -> Result<Page<CollegeSummary>>;
    async fn colleges_for_university(&self, university_id: Id) -> Result<Vec<College>>;
    async fn count_users_in_college(&self, id: Id) -> Result<i64>;

    async fn create_major(&self, name: &str, college_id: Id) -> Result<Major>;
    async fn get_major(&self, id: Id) -> Result<Option<Major>>;
    async fn update_major(&self, major: &Major) -> Result<()>;
    async fn delete_major(&self, id: Id) -> Result<()>;
    async fn list_majors(&self, college_id: Option<Id>) -> Result<Vec<Major>>;

    async fn create_category(&self, name: &str) -> Result<Category>;
    async fn get_category(&self, id: Id) -> Result<Option<Category>>;
    async fn update_category(&self, category: &Category) -> Result<()>;
    async fn delete_category(&self, id: Id) -> Result<()>;
    async fn list_categories(&self, filter: &SearchFilter) -> Result<Page<CategorySummary>>;
    async fn all_categories(&self) -> Result<Vec<Category>>;
    async fn count_products_in_category(&self, id: Id) -> Result<i64>;
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn create_product(&self, product: &NewProduct) -> Result<Product>;
    async fn get_product(&self, id: Id) -> Result<Option<Product>>;
    async fn update_product(&self, product: &Product) -> Result<()>;
    async fn delete_product(&self, id: Id) -> Result<()>;
    async fn product_card(&self, id: Id) -> Result<Option<ProductCard>>;
    async fn list_products(&self, filter: &ProductFilter) -> Result<Page<ProductCard>>;
    async fn count_order_items_for_product(&self, id: Id) -> Result<i64>;

    async fn add_image(&self, product_id: Id, image_url: &str, is_main: bool) -> Result<ProductImage>;
    async fn get_image(&self, id: Id) -> Result<Option<ProductImage>>;
    async fn delete_image(&self, id: Id) -> Result<()>;
    async fn set_main_image(&self, product_id: Id, image_id: Id) -> Result<()>;
    async fn images_for_product(&self, product_id: Id) -> Result<Vec<ProductImage>>;

    async fn create_listing(&self, listing: &NewListing) -> Result<Listing>;
    async fn get_listing(&self, id: Id) -> Result<Option<Listing>>;
    async fn update_listing(&self, listing: &Listing) -> Result<()>;
    async fn delete_listing(&self, id: Id) -> Result<()>;
    async fn list_listings(&self) -> Result<Vec<Listing>>;
    async fn listings_for_product(&self, product_id: Id) -> Result<Vec<Listing>>;

    /// One rating per user and product; a second call replaces the first.
    async fn upsert_rating(&self, user_id: Id, product_id: Id, stars: i64, comment: Option<&str>) -> Result<Rating>;
    async fn get_rating(&self, id: Id) -> Result<Option<Rating>>;
    async fn update_rating(&self, rating: &Rating) -> Result<()>;
    async fn delete_rating(&self, id: Id) -> Result<()>;
    async fn list_ratings(&self, product_id: Option<Id>) -> Result<Vec<Rating>>;
}

#[async_trait]
pub trait CartStore: Send + Sync {
    async fn get_cart_item(&self, id: Id) -> Result<Option<CartItem>>;
    async fn find_cart_item(&self, user_id: Id, listing_id: Id) -> Result<Option<CartItem>>;
    async fn insert_cart_item(&self, user_id: Id, listing_id: Id, quantity: i64) -> Result<CartItem>;
    async fn set_cart_quantity(&self, id: Id, quantity: i64) -> Result<()>;
    async fn delete_cart_item(&self, id: Id) -> Result<()>;
    async fn cart_lines(&self, user_id: Id) -> Result<Vec<CartLine>>;
    async fn list_cart_items(&self, user_id: Option<Id>) -> Result<Vec<CartItem>>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Creates the order, its items and payment transaction, marks the goods
    /// sold and consumes cart lines. All or nothing.
    async fn place_order(&self, draft: &OrderDraft) -> Result<Order>;
    async fn get_order(&self, id: Id) -> Result<Option<Order>>;
    async fn order_detail(&self, id: Id) -> Result<Option<OrderDetail>>;
    async fn list_orders(&self, filter: &OrderFilter) -> Result<Page<OrderSummary>>;
    /// Writes the new status; marks item products sold when the status says so.
    async fn update_order_status(&self, id: Id, status: OrderStatus) -> Result<Order>;
    async fn delete_order(&self, id: Id) -> Result<()>;
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn insert_message(&self, sender_id: Id, receiver_id: Id, product_id: Id, content: &str) -> Result<ChatMessage>;
    async fn get_message(&self, id: Id) -> Result<Option<ChatMessage>>;
    /// Messages between `viewer` and `other` about `product_id` that the
    /// viewer has not hidden, oldest first.
    async fn conversation(&self, viewer: Id, other: Id, product_id: Id) -> Result<Vec<ChatMessageView>>;
    /// Every message between two users about a product, hidden or not.
    async fn messages_between(&self, a: Id, b: Id, product_id: Id) -> Result<Vec<ChatMessageView>>;
    /// Marks messages from `other` to `reader` as read; `None` means any product.
    async fn mark_conversation_read(&self, reader: Id, other: Id, product_id: Option<Id>) -> Result<usize>;
    async fn messages_for_user(&self, user_id: Id) -> Result<Vec<ChatMessageView>>;
    async fn unread_message_count(&self, user_id: Id) -> Result<i64>;
    async fn total_unread_messages(&self) -> Result<i64>;
    async fn hide_conversation(&self, user_id: Id, other: Id, product_id: Id) -> Result<usize>;
    async fn delete_message(&self, id: Id) -> Result<()>;
    async fn search_messages(&self, filter: &ChatFilter) -> Result<Page<ChatMessageView>>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert_notification(&self, notification: &NewNotification) -> Result<Notification>;
    async fn recent_notifications(&self, user_id: Id, limit: i64) -> Result<Vec<Notification>>;
    async fn unread_notification_count(&self, user_id: Id) -> Result<i64>;
    async fn mark_notification_read(&self, user_id: Id, id: Id) -> Result<bool>;
    async fn mark_all_notifications_read(&self, user_id: Id) -> Result<usize>;
    /// Marks every unread notification with this title and link as read.
    async fn mark_notifications_read_by_link(&self, title: &str, link_url: &str) -> Result<usize>;
}

#[async_trait]
pub trait ModerationStore: Send + Sync {
    async fn create_report(&self, reporter_id: Id, target_type: ReportTarget, target_id: Id, reason: &str) -> Result<Report>;
    async fn get_report(&self, id: Id) -> Result<Option<Report>>;
    async fn list_reports(&self, filter: &ReportFilter) -> Result<Page<ReportView>>;
    async fn resolve_report(&self, id: Id, resolution: &str, resolved_by: Option<Id>) -> Result<()>;

    async fn create_verification(&self, user_id: Id, student_id_number: &str, document_url: Option<&str>) -> Result<StudentVerification>;
    async fn get_verification(&self, id: Id) -> Result<Option<StudentVerification>>;
    async fn list_verifications(&self, filter: &VerificationFilter) -> Result<Page<VerificationView>>;
    /// Approves the request and marks its user verified.
    async fn approve_verification(&self, id: Id, approved_by: Id) -> Result<()>;
    async fn reject_verification(&self, id: Id, reason: &str) -> Result<()>;
}

#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn record_activity(&self, activity: &NewActivity) -> Result<()>;
    async fn list_activity(&self, filter: &ActivityFilter) -> Result<Page<ActivityView>>;
}

#[async_trait]
pub trait StatsStore: Send + Sync {
    async fn dashboard_counts(&self) -> Result<DashboardCounts>;
    async fn revenue_for_status(&self, status: OrderStatus) -> Result<Money>;
    /// Order totals in `status` grouped by `YYYY-MM`, for months at or after `since_month`.
    async fn revenue_by_month(&self, status: OrderStatus, since_month: &str) -> Result<Vec<MonthlyRevenue>>;
    async fn top_categories(&self, limit: i64) -> Result<Vec<CategoryCount>>;
    async fn user_stats(&self, user_id: Id) -> Result<UserStats>;
}

/// Everything the marketplace persists.
pub trait Storage:
    UserStore
    + AcademicStore
    + CatalogStore
    + CartStore
    + OrderStore
    + ChatStore
    + NotificationStore
    + ModerationStore
    + ActivityStore
    + StatsStore
{
}

impl<T> Storage for T where
    T: UserStore
        + AcademicStore
        + CatalogStore
        + CartStore
        + OrderStore
        + ChatStore
        + NotificationStore
        + ModerationStore
        + ActivityStore
        + StatsStore
{
}
