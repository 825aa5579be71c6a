//! Read models returned by queries that join several tables, plus the
//! filter and paging inputs those queries take.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::entities::*;
use super::money::Money;
use super::status::*;

pub const MAX_PAGE_SIZE: i64 = 100;

/// Highest page number accepted; keeps `offset` within `i64`.
pub const MAX_PAGE: i64 = i64::MAX / MAX_PAGE_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: i64,
    pub page_size: i64,
}

impl PageRequest {
    /// Normalizes user input: page is clamped to `1..=MAX_PAGE`, size to
    /// `1..=MAX_PAGE_SIZE`.
    pub fn new(page: Option<i64>, page_size: Option<i64>, default_size: i64) -> Self {
        Self {
            page: page.unwrap_or(1).clamp(1, MAX_PAGE),
            page_size: page_size.unwrap_or(default_size).clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1).saturating_mul(self.page_size)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total_count: i64, request: PageRequest) -> Self {
        let total_pages = (total_count + request.page_size - 1) / request.page_size;
        Self { items, total_count, page: request.page, page_size: request.page_size, total_pages }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total_count: self.total_count,
            page: self.page,
            page_size: self.page_size,
            total_pages: self.total_pages,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductCard {
    pub product: Product,
    pub category_name: String,
    pub owner_name: String,
    pub owner_college: Option<String>,
    pub main_image: Option<String>,
    pub average_rating: Option<f64>,
    pub rating_count: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ProductFilter {
    /// Case-insensitive match on product name or owner's college name.
    pub query: Option<String>,
    pub college_id: Option<Id>,
    pub category_id: Option<Id>,
    pub owner_id: Option<Id>,
    pub exclude_owner: Option<Id>,
    pub approved: Option<bool>,
    pub include_sold: bool,
    pub page: Option<PageRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CartLine {
    pub item: CartItem,
    pub listing: Listing,
    pub product_name: String,
    pub main_image: Option<String>,
    pub product_is_approved: bool,
    pub product_is_sold: bool,
}

impl CartLine {
    pub fn line_total(&self) -> Money {
        self.listing.price * self.item.quantity
    }

    pub fn is_purchasable(&self) -> bool {
        self.listing.status == ListingStatus::Available && self.product_is_approved && !self.product_is_sold
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderSummary {
    pub order: Order,
    pub buyer_name: String,
    pub buyer_email: String,
    pub item_count: i64,
}

#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub buyer_id: Option<Id>,
    pub status: Option<OrderStatus>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub page: Option<PageRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderDetail {
    pub order: Order,
    pub buyer_name: String,
    pub buyer_email: String,
    pub items: Vec<OrderItem>,
    pub transactions: Vec<PaymentTransaction>,
}

/// One unit line of a new order, priced from the listing at placement time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderLine {
    pub listing_id: Id,
    pub quantity: i64,
    /// Cart line consumed by the order, if it came from the cart.
    pub cart_item_id: Option<Id>,
}

#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub buyer_id: Id,
    pub lines: Vec<OrderLine>,
    pub payment_method: PaymentMethod,
    pub shipping_fee: Money,
    pub shipping: ShippingDetails,
    pub commission_bp: i64,
    pub transaction_status: TransactionStatus,
    pub transaction_reference: String,
    pub transaction_notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessageView {
    pub message: ChatMessage,
    pub sender_name: String,
    pub receiver_name: String,
    pub product_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct ChatFilter {
    pub product_id: Option<Id>,
    pub user_id: Option<Id>,
    /// Matches content, sender name, receiver name or product name.
    pub search: Option<String>,
    pub page: Option<PageRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub conversation_key: String,
    pub product_id: Id,
    pub product_name: String,
    pub other_user_id: Id,
    pub other_user_name: String,
    pub other_user_image: String,
    pub last_message: String,
    pub last_message_at: DateTime<Utc>,
    pub unread_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportView {
    pub report: Report,
    pub reporter_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct ReportFilter {
    pub resolved: Option<bool>,
    pub target_type: Option<ReportTarget>,
    pub page: Option<PageRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationView {
    pub verification: StudentVerification,
    pub user_name: String,
    pub user_email: String,
}

#[derive(Debug, Clone, Default)]
pub struct VerificationFilter {
    pub approved: Option<bool>,
    pub page: Option<PageRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityView {
    pub log: ActivityLog,
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ActivityFilter {
    pub action: Option<String>,
    pub user_id: Option<Id>,
    pub page: Option<PageRequest>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub search: Option<String>,
    pub parent_id: Option<Id>,
    pub page: Option<PageRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UniversitySummary {
    pub university: University,
    pub college_count: i64,
    pub user_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollegeSummary {
    pub college: College,
    pub university_name: String,
    pub major_count: i64,
    pub user_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategorySummary {
    pub category: Category,
    pub product_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DashboardCounts {
    pub users: i64,
    pub products: i64,
    pub sold_products: i64,
    pub messages: i64,
    pub orders: i64,
    pub pending_reports: i64,
    pub pending_verifications: i64,
    pub universities: i64,
    pub colleges: i64,
    pub categories: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    pub name: String,
    pub product_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyRevenue {
    /// `YYYY-MM`
    pub month: String,
    pub revenue: Money,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_request_normalizes_input() {
        let req = PageRequest::new(Some(0), Some(500), 20);
        assert_eq!(req.page, 1);
        assert_eq!(req.page_size, MAX_PAGE_SIZE);

        let req = PageRequest::new(None, None, 20);
        assert_eq!((req.page, req.page_size, req.offset()), (1, 20, 0));

        let req = PageRequest::new(Some(3), Some(10), 20);
        assert_eq!(req.offset(), 20);
    }

    #[test]
    fn huge_page_numbers_do_not_overflow() {
        let req = PageRequest::new(Some(i64::MAX), Some(MAX_PAGE_SIZE), 20);
        assert_eq!(req.page, MAX_PAGE);
        assert!(req.offset() > 0);

        let raw = PageRequest { page: i64::MAX, page_size: MAX_PAGE_SIZE };
        assert_eq!(raw.offset(), i64::MAX);
    }

    #[test]
    fn total_pages_rounds_up() {
        let req = PageRequest::new(Some(1), Some(20), 20);
        assert_eq!(Page::new(Vec::<i64>::new(), 0, req).total_pages, 0);
        assert_eq!(Page::new(Vec::<i64>::new(), 20, req).total_pages, 1);
        assert_eq!(Page::new(Vec::<i64>::new(), 21, req).total_pages, 2);
    }
}
