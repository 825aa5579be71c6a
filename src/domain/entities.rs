use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::money::Money;
use super::status::*;

pub type Id = i64;

pub const DEFAULT_AVATAR: &str = "/static/img/default-avatar.svg";
pub const DEFAULT_TRUST_SCORE: i32 = 50;

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Id,
    pub full_name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub phone_number: Option<String>,
    pub address: Option<String>,
    pub profile_picture_url: Option<String>,
    pub role: UserRole,
    pub trust_score: i32,
    pub is_verified: bool,
    pub is_suspended: bool,
    pub suspended_until: Option<DateTime<Utc>>,
    pub is_blocked: bool,
    pub block_reason: Option<String>,
    pub blocked_at: Option<DateTime<Utc>>,
    pub blocked_by: Option<Id>,
    pub university_id: Option<Id>,
    pub college_id: Option<Id>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// Suspended with no end date, or with an end date still in the future.
    pub fn is_suspended_at(&self, now: DateTime<Utc>) -> bool {
        self.is_suspended && self.suspended_until.map_or(true, |until| until > now)
    }

    pub fn avatar_url(&self) -> &str {
        self.profile_picture_url.as_deref().unwrap_or(DEFAULT_AVATAR)
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub full_name: String,
    pub email: String,
    pub password_hash: String,
    pub role: UserRole,
    pub phone_number: Option<String>,
    pub university_id: Option<Id>,
    pub college_id: Option<Id>,
}

#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub full_name: String,
    pub email: String,
    pub phone_number: Option<String>,
    pub address: Option<String>,
    pub university_id: Option<Id>,
    pub college_id: Option<Id>,
    /// `None` keeps the current picture.
    pub profile_picture_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct University {
    pub id: Id,
    pub name: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct College {
    pub id: Id,
    pub name: String,
    pub university_id: Id,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Major {
    pub id: Id,
    pub name: String,
    pub college_id: Id,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: Id,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Product {
    pub id: Id,
    pub name: String,
    pub category_id: Id,
    pub price: Money,
    pub owner_id: Id,
    pub is_approved: bool,
    pub approved_at: Option<DateTime<Utc>>,
    pub is_sold: bool,
    pub is_featured: bool,
    pub is_for_rent: bool,
    pub price_per_day: Option<Money>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn is_purchasable(&self) -> bool {
        self.is_approved && !self.is_sold
    }

    pub fn can_be_managed_by(&self, user: &User) -> bool {
        user.is_admin() || self.owner_id == user.id
    }
}

#[derive(Debug, Clone)]
pub struct NewProduct {
    pub name: String,
    pub category_id: Id,
    pub price: Money,
    pub owner_id: Id,
    pub is_for_rent: bool,
    pub price_per_day: Option<Money>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductImage {
    pub id: Id,
    pub product_id: Id,
    pub image_url: String,
    pub is_main: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Listing {
    pub id: Id,
    pub product_id: Id,
    pub seller_id: Id,
    pub price: Money,
    pub condition: ListingCondition,
    pub description: String,
    pub discount: Money,
    pub status: ListingStatus,
    pub posted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewListing {
    pub product_id: Id,
    pub seller_id: Id,
    pub price: Money,
    pub condition: ListingCondition,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub discount: Money,
    #[serde(default = "default_listing_status")]
    pub status: ListingStatus,
}

fn default_listing_status() -> ListingStatus {
    ListingStatus::Available
}

#[derive(Debug, Clone, Serialize)]
pub struct CartItem {
    pub id: Id,
    pub user_id: Id,
    pub listing_id: Id,
    pub quantity: i64,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingDetails {
    pub full_name: String,
    pub phone: String,
    pub email: String,
    pub country: String,
    pub state: String,
    pub city: String,
    pub address: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub id: Id,
    pub listing_id: Option<Id>,
    pub buyer_id: Id,
    pub order_date: DateTime<Utc>,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub subtotal: Money,
    pub shipping_fee: Money,
    pub total: Money,
    pub site_commission: Money,
    pub shipping: ShippingDetails,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderItem {
    pub id: Id,
    pub order_id: Id,
    pub product_id: Id,
    pub product_name: String,
    pub price: Money,
    pub quantity: i64,
    pub subtotal: Money,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentTransaction {
    pub id: Id,
    pub order_id: Id,
    pub amount: Money,
    pub method: PaymentMethod,
    pub status: TransactionStatus,
    pub reference: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Rating {
    pub id: Id,
    pub user_id: Id,
    pub product_id: Id,
    pub stars: i64,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub id: Id,
    pub sender_id: Id,
    pub receiver_id: Id,
    pub product_id: Id,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    pub is_read: bool,
}

impl ChatMessage {
    /// The participant on the other side from `user_id`.
    pub fn counterpart(&self, user_id: Id) -> Id {
        if self.sender_id == user_id {
            self.receiver_id
        } else {
            self.sender_id
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: Id,
    pub user_id: Id,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub link_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: Id,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub link_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub id: Id,
    pub reporter_id: Id,
    pub target_type: ReportTarget,
    pub target_id: Id,
    pub reason: String,
    pub resolved: bool,
    pub resolution: Option<String>,
    pub resolved_by: Option<Id>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentVerification {
    pub id: Id,
    pub user_id: Id,
    pub student_id_number: String,
    pub document_url: Option<String>,
    pub approved: bool,
    pub requested_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<Id>,
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityLog {
    pub id: Id,
    pub action: String,
    pub user_id: Option<Id>,
    pub details: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<Id>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewActivity {
    pub action: String,
    pub user_id: Option<Id>,
    pub details: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<Id>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl NewActivity {
    pub fn new(action: impl Into<String>, user_id: Option<Id>) -> Self {
        Self { action: action.into(), user_id, ..Default::default() }
    }

    pub fn entity(mut self, entity_type: &str, entity_id: Id) -> Self {
        self.entity_type = Some(entity_type.to_string());
        self.entity_id = Some(entity_id);
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user() -> User {
        User {
            id: 1,
            full_name: "Mona Adel".into(),
            email: "mona@uni.edu".into(),
            password_hash: String::new(),
            phone_number: None,
            address: None,
            profile_picture_url: None,
            role: UserRole::Student,
            trust_score: DEFAULT_TRUST_SCORE,
            is_verified: false,
            is_suspended: false,
            suspended_until: None,
            is_blocked: false,
            block_reason: None,
            blocked_at: None,
            blocked_by: None,
            university_id: None,
            college_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn suspension_expires() {
        let now = Utc::now();
        let mut u = user();
        assert!(!u.is_suspended_at(now));

        u.is_suspended = true;
        assert!(u.is_suspended_at(now), "open-ended suspension");

        u.suspended_until = Some(now + Duration::days(3));
        assert!(u.is_suspended_at(now));

        u.suspended_until = Some(now - Duration::days(1));
        assert!(!u.is_suspended_at(now));
    }

    #[test]
    fn avatar_falls_back_to_default() {
        let mut u = user();
        assert_eq!(u.avatar_url(), DEFAULT_AVATAR);
        u.profile_picture_url = Some("/images/profiles/1_x.png".into());
        assert_eq!(u.avatar_url(), "/images/profiles/1_x.png");
    }

    #[test]
    fn counterpart_is_the_other_side() {
        let msg = ChatMessage {
            id: 1,
            sender_id: 3,
            receiver_id: 9,
            product_id: 2,
            content: "hi".into(),
            sent_at: Utc::now(),
            is_read: false,
        };
        assert_eq!(msg.counterpart(3), 9);
        assert_eq!(msg.counterpart(9), 3);
    }
}
