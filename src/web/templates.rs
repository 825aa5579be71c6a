use askama::Template;
use axum::response::Html;

use super::error::PageError;
use super::session::Flash;
use crate::domain::*;
use crate::services::accounts::Registration;
use crate::services::cart::CartView;
use crate::services::catalog::ProductDetails;
use crate::services::chat::ConversationView;
use crate::services::checkout::{CheckoutForm, CheckoutSummary};
use crate::services::dashboard::{AdminDashboard, UserDashboard};
use crate::services::PendingPayment;

pub const NO_IMAGE: &str = "/static/img/no-image.svg";

pub fn render<T: Template>(template: &T) -> Result<Html<String>, PageError> {
    Ok(Html(template.render()?))
}

/// What every page needs for its header.
#[derive(Debug, Clone, Default)]
pub struct Layout {
    pub user: Option<User>,
    pub flash: Option<Flash>,
}

impl Layout {
    pub fn new(user: Option<User>, flash: Option<Flash>) -> Self {
        Self { user, flash }
    }

    pub fn signed_in(&self) -> bool {
        self.user.is_some()
    }

    pub fn is_admin(&self) -> bool {
        self.user.as_ref().map_or(false, User::is_admin)
    }

    pub fn user_name(&self) -> &str {
        self.user.as_ref().map_or("", |u| u.full_name.as_str())
    }

    pub fn avatar(&self) -> &str {
        self.user.as_ref().map_or(DEFAULT_AVATAR, |u| u.avatar_url())
    }

    pub fn user_id(&self) -> Id {
        self.user.as_ref().map_or(0, |u| u.id)
    }

    pub fn has_flash(&self) -> bool {
        self.flash.is_some()
    }

    pub fn flash_kind(&self) -> &str {
        self.flash.as_ref().map_or("info", |f| f.kind.as_str())
    }

    pub fn flash_message(&self) -> &str {
        self.flash.as_ref().map_or("", |f| f.message.as_str())
    }
}

impl<T> Page<T> {
    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }
}

impl ProductCard {
    pub fn image_url(&self) -> &str {
        self.main_image.as_deref().unwrap_or(NO_IMAGE)
    }

    pub fn college(&self) -> &str {
        self.owner_college.as_deref().unwrap_or("")
    }

    pub fn rating_text(&self) -> String {
        match self.average_rating {
            Some(avg) => format!("{:.1} ({})", avg, self.rating_count),
            None => "No ratings yet".to_string(),
        }
    }

    pub fn state_label(&self) -> &'static str {
        if self.product.is_sold {
            "Sold"
        } else if self.product.is_approved {
            "Approved"
        } else {
            "Pending approval"
        }
    }
}

impl Product {
    pub fn rent_text(&self) -> String {
        match (self.is_for_rent, self.price_per_day) {
            (true, Some(per_day)) => format!("{} / day", per_day),
            _ => String::new(),
        }
    }
}

impl CartLine {
    pub fn image_url(&self) -> &str {
        self.main_image.as_deref().unwrap_or(NO_IMAGE)
    }
}

impl Rating {
    pub fn comment_text(&self) -> &str {
        self.comment.as_deref().unwrap_or("")
    }
}

impl Notification {
    pub fn link(&self) -> &str {
        self.link_url.as_deref().unwrap_or("#")
    }
}

#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorTemplate {
    pub layout: Layout,
    pub status: u16,
    pub title: String,
    pub message: String,
}

#[derive(Template)]
#[template(path = "products.html")]
pub struct ProductsTemplate {
    pub layout: Layout,
    pub heading: String,
    pub products: Page<ProductCard>,
    pub categories: Vec<Category>,
    pub q: String,
    pub category_id: Id,
    pub college_id: Id,
}

impl ProductsTemplate {
    pub fn page_url(&self, page: &i64) -> String {
        let mut url = format!("/products?page={}", page);
        if !self.q.is_empty() {
            url.push_str(&format!("&q={}", super::session::encode_query(&self.q)));
        }
        if self.category_id > 0 {
            url.push_str(&format!("&category_id={}", self.category_id));
        }
        if self.college_id > 0 {
            url.push_str(&format!("&college_id={}", self.college_id));
        }
        url
    }
}

#[derive(Template)]
#[template(path = "my_products.html")]
pub struct MyProductsTemplate {
    pub layout: Layout,
    pub products: Vec<ProductCard>,
    pub q: String,
}

#[derive(Template)]
#[template(path = "product_form.html")]
pub struct ProductFormTemplate {
    pub layout: Layout,
    pub title: String,
    pub action: String,
    pub is_edit: bool,
    pub categories: Vec<Category>,
    pub name: String,
    pub category_id: Id,
    pub price: String,
    pub is_for_rent: bool,
    pub price_per_day: String,
}

#[derive(Template)]
#[template(path = "product_detail.html")]
pub struct ProductDetailTemplate {
    pub layout: Layout,
    pub details: ProductDetails,
    pub is_owner: bool,
    /// Available listing a visitor may buy, 0 when none.
    pub listing_id: Id,
}

impl ProductDetailTemplate {
    pub fn can_buy(&self) -> bool {
        self.layout.signed_in() && !self.is_owner && self.listing_id > 0
    }
}

#[derive(Template)]
#[template(path = "cart.html")]
pub struct CartTemplate {
    pub layout: Layout,
    pub cart: CartView,
    pub max_quantity: i64,
}

#[derive(Template)]
#[template(path = "checkout.html")]
pub struct CheckoutTemplate {
    pub layout: Layout,
    pub summary: CheckoutSummary,
    pub form: CheckoutForm,
    pub express_total: Money,
}

#[derive(Template)]
#[template(path = "payment.html")]
pub struct PaymentTemplate {
    pub layout: Layout,
    pub pending: PendingPayment,
}

impl PaymentTemplate {
    pub fn needs_wallet(&self) -> bool {
        self.pending.method == PaymentMethod::VodafoneCash
    }
}

#[derive(Template)]
#[template(path = "order_success.html")]
pub struct OrderSuccessTemplate {
    pub layout: Layout,
    pub order: Order,
}

#[derive(Template)]
#[template(path = "orders.html")]
pub struct OrdersTemplate {
    pub layout: Layout,
    pub orders: Page<OrderSummary>,
    pub status: String,
    pub statuses: Vec<&'static str>,
}

impl OrdersTemplate {
    pub fn is_selected(&self, status: &str) -> bool {
        self.status.eq_ignore_ascii_case(status)
    }

    pub fn page_url(&self, page: &i64) -> String {
        if self.status.is_empty() {
            format!("/orders?page={}", page)
        } else {
            format!("/orders?page={}&status={}", page, self.status)
        }
    }
}

#[derive(Template)]
#[template(path = "order_detail.html")]
pub struct OrderDetailTemplate {
    pub layout: Layout,
    pub detail: OrderDetail,
}

#[derive(Template)]
#[template(path = "chat_list.html")]
pub struct ChatListTemplate {
    pub layout: Layout,
    pub conversations: Vec<ConversationSummary>,
}

#[derive(Template)]
#[template(path = "chat.html")]
pub struct ChatTemplate {
    pub layout: Layout,
    pub view: ConversationView,
    pub me: Id,
}

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate {
    pub layout: Layout,
    pub email: String,
    pub return_url: String,
    pub blocked_reason: String,
}

#[derive(Template)]
#[template(path = "register.html")]
pub struct RegisterTemplate {
    pub layout: Layout,
    pub form: Registration,
    pub universities: Vec<University>,
    pub errors: Vec<String>,
}

impl Registration {
    pub fn phone(&self) -> &str {
        self.phone_number.as_deref().unwrap_or("")
    }
}

#[derive(Template)]
#[template(path = "account.html")]
pub struct AccountTemplate {
    pub layout: Layout,
    pub dashboard: UserDashboard,
    pub universities: Vec<University>,
    pub colleges: Vec<College>,
}

impl AccountTemplate {
    pub fn phone(&self) -> &str {
        self.dashboard.user.phone_number.as_deref().unwrap_or("")
    }

    pub fn address(&self) -> &str {
        self.dashboard.user.address.as_deref().unwrap_or("")
    }

    pub fn university_id(&self) -> Id {
        self.dashboard.user.university_id.unwrap_or(0)
    }

    pub fn college_id(&self) -> Id {
        self.dashboard.user.college_id.unwrap_or(0)
    }
}

#[derive(Template)]
#[template(path = "notifications.html")]
pub struct NotificationsTemplate {
    pub layout: Layout,
    pub notifications: Vec<Notification>,
}

#[derive(Template)]
#[template(path = "admin_dashboard.html")]
pub struct AdminDashboardTemplate {
    pub layout: Layout,
    pub board: AdminDashboard,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_page_renders_message() {
        let html = ErrorTemplate {
            layout: Layout::default(),
            status: 404,
            title: "Not Found".into(),
            message: "product <b>missing".into(),
        }
        .render()
        .unwrap();
        assert!(html.contains("404"));
        assert!(html.contains("product &lt;b&gt;missing"));
    }

    #[test]
    fn product_page_links_keep_filters() {
        let request = PageRequest::new(Some(2), None, 12);
        let template = ProductsTemplate {
            layout: Layout::default(),
            heading: "Products".into(),
            products: Page::new(Vec::new(), 30, request),
            categories: Vec::new(),
            q: "desk lamp".into(),
            category_id: 3,
            college_id: 0,
        };
        assert!(template.products.has_prev());
        assert!(template.products.has_next());
        assert_eq!(template.page_url(&3), "/products?page=3&q=desk%20lamp&category_id=3");
    }
}
