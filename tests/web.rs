//! Drives the full router in memory: sessions, redirects, the JSON API and
//! the checkout flow.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use student_bazaar::config::Config;
use student_bazaar::domain::*;
use student_bazaar::hub::Hub;
use student_bazaar::services::accounts::hash_password;
use student_bazaar::services::{Marketplace, RequestMeta};
use student_bazaar::storage::{SqliteStorage, Storage};
use student_bazaar::web::{app_router, AppState};

struct TestApp {
    state: AppState,
    router: Router,
    _uploads: tempfile::TempDir,
}

fn test_app() -> anyhow::Result<TestApp> {
    let uploads = tempfile::tempdir()?;
    let mut config = Config::default();
    config.server.upload_dir = uploads.path().to_path_buf();
    let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open_in_memory()?);
    let market = Marketplace::new(storage, Hub::default(), &config);
    let state = AppState::new(market, config);
    let router = app_router(state.clone());
    Ok(TestApp { state, router, _uploads: uploads })
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> anyhow::Result<Response> {
        Ok(self.router.clone().oneshot(request).await?)
    }

    async fn user(&self, email: &str, role: UserRole) -> anyhow::Result<(User, String)> {
        let storage = &self.state.market.storage;
        let user = storage
            .create_user(&NewUser {
                full_name: email.split('@').next().unwrap_or(email).to_string(),
                email: email.to_string(),
                password_hash: hash_password("secret1")?,
                role: UserRole::Student,
                phone_number: None,
                university_id: None,
                college_id: None,
            })
            .await?;
        if role == UserRole::Admin {
            storage.set_role(user.id, role).await?;
        }
        let grant = self.state.market.login(email, "secret1", &RequestMeta::default()).await?;
        Ok((user, format!("bazaar_session={}", grant.token)))
    }

    async fn listing(&self, seller: &User, name: &str, cents: i64) -> anyhow::Result<Listing> {
        let storage = &self.state.market.storage;
        let category = storage.create_category(&format!("{} category", name)).await?;
        let mut product = storage
            .create_product(&NewProduct {
                name: name.to_string(),
                category_id: category.id,
                price: Money::from_cents(cents),
                owner_id: seller.id,
                is_for_rent: false,
                price_per_day: None,
            })
            .await?;
        product.is_approved = true;
        product.approved_at = Some(chrono::Utc::now());
        storage.update_product(&product).await?;
        Ok(storage
            .create_listing(&NewListing {
                product_id: product.id,
                seller_id: seller.id,
                price: product.price,
                condition: ListingCondition::Good,
                description: String::new(),
                discount: Money::ZERO,
                status: ListingStatus::Available,
            })
            .await?)
    }
}

fn get(uri: &str, cookie: Option<&str>) -> anyhow::Result<Request<Body>> {
    let mut builder = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    Ok(builder.body(Body::empty())?)
}

fn post_json(uri: &str, cookie: Option<&str>, body: Value) -> anyhow::Result<Request<Body>> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    Ok(builder.body(Body::from(body.to_string()))?)
}

fn post_form(uri: &str, cookie: Option<&str>, body: &str) -> anyhow::Result<Request<Body>> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    Ok(builder.body(Body::from(body.to_string()))?)
}

async fn json_body(response: Response) -> anyhow::Result<Value> {
    let bytes = response.into_body().collect().await?.to_bytes();
    Ok(serde_json::from_slice(&bytes)?)
}

fn location(response: &Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

#[tokio::test]
async fn health_reports_service_name() -> anyhow::Result<()> {
    let app = test_app()?;
    let response = app.send(get("/health", None)?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body = json_body(response).await?;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "student-bazaar");
    Ok(())
}

#[tokio::test]
async fn registration_signs_the_student_in() -> anyhow::Result<()> {
    let app = test_app()?;
    let form = "full_name=Sam+Student&email=sam%40uni.edu&password=secret1&confirm_password=secret1";
    let response = app.send(post_form("/account/register", None, form)?).await?;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");
    let cookies: Vec<_> = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    assert!(cookies.iter().any(|c| c.starts_with("bazaar_session=")));

    let user = app.state.market.storage.get_user_by_email("sam@uni.edu").await?;
    assert_eq!(user.map(|u| u.role), Some(UserRole::Student));
    Ok(())
}

#[tokio::test]
async fn registration_errors_re_render_the_form() -> anyhow::Result<()> {
    let app = test_app()?;
    let form = "full_name=Sam&email=sam%40uni.edu&password=short&confirm_password=other";
    let response = app.send(post_form("/account/register", None, form)?).await?;

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await?.to_bytes();
    let html = String::from_utf8(bytes.to_vec())?;
    assert!(html.contains("Passwords do not match"));
    assert!(app.state.market.storage.get_user_by_email("sam@uni.edu").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn anonymous_pages_redirect_to_login() -> anyhow::Result<()> {
    let app = test_app()?;
    let response = app.send(get("/cart", None)?).await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/account/login?return_url=/cart");
    Ok(())
}

#[tokio::test]
async fn admin_api_requires_an_administrator() -> anyhow::Result<()> {
    let app = test_app()?;
    let anonymous = app.send(get("/admin/api/users", None)?).await?;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let (_, student) = app.user("student@uni.edu", UserRole::Student).await?;
    let forbidden = app.send(get("/admin/api/users", Some(&student))?).await?;
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let (_, admin) = app.user("boss@uni.edu", UserRole::Admin).await?;
    let allowed = app.send(get("/admin/api/dashboard", Some(&admin))?).await?;
    assert_eq!(allowed.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn quick_university_creation() -> anyhow::Result<()> {
    let app = test_app()?;
    let response = app
        .send(post_json("/api/universities/quick", None, json!({ "name": "Cairo University" }))?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["success"], true);
    assert_eq!(body["name"], "Cairo University");

    let duplicate = app
        .send(post_json("/api/universities/quick", None, json!({ "name": "cairo university" }))?)
        .await?;
    assert!(duplicate.status().is_client_error());
    let body = json_body(duplicate).await?;
    assert_eq!(body["success"], false);
    Ok(())
}

#[tokio::test]
async fn cart_and_cash_checkout() -> anyhow::Result<()> {
    let app = test_app()?;
    let (seller, _) = app.user("seller@uni.edu", UserRole::Student).await?;
    let (_, buyer) = app.user("buyer@uni.edu", UserRole::Student).await?;
    let listing = app.listing(&seller, "Calculus textbook", 2_500).await?;

    let added = app
        .send(post_json("/api/cart", Some(&buyer), json!({ "listing_id": listing.id, "quantity": 2 }))?)
        .await?;
    assert_eq!(added.status(), StatusCode::OK);
    let cart = json_body(added).await?;
    assert_eq!(cart["subtotal"], "50.00");

    let form = "full_name=Buyer+One&phone=01012345678&email=buyer%40uni.edu&country=Egypt\
                &state=Cairo&city=Giza&address=12+Nile+St&shipping_option=Free&payment_method=CashOnDelivery";
    let response = app.send(post_form("/checkout", Some(&buyer), form)?).await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let to = location(&response);
    assert!(to.starts_with("/checkout/success/"), "unexpected redirect {}", to);

    let cart = json_body(app.send(get("/api/cart", Some(&buyer))?).await?).await?;
    assert_eq!(cart["item_count"], 0);

    let order_page = app.send(get(&to, Some(&buyer))?).await?;
    assert_eq!(order_page.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn sellers_cannot_buy_their_own_listing() -> anyhow::Result<()> {
    let app = test_app()?;
    let (seller, cookie) = app.user("seller@uni.edu", UserRole::Student).await?;
    let listing = app.listing(&seller, "Desk lamp", 900).await?;

    let response = app
        .send(post_json("/api/cart", Some(&cookie), json!({ "listing_id": listing.id }))?)
        .await?;
    assert!(response.status().is_client_error());
    let body = json_body(response).await?;
    assert!(body["message"].is_string());
    Ok(())
}

#[tokio::test]
async fn chat_messages_count_as_unread_for_the_receiver() -> anyhow::Result<()> {
    let app = test_app()?;
    let (seller, seller_cookie) = app.user("seller@uni.edu", UserRole::Student).await?;
    let (buyer, buyer_cookie) = app.user("buyer@uni.edu", UserRole::Student).await?;
    let listing = app.listing(&seller, "Bike", 15_000).await?;

    let sent = app
        .send(post_json(
            "/api/chat/send",
            Some(&buyer_cookie),
            json!({ "receiver_id": seller.id, "product_id": listing.product_id, "content": "Still available?" }),
        )?)
        .await?;
    assert_eq!(sent.status(), StatusCode::CREATED);

    let unread = json_body(app.send(get("/api/chat/unread", Some(&seller_cookie))?).await?).await?;
    assert_eq!(unread["count"], 1);

    let read = app
        .send(post_json(
            "/api/chat/read",
            Some(&seller_cookie),
            json!({ "other_id": buyer.id, "product_id": listing.product_id }),
        )?)
        .await?;
    assert_eq!(read.status(), StatusCode::OK);

    let counts = json_body(app.send(get("/api/notifications/counts", Some(&seller_cookie))?).await?).await?;
    assert_eq!(counts["unreadMessages"], 0);
    Ok(())
}

#[tokio::test]
async fn blocked_users_are_signed_out_with_the_reason() -> anyhow::Result<()> {
    let app = test_app()?;
    let (_, admin_cookie) = app.user("boss@uni.edu", UserRole::Admin).await?;
    let (student, cookie) = app.user("student@uni.edu", UserRole::Student).await?;

    let blocked = app
        .send(post_json(
            &format!("/admin/api/users/{}/block", student.id),
            Some(&admin_cookie),
            json!({ "reason": "Spam" }),
        )?)
        .await?;
    assert_eq!(blocked.status(), StatusCode::OK);

    let response = app.send(get("/cart", Some(&cookie))?).await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/account/login?blocked=true&reason=Spam");
    let cleared = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|c| c.starts_with("bazaar_session=;") || c.starts_with("bazaar_session=\"\""));
    assert!(cleared, "session cookie should be cleared");

    let again = app.send(get("/cart", Some(&cookie))?).await?;
    assert_eq!(again.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&again), "/account/login?return_url=/cart");
    Ok(())
}
