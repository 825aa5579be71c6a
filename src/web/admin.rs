//! Back office. The dashboard is a page; everything else is JSON under
//! `/admin/api`, every route gated on [`AdminUser`].

use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use super::error::{ApiResult, PageResult};
use super::session::{take_flash, AdminUser};
use super::templates::{render, AdminDashboardTemplate, Layout};
use super::AppState;
use crate::domain::*;
use crate::services::catalog::ProductDetails;
use crate::services::dashboard::AdminDashboard;
use crate::services::moderation::{AdminProductQuery, UserDetails};
use crate::services::notifications::AdminAlert;
use crate::services::orders::OrderQuery;

pub fn routes() -> Router<AppState> {
    let api = Router::new()
        .route("/dashboard", get(dashboard))
        // products
        .route("/products", get(products))
        .route("/products/:id", get(product).delete(delete_product))
        .route("/products/:id/approve", post(approve_product))
        .route("/products/:id/reject", post(reject_product))
        .route("/products/:id/sold", post(set_sold))
        .route("/products/:id/featured", post(toggle_featured))
        // users
        .route("/users", get(users))
        .route("/users/export", get(export_users))
        .route("/users/:id", get(user))
        .route("/users/:id/suspend", post(suspend_user))
        .route("/users/:id/activate", post(activate_user))
        .route("/users/:id/block", post(block_user))
        .route("/users/:id/unblock", post(unblock_user))
        .route("/users/:id/trust-score", post(set_trust_score))
        // orders
        .route("/orders", get(orders))
        .route("/orders/:id", get(order).delete(delete_order))
        .route("/orders/:id/status", post(change_order_status))
        // reports
        .route("/reports", get(reports))
        .route("/reports/:id", get(report))
        .route("/reports/:id/resolve", post(resolve_report))
        .route("/reports/:id/block-user", post(report_block_user))
        .route("/reports/:id/remove-product", post(report_remove_product))
        // verifications
        .route("/verifications", get(verifications))
        .route("/verifications/:id/approve", post(approve_verification))
        .route("/verifications/:id/reject", post(reject_verification))
        // chat monitoring
        .route("/messages", get(messages))
        .route("/messages/conversation", get(conversation))
        .route("/messages/:id", axum::routing::delete(delete_message))
        .route("/activity", get(activity))
        // reference data
        .route("/universities", get(universities).post(create_university))
        .route("/universities/:id", get(university).put(update_university).delete(delete_university))
        .route("/colleges", get(colleges).post(create_college))
        .route("/colleges/:id", get(college).put(update_college).delete(delete_college))
        .route("/categories", get(categories).post(create_category))
        .route("/categories/:id", get(category).put(update_category).delete(delete_category))
        .route("/notifications/broadcast", post(broadcast));

    Router::new()
        .route("/", get(dashboard_page))
        .route("/products/:id", get(product_link))
        .route("/orders/:id", get(order_link))
        .route("/reports/:id", get(dashboard_link))
        .route("/verifications", get(dashboard_link))
        .nest("/api", api)
}

// Notification links resolve to the pages an admin can already open.

async fn product_link(AdminUser(_admin): AdminUser, Path(id): Path<Id>) -> Redirect {
    Redirect::to(&format!("/products/{}", id))
}

async fn order_link(AdminUser(_admin): AdminUser, Path(id): Path<Id>) -> Redirect {
    Redirect::to(&format!("/orders/{}", id))
}

async fn dashboard_link(AdminUser(_admin): AdminUser) -> Redirect {
    Redirect::to("/admin")
}

async fn dashboard_page(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    jar: CookieJar,
) -> PageResult<(CookieJar, Html<String>)> {
    let (jar, flash) = take_flash(jar);
    let board = state.market.admin_dashboard().await?;
    let page = AdminDashboardTemplate { layout: Layout::new(Some(admin), flash), board };
    Ok((jar, render(&page)?))
}

async fn dashboard(State(state): State<AppState>, AdminUser(_admin): AdminUser) -> ApiResult<Json<AdminDashboard>> {
    Ok(Json(state.market.admin_dashboard().await?))
}

#[derive(Debug, Default, Deserialize)]
struct PageQuery {
    search: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    page: Option<i64>,
}

// Products

async fn products(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<AdminProductQuery>,
) -> ApiResult<Json<Page<ProductCard>>> {
    Ok(Json(state.market.admin_products(query).await?))
}

async fn product(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Id>,
) -> ApiResult<Json<ProductDetails>> {
    Ok(Json(state.market.admin_product_details(&admin, id).await?))
}

async fn approve_product(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Id>,
) -> ApiResult<Json<Product>> {
    Ok(Json(state.market.approve_product(&admin, id).await?))
}

async fn reject_product(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Id>,
) -> ApiResult<Json<Product>> {
    Ok(Json(state.market.reject_product(&admin, id).await?))
}

#[derive(Debug, Deserialize)]
struct SoldBody {
    sold: bool,
}

async fn set_sold(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Id>,
    Json(body): Json<SoldBody>,
) -> ApiResult<Json<Product>> {
    Ok(Json(state.market.set_product_sold(&admin, id, body.sold).await?))
}

async fn toggle_featured(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Id>,
) -> ApiResult<Json<Product>> {
    Ok(Json(state.market.toggle_featured(&admin, id).await?))
}

async fn delete_product(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Id>,
) -> ApiResult<StatusCode> {
    state.market.admin_delete_product(&admin, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Users

async fn users(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<User>>> {
    Ok(Json(state.market.admin_users(query.search, query.page).await?))
}

async fn user(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<Id>,
) -> ApiResult<Json<UserDetails>> {
    Ok(Json(state.market.admin_user_details(id).await?))
}

#[derive(Debug, Default, Deserialize)]
struct SuspendBody {
    days: Option<i64>,
}

async fn suspend_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Id>,
    body: Option<Json<SuspendBody>>,
) -> ApiResult<Json<User>> {
    let days = body.and_then(|Json(b)| b.days);
    Ok(Json(state.market.suspend_user(&admin, id, days).await?))
}

async fn activate_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Id>,
) -> ApiResult<Json<User>> {
    Ok(Json(state.market.activate_user(&admin, id).await?))
}

#[derive(Debug, Default, Deserialize)]
struct BlockBody {
    reason: Option<String>,
}

async fn block_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Id>,
    body: Option<Json<BlockBody>>,
) -> ApiResult<Json<User>> {
    let reason = body.and_then(|Json(b)| b.reason);
    Ok(Json(state.market.block_user(&admin, id, reason.as_deref()).await?))
}

async fn unblock_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Id>,
) -> ApiResult<Json<User>> {
    Ok(Json(state.market.unblock_user(&admin, id).await?))
}

#[derive(Debug, Deserialize)]
struct TrustBody {
    score: i32,
}

async fn set_trust_score(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Id>,
    Json(body): Json<TrustBody>,
) -> ApiResult<Json<User>> {
    Ok(Json(state.market.set_trust_score(&admin, id, body.score).await?))
}

async fn export_users(State(state): State<AppState>, AdminUser(_admin): AdminUser) -> ApiResult<Response> {
    let csv = state.market.export_users_csv().await?;
    let file_name = format!("attachment; filename=\"users_{}.csv\"", Utc::now().format("%Y%m%d"));
    Ok(([(CONTENT_TYPE, "text/csv; charset=utf-8".to_string()), (CONTENT_DISPOSITION, file_name)], csv).into_response())
}

// Orders

async fn orders(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Query(query): Query<OrderQuery>,
) -> ApiResult<Json<Page<OrderSummary>>> {
    Ok(Json(state.market.orders_for(&admin, query).await?))
}

async fn order(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Id>,
) -> ApiResult<Json<OrderDetail>> {
    Ok(Json(state.market.order_details(&admin, id).await?))
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: OrderStatus,
}

async fn change_order_status(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Id>,
    Json(body): Json<StatusBody>,
) -> ApiResult<Json<Order>> {
    Ok(Json(state.market.change_order_status(&admin, id, body.status).await?))
}

async fn delete_order(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Id>,
) -> ApiResult<StatusCode> {
    state.market.delete_order(&admin, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Reports

#[derive(Debug, Default, Deserialize)]
struct ReportQuery {
    #[serde(default, deserialize_with = "empty_as_none")]
    resolved: Option<bool>,
    #[serde(default, deserialize_with = "empty_as_none")]
    target_type: Option<ReportTarget>,
    #[serde(default, deserialize_with = "empty_as_none")]
    page: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ResolveBody {
    resolution: String,
}

async fn reports(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<ReportQuery>,
) -> ApiResult<Json<Page<ReportView>>> {
    Ok(Json(state.market.admin_reports(query.resolved, query.target_type, query.page).await?))
}

async fn report(State(state): State<AppState>, AdminUser(_admin): AdminUser, Path(id): Path<Id>) -> ApiResult<Json<Report>> {
    Ok(Json(state.market.report(id).await?))
}

async fn resolve_report(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Id>,
    Json(body): Json<ResolveBody>,
) -> ApiResult<Json<Report>> {
    Ok(Json(state.market.resolve_report(&admin, id, &body.resolution).await?))
}

async fn report_block_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Id>,
) -> ApiResult<Json<Report>> {
    Ok(Json(state.market.report_block_user(&admin, id).await?))
}

async fn report_remove_product(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Id>,
) -> ApiResult<Json<Report>> {
    Ok(Json(state.market.report_remove_product(&admin, id).await?))
}

// Verifications

#[derive(Debug, Default, Deserialize)]
struct VerificationQuery {
    #[serde(default, deserialize_with = "empty_as_none")]
    approved: Option<bool>,
    #[serde(default, deserialize_with = "empty_as_none")]
    page: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RejectBody {
    #[serde(default)]
    reason: String,
}

async fn verifications(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<VerificationQuery>,
) -> ApiResult<Json<Page<VerificationView>>> {
    Ok(Json(state.market.admin_verifications(query.approved, query.page).await?))
}

async fn approve_verification(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Id>,
) -> ApiResult<Json<Value>> {
    state.market.approve_verification(&admin, id).await?;
    Ok(Json(json!({ "success": true })))
}

async fn reject_verification(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Id>,
    Json(body): Json<RejectBody>,
) -> ApiResult<Json<Value>> {
    state.market.reject_verification(&admin, id, &body.reason).await?;
    Ok(Json(json!({ "success": true })))
}

// Chat monitoring and the activity log

#[derive(Debug, Default, Deserialize)]
struct MessageQuery {
    #[serde(default, deserialize_with = "empty_as_none")]
    product_id: Option<Id>,
    #[serde(default, deserialize_with = "empty_as_none")]
    user_id: Option<Id>,
    search: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    page: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ConversationQuery {
    user_a: Id,
    user_b: Id,
    product_id: Id,
}

#[derive(Debug, Default, Deserialize)]
struct ActivityQuery {
    action: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    user_id: Option<Id>,
    #[serde(default, deserialize_with = "empty_as_none")]
    page: Option<i64>,
}

async fn messages(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<MessageQuery>,
) -> ApiResult<Json<Page<ChatMessageView>>> {
    let page = state.market.admin_messages(query.product_id, query.user_id, query.search, query.page).await?;
    Ok(Json(page))
}

async fn conversation(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<ConversationQuery>,
) -> ApiResult<Json<Vec<ChatMessageView>>> {
    Ok(Json(state.market.admin_conversation(query.user_a, query.user_b, query.product_id).await?))
}

async fn delete_message(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Id>,
) -> ApiResult<StatusCode> {
    state.market.admin_delete_message(&admin, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn activity(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<ActivityQuery>,
) -> ApiResult<Json<Page<ActivityView>>> {
    let action = query.action.filter(|a| !a.trim().is_empty());
    Ok(Json(state.market.admin_activity(action, query.user_id, query.page).await?))
}

// Universities, colleges and categories

#[derive(Debug, Deserialize)]
struct UniversityBody {
    name: String,
    #[serde(default)]
    location: String,
}

#[derive(Debug, Default, Deserialize)]
struct CollegeQuery {
    search: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    university_id: Option<Id>,
    #[serde(default, deserialize_with = "empty_as_none")]
    page: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CollegeBody {
    name: String,
    university_id: Id,
}

#[derive(Debug, Deserialize)]
struct CategoryBody {
    name: String,
}

async fn universities(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<UniversitySummary>>> {
    Ok(Json(state.market.list_universities(query.search, query.page).await?))
}

async fn university(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<Id>,
) -> ApiResult<Json<University>> {
    Ok(Json(state.market.university(id).await?))
}

async fn create_university(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Json(body): Json<UniversityBody>,
) -> ApiResult<(StatusCode, Json<University>)> {
    let university = state.market.create_university(&body.name, &body.location).await?;
    Ok((StatusCode::CREATED, Json(university)))
}

async fn update_university(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<Id>,
    Json(body): Json<UniversityBody>,
) -> ApiResult<Json<University>> {
    Ok(Json(state.market.update_university(id, &body.name, &body.location).await?))
}

async fn delete_university(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<Id>,
) -> ApiResult<StatusCode> {
    state.market.delete_university(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn colleges(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<CollegeQuery>,
) -> ApiResult<Json<Page<CollegeSummary>>> {
    Ok(Json(state.market.list_colleges(query.search, query.university_id, query.page).await?))
}

async fn college(State(state): State<AppState>, AdminUser(_admin): AdminUser, Path(id): Path<Id>) -> ApiResult<Json<College>> {
    Ok(Json(state.market.college(id).await?))
}

async fn create_college(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Json(body): Json<CollegeBody>,
) -> ApiResult<(StatusCode, Json<College>)> {
    let college = state.market.create_college(&body.name, body.university_id).await?;
    Ok((StatusCode::CREATED, Json(college)))
}

async fn update_college(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<Id>,
    Json(body): Json<CollegeBody>,
) -> ApiResult<Json<College>> {
    Ok(Json(state.market.update_college(id, &body.name, body.university_id).await?))
}

async fn delete_college(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<Id>,
) -> ApiResult<StatusCode> {
    state.market.delete_college(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn categories(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<CategorySummary>>> {
    Ok(Json(state.market.list_categories(query.search, query.page).await?))
}

async fn category(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<Id>,
) -> ApiResult<Json<Category>> {
    Ok(Json(state.market.category(id).await?))
}

async fn create_category(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Json(body): Json<CategoryBody>,
) -> ApiResult<(StatusCode, Json<Category>)> {
    let category = state.market.create_category(&body.name).await?;
    Ok((StatusCode::CREATED, Json(category)))
}

async fn update_category(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<Id>,
    Json(body): Json<CategoryBody>,
) -> ApiResult<Json<Category>> {
    Ok(Json(state.market.update_category(id, &body.name).await?))
}

async fn delete_category(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<Id>,
) -> ApiResult<StatusCode> {
    state.market.delete_category(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct BroadcastBody {
    title: String,
    message: String,
    kind: Option<NotificationKind>,
    link_url: Option<String>,
}

/// Sends a notification to every administrator.
async fn broadcast(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Json(body): Json<BroadcastBody>,
) -> ApiResult<Json<Value>> {
    let mut alert = AdminAlert::new(body.title, body.message).kind(body.kind.unwrap_or(NotificationKind::Info));
    if let Some(link) = body.link_url.filter(|l| !l.is_empty()) {
        alert = alert.link(link);
    }
    let delivered = state.market.broadcast_to_admins(alert).await?;
    Ok(Json(json!({ "success": true, "delivered": delivered })))
}
