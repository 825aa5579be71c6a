//! JSON endpoints used by the storefront scripts and by API clients.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::{ApiError, ApiResult};
use super::session::{AdminUser, CurrentUser};
use super::AppState;
use crate::domain::*;
use crate::services::cart::{CartView, QuantityUpdate};
use crate::services::catalog::{ListingInput, RatingInput};
use crate::services::notifications::NotificationCounts;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/listings", get(list_listings).post(create_listing))
        .route("/listings/:id", get(get_listing).put(update_listing).delete(delete_listing))
        .route("/ratings", get(list_ratings).post(create_rating))
        .route("/ratings/:id", get(get_rating).put(update_rating).delete(delete_rating))
        .route("/majors", get(list_majors).post(create_major))
        .route("/majors/:id", get(get_major).put(update_major).delete(delete_major))
        .route("/cart", get(cart).post(add_to_cart))
        .route("/cart/quantity", post(update_quantity))
        .route("/cart/:item_id", axum::routing::delete(remove_from_cart))
        .route("/notifications", get(notifications))
        .route("/notifications/counts", get(notification_counts))
        .route("/notifications/read-all", post(read_all_notifications))
        .route("/notifications/:id/read", post(read_notification))
        .route("/universities/quick", post(quick_create_university))
        .route("/universities/:id/colleges", get(colleges_for_university))
        .route("/chat/send", post(send_message))
        .route("/chat/read", post(mark_conversation_read))
        .route("/chat/unread", get(unread_messages))
}

// Listings

async fn list_listings(State(state): State<AppState>) -> ApiResult<Json<Vec<Listing>>> {
    Ok(Json(state.market.listings().await?))
}

async fn get_listing(State(state): State<AppState>, Path(id): Path<Id>) -> ApiResult<Json<Listing>> {
    Ok(Json(state.market.listing(id).await?))
}

async fn create_listing(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<ListingInput>,
) -> ApiResult<(StatusCode, Json<Listing>)> {
    let listing = state.market.create_listing(&user, input).await?;
    Ok((StatusCode::CREATED, Json(listing)))
}

async fn update_listing(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Id>,
    Json(input): Json<ListingInput>,
) -> ApiResult<Json<Listing>> {
    Ok(Json(state.market.update_listing(&user, id, input).await?))
}

async fn delete_listing(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Id>,
) -> ApiResult<StatusCode> {
    state.market.delete_listing(&user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Ratings

#[derive(Debug, Deserialize)]
struct RatingQuery {
    #[serde(default, deserialize_with = "empty_as_none")]
    product_id: Option<Id>,
}

#[derive(Debug, Deserialize)]
struct RatingUpdate {
    stars: i64,
    comment: Option<String>,
}

async fn list_ratings(State(state): State<AppState>, Query(query): Query<RatingQuery>) -> ApiResult<Json<Vec<Rating>>> {
    Ok(Json(state.market.ratings(query.product_id).await?))
}

async fn get_rating(State(state): State<AppState>, Path(id): Path<Id>) -> ApiResult<Json<Rating>> {
    Ok(Json(state.market.rating(id).await?))
}

async fn create_rating(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<RatingInput>,
) -> ApiResult<(StatusCode, Json<Rating>)> {
    let rating = state.market.rate_product(&user, input).await?;
    Ok((StatusCode::CREATED, Json(rating)))
}

async fn update_rating(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Id>,
    Json(update): Json<RatingUpdate>,
) -> ApiResult<Json<Rating>> {
    Ok(Json(state.market.update_rating(&user, id, update.stars, update.comment).await?))
}

async fn delete_rating(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Id>,
) -> ApiResult<StatusCode> {
    state.market.delete_rating(&user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Majors: anyone may read, admins manage.

#[derive(Debug, Deserialize)]
struct MajorQuery {
    #[serde(default, deserialize_with = "empty_as_none")]
    college_id: Option<Id>,
}

#[derive(Debug, Deserialize)]
struct MajorPayload {
    name: String,
    college_id: Id,
}

async fn list_majors(State(state): State<AppState>, Query(query): Query<MajorQuery>) -> ApiResult<Json<Vec<Major>>> {
    Ok(Json(state.market.list_majors(query.college_id).await?))
}

async fn get_major(State(state): State<AppState>, Path(id): Path<Id>) -> ApiResult<Json<Major>> {
    Ok(Json(state.market.major(id).await?))
}

async fn create_major(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Json(payload): Json<MajorPayload>,
) -> ApiResult<(StatusCode, Json<Major>)> {
    let major = state.market.create_major(&payload.name, payload.college_id).await?;
    Ok((StatusCode::CREATED, Json(major)))
}

async fn update_major(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<Id>,
    Json(payload): Json<MajorPayload>,
) -> ApiResult<Json<Major>> {
    Ok(Json(state.market.update_major(id, &payload.name, payload.college_id).await?))
}

async fn delete_major(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<Id>,
) -> ApiResult<StatusCode> {
    state.market.delete_major(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Cart

#[derive(Debug, Deserialize)]
struct AddToCart {
    listing_id: Id,
    #[serde(default = "one")]
    quantity: i64,
}

fn one() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
struct QuantityChange {
    item_id: Id,
    quantity: i64,
}

async fn cart(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<Json<CartView>> {
    Ok(Json(state.market.cart(user.id).await?))
}

async fn add_to_cart(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<AddToCart>,
) -> ApiResult<Json<CartView>> {
    state.market.add_listing_to_cart(&user, body.listing_id, body.quantity).await?;
    Ok(Json(state.market.cart(user.id).await?))
}

async fn update_quantity(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<QuantityChange>,
) -> ApiResult<Json<QuantityUpdate>> {
    Ok(Json(state.market.update_cart_quantity(&user, body.item_id, body.quantity).await?))
}

async fn remove_from_cart(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(item_id): Path<Id>,
) -> ApiResult<StatusCode> {
    state.market.remove_from_cart(&user, item_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Notifications

async fn notifications(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<Vec<Notification>>> {
    Ok(Json(state.market.recent_notifications(user.id).await?))
}

async fn notification_counts(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<NotificationCounts>> {
    Ok(Json(state.market.notification_counts(&user).await?))
}

async fn read_notification(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Id>,
) -> ApiResult<Json<Value>> {
    let updated = state.market.mark_notification_read(user.id, id).await?;
    Ok(Json(json!({ "success": updated })))
}

async fn read_all_notifications(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<Value>> {
    let count = state.market.mark_all_notifications_read(user.id).await?;
    Ok(Json(json!({ "success": true, "count": count })))
}

// Universities and colleges for the registration and profile forms

#[derive(Debug, Deserialize)]
struct QuickUniversity {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Serialize)]
struct QuickUniversityReply {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    message: String,
}

/// Registration lets a student add a missing university on the spot.
async fn quick_create_university(State(state): State<AppState>, Json(body): Json<QuickUniversity>) -> Response {
    match state.market.quick_create_university(&body.name).await {
        Ok(university) => Json(QuickUniversityReply {
            success: true,
            id: Some(university.id),
            name: Some(university.name),
            message: "University added".to_string(),
        })
        .into_response(),
        Err(err) if err.is_client_error() => {
            let api = ApiError::from(err);
            let reply = QuickUniversityReply { success: false, id: None, name: None, message: api.message };
            (api.status, Json(reply)).into_response()
        }
        Err(err) => ApiError::from(err).into_response(),
    }
}

async fn colleges_for_university(
    State(state): State<AppState>,
    Path(id): Path<Id>,
) -> ApiResult<Json<Vec<College>>> {
    Ok(Json(state.market.colleges_for_university(id).await?))
}

// Chat

#[derive(Debug, Deserialize)]
struct SendMessage {
    receiver_id: Id,
    product_id: Id,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MarkRead {
    other_id: Id,
    product_id: Option<Id>,
}

async fn send_message(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<SendMessage>,
) -> ApiResult<(StatusCode, Json<ChatMessage>)> {
    let message = state.market.send_message(&user, body.receiver_id, body.product_id, &body.content).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn mark_conversation_read(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<MarkRead>,
) -> ApiResult<Json<Value>> {
    let count = state.market.mark_conversation_read(&user, body.other_id, body.product_id).await?;
    Ok(Json(json!({ "success": true, "count": count })))
}

async fn unread_messages(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<Json<Value>> {
    let count = state.market.unread_message_count(user.id).await?;
    Ok(Json(json!({ "count": count })))
}
