use axum::extract::{Path, State};
use axum::response::{Html, IntoResponse, Redirect};
use axum::routing::{get, post};
use axum::{Form, Router};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;

use super::error::PageResult;
use super::session::{flash_success, redirect_with_error, take_flash, CurrentUser};
use super::templates::*;
use super::AppState;
use crate::domain::Id;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/chat", get(conversations))
        .route("/chat/seller/:product_id", get(chat_with_seller))
        .route("/chat/:other_id/:product_id", get(conversation).post(send))
        .route("/chat/:other_id/:product_id/delete", post(delete_conversation))
}

async fn conversations(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
) -> PageResult<(CookieJar, Html<String>)> {
    let (jar, flash) = take_flash(jar);
    let conversations = state.market.conversations(&user).await?;
    let page = ChatListTemplate { layout: Layout::new(Some(user), flash), conversations };
    Ok((jar, render(&page)?))
}

async fn conversation(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    Path((other_id, product_id)): Path<(Id, Id)>,
) -> PageResult {
    let (jar, flash) = take_flash(jar);
    match state.market.open_conversation(&user, other_id, product_id).await {
        Ok(view) => {
            let me = user.id;
            let page = ChatTemplate { layout: Layout::new(Some(user), flash), view, me };
            Ok((jar, render(&page)?).into_response())
        }
        Err(e) => redirect_with_error(jar, "/chat", e),
    }
}

async fn chat_with_seller(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    Path(product_id): Path<Id>,
) -> PageResult {
    let (jar, flash) = take_flash(jar);
    match state.market.chat_with_seller(&user, product_id).await {
        Ok(view) => {
            let me = user.id;
            let page = ChatTemplate { layout: Layout::new(Some(user), flash), view, me };
            Ok((jar, render(&page)?).into_response())
        }
        Err(e) => redirect_with_error(jar, &format!("/products/{}", product_id), e),
    }
}

#[derive(Debug, Deserialize)]
struct MessageForm {
    content: String,
}

/// Form fallback for browsers without scripts; the page normally sends
/// through the JSON endpoint.
async fn send(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    Path((other_id, product_id)): Path<(Id, Id)>,
    Form(form): Form<MessageForm>,
) -> PageResult {
    let back = format!("/chat/{}/{}", other_id, product_id);
    match state.market.send_message(&user, other_id, product_id, &form.content).await {
        Ok(_) => Ok((jar, Redirect::to(&back)).into_response()),
        Err(e) => redirect_with_error(jar, &back, e),
    }
}

async fn delete_conversation(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    Path((other_id, product_id)): Path<(Id, Id)>,
) -> PageResult {
    match state.market.delete_conversation(&user, other_id, product_id).await {
        Ok(_) => Ok((flash_success(jar, "Conversation deleted."), Redirect::to("/chat")).into_response()),
        Err(e) => redirect_with_error(jar, "/chat", e),
    }
}
