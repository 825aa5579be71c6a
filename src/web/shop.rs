//! Cart, checkout, the simulated payment page and order history.

use axum::extract::{Path, Query, State};
use axum::response::{Html, IntoResponse, Redirect};
use axum::routing::{get, post};
use axum::{Form, Router};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;

use super::error::{PageError, PageResult};
use super::session::{flash_error, flash_success, redirect_with_error, take_flash, CurrentUser, Flash};
use super::templates::*;
use super::AppState;
use crate::domain::*;
use crate::error::BazaarError;
use crate::services::orders::OrderQuery;
use crate::services::{CheckoutForm, CheckoutOutcome};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/cart", get(cart))
        .route("/cart/add", post(add_to_cart))
        .route("/cart/add-product/:product_id", post(add_product_to_cart))
        .route("/cart/remove/:item_id", post(remove_from_cart))
        .route("/checkout", get(checkout_page).post(checkout))
        .route("/checkout/pay", get(payment_page).post(confirm_payment))
        .route("/checkout/pay/cancel", post(cancel_payment))
        .route("/checkout/success/:id", get(order_success))
        .route("/buy-now/:listing_id", post(buy_now))
        .route("/orders", get(orders))
        .route("/orders/:id", get(order_detail))
}

async fn cart(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
) -> PageResult<(CookieJar, Html<String>)> {
    let (jar, flash) = take_flash(jar);
    let cart = state.market.cart(user.id).await?;
    let page = CartTemplate {
        layout: Layout::new(Some(user), flash),
        cart,
        max_quantity: state.market.settings.max_cart_quantity,
    };
    Ok((jar, render(&page)?))
}

#[derive(Debug, Deserialize)]
struct AddToCartForm {
    listing_id: Id,
    quantity: Option<i64>,
}

async fn add_to_cart(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    Form(form): Form<AddToCartForm>,
) -> PageResult {
    let quantity = form.quantity.unwrap_or(1);
    match state.market.add_listing_to_cart(&user, form.listing_id, quantity).await {
        Ok(_) => Ok((flash_success(jar, "Added to your cart."), Redirect::to("/cart")).into_response()),
        Err(e) => {
            let back = match state.market.listing(form.listing_id).await {
                Ok(listing) => format!("/products/{}", listing.product_id),
                Err(_) => "/products".to_string(),
            };
            redirect_with_error(jar, &back, e)
        }
    }
}

async fn add_product_to_cart(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    Path(product_id): Path<Id>,
) -> PageResult {
    match state.market.add_product_to_cart(&user, product_id).await {
        Ok(_) => Ok((flash_success(jar, "Added to your cart."), Redirect::to("/cart")).into_response()),
        Err(e) => redirect_with_error(jar, &format!("/products/{}", product_id), e),
    }
}

async fn remove_from_cart(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    Path(item_id): Path<Id>,
) -> PageResult {
    match state.market.remove_from_cart(&user, item_id).await {
        Ok(()) => Ok((flash_success(jar, "Removed from your cart."), Redirect::to("/cart")).into_response()),
        Err(e) => redirect_with_error(jar, "/cart", e),
    }
}

async fn render_checkout(
    state: &AppState,
    user: User,
    form: CheckoutForm,
    flash: Option<Flash>,
) -> Result<Html<String>, BazaarError> {
    let summary = state.market.checkout_summary(&user).await?;
    let express_total = summary.cart.subtotal + summary.express_fee;
    let page = CheckoutTemplate { layout: Layout::new(Some(user), flash), summary, form, express_total };
    Ok(Html(askama::Template::render(&page)?))
}

async fn checkout_page(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
) -> PageResult {
    let (jar, flash) = take_flash(jar);
    let form = CheckoutForm {
        full_name: user.full_name.clone(),
        phone: user.phone_number.clone().unwrap_or_default(),
        email: user.email.clone(),
        address: user.address.clone().unwrap_or_default(),
        shipping_option: ShippingOption::Free.to_string(),
        ..Default::default()
    };
    match render_checkout(&state, user, form, flash).await {
        Ok(html) => Ok((jar, html).into_response()),
        Err(e) => redirect_with_error(jar, "/cart", e),
    }
}

async fn checkout(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    Form(form): Form<CheckoutForm>,
) -> PageResult {
    match state.market.checkout(&user, form.clone()).await {
        Ok(CheckoutOutcome::Placed(order)) => {
            Ok((jar, Redirect::to(&format!("/checkout/success/{}", order.id))).into_response())
        }
        Ok(CheckoutOutcome::PaymentRequired(_)) => Ok((jar, Redirect::to("/checkout/pay")).into_response()),
        // Keep what the buyer typed when the form itself was the problem.
        Err(e @ (BazaarError::Validation(_) | BazaarError::PaymentUnavailable(_))) => {
            let message = match &e {
                BazaarError::Validation(errors) => errors.join(" "),
                other => other.to_string(),
            };
            let flash = Flash { kind: "error".into(), message };
            match render_checkout(&state, user, form, Some(flash)).await {
                Ok(html) => Ok((jar, html).into_response()),
                Err(_) => redirect_with_error(jar, "/cart", e),
            }
        }
        Err(e) => redirect_with_error(jar, "/cart", e),
    }
}

async fn payment_page(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
) -> PageResult {
    let (jar, flash) = take_flash(jar);
    let Some(pending) = state.market.pending_payment(user.id)? else {
        return Ok((flash_error(jar, "There is no payment in progress."), Redirect::to("/cart")).into_response());
    };
    let page = PaymentTemplate { layout: Layout::new(Some(user), flash), pending };
    Ok((jar, render(&page)?).into_response())
}

#[derive(Debug, Deserialize)]
struct PaymentForm {
    wallet_phone: Option<String>,
}

async fn confirm_payment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    Form(form): Form<PaymentForm>,
) -> PageResult {
    match state.market.confirm_payment(&user, form.wallet_phone.as_deref()).await {
        Ok(order) => Ok((jar, Redirect::to(&format!("/checkout/success/{}", order.id))).into_response()),
        Err(BazaarError::NotFound(_)) => {
            Ok((flash_error(jar, "There is no payment in progress."), Redirect::to("/cart")).into_response())
        }
        Err(e) => redirect_with_error(jar, "/checkout/pay", e),
    }
}

async fn cancel_payment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
) -> PageResult {
    state.market.cancel_pending_payment(user.id)?;
    Ok((flash_success(jar, "Payment cancelled. Your cart is unchanged."), Redirect::to("/cart")).into_response())
}

async fn order_success(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Id>,
) -> PageResult<Html<String>> {
    let detail = state.market.order_details(&user, id).await?;
    render(&OrderSuccessTemplate { layout: Layout::new(Some(user), None), order: detail.order })
}

async fn buy_now(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    Path(listing_id): Path<Id>,
) -> PageResult {
    match state.market.buy_now(&user, listing_id).await {
        Ok(order) => Ok((jar, Redirect::to(&format!("/checkout/success/{}", order.id))).into_response()),
        Err(e) => {
            let back = match state.market.listing(listing_id).await {
                Ok(listing) => format!("/products/{}", listing.product_id),
                Err(_) => "/products".to_string(),
            };
            redirect_with_error(jar, &back, e)
        }
    }
}

async fn orders(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    Query(query): Query<OrderQuery>,
) -> PageResult<(CookieJar, Html<String>)> {
    let (jar, flash) = take_flash(jar);
    let status = query.status.map(|s| s.to_string()).unwrap_or_default();
    let orders = state.market.orders_for(&user, query).await?;
    let page = OrdersTemplate {
        layout: Layout::new(Some(user), flash),
        orders,
        status,
        statuses: OrderStatus::ALL.iter().map(|s| s.as_str()).collect(),
    };
    Ok((jar, render(&page)?))
}

async fn order_detail(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Id>,
) -> Result<Html<String>, PageError> {
    let detail = state.market.order_details(&user, id).await?;
    render(&OrderDetailTemplate { layout: Layout::new(Some(user), None), detail })
}
