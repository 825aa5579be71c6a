//! Public catalogue pages and the seller's own product management.

use axum::extract::{Multipart, Path, Query, State};
use axum::response::{Html, IntoResponse, Redirect};
use axum::routing::{get, post};
use axum::{Form, Router};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;

use super::error::PageResult;
use super::forms::MultipartForm;
use super::session::{flash_success, redirect_with_error, take_flash, CurrentUser, MaybeUser};
use super::templates::*;
use super::AppState;
use crate::domain::*;
use crate::error::{BazaarError, Result};
use crate::services::catalog::{BrowseQuery, ProductForm, RatingInput};
use crate::services::accounts::safe_return_url;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(browse))
        .route("/products", get(browse))
        .route("/products/mine", get(my_products))
        .route("/products/new", get(new_product).post(create_product))
        .route("/products/:id", get(product_detail))
        .route("/products/:id/edit", get(edit_product).post(update_product))
        .route("/products/:id/delete", post(delete_product))
        .route("/products/:id/images", post(add_images))
        .route("/products/:id/images/:image_id/main", post(set_main_image))
        .route("/products/images/:image_id/delete", post(delete_image))
        .route("/products/:id/rate", post(rate_product))
        .route("/reports", post(report))
}

fn read_product_form(form: &MultipartForm) -> Result<ProductForm> {
    Ok(ProductForm {
        name: form.text_or_default("name"),
        category_id: form.parse("category_id")?,
        price: form.parse("price")?,
        is_for_rent: form.checked("is_for_rent"),
        price_per_day: form.parse("price_per_day")?,
    })
}

async fn browse(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    jar: CookieJar,
    Query(query): Query<BrowseQuery>,
) -> PageResult<(CookieJar, Html<String>)> {
    let (jar, flash) = take_flash(jar);
    let q = query.q.clone().unwrap_or_default();
    let category_id = query.category_id.unwrap_or(0);
    let college_id = query.college_id.unwrap_or(0);

    let products = state.market.browse(user.as_ref(), query).await?;
    let categories = state.market.all_categories().await?;
    let heading = if q.is_empty() { "Products".to_string() } else { format!("Results for \"{}\"", q) };

    let page = ProductsTemplate {
        layout: Layout::new(user, flash),
        heading,
        products,
        categories,
        q,
        category_id,
        college_id,
    };
    Ok((jar, render(&page)?))
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: Option<String>,
}

async fn my_products(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    Query(query): Query<SearchQuery>,
) -> PageResult<(CookieJar, Html<String>)> {
    let (jar, flash) = take_flash(jar);
    let q = query.q.unwrap_or_default();
    let products = state.market.my_products(&user, Some(q.clone())).await?;
    let page = MyProductsTemplate { layout: Layout::new(Some(user), flash), products, q };
    Ok((jar, render(&page)?))
}

async fn new_product(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
) -> PageResult<(CookieJar, Html<String>)> {
    let (jar, flash) = take_flash(jar);
    let page = ProductFormTemplate {
        layout: Layout::new(Some(user), flash),
        title: "Sell a product".into(),
        action: "/products/new".into(),
        is_edit: false,
        categories: state.market.all_categories().await?,
        name: String::new(),
        category_id: 0,
        price: String::new(),
        is_for_rent: false,
        price_per_day: String::new(),
    };
    Ok((jar, render(&page)?))
}

async fn create_product(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    multipart: Multipart,
) -> PageResult {
    let created = async {
        let mut form = MultipartForm::read(multipart).await?;
        let images = form.take_files("images");
        state.market.create_product(&user, read_product_form(&form)?, images).await
    }
    .await;

    match created {
        Ok(product) => {
            let jar = flash_success(jar, "Your product was submitted and is waiting for approval.");
            Ok((jar, Redirect::to(&format!("/products/{}", product.id))).into_response())
        }
        Err(e) => redirect_with_error(jar, "/products/new", e),
    }
}

async fn product_detail(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    jar: CookieJar,
    Path(id): Path<Id>,
) -> PageResult<(CookieJar, Html<String>)> {
    let (jar, flash) = take_flash(jar);
    let details = state.market.product_details(user.as_ref(), id).await?;
    let is_owner = user.as_ref().map_or(false, |u| u.id == details.card.product.owner_id);
    let listing_id = details.available_listing().map_or(0, |l| l.id);

    let page = ProductDetailTemplate { layout: Layout::new(user, flash), details, is_owner, listing_id };
    Ok((jar, render(&page)?))
}

async fn edit_product(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    Path(id): Path<Id>,
) -> PageResult<(CookieJar, Html<String>)> {
    let (jar, flash) = take_flash(jar);
    let product = state.market.product(id).await?;
    if !product.can_be_managed_by(&user) {
        return Err(BazaarError::forbidden("only the owner can edit this product").into());
    }

    let page = ProductFormTemplate {
        layout: Layout::new(Some(user), flash),
        title: format!("Edit {}", product.name),
        action: format!("/products/{}/edit", id),
        is_edit: true,
        categories: state.market.all_categories().await?,
        name: product.name,
        category_id: product.category_id,
        price: product.price.to_string(),
        is_for_rent: product.is_for_rent,
        price_per_day: product.price_per_day.map(|p| p.to_string()).unwrap_or_default(),
    };
    Ok((jar, render(&page)?))
}

async fn update_product(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    Path(id): Path<Id>,
    multipart: Multipart,
) -> PageResult {
    let updated = async {
        let mut form = MultipartForm::read(multipart).await?;
        let images = form.take_files("images");
        let product = state.market.update_product(&user, id, read_product_form(&form)?).await?;
        if !images.is_empty() {
            state.market.add_product_images(&user, id, images).await?;
        }
        Ok::<_, BazaarError>(product)
    }
    .await;

    match updated {
        Ok(product) => {
            let jar = flash_success(jar, "Product updated.");
            Ok((jar, Redirect::to(&format!("/products/{}", product.id))).into_response())
        }
        Err(e) => redirect_with_error(jar, &format!("/products/{}/edit", id), e),
    }
}

async fn delete_product(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    Path(id): Path<Id>,
) -> PageResult {
    match state.market.delete_product(&user, id).await {
        Ok(()) => Ok((flash_success(jar, "Product deleted."), Redirect::to("/products/mine")).into_response()),
        Err(e) => redirect_with_error(jar, &format!("/products/{}", id), e),
    }
}

async fn add_images(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    Path(id): Path<Id>,
    multipart: Multipart,
) -> PageResult {
    let added = async {
        let mut form = MultipartForm::read(multipart).await?;
        let images = form.take_files("images");
        if images.is_empty() {
            return Err(BazaarError::invalid("Choose at least one image"));
        }
        state.market.add_product_images(&user, id, images).await
    }
    .await;

    let back = format!("/products/{}", id);
    match added {
        Ok(images) => {
            let jar = flash_success(jar, format!("{} image(s) added.", images.len()));
            Ok((jar, Redirect::to(&back)).into_response())
        }
        Err(e) => redirect_with_error(jar, &back, e),
    }
}

async fn set_main_image(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    Path((id, image_id)): Path<(Id, Id)>,
) -> PageResult {
    let back = format!("/products/{}", id);
    match state.market.set_main_product_image(&user, id, image_id).await {
        Ok(()) => Ok((flash_success(jar, "Main image updated."), Redirect::to(&back)).into_response()),
        Err(e) => redirect_with_error(jar, &back, e),
    }
}

async fn delete_image(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    Path(image_id): Path<Id>,
) -> PageResult {
    match state.market.delete_product_image(&user, image_id).await {
        Ok(product_id) => {
            let jar = flash_success(jar, "Image removed.");
            Ok((jar, Redirect::to(&format!("/products/{}", product_id))).into_response())
        }
        Err(e) => redirect_with_error(jar, "/products/mine", e),
    }
}

#[derive(Debug, Deserialize)]
struct RateForm {
    stars: i64,
    comment: Option<String>,
}

async fn rate_product(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    Path(id): Path<Id>,
    Form(form): Form<RateForm>,
) -> PageResult {
    let back = format!("/products/{}", id);
    let input = RatingInput { product_id: id, stars: form.stars, comment: form.comment };
    match state.market.rate_product(&user, input).await {
        Ok(_) => Ok((flash_success(jar, "Thanks for your rating."), Redirect::to(&back)).into_response()),
        Err(e) => redirect_with_error(jar, &back, e),
    }
}

#[derive(Debug, Deserialize)]
struct ReportForm {
    target_type: String,
    target_id: Id,
    reason: String,
    return_to: Option<String>,
}

async fn report(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    Form(form): Form<ReportForm>,
) -> PageResult {
    let back = safe_return_url(form.return_to.as_deref());
    let created = async {
        let target: ReportTarget = form.target_type.parse()?;
        state.market.create_report(&user, target, form.target_id, &form.reason).await
    }
    .await;

    match created {
        Ok(_) => {
            let jar = flash_success(jar, "Thank you. An administrator will review your report.");
            Ok((jar, Redirect::to(&back)).into_response())
        }
        Err(e) => redirect_with_error(jar, &back, e),
    }
}
