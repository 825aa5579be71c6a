//! Sign-in, registration and the signed-in user's own pages.

use axum::extract::{Multipart, Query, State};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use tracing::warn;

use super::error::{PageError, PageResult};
use super::forms::MultipartForm;
use super::session::{
    clear_session, encode_query, flash_success, redirect_with_error, session_cookie, session_token,
    take_flash, CurrentUser, MaybeUser,
};
use super::templates::*;
use super::AppState;
use crate::domain::*;
use crate::error::{BazaarError, Result};
use crate::services::accounts::{safe_return_url, ProfileForm, Registration};
use crate::services::RequestMeta;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(account))
        .route("/login", get(login_page).post(login))
        .route("/register", get(register_page).post(register))
        .route("/logout", post(logout))
        .route("/profile", get(account).post(update_profile))
        .route("/password", post(change_password))
        .route("/verification", post(request_verification))
        .route("/notifications", get(notifications))
        .route("/notifications/read-all", post(read_all_notifications))
}

#[derive(Debug, Default, Deserialize)]
struct LoginQuery {
    return_url: Option<String>,
    blocked: Option<bool>,
    reason: Option<String>,
}

async fn login_page(
    MaybeUser(user): MaybeUser,
    jar: CookieJar,
    Query(query): Query<LoginQuery>,
) -> PageResult {
    if user.is_some() {
        return Ok(Redirect::to(&safe_return_url(query.return_url.as_deref())).into_response());
    }
    let (jar, flash) = take_flash(jar);
    let blocked_reason = match query.blocked {
        Some(true) => query.reason.unwrap_or_default(),
        _ => String::new(),
    };
    let page = LoginTemplate {
        layout: Layout::new(None, flash),
        email: String::new(),
        return_url: query.return_url.unwrap_or_default(),
        blocked_reason,
    };
    Ok((jar, render(&page)?).into_response())
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    email: String,
    password: String,
    return_url: Option<String>,
}

async fn login(
    State(state): State<AppState>,
    meta: RequestMeta,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> PageResult {
    match state.market.login(&form.email, &form.password, &meta).await {
        Ok(grant) => {
            let jar = jar.add(session_cookie(&grant, state.config.server.secure_cookies));
            let to = safe_return_url(form.return_url.as_deref());
            Ok((jar, Redirect::to(&to)).into_response())
        }
        Err(e) => {
            let back = match form.return_url.as_deref().filter(|u| !u.is_empty()) {
                Some(url) => format!("/account/login?return_url={}", encode_query(url)),
                None => "/account/login".to_string(),
            };
            redirect_with_error(jar, &back, e)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RegisterForm {
    #[serde(default)]
    full_name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    confirm_password: String,
    phone_number: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    university_id: Option<Id>,
    #[serde(default, deserialize_with = "empty_as_none")]
    college_id: Option<Id>,
}

impl From<RegisterForm> for Registration {
    fn from(form: RegisterForm) -> Self {
        Registration {
            full_name: form.full_name,
            email: form.email,
            password: form.password,
            confirm_password: form.confirm_password,
            phone_number: form.phone_number,
            university_id: form.university_id,
            college_id: form.college_id,
        }
    }
}

async fn register_form_page(state: &AppState, form: Registration, errors: Vec<String>) -> PageResult<Html<String>> {
    let page = RegisterTemplate {
        layout: Layout::default(),
        universities: state.market.all_universities().await?,
        form: Registration { password: String::new(), confirm_password: String::new(), ..form },
        errors,
    };
    render(&page)
}

async fn register_page(State(state): State<AppState>, MaybeUser(user): MaybeUser) -> PageResult {
    if user.is_some() {
        return Ok(Redirect::to("/").into_response());
    }
    Ok(register_form_page(&state, Registration::default(), Vec::new()).await?.into_response())
}

async fn register(
    State(state): State<AppState>,
    meta: RequestMeta,
    jar: CookieJar,
    Form(form): Form<RegisterForm>,
) -> PageResult {
    let registration = Registration::from(form);
    match state.market.register(registration.clone(), &meta).await {
        Ok(grant) => {
            let jar = jar.add(session_cookie(&grant, state.config.server.secure_cookies));
            let jar = flash_success(jar, format!("Welcome to StudentBazaar, {}!", grant.user.full_name));
            Ok((jar, Redirect::to("/")).into_response())
        }
        Err(BazaarError::Validation(errors)) => {
            Ok(register_form_page(&state, registration, errors).await?.into_response())
        }
        Err(e) => Err(PageError(e)),
    }
}

async fn logout(State(state): State<AppState>, jar: CookieJar) -> Response {
    if let Some(token) = session_token(&jar) {
        if let Err(e) = state.market.logout(&token).await {
            warn!(error = %e, "Failed to delete session on logout");
        }
    }
    (clear_session(jar), Redirect::to("/")).into_response()
}

async fn account(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
) -> PageResult<(CookieJar, Html<String>)> {
    let (jar, flash) = take_flash(jar);
    let dashboard = state.market.user_dashboard(&user).await?;
    let universities = state.market.all_universities().await?;
    let colleges = match user.university_id {
        Some(id) => state.market.colleges_for_university(id).await?,
        None => Vec::new(),
    };
    let page = AccountTemplate { layout: Layout::new(Some(user), flash), dashboard, universities, colleges };
    Ok((jar, render(&page)?))
}

fn read_profile_form(form: &MultipartForm) -> Result<ProfileForm> {
    Ok(ProfileForm {
        full_name: form.text_or_default("full_name"),
        email: form.text_or_default("email"),
        phone_number: form.text("phone_number"),
        address: form.text("address"),
        university_id: form.parse("university_id")?,
        college_id: form.parse("college_id")?,
    })
}

async fn update_profile(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    multipart: Multipart,
) -> PageResult {
    let updated = async {
        let mut form = MultipartForm::read(multipart).await?;
        let picture = form.take_file("picture");
        state.market.update_profile(&user, read_profile_form(&form)?, picture).await
    }
    .await;

    match updated {
        Ok(_) => Ok((flash_success(jar, "Profile updated."), Redirect::to("/account")).into_response()),
        Err(e) => redirect_with_error(jar, "/account", e),
    }
}

#[derive(Debug, Deserialize)]
struct PasswordForm {
    current_password: String,
    new_password: String,
    confirm_password: String,
}

async fn change_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    Form(form): Form<PasswordForm>,
) -> PageResult {
    match state
        .market
        .change_password(&user, &form.current_password, &form.new_password, &form.confirm_password)
        .await
    {
        Ok(()) => Ok((flash_success(jar, "Password changed."), Redirect::to("/account")).into_response()),
        Err(e) => redirect_with_error(jar, "/account", e),
    }
}

#[derive(Debug, Deserialize)]
struct VerificationForm {
    student_id_number: String,
    document_url: Option<String>,
}

async fn request_verification(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    Form(form): Form<VerificationForm>,
) -> PageResult {
    match state
        .market
        .request_verification(&user, &form.student_id_number, form.document_url.as_deref())
        .await
    {
        Ok(_) => {
            let jar = flash_success(jar, "Verification requested. An administrator will review it shortly.");
            Ok((jar, Redirect::to("/account")).into_response())
        }
        Err(e) => redirect_with_error(jar, "/account", e),
    }
}

async fn notifications(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
) -> PageResult<(CookieJar, Html<String>)> {
    let (jar, flash) = take_flash(jar);
    let notifications = state.market.recent_notifications(user.id).await?;
    let page = NotificationsTemplate { layout: Layout::new(Some(user), flash), notifications };
    Ok((jar, render(&page)?))
}

async fn read_all_notifications(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
) -> PageResult {
    match state.market.mark_all_notifications_read(user.id).await {
        Ok(n) => {
            let jar = flash_success(jar, format!("{} notification(s) marked as read.", n));
            Ok((jar, Redirect::to("/account/notifications")).into_response())
        }
        Err(e) => Err(PageError(e)),
    }
}
