//! Cookie sessions, the signed-in user extractors and one-shot flash messages.

use axum::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts, OriginalUri};
use axum::http::header::{ACCEPT, USER_AGENT};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use std::convert::Infallible;
use std::net::SocketAddr;
use tracing::warn;

use super::error::{ApiError, PageError};
use super::AppState;
use crate::domain::User;
use crate::error::BazaarError;
use crate::services::accounts::{SessionGrant, SessionLookup};
use crate::services::RequestMeta;

pub const SESSION_COOKIE: &str = "bazaar_session";
pub const FLASH_COOKIE: &str = "bazaar_flash";

pub fn session_cookie(grant: &SessionGrant, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, grant.token.clone()))
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .path("/")
        .build()
}

pub fn clear_session(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build((SESSION_COOKIE, "")).path("/").build())
}

pub fn session_token(jar: &CookieJar) -> Option<String> {
    jar.get(SESSION_COOKIE).map(|c| c.value().to_string()).filter(|t| !t.is_empty())
}

/// Percent-encodes a query parameter value.
pub fn encode_query(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flash {
    /// `success`, `error` or `info`; used as a CSS class.
    pub kind: String,
    pub message: String,
}

fn set_flash(jar: CookieJar, kind: &str, message: &str) -> CookieJar {
    let value = hex::encode(format!("{}|{}", kind, message));
    jar.add(Cookie::build((FLASH_COOKIE, value)).http_only(true).same_site(SameSite::Lax).path("/").build())
}

pub fn flash_success(jar: CookieJar, message: impl AsRef<str>) -> CookieJar {
    set_flash(jar, "success", message.as_ref())
}

pub fn flash_error(jar: CookieJar, message: impl AsRef<str>) -> CookieJar {
    set_flash(jar, "error", message.as_ref())
}

/// Reads and clears the pending flash message.
pub fn take_flash(jar: CookieJar) -> (CookieJar, Option<Flash>) {
    let Some(raw) = jar.get(FLASH_COOKIE).map(|c| c.value().to_string()) else {
        return (jar, None);
    };
    let jar = jar.remove(Cookie::build((FLASH_COOKIE, "")).path("/").build());
    let flash = hex::decode(raw)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .and_then(|text| {
            text.split_once('|')
                .map(|(kind, message)| Flash { kind: kind.to_string(), message: message.to_string() })
        });
    (jar, flash)
}

/// Redirects back with the error as a flash message when the caller can fix
/// it; anything else becomes an error page.
pub fn redirect_with_error(jar: CookieJar, to: &str, err: BazaarError) -> Result<Response, PageError> {
    if err.is_client_error() && !matches!(err, BazaarError::NotFound(_)) {
        let message = match &err {
            BazaarError::Validation(errors) => errors.join(" "),
            BazaarError::Forbidden(why) | BazaarError::Conflict(why) | BazaarError::PaymentUnavailable(why) => {
                why.clone()
            }
            other => other.to_string(),
        };
        Ok((flash_error(jar, message), Redirect::to(to)).into_response())
    } else {
        Err(PageError(err))
    }
}

fn original_uri(parts: &Parts) -> String {
    let uri = parts.extensions.get::<OriginalUri>().map(|o| &o.0).unwrap_or(&parts.uri);
    uri.path_and_query().map(|pq| pq.as_str().to_string()).unwrap_or_else(|| "/".to_string())
}

fn wants_json(parts: &Parts) -> bool {
    let path = original_uri(parts);
    path.starts_with("/api/")
        || path.starts_with("/admin/api/")
        || parts
            .headers
            .get(ACCEPT)
            .and_then(|v| v.to_str().ok())
            .map_or(false, |v| v.contains("application/json"))
}

#[derive(Debug)]
pub enum AuthRejection {
    Login { return_url: String, json: bool },
    Blocked { reason: String, json: bool },
    NotAdmin { json: bool },
    Failed { error: BazaarError, json: bool },
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        match self {
            AuthRejection::Login { json: true, .. } => ApiError::from(BazaarError::Unauthorized).into_response(),
            AuthRejection::Login { return_url, json: false } => {
                Redirect::to(&format!("/account/login?return_url={}", encode_query(&return_url))).into_response()
            }
            AuthRejection::Blocked { reason, json } => {
                let jar = clear_session(CookieJar::new());
                if json {
                    let err = ApiError::new(StatusCode::FORBIDDEN, "ACCOUNT_BLOCKED", reason);
                    (jar, err).into_response()
                } else {
                    let to = format!("/account/login?blocked=true&reason={}", encode_query(&reason));
                    (jar, Redirect::to(&to)).into_response()
                }
            }
            AuthRejection::NotAdmin { json } => {
                let err = BazaarError::forbidden("administrators only");
                if json {
                    ApiError::from(err).into_response()
                } else {
                    PageError(err).into_response()
                }
            }
            AuthRejection::Failed { error, json: true } => ApiError::from(error).into_response(),
            AuthRejection::Failed { error, json: false } => PageError(error).into_response(),
        }
    }
}

async fn lookup(parts: &Parts, state: &AppState) -> Result<Option<User>, AuthRejection> {
    let jar = CookieJar::from_headers(&parts.headers);
    let Some(token) = session_token(&jar) else {
        return Ok(None);
    };
    match state.market.resolve_session(&token).await {
        Ok(SessionLookup::Active(user)) => Ok(Some(user)),
        Ok(SessionLookup::Missing) => Ok(None),
        Ok(SessionLookup::Blocked { reason }) => Err(AuthRejection::Blocked { reason, json: wants_json(parts) }),
        Err(error) => {
            warn!(error = %error, "Session lookup failed");
            Err(AuthRejection::Failed { error, json: wants_json(parts) })
        }
    }
}

/// The signed-in user; anonymous requests are sent to the login page.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match lookup(parts, state).await? {
            Some(user) => Ok(CurrentUser(user)),
            None => Err(AuthRejection::Login { return_url: original_uri(parts), json: wants_json(parts) }),
        }
    }
}

/// The signed-in user, if any. Blocked users are still turned away.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<User>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(lookup(parts, state).await?))
    }
}

#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if user.is_admin() {
            Ok(AdminUser(user))
        } else {
            Err(AuthRejection::NotAdmin { json: wants_json(parts) })
        }
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for RequestMeta {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let peer = parts.extensions.get::<ConnectInfo<SocketAddr>>().map(|ci| ci.0.ip().to_string());
        let user_agent = parts.headers.get(USER_AGENT).and_then(|v| v.to_str().ok()).map(str::to_string);
        Ok(RequestMeta { ip_address: forwarded.or(peer), user_agent })
    }
}
