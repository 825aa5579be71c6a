//! Mapping marketplace errors onto HTTP responses: JSON bodies for API
//! routes, an error page for the storefront.

use askama::Template;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use tracing::error;

use super::templates::{ErrorTemplate, Layout};
use crate::error::BazaarError;

#[derive(Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

/// Status and machine-readable code for an error. Internal errors get a
/// generic message; the real one is only logged.
fn classify(err: &BazaarError) -> (StatusCode, &'static str, String) {
    match err {
        BazaarError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string()),
        BazaarError::Forbidden(why) => (StatusCode::FORBIDDEN, "FORBIDDEN", why.clone()),
        BazaarError::Unauthorized => (StatusCode::UNAUTHORIZED, "AUTH_REQUIRED", err.to_string()),
        BazaarError::Validation(errors) => {
            (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_FAILED", errors.join(" "))
        }
        BazaarError::Conflict(message) => (StatusCode::CONFLICT, "CONFLICT", message.clone()),
        BazaarError::PaymentUnavailable(message) => {
            (StatusCode::PAYMENT_REQUIRED, "PAYMENT_UNAVAILABLE", message.clone())
        }
        BazaarError::InvalidTransition { .. } => (StatusCode::CONFLICT, "INVALID_TRANSITION", err.to_string()),
        _ => {
            error!(error = %err, "Request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "Something went wrong. Please try again.".into())
        }
    }
}

/// JSON error `{ code, message, details }`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self { status, code, message: message.into(), details: None }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<BazaarError> for ApiError {
    fn from(err: BazaarError) -> Self {
        let (status, code, message) = classify(&err);
        let api = ApiError::new(status, code, message);
        match err {
            BazaarError::Validation(errors) => api.with_details(Value::from(errors)),
            _ => api,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = ErrorResponse { code: self.code, message: self.message, details: self.details };
        (self.status, Json(payload)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Storefront error, rendered as a page.
#[derive(Debug)]
pub struct PageError(pub BazaarError);

impl From<BazaarError> for PageError {
    fn from(err: BazaarError) -> Self {
        PageError(err)
    }
}

impl From<askama::Error> for PageError {
    fn from(err: askama::Error) -> Self {
        PageError(BazaarError::Template(err))
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        if matches!(self.0, BazaarError::Unauthorized) {
            return Redirect::to("/account/login").into_response();
        }
        let (status, _, message) = classify(&self.0);
        let page = ErrorTemplate {
            layout: Layout::default(),
            status: status.as_u16(),
            title: status.canonical_reason().unwrap_or("Error").to_string(),
            message,
        };
        match page.render() {
            Ok(html) => (status, Html(html)).into_response(),
            Err(e) => {
                error!(error = %e, "Error page failed to render");
                (status, status.canonical_reason().unwrap_or("Error")).into_response()
            }
        }
    }
}

pub type PageResult<T = Response> = std::result::Result<T, PageError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderStatus;

    #[test]
    fn client_errors_keep_their_message() {
        let api = ApiError::from(BazaarError::conflict("University already exists"));
        assert_eq!(api.status, StatusCode::CONFLICT);
        assert_eq!(api.message, "University already exists");

        let api = ApiError::from(BazaarError::PaymentUnavailable("no cards".into()));
        assert_eq!(api.status, StatusCode::PAYMENT_REQUIRED);

        let api = ApiError::from(BazaarError::InvalidTransition { from: OrderStatus::Pending, to: OrderStatus::Shipped });
        assert_eq!(api.code, "INVALID_TRANSITION");
    }

    #[test]
    fn validation_lists_details() {
        let api = ApiError::from(BazaarError::Validation(vec!["Name is required".into(), "Bad email".into()]));
        assert_eq!(api.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(api.details, Some(serde_json::json!(["Name is required", "Bad email"])));
    }

    #[test]
    fn internal_errors_are_not_echoed() {
        let api = ApiError::from(BazaarError::Storage("disk on fire at /var/db".into()));
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!api.message.contains("/var/db"));
    }

    #[test]
    fn pages_render_with_status() {
        let response = PageError(BazaarError::not_found("product")).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = PageError(BazaarError::Unauthorized).into_response();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }
}
