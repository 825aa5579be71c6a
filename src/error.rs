use thiserror::Error;

use crate::domain::status::ParseEnumError;
use crate::domain::OrderStatus;

#[derive(Error, Debug)]
pub enum BazaarError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("authentication required")]
    Unauthorized,

    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("payment unavailable: {0}")]
    PaymentUnavailable(String),

    #[error("cannot change order status from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Template rendering failed: {0}")]
    Template(#[from] askama::Error),

    #[error("Password hashing failed: {0}")]
    PasswordHash(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BazaarError {
    pub fn not_found(what: impl Into<String>) -> Self {
        BazaarError::NotFound(what.into())
    }

    pub fn forbidden(why: impl Into<String>) -> Self {
        BazaarError::Forbidden(why.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        BazaarError::Validation(vec![message.into()])
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        BazaarError::Conflict(message.into())
    }

    /// True for errors caused by the caller rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BazaarError::NotFound(_)
                | BazaarError::Forbidden(_)
                | BazaarError::Unauthorized
                | BazaarError::Validation(_)
                | BazaarError::Conflict(_)
                | BazaarError::PaymentUnavailable(_)
                | BazaarError::InvalidTransition { .. }
        )
    }
}

impl From<ParseEnumError> for BazaarError {
    fn from(err: ParseEnumError) -> Self {
        BazaarError::Validation(vec![err.to_string()])
    }
}

impl From<argon2::password_hash::Error> for BazaarError {
    fn from(err: argon2::password_hash::Error) -> Self {
        BazaarError::PasswordHash(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BazaarError>;
