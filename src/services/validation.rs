use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{BazaarError, Result};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex"));

static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?[0-9][0-9 \-]{5,18}$").expect("phone regex"));

pub const MIN_PASSWORD_LEN: usize = 6;

pub fn is_valid_email(value: &str) -> bool {
    value.len() <= 256 && EMAIL_RE.is_match(value.trim())
}

pub fn is_valid_phone(value: &str) -> bool {
    value.len() <= 20 && PHONE_RE.is_match(value.trim())
}

/// Problems with `password`, empty when it satisfies the policy.
pub fn password_problems(password: &str) -> Vec<String> {
    let mut problems = Vec::new();
    if password.chars().count() < MIN_PASSWORD_LEN {
        problems.push(format!("Password must be at least {} characters long", MIN_PASSWORD_LEN));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        problems.push("Password must contain at least one digit".to_string());
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        problems.push("Password must contain at least one lowercase letter".to_string());
    }
    problems
}

/// Collects field errors so a form reports all of them at once.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<String>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, ok: bool, message: impl Into<String>) -> &mut Self {
        if !ok {
            self.errors.push(message.into());
        }
        self
    }

    pub fn required(&mut self, field: &str, value: &str) -> &mut Self {
        self.check(!value.trim().is_empty(), format!("{} is required", field))
    }

    pub fn max_len(&mut self, field: &str, value: &str, max: usize) -> &mut Self {
        self.check(
            value.chars().count() <= max,
            format!("{} must be at most {} characters", field, max),
        )
    }

    pub fn extend(&mut self, errors: Vec<String>) -> &mut Self {
        self.errors.extend(errors);
        self
    }

    pub fn finish(&mut self) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(BazaarError::Validation(std::mem::take(&mut self.errors)))
        }
    }
}
