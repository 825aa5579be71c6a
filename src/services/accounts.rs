//! Registration, sign-in and the signed-in user's own profile.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::notifications::AdminAlert;
use super::validation::{is_valid_email, is_valid_phone, password_problems, Validator};
use super::{Marketplace, RequestMeta, Upload};
use crate::config::AdminSeedConfig;
use crate::domain::*;
use crate::error::{BazaarError, Result};
use crate::hub::HubPayload;
use crate::metrics;

pub const DEFAULT_BLOCK_REASON: &str = "Violation of terms and conditions";

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default().hash_password(password.as_bytes(), &salt)?.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(e) => {
            warn!(error = %e, "Stored password hash is unreadable");
            false
        }
    }
}

/// Sessions are looked up by the sha256 of the cookie token, never the token itself.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn new_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Only same-site paths are honoured as post-login destinations.
pub fn safe_return_url(return_url: Option<&str>) -> String {
    match return_url {
        Some(url) if url.starts_with('/') && !url.starts_with("//") && !url.starts_with("/\\") => url.to_string(),
        _ => "/".to_string(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub phone_number: Option<String>,
    pub university_id: Option<Id>,
    pub college_id: Option<Id>,
}

#[derive(Debug, Clone, Default)]
pub struct ProfileForm {
    pub full_name: String,
    pub email: String,
    pub phone_number: Option<String>,
    pub address: Option<String>,
    pub university_id: Option<Id>,
    pub college_id: Option<Id>,
}

/// A freshly issued session. `token` goes into the cookie.
#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub user: User,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum SessionLookup {
    Missing,
    Active(User),
    /// The user was blocked after signing in; the session is gone now.
    Blocked { reason: String },
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl Marketplace {
    pub async fn register(&self, form: Registration, meta: &RequestMeta) -> Result<SessionGrant> {
        let email = form.email.trim().to_lowercase();
        let full_name = form.full_name.trim().to_string();
        let phone = trimmed(form.phone_number);

        let mut v = Validator::new();
        v.required("Full name", &full_name)
            .max_len("Full name", &full_name, 100)
            .check(is_valid_email(&email), "Email address is not valid")
            .extend(password_problems(&form.password))
            .check(form.password == form.confirm_password, "Passwords do not match");
        if let Some(phone) = &phone {
            v.check(is_valid_phone(phone), "Phone number is not valid");
        }
        v.finish()?;

        if self.storage.get_user_by_email(&email).await?.is_some() {
            return Err(BazaarError::invalid("Email is already registered"));
        }
        self.check_affiliation(form.university_id, form.college_id).await?;

        let user = self
            .storage
            .create_user(&NewUser {
                full_name,
                email,
                password_hash: hash_password(&form.password)?,
                role: UserRole::Student,
                phone_number: phone,
                university_id: form.university_id,
                college_id: form.college_id,
            })
            .await?;
        info!(user_id = user.id, "User registered");
        self.log_activity(
            NewActivity::new("Register", Some(user.id))
                .entity("User", user.id)
                .with_meta(meta),
        )
        .await;
        self.start_session(user).await
    }

    pub async fn login(&self, email: &str, password: &str, meta: &RequestMeta) -> Result<SessionGrant> {
        let email = email.trim().to_lowercase();
        let user = match self.storage.get_user_by_email(&email).await? {
            Some(user) if verify_password(password, &user.password_hash) => user,
            _ => {
                metrics::login("invalid");
                return Err(BazaarError::invalid("Invalid login attempt."));
            }
        };

        if user.is_blocked {
            metrics::login("blocked");
            let reason = user.block_reason.clone().unwrap_or_else(|| DEFAULT_BLOCK_REASON.to_string());
            warn!(user_id = user.id, "Blocked user attempted to sign in");
            self.hub.to_admins(HubPayload::SuspiciousActivity {
                user_id: Some(user.id),
                description: format!("Blocked user {} attempted to sign in", user.email),
            });
            return Err(BazaarError::forbidden(format!("Your account has been blocked. Reason: {}", reason)));
        }

        if user.is_suspended_at(Utc::now()) {
            metrics::login("suspended");
            let message = match user.suspended_until {
                Some(until) => format!("Your account is suspended until {}.", until.format("%Y-%m-%d %H:%M UTC")),
                None => "Your account is suspended.".to_string(),
            };
            return Err(BazaarError::forbidden(message));
        }

        metrics::login("success");
        info!(user_id = user.id, "User signed in");
        self.log_activity(NewActivity::new("Login", Some(user.id)).with_meta(meta)).await;
        self.start_session(user).await
    }

    async fn start_session(&self, user: User) -> Result<SessionGrant> {
        let token = new_token();
        let expires_at = Utc::now() + self.session_ttl;
        self.storage.create_session(&hash_token(&token), user.id, expires_at).await?;
        Ok(SessionGrant { user, token, expires_at })
    }

    pub async fn logout(&self, token: &str) -> Result<()> {
        self.storage.delete_session(&hash_token(token)).await
    }

    /// Resolves a session cookie. A blocked user loses every session here.
    pub async fn resolve_session(&self, token: &str) -> Result<SessionLookup> {
        let Some(user) = self.storage.session_user(&hash_token(token), Utc::now()).await? else {
            return Ok(SessionLookup::Missing);
        };
        if user.is_blocked {
            self.storage.delete_user_sessions(user.id).await?;
            let reason = user.block_reason.unwrap_or_else(|| DEFAULT_BLOCK_REASON.to_string());
            return Ok(SessionLookup::Blocked { reason });
        }
        Ok(SessionLookup::Active(user))
    }

    /// Whether a live connection opened by this user may keep receiving pushes.
    pub async fn may_stay_connected(&self, user_id: Id) -> Result<bool> {
        Ok(self.storage.get_user(user_id).await?.map_or(false, |u| !u.is_blocked))
    }

    pub async fn update_profile(&self, user: &User, form: ProfileForm, picture: Option<Upload>) -> Result<User> {
        let email = form.email.trim().to_lowercase();
        let full_name = form.full_name.trim().to_string();
        let phone = trimmed(form.phone_number);
        let address = trimmed(form.address);

        let mut v = Validator::new();
        v.required("Full name", &full_name)
            .max_len("Full name", &full_name, 100)
            .check(is_valid_email(&email), "Email address is not valid");
        if let Some(phone) = &phone {
            v.check(is_valid_phone(phone), "Phone number is not valid");
        }
        if let Some(address) = &address {
            v.max_len("Address", address, 500);
        }
        v.finish()?;

        if email != user.email {
            if let Some(existing) = self.storage.get_user_by_email(&email).await? {
                if existing.id != user.id {
                    return Err(BazaarError::invalid("Email is already registered"));
                }
            }
        }
        self.check_affiliation(form.university_id, form.college_id).await?;

        let profile_picture_url = match &picture {
            Some(upload) => {
                self.uploads.check_images(std::slice::from_ref(upload))?;
                let url = self.uploads.save_profile_picture(user.id, upload).await?;
                if let Some(old) = &user.profile_picture_url {
                    self.uploads.remove(old).await;
                }
                Some(url)
            }
            None => None,
        };

        self.storage
            .update_profile(
                user.id,
                &ProfileUpdate {
                    full_name,
                    email,
                    phone_number: phone,
                    address,
                    university_id: form.university_id,
                    college_id: form.college_id,
                    profile_picture_url,
                },
            )
            .await?;
        self.log_activity(NewActivity::new("UpdateProfile", Some(user.id)).entity("User", user.id)).await;
        self.storage.get_user(user.id).await?.ok_or_else(|| BazaarError::not_found("user"))
    }

    pub async fn change_password(&self, user: &User, current: &str, new: &str, confirm: &str) -> Result<()> {
        let mut v = Validator::new();
        v.check(verify_password(current, &user.password_hash), "Current password is incorrect")
            .extend(password_problems(new))
            .check(new == confirm, "Passwords do not match");
        v.finish()?;

        self.storage.set_password_hash(user.id, &hash_password(new)?).await?;
        info!(user_id = user.id, "Password changed");
        self.log_activity(NewActivity::new("ChangePassword", Some(user.id))).await;
        Ok(())
    }

    pub async fn request_verification(
        &self,
        user: &User,
        student_id_number: &str,
        document_url: Option<&str>,
    ) -> Result<StudentVerification> {
        let number = student_id_number.trim();
        let document_url = document_url.map(str::trim).filter(|u| !u.is_empty());
        Validator::new()
            .required("Student ID number", number)
            .max_len("Student ID number", number, 50)
            .check(!user.is_verified, "Your account is already verified")
            .finish()?;

        let verification = self.storage.create_verification(user.id, number, document_url).await?;
        info!(user_id = user.id, verification_id = verification.id, "Verification requested");
        self.alert_admins(
            AdminAlert::new(
                "New Verification Request",
                format!("{} requested student verification", user.full_name),
            )
            .link("/admin/verifications")
            .event(HubPayload::NewVerification { verification_id: verification.id }),
        )
        .await;
        Ok(verification)
    }

    /// Makes sure the configured admin account exists with the Admin role.
    pub async fn ensure_admin(&self, seed: &AdminSeedConfig) -> Result<User> {
        let email = seed.email.trim().to_lowercase();
        if let Some(existing) = self.storage.get_user_by_email(&email).await? {
            if !existing.is_admin() {
                self.storage.set_role(existing.id, UserRole::Admin).await?;
                info!(user_id = existing.id, "Promoted seeded account to admin");
            }
            return self.storage.get_user(existing.id).await?.ok_or_else(|| BazaarError::not_found("user"));
        }

        let user = self
            .storage
            .create_user(&NewUser {
                full_name: seed.full_name.clone(),
                email,
                password_hash: hash_password(&seed.password)?,
                role: UserRole::Admin,
                phone_number: None,
                university_id: None,
                college_id: None,
            })
            .await?;
        info!(user_id = user.id, email = %user.email, "Seeded admin account");
        Ok(user)
    }

    /// A college must exist and belong to the chosen university.
    async fn check_affiliation(&self, university_id: Option<Id>, college_id: Option<Id>) -> Result<()> {
        if let Some(university_id) = university_id {
            if self.storage.get_university(university_id).await?.is_none() {
                return Err(BazaarError::invalid("Selected university does not exist"));
            }
        }
        if let Some(college_id) = college_id {
            let college = self
                .storage
                .get_college(college_id)
                .await?
                .ok_or_else(|| BazaarError::invalid("Selected college does not exist"))?;
            if university_id != Some(college.university_id) {
                return Err(BazaarError::invalid("Selected college does not belong to the selected university"));
            }
        }
        Ok(())
    }
}
