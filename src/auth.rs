//! Driver and operator authentication.
//!
//! Authentication is per-request: driver endpoints carry the driver's email
//! and password, checked against the stored bcrypt hash; admin endpoints
//! carry a shared token compared in constant time. Password reset uses
//! single-use, expiring tokens stored hashed.

use crate::mailer::Mailer;
use crate::store::EntryStore;
use crate::types::Driver;
use base64::Engine;
use chrono::{Duration, Utc};
use rand::RngCore;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for auth operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Authentication error.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Email unknown or password wrong. Deliberately indistinct.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Registration is still awaiting admin review.
    #[error("registration is awaiting approval")]
    AccountPending,

    /// Registration was rejected.
    #[error("registration was rejected")]
    AccountRejected,

    /// Reset token wrong or already used.
    #[error("invalid reset token")]
    TokenInvalid,

    /// Reset token expired.
    #[error("reset token has expired")]
    TokenExpired,

    /// Store failure underneath an auth check.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Hashing failure.
    #[error("credential hashing failed")]
    Hashing,
}

impl From<crate::store::StoreError> for AuthError {
    fn from(err: crate::store::StoreError) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

/// Reset-token lifetime.
const RESET_TOKEN_TTL_HOURS: i64 = 1;

/// Hash a password for storage.
///
/// # Errors
///
/// Returns [`AuthError::Hashing`] when bcrypt fails.
pub fn hash_password(plain: &str) -> Result<String> {
    bcrypt::hash(plain, bcrypt::DEFAULT_COST).map_err(|_| AuthError::Hashing)
}

/// Check a password against a stored hash.
#[must_use]
pub fn verify_password(plain: &str, hash: &str) -> bool {
    bcrypt::verify(plain, hash).unwrap_or(false)
}

/// Constant-time shared-secret comparison for the admin token.
#[must_use]
pub fn admin_token_matches(provided: &str, expected: &str) -> bool {
    !expected.is_empty()
        && constant_time_eq::constant_time_eq(provided.as_bytes(), expected.as_bytes())
}

/// Driver authentication and password-reset flows.
pub struct AuthService {
    store: Arc<dyn EntryStore>,
    mailer: Arc<dyn Mailer>,
    /// Base URL for reset links, e.g. `https://entries.example`.
    reset_base_url: String,
}

impl AuthService {
    /// Wire up the service.
    #[must_use]
    pub fn new(store: Arc<dyn EntryStore>, mailer: Arc<dyn Mailer>, reset_base_url: String) -> Self {
        Self {
            store,
            mailer,
            reset_base_url,
        }
    }

    /// Authenticate a driver by email and password.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidCredentials`] for unknown email or wrong password
    /// (indistinguishable on purpose); [`AuthError::AccountPending`] /
    /// [`AuthError::AccountRejected`] for unapproved registrations.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Driver> {
        let Some(driver) = self.store.driver_by_email(email).await? else {
            // Burn comparable time so unknown emails are not distinguishable.
            let _ = verify_password(password, DUMMY_HASH);
            return Err(AuthError::InvalidCredentials);
        };
        if !verify_password(password, &driver.password_hash) {
            return Err(AuthError::InvalidCredentials);
        }
        match driver.approval_status {
            crate::types::ApprovalStatus::Approved => Ok(driver),
            crate::types::ApprovalStatus::Pending => Err(AuthError::AccountPending),
            crate::types::ApprovalStatus::Rejected => Err(AuthError::AccountRejected),
        }
    }

    /// Start a password reset: mint a token, store its hash with an expiry,
    /// and email the link. Succeeds silently for unknown emails.
    ///
    /// # Errors
    ///
    /// [`AuthError::StoreUnavailable`] on store failure.
    pub async fn request_password_reset(&self, email: &str) -> Result<()> {
        let Some(driver) = self.store.driver_by_email(email).await? else {
            tracing::debug!("password reset requested for unknown email");
            return Ok(());
        };

        let token = generate_token();
        let token_hash = bcrypt::hash(&token, bcrypt::DEFAULT_COST).map_err(|_| AuthError::Hashing)?;
        let expires = Utc::now() + Duration::hours(RESET_TOKEN_TTL_HOURS);
        self.store
            .set_reset_token(&driver.driver_id, Some(&token_hash), Some(expires))
            .await?;

        let link = format!(
            "{}/reset-password.html?token={}&email={}",
            self.reset_base_url,
            urlencoding::encode(&token),
            urlencoding::encode(&driver.email),
        );
        if let Err(error) = self.mailer.send_password_reset(&driver.email, &link).await {
            tracing::warn!(driver_id = %driver.driver_id, %error, "password reset email failed");
        }
        Ok(())
    }

    /// Complete a password reset.
    ///
    /// # Errors
    ///
    /// [`AuthError::TokenInvalid`] / [`AuthError::TokenExpired`] for bad
    /// tokens, [`AuthError::Hashing`] / [`AuthError::StoreUnavailable`]
    /// otherwise.
    pub async fn reset_password(
        &self,
        email: &str,
        token: &str,
        new_password: &str,
    ) -> Result<()> {
        let driver = self
            .store
            .driver_by_email(email)
            .await?
            .ok_or(AuthError::TokenInvalid)?;
        let token_hash = driver
            .reset_token_hash
            .as_deref()
            .ok_or(AuthError::TokenInvalid)?;
        if !bcrypt::verify(token, token_hash).unwrap_or(false) {
            return Err(AuthError::TokenInvalid);
        }
        match driver.reset_token_expires {
            Some(expires) if expires > Utc::now() => {}
            _ => return Err(AuthError::TokenExpired),
        }

        let password_hash = hash_password(new_password)?;
        self.store
            .update_driver_password(&driver.driver_id, &password_hash)
            .await?;
        tracing::info!(driver_id = %driver.driver_id, "password reset completed");
        Ok(())
    }
}

/// A fixed bcrypt hash used to equalise timing for unknown emails.
const DUMMY_HASH: &str = "$2b$12$C6UzMDM.H6dfI/f/IKcEeO7ZBlLSrnDuiGm3dJWzoY3rYDU4NwrUe";

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn password_round_trip() {
        let hash = hash_password("TestPass123!").unwrap();
        assert!(verify_password("TestPass123!", &hash));
        assert!(!verify_password("wrong", &hash));
    }

    #[test]
    fn admin_token_comparison() {
        assert!(admin_token_matches("secret", "secret"));
        assert!(!admin_token_matches("secrex", "secret"));
        assert!(!admin_token_matches("", ""), "empty secret never matches");
    }

    #[test]
    fn tokens_are_unique_and_url_safe() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
