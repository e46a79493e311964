use async_trait::async_trait;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use super::model::{AuditEntry, BackupCode, RecoveryCode, TwoFactorSecret, User};
use super::schema::ErrorResponse;

// =============================================================================
// REPOSITORY TRAITS
// =============================================================================

pub type Result<T> = std::result::Result<T, AuthError>;

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// `AccountExists` when the email or username is already taken.
    async fn create(&self, user: &User) -> Result<()>;
    async fn find_by_id(&self, id: &str) -> Result<Option<User>>;
    /// Emails are stored lowercased; callers pass them lowercased.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn exists(&self, email: &str, username: &str) -> Result<bool>;
}

#[async_trait]
pub trait TwoFactorRepository: Send + Sync {
    async fn find(&self, user_id: &str) -> Result<Option<TwoFactorSecret>>;
    /// Replaces any staged secret and all backup codes of the user.
    async fn stage(&self, secret: &TwoFactorSecret, backup_codes: &[BackupCode]) -> Result<()>;
    /// Flips a staged secret to enabled. `false` if nothing was staged.
    async fn activate(&self, user_id: &str) -> Result<bool>;
    /// Advances `last_totp_step` to `step` only if `step` is newer. `false`
    /// means the step was already used.
    async fn record_totp_step(&self, user_id: &str, step: i64) -> Result<bool>;
    /// Removes the secret and every backup code.
    async fn delete(&self, user_id: &str) -> Result<()>;
}

#[async_trait]
pub trait BackupCodeRepository: Send + Sync {
    async fn find_by_user(&self, user_id: &str) -> Result<Vec<BackupCode>>;
    async fn replace_for_user(&self, user_id: &str, codes: &[BackupCode]) -> Result<()>;
    /// Marks an unused code used. `false` if it was already used.
    async fn consume(&self, id: &str) -> Result<bool>;
}

#[async_trait]
pub trait RecoveryCodeRepository: Send + Sync {
    async fn create(&self, code: &RecoveryCode) -> Result<()>;
    async fn find(&self, user_id: &str) -> Result<Option<RecoveryCode>>;
    /// Swaps the code hash to `new_hash` and stores `password_hash` as one
    /// unit, only while the stored hash still equals `old_hash`. `false` means
    /// nothing was written.
    async fn redeem(
        &self,
        user_id: &str,
        old_hash: &str,
        new_hash: &str,
        password_hash: &str,
    ) -> Result<bool>;
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> Result<()>;
}

// =============================================================================
// ERROR TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid code")]
    InvalidCode,

    #[error("Account inactive")]
    AccountInactive,

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Forbidden")]
    Forbidden,

    #[error("Code already used")]
    AlreadyUsed,

    #[error("Too many attempts")]
    RateLimited,

    #[error("Email or username already exists")]
    AccountExists,

    #[error("{0}")]
    Validation(String),

    #[error("2FA not enabled")]
    TwoFactorNotEnabled,

    #[error("2FA setup not started")]
    TwoFactorNotPending,

    #[error("2FA already enabled")]
    TwoFactorAlreadyEnabled,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::InvalidCode => StatusCode::UNAUTHORIZED,
            Self::AccountInactive => StatusCode::FORBIDDEN,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::AlreadyUsed => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::AccountExists => StatusCode::CONFLICT,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::TwoFactorNotEnabled => StatusCode::BAD_REQUEST,
            Self::TwoFactorNotPending => StatusCode::BAD_REQUEST,
            Self::TwoFactorAlreadyEnabled => StatusCode::CONFLICT,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<argon2::password_hash::Error> for AuthError {
    fn from(e: argon2::password_hash::Error) -> Self {
        Self::Internal(format!("Hashing error: {}", e))
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        Self::Internal(format!("Token error: {}", e))
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
            ErrorResponse::new("Internal server error")
        } else {
            ErrorResponse::new(self.to_string())
        };

        (status, Json(body)).into_response()
    }
}
