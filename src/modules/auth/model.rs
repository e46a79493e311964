use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub is_active: bool,
    pub is_admin: bool,
    pub is_moderator: bool,
    /// Legacy account allowed to log in without 2FA.
    pub two_factor_exempt: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_usable(&self) -> bool {
        self.is_active && self.deleted_at.is_none()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TwoFactorSecret {
    pub user_id: String,
    pub secret: String,
    /// False while staged by setup, true once a code has been confirmed.
    pub enabled: bool,
    /// Highest TOTP time step accepted so far.
    pub last_totp_step: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub enabled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct BackupCode {
    pub id: String,
    pub user_id: String,
    pub code_hash: String,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct RecoveryCode {
    pub user_id: String,
    pub code_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Register,
    Login,
    LoginFailed,
    TwoFactorSetup,
    TwoFactorEnabled,
    TwoFactorDisabled,
    TwoFactorReset,
    BackupCodeUsed,
    BackupCodesRegenerated,
    PasswordRecovered,
    Logout,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Login => "login",
            Self::LoginFailed => "login_failed",
            Self::TwoFactorSetup => "two_factor_setup",
            Self::TwoFactorEnabled => "two_factor_enabled",
            Self::TwoFactorDisabled => "two_factor_disabled",
            Self::TwoFactorReset => "two_factor_reset",
            Self::BackupCodeUsed => "backup_code_used",
            Self::BackupCodesRegenerated => "backup_codes_regenerated",
            Self::PasswordRecovered => "password_recovered",
            Self::Logout => "logout",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub id: String,
    pub user_id: Option<String>,
    pub action: AuditAction,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(user_id: Option<&str>, action: AuditAction) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.map(str::to_string),
            action,
            created_at: Utc::now(),
        }
    }
}
