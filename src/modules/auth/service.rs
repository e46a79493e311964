//! Login state machine, two-factor management and password recovery.
//!
//! ```text
//! CredentialsPending -> TwoFactorPending -> Authenticated
//!                    -> SetupRequired    -> Authenticated
//!                    -> Authenticated         (exempt accounts only)
//! ```

use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use uuid::Uuid;

use super::interface::{
    AuditRepository, AuthError, BackupCodeRepository, RecoveryCodeRepository, Result,
    TwoFactorRepository, UserRepository,
};
use super::model::{AuditAction, AuditEntry, BackupCode, RecoveryCode, TwoFactorSecret, User};
use crate::config::AuthConfig;
use crate::services::codes;
use crate::services::hashing::{self, constant_time_eq, hash_code};
use crate::services::jwt::{JwtService, TokenKind};
use crate::services::rate_limit::{self, RateLimitStore};
use crate::services::totp::{TotpConfig, TotpService, TotpSetup};

lazy_static! {
    static ref USERNAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_.-]{3,32}$").expect("valid regex");
}

/// The persistence seams of the auth flows.
#[derive(Clone)]
pub struct AuthRepositories {
    pub users: Arc<dyn UserRepository>,
    pub two_factor: Arc<dyn TwoFactorRepository>,
    pub backup_codes: Arc<dyn BackupCodeRepository>,
    pub recovery_codes: Arc<dyn RecoveryCodeRepository>,
    pub audit: Arc<dyn AuditRepository>,
}

impl AuthRepositories {
    /// Uses one store for every repository.
    pub fn from_store<S>(store: S) -> Self
    where
        S: UserRepository
            + TwoFactorRepository
            + BackupCodeRepository
            + RecoveryCodeRepository
            + AuditRepository
            + Clone
            + 'static,
    {
        Self {
            users: Arc::new(store.clone()),
            two_factor: Arc::new(store.clone()),
            backup_codes: Arc::new(store.clone()),
            recovery_codes: Arc::new(store.clone()),
            audit: Arc::new(store),
        }
    }
}

#[derive(Debug)]
pub enum LoginOutcome {
    Authenticated { user: User, session_token: String },
    TwoFactorPending { user_id: String, pending_token: String },
    SetupRequired { user_id: String, pending_token: String },
}

#[derive(Debug)]
pub struct Registration {
    pub user: User,
    pub recovery_code: String,
}

#[derive(Debug)]
pub struct Enrollment {
    pub setup: TotpSetup,
    pub backup_codes: Vec<String>,
}

pub struct NewPassword<'a> {
    pub password: &'a str,
    pub password_confirm: &'a str,
}

pub struct AuthService {
    repos: AuthRepositories,
    rate_limiter: Arc<dyn RateLimitStore>,
    jwt: Arc<JwtService>,
    totp: TotpService,
    config: AuthConfig,
}

impl AuthService {
    pub fn new(
        repos: AuthRepositories,
        rate_limiter: Arc<dyn RateLimitStore>,
        jwt: Arc<JwtService>,
        config: AuthConfig,
    ) -> Self {
        Self {
            totp: TotpService::new(TotpConfig::new(config.app_name.clone())),
            repos,
            rate_limiter,
            jwt,
            config,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    // =========================================================================
    // REGISTRATION & LOGIN
    // =========================================================================

    pub async fn register(
        &self,
        email: &str,
        username: &str,
        password: NewPassword<'_>,
    ) -> Result<Registration> {
        let email = normalize_email(email);
        let username = username.trim();

        if !USERNAME_RE.is_match(username) {
            return Err(AuthError::Validation(
                "Username may only contain letters, digits, '.', '_' and '-'".into(),
            ));
        }
        validate_new_password(&password)?;

        if self.repos.users.exists(&email, username).await? {
            return Err(AuthError::AccountExists);
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4().to_string(),
            email,
            username: username.to_string(),
            password_hash: hashing::hash_password(password.password)?,
            is_active: true,
            is_admin: false,
            is_moderator: false,
            two_factor_exempt: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        self.repos.users.create(&user).await?;

        let recovery_code = codes::generate_recovery_code();
        self.repos
            .recovery_codes
            .create(&RecoveryCode {
                user_id: user.id.clone(),
                code_hash: hash_code(&recovery_code),
                created_at: now,
            })
            .await?;

        self.audit(Some(&user.id), AuditAction::Register).await;
        tracing::info!(user_id = %user.id, "user registered");

        Ok(Registration {
            user,
            recovery_code,
        })
    }

    /// Checks email and password and decides the next login state.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome> {
        let email = normalize_email(email);
        rate_limit::enforce(self.rate_limiter.as_ref(), &format!("login:{}", email)).await?;

        let user = self.verify_credentials(&email, password).await?;

        let two_factor = self.repos.two_factor.find(&user.id).await?;
        if two_factor.is_some_and(|secret| secret.enabled) {
            tracing::info!(user_id = %user.id, "password accepted, awaiting second factor");
            return Ok(LoginOutcome::TwoFactorPending {
                pending_token: self.jwt.create_pending_token(&user, TokenKind::TwoFactor)?,
                user_id: user.id,
            });
        }

        if user.two_factor_exempt || !self.config.require_two_factor {
            let session_token = self.jwt.create_session_token(&user)?;
            self.audit(Some(&user.id), AuditAction::Login).await;
            tracing::info!(user_id = %user.id, "login without second factor (exempt)");
            return Ok(LoginOutcome::Authenticated {
                user,
                session_token,
            });
        }

        tracing::info!(user_id = %user.id, "password accepted, 2FA enrollment required");
        Ok(LoginOutcome::SetupRequired {
            pending_token: self.jwt.create_pending_token(&user, TokenKind::Setup)?,
            user_id: user.id,
        })
    }

    /// Unknown, inactive and wrong-password cases are indistinguishable.
    async fn verify_credentials(&self, email: &str, password: &str) -> Result<User> {
        let Some(user) = self.repos.users.find_by_email(email).await? else {
            hashing::verify_dummy_password(password);
            return Err(AuthError::InvalidCredentials);
        };

        let password_ok = hashing::verify_password(password, &user.password_hash)?;
        if !password_ok || !user.is_usable() {
            self.audit(Some(&user.id), AuditAction::LoginFailed).await;
            return Err(AuthError::InvalidCredentials);
        }

        Ok(user)
    }

    /// Second login step: `claimed_user_id` from the body must match the
    /// pending token's subject.
    pub async fn verify_two_factor(
        &self,
        pending_user_id: &str,
        claimed_user_id: &str,
        code: &str,
    ) -> Result<(User, String)> {
        if pending_user_id != claimed_user_id {
            return Err(AuthError::Unauthenticated);
        }
        rate_limit::enforce(self.rate_limiter.as_ref(), &format!("2fa:{}", pending_user_id))
            .await?;

        let user = self.load_usable_user(pending_user_id).await?;
        let secret = self.enabled_secret(&user.id).await?;
        self.check_second_factor(&secret, code).await?;

        let session_token = self.jwt.create_session_token(&user)?;
        self.audit(Some(&user.id), AuditAction::Login).await;
        tracing::info!(user_id = %user.id, "login completed with second factor");

        Ok((user, session_token))
    }

    pub fn session_token(&self, user: &User) -> Result<String> {
        Ok(self.jwt.create_session_token(user)?)
    }

    pub async fn logout(&self, user_id: Option<&str>) {
        if let Some(user_id) = user_id {
            self.audit(Some(user_id), AuditAction::Logout).await;
            tracing::info!(user_id, "logged out");
        }
    }

    pub async fn current_user(&self, user_id: &str) -> Result<User> {
        self.load_usable_user(user_id).await
    }

    // =========================================================================
    // TWO-FACTOR MANAGEMENT
    // =========================================================================

    /// Stages a new secret and backup codes. Nothing is active until `enable`.
    pub async fn setup_two_factor(&self, user_id: &str) -> Result<Enrollment> {
        let user = self.load_usable_user(user_id).await?;

        if let Some(existing) = self.repos.two_factor.find(&user.id).await? {
            if existing.enabled {
                return Err(AuthError::TwoFactorAlreadyEnabled);
            }
        }

        let setup = self.totp.generate_setup(&user.username)?;
        let backup_codes = codes::generate_backup_codes();
        let now = Utc::now();

        let secret = TwoFactorSecret {
            user_id: user.id.clone(),
            secret: setup.secret.clone(),
            enabled: false,
            last_totp_step: None,
            created_at: now,
            enabled_at: None,
        };
        self.repos
            .two_factor
            .stage(&secret, &backup_code_rows(&user.id, &backup_codes))
            .await?;

        self.audit(Some(&user.id), AuditAction::TwoFactorSetup).await;
        tracing::info!(user_id = %user.id, "2FA secret staged");

        Ok(Enrollment {
            setup,
            backup_codes,
        })
    }

    /// Confirms the staged secret with a TOTP code and activates it.
    pub async fn enable_two_factor(&self, user_id: &str, code: &str) -> Result<User> {
        let user = self.load_usable_user(user_id).await?;

        let secret = self
            .repos
            .two_factor
            .find(&user.id)
            .await?
            .ok_or(AuthError::TwoFactorNotPending)?;
        if secret.enabled {
            return Err(AuthError::TwoFactorAlreadyEnabled);
        }

        self.check_totp(&secret, code).await?;

        if !self.repos.two_factor.activate(&user.id).await? {
            return Err(AuthError::TwoFactorAlreadyEnabled);
        }

        self.audit(Some(&user.id), AuditAction::TwoFactorEnabled).await;
        tracing::info!(user_id = %user.id, "2FA enabled");
        Ok(user)
    }

    pub async fn disable_two_factor(&self, user_id: &str, password: &str) -> Result<()> {
        rate_limit::enforce(self.rate_limiter.as_ref(), &format!("disable:{}", user_id)).await?;
        let user = self.load_usable_user(user_id).await?;

        if !hashing::verify_password(password, &user.password_hash)? {
            return Err(AuthError::InvalidCredentials);
        }
        self.enabled_secret(&user.id).await?;

        self.repos.two_factor.delete(&user.id).await?;
        self.audit(Some(&user.id), AuditAction::TwoFactorDisabled).await;
        tracing::info!(user_id = %user.id, "2FA disabled");
        Ok(())
    }

    /// Replaces every backup code. Requires a TOTP code, not a backup code.
    pub async fn regenerate_backup_codes(&self, user_id: &str, code: &str) -> Result<Vec<String>> {
        rate_limit::enforce(self.rate_limiter.as_ref(), &format!("2fa:{}", user_id)).await?;
        let user = self.load_usable_user(user_id).await?;
        let secret = self.enabled_secret(&user.id).await?;
        self.check_totp(&secret, code).await?;

        let backup_codes = codes::generate_backup_codes();
        self.repos
            .backup_codes
            .replace_for_user(&user.id, &backup_code_rows(&user.id, &backup_codes))
            .await?;

        self.audit(Some(&user.id), AuditAction::BackupCodesRegenerated).await;
        tracing::info!(user_id = %user.id, "backup codes regenerated");
        Ok(backup_codes)
    }

    /// Removes another user's 2FA. Role is read from the store, not the token.
    pub async fn reset_two_factor(&self, admin_id: &str, target_id: &str) -> Result<()> {
        let admin = self.load_usable_user(admin_id).await?;
        if !admin.is_admin {
            return Err(AuthError::Forbidden);
        }

        let target = self
            .repos
            .users
            .find_by_id(target_id)
            .await?
            .ok_or_else(|| AuthError::Validation("User not found".into()))?;

        self.repos.two_factor.delete(&target.id).await?;
        self.audit(Some(&target.id), AuditAction::TwoFactorReset).await;
        tracing::warn!(admin_id = %admin.id, user_id = %target.id, "2FA reset by admin");
        Ok(())
    }

    // =========================================================================
    // PASSWORD RECOVERY
    // =========================================================================

    /// First recovery step. Returns a masked email once the recovery code matches.
    pub async fn verify_recovery(&self, email: &str, recovery_code: &str) -> Result<String> {
        let email = normalize_email(email);
        rate_limit::enforce(self.rate_limiter.as_ref(), &format!("recover:{}", email)).await?;

        let (user, _) = self.match_recovery_code(&email, recovery_code).await?;
        Ok(mask_email(&user.email))
    }

    /// Second recovery step. Returns the rotated recovery code.
    pub async fn recover_password(
        &self,
        email: &str,
        recovery_code: &str,
        code: &str,
        password: NewPassword<'_>,
    ) -> Result<String> {
        let email = normalize_email(email);
        rate_limit::enforce(self.rate_limiter.as_ref(), &format!("recover:{}", email)).await?;
        validate_new_password(&password)?;

        let (user, stored) = self.match_recovery_code(&email, recovery_code).await?;
        let secret = self.enabled_secret(&user.id).await?;
        // Hashed before the second factor so a hashing failure burns no code.
        let password_hash = hashing::hash_password(password.password)?;
        self.check_second_factor(&secret, code).await?;

        let new_code = codes::generate_recovery_code();
        let redeemed = self
            .repos
            .recovery_codes
            .redeem(&user.id, &stored.code_hash, &hash_code(&new_code), &password_hash)
            .await?;
        if !redeemed {
            // Another recovery finished first with the same code.
            return Err(AuthError::InvalidCredentials);
        }

        self.audit(Some(&user.id), AuditAction::PasswordRecovered).await;
        tracing::info!(user_id = %user.id, "password recovered, recovery code rotated");
        Ok(new_code)
    }

    async fn match_recovery_code(&self, email: &str, recovery_code: &str) -> Result<(User, RecoveryCode)> {
        let user = self
            .repos
            .users
            .find_by_email(email)
            .await?
            .filter(User::is_usable)
            .ok_or(AuthError::InvalidCredentials)?;

        let stored = self
            .repos
            .recovery_codes
            .find(&user.id)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !constant_time_eq(&stored.code_hash, &hash_code(recovery_code)) {
            return Err(AuthError::InvalidCredentials);
        }

        Ok((user, stored))
    }

    // =========================================================================
    // SECOND FACTOR CHECKS
    // =========================================================================

    /// TOTP or backup code, chosen by the shape of `code`.
    async fn check_second_factor(&self, secret: &TwoFactorSecret, code: &str) -> Result<()> {
        if self.totp.looks_like_totp(code) {
            self.check_totp(secret, code).await
        } else {
            self.consume_backup_code(&secret.user_id, code).await
        }
    }

    /// Accepts each TOTP time step at most once.
    async fn check_totp(&self, secret: &TwoFactorSecret, code: &str) -> Result<()> {
        let step = self
            .totp
            .verify(&secret.secret, code)?
            .ok_or(AuthError::InvalidCode)?;
        let step = i64::try_from(step).map_err(|_| AuthError::InvalidCode)?;

        if !self
            .repos
            .two_factor
            .record_totp_step(&secret.user_id, step)
            .await?
        {
            tracing::warn!(user_id = %secret.user_id, step, "TOTP code replayed");
            return Err(AuthError::InvalidCode);
        }

        Ok(())
    }

    async fn consume_backup_code(&self, user_id: &str, code: &str) -> Result<()> {
        let submitted = hash_code(code);
        let stored = self.repos.backup_codes.find_by_user(user_id).await?;

        let mut matched: Option<&BackupCode> = None;
        for candidate in &stored {
            if constant_time_eq(&candidate.code_hash, &submitted) {
                matched = Some(candidate);
            }
        }
        let matched = matched.ok_or(AuthError::InvalidCode)?;

        if matched.used || !self.repos.backup_codes.consume(&matched.id).await? {
            tracing::warn!(user_id, "backup code reused");
            return Err(AuthError::AlreadyUsed);
        }

        self.audit(Some(user_id), AuditAction::BackupCodeUsed).await;
        Ok(())
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    /// Re-reads the user so deactivation takes effect on live sessions.
    async fn load_usable_user(&self, user_id: &str) -> Result<User> {
        let user = self
            .repos
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::Unauthenticated)?;

        if !user.is_usable() {
            return Err(AuthError::AccountInactive);
        }
        Ok(user)
    }

    async fn enabled_secret(&self, user_id: &str) -> Result<TwoFactorSecret> {
        self.repos
            .two_factor
            .find(user_id)
            .await?
            .filter(|secret| secret.enabled)
            .ok_or(AuthError::TwoFactorNotEnabled)
    }

    /// Audit failures are logged, never surfaced to the caller.
    async fn audit(&self, user_id: Option<&str>, action: AuditAction) {
        if let Err(e) = self.repos.audit.record(&AuditEntry::new(user_id, action)).await {
            tracing::error!(error = %e, action = action.as_str(), "failed to record audit entry");
        }
    }
}

fn backup_code_rows(user_id: &str, plain: &[String]) -> Vec<BackupCode> {
    let now = Utc::now();
    plain
        .iter()
        .map(|code| BackupCode {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            code_hash: hash_code(code),
            used: false,
            used_at: None,
            created_at: now,
        })
        .collect()
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_new_password(password: &NewPassword<'_>) -> Result<()> {
    if password.password != password.password_confirm {
        return Err(AuthError::Validation("Passwords do not match".into()));
    }
    if password.password.chars().count() < 8 {
        return Err(AuthError::Validation(
            "Password must be at least 8 characters".into(),
        ));
    }
    Ok(())
}

/// `jane@example.com` -> `j***@example.com`
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first = local.chars().next().map(String::from).unwrap_or_default();
            format!("{}***@{}", first, domain)
        }
        None => "***".to_string(),
    }
}
