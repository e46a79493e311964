use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::interface::{
    AuditRepository, AuthError, BackupCodeRepository, RecoveryCodeRepository, Result,
    TwoFactorRepository, UserRepository,
};
use super::model::{AuditAction, AuditEntry, BackupCode, RecoveryCode, TwoFactorSecret, User};

#[derive(Default)]
struct State {
    users: HashMap<String, User>,
    two_factor: HashMap<String, TwoFactorSecret>,
    backup_codes: HashMap<String, Vec<BackupCode>>,
    recovery_codes: HashMap<String, RecoveryCode>,
    audit: Vec<AuditEntry>,
}

/// In-memory auth store for tests and local development.
///
/// Every operation runs under one write lock, which gives the same
/// check-and-set atomicity as the conditional UPDATEs of the MySQL store.
/// Data is lost on restart and not shared across instances.
#[derive(Clone, Default)]
pub struct InMemoryAuthStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryAuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `f` to a stored user. Returns false if the user does not exist.
    pub async fn update_user(&self, user_id: &str, f: impl FnOnce(&mut User)) -> bool {
        let mut state = self.state.write().await;
        match state.users.get_mut(user_id) {
            Some(user) => {
                f(user);
                true
            }
            None => false,
        }
    }

    pub async fn audit_actions(&self, user_id: &str) -> Vec<AuditAction> {
        let state = self.state.read().await;
        state
            .audit
            .iter()
            .filter(|entry| entry.user_id.as_deref() == Some(user_id))
            .map(|entry| entry.action)
            .collect()
    }
}

#[async_trait]
impl UserRepository for InMemoryAuthStore {
    async fn create(&self, user: &User) -> Result<()> {
        let mut state = self.state.write().await;
        if state
            .users
            .values()
            .any(|u| u.email == user.email || u.username == user.username)
        {
            return Err(AuthError::AccountExists);
        }
        state.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        Ok(self.state.read().await.users.get(id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.values().find(|u| u.email == email).cloned())
    }

    async fn exists(&self, email: &str, username: &str) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state
            .users
            .values()
            .any(|u| u.email == email || u.username == username))
    }
}

#[async_trait]
impl TwoFactorRepository for InMemoryAuthStore {
    async fn find(&self, user_id: &str) -> Result<Option<TwoFactorSecret>> {
        Ok(self.state.read().await.two_factor.get(user_id).cloned())
    }

    async fn stage(&self, secret: &TwoFactorSecret, backup_codes: &[BackupCode]) -> Result<()> {
        let mut state = self.state.write().await;
        let staged = TwoFactorSecret {
            enabled: false,
            last_totp_step: None,
            enabled_at: None,
            ..secret.clone()
        };
        state.two_factor.insert(secret.user_id.clone(), staged);
        state
            .backup_codes
            .insert(secret.user_id.clone(), backup_codes.to_vec());
        Ok(())
    }

    async fn activate(&self, user_id: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.two_factor.get_mut(user_id) {
            Some(secret) if !secret.enabled => {
                secret.enabled = true;
                secret.enabled_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_totp_step(&self, user_id: &str, step: i64) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.two_factor.get_mut(user_id) {
            Some(secret) if secret.last_totp_step.is_none_or(|last| last < step) => {
                secret.last_totp_step = Some(step);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, user_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.two_factor.remove(user_id);
        state.backup_codes.remove(user_id);
        Ok(())
    }
}

#[async_trait]
impl BackupCodeRepository for InMemoryAuthStore {
    async fn find_by_user(&self, user_id: &str) -> Result<Vec<BackupCode>> {
        let state = self.state.read().await;
        Ok(state.backup_codes.get(user_id).cloned().unwrap_or_default())
    }

    async fn replace_for_user(&self, user_id: &str, codes: &[BackupCode]) -> Result<()> {
        let mut state = self.state.write().await;
        state.backup_codes.insert(user_id.to_string(), codes.to_vec());
        Ok(())
    }

    async fn consume(&self, id: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let code = state
            .backup_codes
            .values_mut()
            .flat_map(|codes| codes.iter_mut())
            .find(|code| code.id == id);

        match code {
            Some(code) if !code.used => {
                code.used = true;
                code.used_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl RecoveryCodeRepository for InMemoryAuthStore {
    async fn create(&self, code: &RecoveryCode) -> Result<()> {
        let mut state = self.state.write().await;
        state.recovery_codes.insert(code.user_id.clone(), code.clone());
        Ok(())
    }

    async fn find(&self, user_id: &str) -> Result<Option<RecoveryCode>> {
        Ok(self.state.read().await.recovery_codes.get(user_id).cloned())
    }

    async fn redeem(
        &self,
        user_id: &str,
        old_hash: &str,
        new_hash: &str,
        password_hash: &str,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let State {
            users,
            recovery_codes,
            ..
        } = &mut *state;

        let (Some(code), Some(user)) = (recovery_codes.get_mut(user_id), users.get_mut(user_id))
        else {
            return Ok(false);
        };
        if code.code_hash != old_hash {
            return Ok(false);
        }

        let now = Utc::now();
        code.code_hash = new_hash.to_string();
        code.created_at = now;
        user.password_hash = password_hash.to_string();
        user.updated_at = now;
        Ok(true)
    }
}

#[async_trait]
impl AuditRepository for InMemoryAuthStore {
    async fn record(&self, entry: &AuditEntry) -> Result<()> {
        self.state.write().await.audit.push(entry.clone());
        Ok(())
    }
}
