use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySql, Pool, Transaction};

use super::interface::{
    AuditRepository, AuthError, BackupCodeRepository, RecoveryCodeRepository, Result,
    TwoFactorRepository, UserRepository,
};
use super::model::{AuditEntry, BackupCode, RecoveryCode, TwoFactorSecret, User};

/// MySQL implementation of every auth repository.
///
/// Single-use guarantees (backup codes, TOTP steps, recovery rotation) rely on
/// conditional UPDATEs, so concurrent requests cannot both succeed.
#[derive(Clone)]
pub struct AuthCrud {
    pool: Pool<MySql>,
}

impl AuthCrud {
    pub fn new(pool: Pool<MySql>) -> Self {
        Self { pool }
    }
}

async fn insert_backup_codes(tx: &mut Transaction<'_, MySql>, codes: &[BackupCode]) -> Result<()> {
    for code in codes {
        sqlx::query(
            r#"
            INSERT INTO backup_codes (id, user_id, code_hash, used, used_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&code.id)
        .bind(&code.user_id)
        .bind(&code.code_hash)
        .bind(code.used)
        .bind(code.used_at)
        .bind(code.created_at)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

#[async_trait]
impl UserRepository for AuthCrud {
    async fn create(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, username, password_hash, is_active, is_admin, is_moderator,
                               two_factor_exempt, deleted_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.is_active)
        .bind(user.is_admin)
        .bind(user.is_moderator)
        .bind(user.two_factor_exempt)
        .bind(user.deleted_at)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            // Lost a race with a concurrent registration.
            sqlx::Error::Database(db) if db.is_unique_violation() => AuthError::AccountExists,
            other => AuthError::Database(other),
        })?;

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn exists(&self, email: &str, username: &str) -> Result<bool> {
        let result: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM users WHERE email = ? OR username = ?")
                .bind(email)
                .bind(username)
                .fetch_one(&self.pool)
                .await?;

        Ok(result.0 > 0)
    }
}

#[async_trait]
impl TwoFactorRepository for AuthCrud {
    async fn find(&self, user_id: &str) -> Result<Option<TwoFactorSecret>> {
        Ok(sqlx::query_as::<_, TwoFactorSecret>(
            "SELECT * FROM two_factor_secrets WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn stage(&self, secret: &TwoFactorSecret, backup_codes: &[BackupCode]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO two_factor_secrets (user_id, secret, enabled, last_totp_step, created_at, enabled_at)
            VALUES (?, ?, FALSE, NULL, ?, NULL)
            ON DUPLICATE KEY UPDATE
                secret = VALUES(secret),
                enabled = FALSE,
                last_totp_step = NULL,
                created_at = VALUES(created_at),
                enabled_at = NULL
            "#,
        )
        .bind(&secret.user_id)
        .bind(&secret.secret)
        .bind(secret.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM backup_codes WHERE user_id = ?")
            .bind(&secret.user_id)
            .execute(&mut *tx)
            .await?;

        insert_backup_codes(&mut tx, backup_codes).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn activate(&self, user_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE two_factor_secrets SET enabled = TRUE, enabled_at = ? WHERE user_id = ? AND enabled = FALSE",
        )
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_totp_step(&self, user_id: &str, step: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE two_factor_secrets SET last_totp_step = ?
            WHERE user_id = ? AND (last_totp_step IS NULL OR last_totp_step < ?)
            "#,
        )
        .bind(step)
        .bind(user_id)
        .bind(step)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, user_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM backup_codes WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM two_factor_secrets WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl BackupCodeRepository for AuthCrud {
    async fn find_by_user(&self, user_id: &str) -> Result<Vec<BackupCode>> {
        Ok(
            sqlx::query_as::<_, BackupCode>("SELECT * FROM backup_codes WHERE user_id = ?")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn replace_for_user(&self, user_id: &str, codes: &[BackupCode]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM backup_codes WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        insert_backup_codes(&mut tx, codes).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn consume(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE backup_codes SET used = TRUE, used_at = ? WHERE id = ? AND used = FALSE",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl RecoveryCodeRepository for AuthCrud {
    async fn create(&self, code: &RecoveryCode) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO recovery_codes (user_id, code_hash, created_at)
            VALUES (?, ?, ?)
            ON DUPLICATE KEY UPDATE code_hash = VALUES(code_hash), created_at = VALUES(created_at)
            "#,
        )
        .bind(&code.user_id)
        .bind(&code.code_hash)
        .bind(code.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(&self, user_id: &str) -> Result<Option<RecoveryCode>> {
        Ok(
            sqlx::query_as::<_, RecoveryCode>("SELECT * FROM recovery_codes WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn redeem(
        &self,
        user_id: &str,
        old_hash: &str,
        new_hash: &str,
        password_hash: &str,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let rotated = sqlx::query(
            "UPDATE recovery_codes SET code_hash = ?, created_at = ? WHERE user_id = ? AND code_hash = ?",
        )
        .bind(new_hash)
        .bind(Utc::now())
        .bind(user_id)
        .bind(old_hash)
        .execute(&mut *tx)
        .await?;

        if rotated.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
            .bind(password_hash)
            .bind(Utc::now())
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl AuditRepository for AuthCrud {
    async fn record(&self, entry: &AuditEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_entries (id, user_id, action, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(&entry.user_id)
        .bind(entry.action.as_str())
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
